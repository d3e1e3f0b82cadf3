//! Tool registry and dispatcher
//!
//! Declares the callable tools (name, description, parameter schema, handler)
//! and routes `tools/call` invocations to them. The parameter schema is only
//! advertised; handlers deserialize their own typed inputs.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;
use rmcp::model::ErrorData;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{error, warn};

use crate::errors::{AppError, AppResult, internal_error, method_not_found};
use crate::tools::GmailTools;

/// Handler bound to a tool name
pub type ToolHandler = for<'a> fn(&'a GmailTools, Value) -> BoxFuture<'a, AppResult<String>>;

/// JSON type of an advertised parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
}

impl ParamKind {
    fn as_json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
        }
    }
}

/// One advertised tool parameter
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

const fn param(
    name: &'static str,
    kind: ParamKind,
    required: bool,
    description: &'static str,
) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required,
        description,
    }
}

/// A registered tool
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    pub handler: ToolHandler,
}

impl ToolDescriptor {
    /// JSON schema object advertised in `tools/list`
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                (
                    p.name.to_owned(),
                    json!({ "type": p.kind.as_json_type(), "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();

        let mut schema = json!({ "type": "object", "properties": properties });
        if !required.is_empty() {
            schema["required"] = json!(required);
        }
        schema
    }

    /// `tools/list` entry
    pub fn to_listing(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }
}

/// Immutable set of tools plus the state their handlers run against
pub struct ToolRegistry {
    tools: GmailTools,
    descriptors: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    /// Registry with the Gmail tools
    pub fn new(tools: GmailTools) -> Self {
        Self::with_descriptors(tools, gmail_descriptors())
    }

    pub fn with_descriptors(tools: GmailTools, descriptors: Vec<ToolDescriptor>) -> Self {
        Self { tools, descriptors }
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    /// Invoke a tool by name
    ///
    /// # Errors
    ///
    /// - `-32601` for an unknown tool
    /// - `-32602` when the arguments do not fit the tool's input
    /// - `-32603` when the handler fails internally or panics
    pub async fn dispatch(&self, name: &str, arguments: Value) -> Result<String, ErrorData> {
        let Some(tool) = self.descriptors.iter().find(|d| d.name == name) else {
            warn!(tool = name, "unknown tool");
            return Err(method_not_found(format!("Unknown tool: {name}")));
        };

        let outcome = AssertUnwindSafe((tool.handler)(&self.tools, arguments))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, "tool call failed");
                Err(e.to_error_data())
            }
            Err(_) => {
                error!(tool = name, "tool handler panicked");
                Err(internal_error(format!("Internal error: tool {name} failed")))
            }
        }
    }
}

/// Decode tool arguments into a typed input; absent arguments mean `{}`
pub fn parse_arguments<T: DeserializeOwned>(arguments: Value) -> AppResult<T> {
    let arguments = match arguments {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(arguments).map_err(|e| AppError::invalid(format!("invalid arguments: {e}")))
}

fn gmail_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "search_emails",
            description: "Search for emails in Gmail and return lightweight metadata (ID, subject, \
                          sender, date, snippet). Use get_email_content() to fetch full email body.",
            params: vec![
                param("query", ParamKind::String, false, "General search query (e.g., 'receipt')."),
                param(
                    "sender",
                    ParamKind::String,
                    false,
                    "Filter by sender (e.g., 'swiggy', 'uber'). Matches names or emails.",
                ),
                param("recipient", ParamKind::String, false, "Filter by recipient."),
                param("subject", ParamKind::String, false, "Filter by subject line."),
                param(
                    "start_date",
                    ParamKind::String,
                    false,
                    "Start date (inclusive) in any common format (e.g., '2024-01-01', 'last week').",
                ),
                param("end_date", ParamKind::String, false, "End date (exclusive) in any common format."),
                param(
                    "max_results",
                    ParamKind::Integer,
                    false,
                    "Maximum number of emails to return (default 10, at most 500).",
                ),
            ],
            handler: search_emails,
        },
        ToolDescriptor {
            name: "get_email_content",
            description: "Get the full content of a specific email by ID, including the list of \
                          attachments with their IDs.",
            params: vec![param(
                "email_id",
                ParamKind::String,
                true,
                "The Gmail message ID (from search_emails results).",
            )],
            handler: get_email_content,
        },
        ToolDescriptor {
            name: "get_email_attachment",
            description: "Download an attachment and return its content. PDFs are converted to \
                          text, text files are returned in full, images as data URIs and other \
                          files as base64.",
            params: vec![
                param("email_id", ParamKind::String, true, "The Gmail message ID."),
                param(
                    "attachment_id",
                    ParamKind::String,
                    true,
                    "The attachment ID (from get_email_content results).",
                ),
                param("password", ParamKind::String, false, "Password for a protected PDF."),
            ],
            handler: get_email_attachment,
        },
    ]
}

fn search_emails(tools: &GmailTools, arguments: Value) -> BoxFuture<'_, AppResult<String>> {
    Box::pin(async move { tools.search_emails(parse_arguments(arguments)?).await })
}

fn get_email_content(tools: &GmailTools, arguments: Value) -> BoxFuture<'_, AppResult<String>> {
    Box::pin(async move { tools.get_email_content(parse_arguments(arguments)?).await })
}

fn get_email_attachment(tools: &GmailTools, arguments: Value) -> BoxFuture<'_, AppResult<String>> {
    Box::pin(async move { tools.get_email_attachment(parse_arguments(arguments)?).await })
}
