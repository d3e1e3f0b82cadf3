//! Input/output DTOs for the Gmail REST API and the MCP tools
//!
//! Gmail responses are decoded leniently: every field is optional or
//! defaulted so that sparse payloads (metadata-only fetches, parts without a
//! body) never fail deserialization.

use serde::{Deserialize, Serialize};

use crate::mime::MessagePart;

/// Message resource as returned by `users.messages.get`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GmailMessage {
    /// Opaque Gmail message id
    pub id: String,
    /// Thread the message belongs to
    pub thread_id: Option<String>,
    /// Short provider-generated preview of the body
    pub snippet: Option<String>,
    /// Root MIME part (absent for `format=minimal`)
    pub payload: Option<MessagePart>,
}

impl GmailMessage {
    /// Root header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload.as_ref().and_then(|p| p.header(name))
    }
}

/// Response of `users.messages.list`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageList {
    /// Matching message references; omitted by Gmail when nothing matched
    pub messages: Vec<MessageRef>,
    /// Token for the next page (not followed; `max_results` bounds the call)
    pub next_page_token: Option<String>,
    /// Estimated total hits
    pub result_size_estimate: Option<u64>,
}

/// Message reference inside a list response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageRef {
    pub id: String,
    pub thread_id: Option<String>,
}

/// Response of `users.messages.attachments.get`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachmentBody {
    /// Attachment bytes, base64url encoded
    pub data: Option<String>,
    /// Size in bytes as reported by Gmail
    pub size: u64,
}

/// Input: `search_emails`
#[derive(Debug, Clone, Deserialize)]
pub struct SearchEmailsInput {
    /// General search terms, passed through verbatim
    #[serde(default)]
    pub query: Option<String>,
    /// Sender filter (`from:`)
    #[serde(default)]
    pub sender: Option<String>,
    /// Recipient filter (`to:`)
    #[serde(default)]
    pub recipient: Option<String>,
    /// Subject filter (`subject:`)
    #[serde(default)]
    pub subject: Option<String>,
    /// Inclusive lower date bound, free text
    #[serde(default)]
    pub start_date: Option<String>,
    /// Exclusive upper date bound, free text
    #[serde(default)]
    pub end_date: Option<String>,
    /// Maximum number of messages (default 10)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

/// Input: `get_email_content`
#[derive(Debug, Clone, Deserialize)]
pub struct GetEmailContentInput {
    /// Gmail message id from `search_emails`
    pub email_id: String,
}

/// Input: `get_email_attachment`
#[derive(Debug, Clone, Deserialize)]
pub struct GetEmailAttachmentInput {
    /// Gmail message id
    pub email_id: String,
    /// Attachment id from `get_email_content`
    pub attachment_id: String,
    /// Password for protected PDFs
    #[serde(default)]
    pub password: Option<String>,
}

/// Default value for `max_results` in search
///
/// Matches the page size most callers want for a first look.
fn default_max_results() -> u32 {
    10
}
