//! Gmail tool handlers
//!
//! Each handler takes its typed input and returns the text shown to the
//! caller. Mailbox and credential failures are rendered into that text so the
//! calling agent can read them; only internal faults escape as errors.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tracing::{debug, warn};

use crate::attachments::AttachmentMaterializer;
use crate::dates::parse_human_date;
use crate::errors::{AppError, AppResult};
use crate::gmail::{MAX_LIST_RESULTS, Mailbox};
use crate::mime::{
    AttachmentDescriptor, AttachmentLookup, ProtectionHint, collect_attachments, extract_body,
    html_to_text, resolve_attachment,
};
use crate::models::{
    GetEmailAttachmentInput, GetEmailContentInput, GmailMessage, SearchEmailsInput,
};

/// Gmail tool set bound to a mailbox and an attachment renderer
pub struct GmailTools {
    mailbox: Arc<dyn Mailbox>,
    materializer: Arc<AttachmentMaterializer>,
}

impl GmailTools {
    pub fn new(mailbox: Arc<dyn Mailbox>, materializer: Arc<AttachmentMaterializer>) -> Self {
        Self {
            mailbox,
            materializer,
        }
    }

    /// Tool: search messages and list their headers and snippets
    pub async fn search_emails(&self, input: SearchEmailsInput) -> AppResult<String> {
        let query = build_search_query(&input, Local::now().date_naive());
        let max_results = input.max_results.clamp(1, MAX_LIST_RESULTS);
        debug!(%query, max_results, "searching mailbox");

        match self.search_emails_impl(&query, max_results).await {
            Ok(text) => Ok(text),
            Err(e) => Ok(format!("Error searching emails: {e}")),
        }
    }

    async fn search_emails_impl(&self, query: &str, max_results: u32) -> AppResult<String> {
        let ids = self.mailbox.search(query, max_results).await?;
        if ids.is_empty() {
            return Ok("No messages found.".to_owned());
        }

        let mut entries = Vec::with_capacity(ids.len());
        for id in &ids {
            let msg = self.mailbox.get_metadata(id).await?;
            entries.push(format!(
                "ID: {id}\nDate: {}\nFrom: {}\nSubject: {}\nSnippet: {}\n---",
                msg.header("Date").unwrap_or("Unknown Date"),
                msg.header("From").unwrap_or("Unknown Sender"),
                msg.header("Subject").unwrap_or("No Subject"),
                msg.snippet.as_deref().unwrap_or_default(),
            ));
        }
        Ok(entries.join("\n"))
    }

    /// Tool: full message with normalized body and attachment listing
    pub async fn get_email_content(&self, input: GetEmailContentInput) -> AppResult<String> {
        match self.mailbox.get_full(&input.email_id).await {
            Ok(msg) => Ok(format_email(&input.email_id, &msg)),
            Err(e) => Ok(format!("Error fetching email {}: {e}", input.email_id)),
        }
    }

    /// Tool: fetch one attachment and render it by content type
    pub async fn get_email_attachment(&self, input: GetEmailAttachmentInput) -> AppResult<String> {
        let msg = match self.mailbox.get_full(&input.email_id).await {
            Ok(msg) => msg,
            Err(e) => return Ok(format!("Error fetching email {}: {e}", input.email_id)),
        };

        let catalog = msg
            .payload
            .as_ref()
            .map(collect_attachments)
            .unwrap_or_default();
        let descriptor = match resolve_attachment(&catalog, &input.attachment_id) {
            AttachmentLookup::Found(descriptor) => descriptor.clone(),
            AttachmentLookup::NotFound { available } => {
                return Ok(attachment_not_found(&input, &available));
            }
        };

        let encoded = match &descriptor.inline_data {
            Some(data) => data.clone(),
            None => match self.fetch_attachment(&input.email_id, &descriptor).await {
                Ok(data) => data,
                Err(e) => {
                    return Ok(format!(
                        "Error fetching attachment {} from email {}: {e}",
                        descriptor.filename, input.email_id
                    ));
                }
            },
        };

        let materializer = Arc::clone(&self.materializer);
        let password = input.password;
        let rendered = tokio::task::spawn_blocking(move || {
            materializer.render_encoded(&descriptor, &encoded, password.as_deref())
        })
        .await
        .map_err(|e| AppError::Internal(format!("attachment rendering aborted: {e}")))?;

        Ok(rendered.to_text())
    }

    async fn fetch_attachment(
        &self,
        email_id: &str,
        descriptor: &AttachmentDescriptor,
    ) -> AppResult<String> {
        let body = self
            .mailbox
            .get_attachment(email_id, &descriptor.attachment_id)
            .await?;
        body.data.ok_or_else(|| {
            AppError::Decode(format!("attachment {} has no data", descriptor.filename))
        })
    }
}

/// Assemble a Gmail search query from the tool filters
///
/// Parts are joined with spaces in a fixed order. Dates that do not parse are
/// dropped rather than failing the search.
pub fn build_search_query(input: &SearchEmailsInput, today: NaiveDate) -> String {
    let mut parts = Vec::new();
    if let Some(v) = non_empty(&input.query) {
        parts.push(v.to_owned());
    }
    if let Some(v) = non_empty(&input.sender) {
        parts.push(format!("from:{v}"));
    }
    if let Some(v) = non_empty(&input.recipient) {
        parts.push(format!("to:{v}"));
    }
    if let Some(v) = non_empty(&input.subject) {
        parts.push(format!("subject:{v}"));
    }
    for (operator, value) in [("after", &input.start_date), ("before", &input.end_date)] {
        let Some(text) = non_empty(value) else {
            continue;
        };
        match parse_human_date(text, today) {
            Some(date) => parts.push(format!("{operator}:{}", date.format("%Y/%m/%d"))),
            None => warn!(operator, value = text, "ignoring unparseable date filter"),
        }
    }
    parts.join(" ")
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn format_email(email_id: &str, msg: &GmailMessage) -> String {
    let (body, attachments) = match &msg.payload {
        Some(root) => {
            let normalized = extract_body(root);
            let body = if !normalized.plain_text.trim().is_empty() {
                normalized.plain_text
            } else if !normalized.html_text.trim().is_empty() {
                html_to_text(&normalized.html_text)
            } else {
                msg.snippet.clone().unwrap_or_default()
            };
            (body, collect_attachments(root))
        }
        None => (msg.snippet.clone().unwrap_or_default(), Vec::new()),
    };

    let mut out = format!(
        "Email ID: {email_id}\nFrom: {}\nTo: {}\nDate: {}\nSubject: {}\n\n--- Body ---\n{body}",
        msg.header("From").unwrap_or("Unknown Sender"),
        msg.header("To").unwrap_or("Unknown Recipient"),
        msg.header("Date").unwrap_or("Unknown Date"),
        msg.header("Subject").unwrap_or("No Subject"),
    );

    if !attachments.is_empty() {
        out.push_str(&format!("\n\n--- Attachments ({}) ---", attachments.len()));
        for a in &attachments {
            out.push_str(&format!(
                "\n- {} ({}, {} bytes) [ID: {}]",
                a.filename, a.mime_type, a.declared_size, a.attachment_id
            ));
            if a.protection == ProtectionHint::Unknown {
                out.push_str(" (password protection unknown; pass `password` if opening fails)");
            }
        }
    }
    out
}

fn attachment_not_found(input: &GetEmailAttachmentInput, available: &[String]) -> String {
    if available.is_empty() {
        return format!(
            "Error: attachment {} not found. Email {} has no attachments.",
            input.attachment_id, input.email_id
        );
    }
    format!(
        "Error: attachment {} not found in email {}. Available attachments: {}",
        input.attachment_id,
        input.email_id,
        available.join(", ")
    )
}
