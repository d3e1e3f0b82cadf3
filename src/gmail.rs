//! Gmail REST transport
//!
//! [`Mailbox`] is the boundary the tool handlers consume: list matching
//! message ids, fetch a message (metadata or full), fetch an attachment
//! payload. [`GmailClient`] implements it over the Gmail v1 REST API with a
//! bearer token from the injected [`TokenProvider`]. Failures are returned,
//! not retried.

use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::{TokenProvider, bearer};
use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::mime::truncate_chars;
use crate::models::{AttachmentBody, GmailMessage, MessageList};

/// Upper bound Gmail accepts for `maxResults`
pub const MAX_LIST_RESULTS: u32 = 500;
/// Characters of an upstream error body kept in error messages
const ERROR_BODY_MAX_CHARS: usize = 300;

/// Headers requested for metadata fetches
const METADATA_HEADERS: [&str; 3] = ["From", "Subject", "Date"];

/// Remote mailbox operations used by the tools
pub trait Mailbox: Send + Sync {
    /// Ids of messages matching `query`, newest first, at most `max_results`
    fn search<'a>(
        &'a self,
        query: &'a str,
        max_results: u32,
    ) -> BoxFuture<'a, AppResult<Vec<String>>>;

    /// Message with From/Subject/Date headers and snippet only
    fn get_metadata<'a>(&'a self, id: &'a str) -> BoxFuture<'a, AppResult<GmailMessage>>;

    /// Message with the full part tree
    fn get_full<'a>(&'a self, id: &'a str) -> BoxFuture<'a, AppResult<GmailMessage>>;

    /// Attachment payload (base64url) by id
    fn get_attachment<'a>(
        &'a self,
        message_id: &'a str,
        attachment_id: &'a str,
    ) -> BoxFuture<'a, AppResult<AttachmentBody>>;
}

/// Gmail v1 REST client for the authenticated user (`users/me`)
pub struct GmailClient {
    http: reqwest::Client,
    api_base: String,
    tokens: Arc<dyn TokenProvider>,
}

impl GmailClient {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_owned(),
            tokens,
        }
    }

    /// Build a client from server config
    pub fn from_config(config: &ServerConfig, http: reqwest::Client, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::new(http, config.api_base.clone(), tokens)
    }

    fn messages_url(&self) -> String {
        format!("{}/users/me/messages", self.api_base)
    }

    fn message_url(&self, id: &str) -> String {
        format!("{}/{}", self.messages_url(), urlencoding::encode(id))
    }

    fn attachment_url(&self, message_id: &str, attachment_id: &str) -> String {
        format!(
            "{}/attachments/{}",
            self.message_url(message_id),
            urlencoding::encode(attachment_id)
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        let token = self.tokens.access_token().await?;
        debug!(%url, "gmail request");
        let response = self
            .http
            .get(&url)
            .query(query)
            .header(AUTHORIZATION, bearer(&token))
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::Decode(format!("unexpected response from {url}: {e}")))
    }
}

impl Mailbox for GmailClient {
    fn search<'a>(
        &'a self,
        query: &'a str,
        max_results: u32,
    ) -> BoxFuture<'a, AppResult<Vec<String>>> {
        Box::pin(async move {
            let mut params = vec![("maxResults", max_results.clamp(1, MAX_LIST_RESULTS).to_string())];
            if !query.is_empty() {
                params.push(("q", query.to_owned()));
            }
            let list: MessageList = self.get_json(self.messages_url(), &params).await?;
            Ok(list.messages.into_iter().map(|m| m.id).collect())
        })
    }

    fn get_metadata<'a>(&'a self, id: &'a str) -> BoxFuture<'a, AppResult<GmailMessage>> {
        Box::pin(async move {
            let mut params = vec![("format", "metadata".to_owned())];
            params.extend(METADATA_HEADERS.iter().map(|h| ("metadataHeaders", (*h).to_owned())));
            self.get_json(self.message_url(id), &params).await
        })
    }

    fn get_full<'a>(&'a self, id: &'a str) -> BoxFuture<'a, AppResult<GmailMessage>> {
        Box::pin(async move {
            self.get_json(self.message_url(id), &[("format", "full".to_owned())])
                .await
        })
    }

    fn get_attachment<'a>(
        &'a self,
        message_id: &'a str,
        attachment_id: &'a str,
    ) -> BoxFuture<'a, AppResult<AttachmentBody>> {
        Box::pin(async move {
            self.get_json(self.attachment_url(message_id, attachment_id), &[])
                .await
        })
    }
}

/// Map a non-success upstream status to an error
fn status_error(status: StatusCode, body: &str) -> AppError {
    let excerpt = truncate_chars(body.trim().to_owned(), ERROR_BODY_MAX_CHARS);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AppError::AuthFailed(format!("Gmail rejected credentials ({status}): {excerpt}"))
        }
        StatusCode::NOT_FOUND => AppError::NotFound(format!("Gmail returned 404: {excerpt}")),
        _ => AppError::Upstream(format!("Gmail returned {status}: {excerpt}")),
    }
}
