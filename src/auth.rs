//! Access credential providers
//!
//! The Gmail client asks a [`TokenProvider`] for a bearer token on every
//! request. Two providers exist: a static token from the environment, and an
//! authorized-user token file that is refreshed through the OAuth token
//! endpoint when it expires. The interactive consent flow is not performed
//! here; a missing token file is an authentication error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use futures::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};

/// Tokens this close to expiry are refreshed early
const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Source of a valid bearer token
pub trait TokenProvider: Send + Sync {
    /// Return a token that is valid now, refreshing if needed
    fn access_token(&self) -> BoxFuture<'_, AppResult<SecretString>>;
}

/// Fixed token, typically from `GMAIL_MCP_ACCESS_TOKEN`
pub struct StaticTokenProvider {
    token: SecretString,
}

impl StaticTokenProvider {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn access_token(&self) -> BoxFuture<'_, AppResult<SecretString>> {
        let token = self.token.clone();
        Box::pin(async move { Ok(token) })
    }
}

/// Authorized-user token file as written by Google's client libraries
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuthorizedUserFile {
    token: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    token_uri: Option<String>,
    expiry: Option<String>,
}

/// OAuth client secrets file (`installed` or `web` application)
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClientSecrets {
    client_id: Option<String>,
    client_secret: Option<String>,
    token_uri: Option<String>,
}

/// Successful token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

/// Error body from the token endpoint
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenErrorResponse {
    error: String,
    error_description: String,
}

#[derive(Clone)]
struct CachedToken {
    token: SecretString,
    expires_at: Option<DateTime<Utc>>,
}

/// Token file backed provider with refresh-on-expiry
///
/// The refreshed token is cached in memory; the file on disk is treated as
/// read-only input.
pub struct AuthorizedUserProvider {
    token_file: PathBuf,
    credentials_file: PathBuf,
    token_uri: String,
    http: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl AuthorizedUserProvider {
    pub fn new(
        token_file: PathBuf,
        credentials_file: PathBuf,
        token_uri: String,
        http: reqwest::Client,
    ) -> Self {
        Self {
            token_file,
            credentials_file,
            token_uri,
            http,
            cache: Mutex::new(None),
        }
    }

    async fn current_token(&self) -> AppResult<SecretString> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && is_fresh(cached.expires_at, Utc::now())
        {
            return Ok(cached.token.clone());
        }

        let file = load_token_file(&self.token_file, &self.credentials_file).await?;
        let expires_at = file.expiry.as_deref().and_then(parse_expiry);
        if let Some(token) = file.token.clone().or_else(|| file.access_token.clone())
            && is_fresh(expires_at, Utc::now())
        {
            debug!(path = %self.token_file.display(), "using stored access token");
            let cached = CachedToken {
                token: SecretString::new(token.into()),
                expires_at,
            };
            *cache = Some(cached.clone());
            return Ok(cached.token);
        }

        let refreshed = self.refresh(file).await?;
        *cache = Some(refreshed.clone());
        Ok(refreshed.token)
    }

    async fn refresh(&self, file: AuthorizedUserFile) -> AppResult<CachedToken> {
        let refresh_token = file.refresh_token.clone().ok_or_else(|| {
            AppError::AuthFailed(format!(
                "stored token in {} is expired and has no refresh_token; re-run the OAuth consent flow",
                self.token_file.display()
            ))
        })?;

        let mut client_id = file.client_id.clone();
        let mut client_secret = file.client_secret.clone();
        let mut token_uri = file.token_uri.clone();
        if client_id.is_none() || client_secret.is_none() {
            let secrets = load_client_secrets(&self.credentials_file).await?;
            client_id = client_id.or(secrets.client_id);
            client_secret = client_secret.or(secrets.client_secret);
            token_uri = token_uri.or(secrets.token_uri);
        }
        let client_id = client_id.ok_or_else(|| {
            AppError::AuthFailed("client_id missing from token and credentials files".to_owned())
        })?;
        let token_uri = token_uri.unwrap_or_else(|| self.token_uri.clone());

        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token.as_str());
        params.insert("client_id", client_id.as_str());
        if let Some(secret) = &client_secret {
            params.insert("client_secret", secret.as_str());
        }

        info!(%token_uri, "refreshing Gmail access token");
        let response = self
            .http
            .post(&token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::AuthFailed(format!("token refresh request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error: TokenErrorResponse = response.json().await.unwrap_or_default();
            return Err(AppError::AuthFailed(format!(
                "token refresh rejected ({status}): {} {}",
                error.error, error.error_description
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::AuthFailed(format!("invalid token refresh response: {e}")))?;
        Ok(CachedToken {
            token: SecretString::new(body.access_token.into()),
            expires_at: body
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        })
    }
}

impl TokenProvider for AuthorizedUserProvider {
    fn access_token(&self) -> BoxFuture<'_, AppResult<SecretString>> {
        Box::pin(self.current_token())
    }
}

async fn load_token_file(token_file: &Path, credentials_file: &Path) -> AppResult<AuthorizedUserFile> {
    let raw = match tokio::fs::read_to_string(token_file).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let hint = if tokio::fs::try_exists(credentials_file).await.unwrap_or(false) {
                "complete the OAuth consent flow to create it".to_owned()
            } else {
                format!(
                    "{} not found either; download it from Google Cloud Console",
                    credentials_file.display()
                )
            };
            return Err(AppError::AuthFailed(format!(
                "token file {} not found; {hint}",
                token_file.display()
            )));
        }
        Err(e) => {
            return Err(AppError::AuthFailed(format!(
                "failed reading {}: {e}",
                token_file.display()
            )));
        }
    };
    serde_json::from_str(&raw).map_err(|e| {
        AppError::AuthFailed(format!("malformed token file {}: {e}", token_file.display()))
    })
}

async fn load_client_secrets(path: &Path) -> AppResult<ClientSecrets> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        AppError::AuthFailed(format!(
            "{} not found ({e}); download it from Google Cloud Console",
            path.display()
        ))
    })?;
    let file: ClientSecretsFile = serde_json::from_str(&raw)
        .map_err(|e| AppError::AuthFailed(format!("malformed {}: {e}", path.display())))?;
    file.installed
        .or(file.web)
        .ok_or_else(|| AppError::AuthFailed(format!("{} has no client section", path.display())))
}

/// Whether a token with this expiry is still usable at `now`
///
/// Tokens without an expiry are assumed valid.
fn is_fresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_none_or(|exp| now + Duration::seconds(EXPIRY_SKEW_SECONDS) < exp)
}

/// Parse RFC 3339 or the naive ISO form Google's libraries write
fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Expose a token for an `Authorization` header
pub fn bearer(token: &SecretString) -> String {
    format!("Bearer {}", token.expose_secret())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{Duration, TimeZone, Utc};
    use secrecy::{ExposeSecret, SecretString};

    use super::{
        AuthorizedUserProvider, StaticTokenProvider, TokenProvider, bearer, is_fresh, parse_expiry,
    };
    use crate::errors::AppError;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gmail-mcp-auth-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    fn provider(dir: &std::path::Path) -> AuthorizedUserProvider {
        AuthorizedUserProvider::new(
            dir.join("token.json"),
            dir.join("credentials.json"),
            "http://127.0.0.1:9/token".to_owned(),
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn static_provider_returns_configured_token() {
        let provider = StaticTokenProvider::new(SecretString::new("abc".into()));
        let token = provider.access_token().await.expect("token");
        assert_eq!(bearer(&token), "Bearer abc");
    }

    #[tokio::test]
    async fn fresh_stored_token_is_used_without_refresh() {
        let dir = scratch_dir();
        let expiry = (Utc::now() + Duration::hours(1)).to_rfc3339();
        std::fs::write(
            dir.join("token.json"),
            format!(r#"{{"token":"stored","refresh_token":"r","expiry":"{expiry}"}}"#),
        )
        .expect("write token");

        let token = provider(&dir).access_token().await.expect("token");
        assert_eq!(token.expose_secret(), "stored");
    }

    #[tokio::test]
    async fn missing_token_file_is_auth_failure() {
        let dir = scratch_dir();
        let err = provider(&dir).access_token().await.expect_err("must fail");
        assert!(matches!(err, AppError::AuthFailed(_)));
        assert!(err.to_string().contains("credentials.json"));
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_fails() {
        let dir = scratch_dir();
        std::fs::write(
            dir.join("token.json"),
            r#"{"token":"old","expiry":"2020-01-01T00:00:00Z"}"#,
        )
        .expect("write token");

        let err = provider(&dir).access_token().await.expect_err("must fail");
        assert!(err.to_string().contains("no refresh_token"));
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_once_and_cached() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        use axum::routing::post;
        use axum::{Json, Router};
        use serde_json::json;

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/token",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"access_token": "fresh", "expires_in": 3600}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        let dir = scratch_dir();
        std::fs::write(
            dir.join("token.json"),
            r#"{"token":"old","refresh_token":"r","client_id":"cid","client_secret":"cs","expiry":"2020-01-01T00:00:00Z"}"#,
        )
        .expect("write token");
        let provider = AuthorizedUserProvider::new(
            dir.join("token.json"),
            dir.join("credentials.json"),
            format!("http://{addr}/token"),
            reqwest::Client::new(),
        );

        for _ in 0..2 {
            let token = provider.access_token().await.expect("token");
            assert_eq!(token.expose_secret(), "fresh");
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn freshness_honours_skew() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        assert!(is_fresh(None, now));
        assert!(is_fresh(Some(now + Duration::minutes(5)), now));
        assert!(!is_fresh(Some(now + Duration::seconds(30)), now));
        assert!(!is_fresh(Some(now - Duration::minutes(1)), now));
    }

    #[test]
    fn expiry_parses_rfc3339_and_naive_forms() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(parse_expiry("2025-03-04T05:06:07Z"), Some(expected));
        assert_eq!(parse_expiry("2025-03-04T05:06:07.000000"), Some(expected));
        assert_eq!(parse_expiry("not a date"), None);
    }
}
