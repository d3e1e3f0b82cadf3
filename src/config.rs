//! Configuration module for server and Gmail API settings
//!
//! All configuration is loaded from environment variables (after `dotenvy`
//! has merged any `.env` file). Most keys follow the pattern
//! `GMAIL_MCP_<KEY>`; the listen port keeps the conventional `PORT`.

use std::env;
use std::env::VarError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::errors::{AppError, AppResult};

/// Default Gmail REST API base URL
pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
/// Default OAuth token endpoint used for refresh
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Server-wide configuration
///
/// Cloned into the transport and the Gmail client at startup; never mutated
/// afterwards.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: String,
    /// Listen port
    pub port: u16,
    /// Authorized-user token file (access + refresh token)
    pub token_file: PathBuf,
    /// OAuth client secrets file, consulted when the token file lacks client ids
    pub credentials_file: PathBuf,
    /// Static bearer token; when set the token files are ignored
    pub access_token: Option<SecretString>,
    /// Gmail REST API base URL
    pub api_base: String,
    /// OAuth token endpoint
    pub token_uri: String,
    /// Upstream HTTP request timeout in milliseconds
    pub http_timeout_ms: u64,
    /// Interval between SSE keep-alive frames in seconds
    pub keepalive_secs: u64,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a variable is set but malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// PORT=3001
    /// GMAIL_MCP_TOKEN_FILE=/var/lib/gmail-mcp/token.json
    /// GMAIL_MCP_KEEPALIVE_SECS=15
    /// RUST_LOG=gmail_mcp_rs=debug
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        Ok(Self {
            bind_addr: optional_env("GMAIL_MCP_BIND_ADDR")?.unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parse_env("PORT", 3001)?,
            token_file: optional_env("GMAIL_MCP_TOKEN_FILE")?
                .map_or_else(|| PathBuf::from("token.json"), PathBuf::from),
            credentials_file: optional_env("GMAIL_MCP_CREDENTIALS_FILE")?
                .map_or_else(|| PathBuf::from("credentials.json"), PathBuf::from),
            access_token: optional_env("GMAIL_MCP_ACCESS_TOKEN")?
                .map(|t| SecretString::new(t.into())),
            api_base: optional_env("GMAIL_MCP_API_BASE")?
                .unwrap_or_else(|| DEFAULT_API_BASE.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            token_uri: optional_env("GMAIL_MCP_TOKEN_URI")?
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_owned()),
            http_timeout_ms: parse_env("GMAIL_MCP_HTTP_TIMEOUT_MS", 30_000)?,
            keepalive_secs: parse_env("GMAIL_MCP_KEEPALIVE_SECS", 30)?,
        })
    }

    /// Upstream request timeout
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Keep-alive interval, never shorter than one second
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }
}

/// Read an optional environment variable; empty values count as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v.trim().to_owned())),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a numeric environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but does not parse.
fn parse_env<T: FromStr>(key: &str, default: T) -> AppResult<T> {
    match optional_env(key)? {
        Some(v) => parse_value(key, &v),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> AppResult<T> {
    value.trim().parse::<T>().map_err(|_| {
        AppError::InvalidInput(format!(
            "invalid {} environment variable {key}: '{value}'",
            std::any::type_name::<T>()
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ServerConfig, parse_value};

    fn sample() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1".to_owned(),
            port: 3001,
            token_file: "token.json".into(),
            credentials_file: "credentials.json".into(),
            access_token: None,
            api_base: super::DEFAULT_API_BASE.to_owned(),
            token_uri: super::DEFAULT_TOKEN_URI.to_owned(),
            http_timeout_ms: 1_500,
            keepalive_secs: 0,
        }
    }

    #[test]
    fn parse_value_accepts_numbers_with_whitespace() {
        assert_eq!(parse_value::<u16>("PORT", " 8080 ").expect("valid"), 8080);
        assert_eq!(parse_value::<u64>("X", "30000").expect("valid"), 30_000);
    }

    #[test]
    fn parse_value_rejects_out_of_range_and_garbage() {
        for invalid in ["70000", "-1", "abc", ""] {
            let err = parse_value::<u16>("PORT", invalid).expect_err("must fail");
            assert!(err.to_string().contains("PORT"));
        }
    }

    #[test]
    fn durations_are_derived_from_settings() {
        let config = sample();
        assert_eq!(config.http_timeout(), Duration::from_millis(1_500));
        assert_eq!(config.keepalive_interval(), Duration::from_secs(1));
    }
}
