//! Application error model with JSON-RPC error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to the appropriate MCP `ErrorData` so that every fault
//! reaching the dispatcher leaves as a well-formed JSON-RPC error object.

use rmcp::model::{ErrorCode, ErrorData};
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Covers all error cases the Gmail MCP server may encounter. Each variant maps
/// to an appropriate JSON-RPC error code in [`ErrorData`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (missing parameter, malformed argument, bad config value)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Resource not found (message, attachment, tool)
    #[error("not found: {0}")]
    NotFound(String),
    /// Credential material missing, expired without refresh token, or rejected
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Mailbox API returned an error or could not be reached
    #[error("mailbox request failed: {0}")]
    Upstream(String),
    /// Payload could not be decoded (base64, JSON body)
    #[error("decode failed: {0}")]
    Decode(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Convert to MCP `ErrorData`
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_params` (-32602)
    /// - `NotFound` → `resource_not_found`
    /// - `AuthFailed` → `invalid_request`
    /// - `Upstream`, `Decode`, `Internal` → `internal_error` (-32603)
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            Self::InvalidInput(msg) => {
                ErrorData::invalid_params(msg.clone(), Some(json!({ "code": "invalid_input" })))
            }
            Self::NotFound(msg) => {
                ErrorData::resource_not_found(msg.clone(), Some(json!({ "code": "not_found" })))
            }
            Self::AuthFailed(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(json!({ "code": "auth_failed" })))
            }
            Self::Upstream(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "upstream" })))
            }
            Self::Decode(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "decode" })))
            }
            Self::Internal(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "internal" })))
            }
        }
    }
}

/// JSON-RPC "method not found" error, used for unknown methods and unknown tools
pub fn method_not_found(message: impl Into<String>) -> ErrorData {
    ErrorData::new(ErrorCode::METHOD_NOT_FOUND, message.into(), None)
}

/// JSON-RPC "internal error" for faults no handler caught
pub fn internal_error(message: impl Into<String>) -> ErrorData {
    ErrorData::new(ErrorCode::INTERNAL_ERROR, message.into(), None)
}

/// JSON-RPC "parse error" for request bodies that are not JSON-RPC
pub fn parse_error(message: impl Into<String>) -> ErrorData {
    ErrorData::new(ErrorCode::PARSE_ERROR, message.into(), None)
}

/// Type alias for fallible return values
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use rmcp::model::ErrorCode;

    use super::{AppError, method_not_found};

    #[test]
    fn invalid_input_maps_to_invalid_params() {
        let data = AppError::invalid("email_id is required").to_error_data();
        assert_eq!(data.code, ErrorCode::INVALID_PARAMS);
        assert_eq!(data.message, "email_id is required");
    }

    #[test]
    fn upstream_maps_to_internal_error() {
        let data = AppError::Upstream("503".to_owned()).to_error_data();
        assert_eq!(data.code, ErrorCode::INTERNAL_ERROR);
    }

    #[test]
    fn method_not_found_uses_reserved_code() {
        let data = method_not_found("Unknown tool: nope");
        assert_eq!(data.code.0, -32601);
    }
}
