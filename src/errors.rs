//! Application error model with MCP error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for the poller, the EWS
//! transport and the state store, and maps each variant to the appropriate MCP
//! `ErrorData` type for protocol compliance.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Covers all error cases the trigger may encounter. Each variant maps to an
/// appropriate MCP error code in [`ErrorData`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, malformed request)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Resource not found (account, folder, item, attachment)
    #[error("not found: {0}")]
    NotFound(String),
    /// Authentication failure (bad credentials, account disabled)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Operation timeout (connect, EWS response)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Failure reaching the mail server or an error response from it
    #[error("transport error: {0}")]
    Transport(String),
    /// Tracking state could not be written after a poll decision
    #[error("failed to persist tracking state: {0}")]
    StatePersist(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether a retry of the same call might succeed
    ///
    /// Only transport failures and timeouts are transient. Authentication,
    /// validation and lookup failures repeat identically on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// Convert to MCP `ErrorData`
    ///
    /// Maps each `AppError` variant to the appropriate MCP error type and
    /// includes a structured `code` field for client error handling.
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_params`
    /// - `NotFound` → `resource_not_found`
    /// - `AuthFailed` → `invalid_request`
    /// - `Timeout` → `internal_error`
    /// - `Transport` → `internal_error`
    /// - `StatePersist` → `internal_error`
    /// - `Internal` → `internal_error`
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
            Self::Timeout(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "timeout" })))
            }
            Self::Transport(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "transport" })))
            }
            Self::StatePersist(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "state_persist" })))
            }
            Self::Internal(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "internal" })))
            }
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;
