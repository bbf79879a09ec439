//! Error types for the gateway.
//!
//! Transport faults, configuration problems and handler failures all funnel
//! into [`GatewayError`]. Auth declines are deliberately *not* errors; see
//! [`crate::auth::AuthDecision`].

use thiserror::Error;

/// Main error type for the gateway library.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to bind {addr}: {message}")]
    Bind { addr: String, message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Handler error: {message}")]
    Handler { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl GatewayError {
    /// Convert to a JSON-RPC error code.
    ///
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32603: Internal error
    /// - -32001: Unauthorized (application-defined range)
    pub fn to_rpc_error_code(&self) -> i32 {
        use crate::protocol::codes;

        match self {
            GatewayError::Validation { .. } => codes::INVALID_REQUEST,
            GatewayError::MethodNotFound { .. } => codes::METHOD_NOT_FOUND,
            GatewayError::Unauthorized { .. } => codes::UNAUTHORIZED,

            // Everything else is an internal fault from the caller's view
            _ => codes::INTERNAL_ERROR,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        GatewayError::Config {
            message: message.into(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        GatewayError::Handler {
            message: message.into(),
        }
    }
}
