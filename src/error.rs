//! Unified error handling for the feedsync crate
//!
//! Every fallible operation in the library returns [`Result`], whose error
//! type is the [`Error`] enum below. Errors are classified into an
//! [`ErrorCategory`] so callers (the supervisor, the CLI) can decide how to
//! report them.
//!
//! # Taxonomy
//!
//! - [`Error::Validation`] - the telemetry API answered with an unexpected shape
//! - [`Error::Database`] - any failed query or pool checkout
//! - [`Error::Http`] - transport and timeout errors, propagated as-is
//!
//! # Usage
//!
//! ```rust,ignore
//! use feedsync::error::{Error, ErrorCategory};
//!
//! fn report(err: &Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "will retry on next tick");
//!     } else {
//!         tracing::error!(category = ?err.category(), error = %err, "fatal");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout)
    Network,
    /// Unexpected response shape or undecodable payload
    Validation,
    /// Database and pool errors
    Storage,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the feedsync crate
#[derive(Error, Debug)]
pub enum Error {
    /// The remote API returned something other than `{result: "success", channel: {...}}`
    #[error("Validation error: {message}{}", status_suffix(.status, .status_text))]
    Validation {
        message: String,
        status: Option<u16>,
        status_text: Option<String>,
    },

    /// Database errors, wrapping the driver or pool error
    #[error("Database error: {context}")]
    Database {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// HTTP client errors (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

fn status_suffix(status: &Option<u16>, status_text: &Option<String>) -> String {
    match (status, status_text) {
        (Some(code), Some(text)) => format!(" (HTTP {code} {text})"),
        (Some(code), None) => format!(" (HTTP {code})"),
        _ => String::new(),
    }
}

impl Error {
    /// Create a validation error without HTTP context
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            status: None,
            status_text: None,
        }
    }

    /// Create a validation error carrying the HTTP status of the response
    pub fn validation_with_status(message: impl Into<String>, status: reqwest::StatusCode) -> Self {
        Self::Validation {
            message: message.into(),
            status: Some(status.as_u16()),
            status_text: status.canonical_reason().map(String::from),
        }
    }

    /// Create a database error with only a context message
    pub fn database(context: impl Into<String>) -> Self {
        Self::Database {
            context: context.into(),
            source: None,
        }
    }

    /// Create a database error wrapping the underlying driver error
    pub fn database_with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Database {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Check if this error is worth retrying on a later attempt
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Io(_) | Self::Database { .. } => true,
            Self::Validation { status, .. } => matches!(status, Some(s) if *s >= 500 || *s == 429),
            Self::Json(_) | Self::Config(_) | Self::Other { .. } => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Http(_) => ErrorCategory::Network,
            Self::Validation { .. } | Self::Json(_) => ErrorCategory::Validation,
            Self::Database { .. } | Self::Io(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::database_with_source("query failed", err)
    }
}

impl From<deadpool_postgres::PoolError> for Error {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::database_with_source("failed to get connection from pool", err)
    }
}

impl From<deadpool_postgres::CreatePoolError> for Error {
    fn from(err: deadpool_postgres::CreatePoolError) -> Self {
        Self::database_with_source("failed to create connection pool", err)
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display_includes_status() {
        let err = Error::validation_with_status("unexpected response", reqwest::StatusCode::NOT_FOUND);
        let msg = err.to_string();
        assert!(msg.contains("unexpected response"));
        assert!(msg.contains("404"));
        assert!(msg.contains("Not Found"));
    }

    #[test]
    fn test_validation_display_without_status() {
        let err = Error::validation("missing channel");
        assert_eq!(err.to_string(), "Validation error: missing channel");
    }

    #[test]
    fn test_error_category() {
        assert_eq!(Error::validation("x").category(), ErrorCategory::Validation);
        assert_eq!(Error::database("x").category(), ErrorCategory::Storage);
        assert_eq!(Error::config("x").category(), ErrorCategory::Config);
        assert_eq!(Error::other("x").category(), ErrorCategory::Other);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::database("connection reset").is_recoverable());
        assert!(!Error::config("bad interval").is_recoverable());
        assert!(!Error::validation("bad shape").is_recoverable());

        let busy = Error::validation_with_status("busy", reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert!(busy.is_recoverable());
    }

    #[test]
    fn test_json_conversion() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert_eq!(err.category(), ErrorCategory::Validation);
    }
}
