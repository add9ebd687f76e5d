//! Engine-wide error taxonomy.
//!
//! Every failure inside a worker is classified into one of these categories.
//! Each carries a wire code with a category prefix (`VAL_*`, `RES_*`, …), an
//! HTTP-equivalent status, and a retryability flag the dispatcher uses to
//! decide between job-level retry and permanent failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lower bound of the HTTP server-error range.
pub const SERVER_ERROR_MIN: u16 = 500;
/// Upper bound of the HTTP server-error range.
pub const SERVER_ERROR_MAX: u16 = 599;

/// True when the status code falls in the server-error range.
pub fn is_server_error(status: u16) -> bool {
    (SERVER_ERROR_MIN..=SERVER_ERROR_MAX).contains(&status)
}

/// Failure categories. Retryable categories may be retried in place when the
/// operation is idempotent; everything else bubbles to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    Validation,
    Authentication,
    Authorization,
    Resource,
    Conflict,
    External,
    Database,
    Network,
    Timeout,
    Rate,
    Server,
    Unexpected,
}

impl ErrorCategory {
    /// Wire-code prefix for the category.
    pub fn prefix(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "VAL",
            ErrorCategory::Authentication => "AUTH",
            ErrorCategory::Authorization => "AUTHZ",
            ErrorCategory::Resource => "RES",
            ErrorCategory::Conflict => "CONF",
            ErrorCategory::External => "EXT",
            ErrorCategory::Database => "DB",
            ErrorCategory::Network => "NET",
            ErrorCategory::Timeout => "TIME",
            ErrorCategory::Rate => "RATE",
            ErrorCategory::Server => "SRV",
            ErrorCategory::Unexpected => "UNEX",
        }
    }

    /// HTTP-equivalent status for the category.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCategory::Validation => 400,
            ErrorCategory::Authentication => 401,
            ErrorCategory::Authorization => 403,
            ErrorCategory::Resource => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::Rate => 429,
            ErrorCategory::External => 503,
            ErrorCategory::Timeout => 504,
            ErrorCategory::Database
            | ErrorCategory::Network
            | ErrorCategory::Server
            | ErrorCategory::Unexpected => 500,
        }
    }

    /// External, network, timeout, and rate failures are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::External
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Rate
        )
    }
}

/// Classified engine failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("authentication: {0}")]
    Authentication(String),
    #[error("authorization: {0}")]
    Authorization(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("dependency unavailable: {0}")]
    External(String),
    #[error("database: {0}")]
    Database(String),
    #[error("network: {0}")]
    Network(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("rate limited: {0}")]
    Rate(String),
    #[error("internal: {0}")]
    Server(String),
    #[error("unexpected: {0}")]
    Unexpected(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound { kind, id: id.into() }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Validation(_) => ErrorCategory::Validation,
            EngineError::Authentication(_) => ErrorCategory::Authentication,
            EngineError::Authorization(_) => ErrorCategory::Authorization,
            EngineError::NotFound { .. } => ErrorCategory::Resource,
            EngineError::Conflict(_) => ErrorCategory::Conflict,
            EngineError::External(_) => ErrorCategory::External,
            EngineError::Database(_) => ErrorCategory::Database,
            EngineError::Network(_) => ErrorCategory::Network,
            EngineError::Timeout(_) => ErrorCategory::Timeout,
            EngineError::Rate(_) => ErrorCategory::Rate,
            EngineError::Server(_) => ErrorCategory::Server,
            EngineError::Unexpected(_) => ErrorCategory::Unexpected,
        }
    }

    /// Full wire code, e.g. `VAL_INVALID_INPUT`.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VAL_INVALID_INPUT",
            EngineError::Authentication(_) => "AUTH_REQUIRED",
            EngineError::Authorization(_) => "AUTHZ_FORBIDDEN",
            EngineError::NotFound { .. } => "RES_NOT_FOUND",
            EngineError::Conflict(_) => "CONF_STATE",
            EngineError::External(_) => "EXT_DEPENDENCY_UNAVAILABLE",
            EngineError::Database(_) => "DB_QUERY_FAILED",
            EngineError::Network(_) => "NET_CONNECTIVITY",
            EngineError::Timeout(_) => "TIME_OPERATION",
            EngineError::Rate(_) => "RATE_THROTTLED",
            EngineError::Server(_) => "SRV_INTERNAL",
            EngineError::Unexpected(_) => "UNEX_UNCAUGHT",
        }
    }

    pub fn http_status(&self) -> u16 {
        self.category().http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Wire representation. `include_stack` should be false in production.
    pub fn to_wire(&self, include_stack: bool) -> WireError {
        WireError {
            code: self.code().to_string(),
            message: self.to_string(),
            details: None,
            stack: include_stack.then(|| format!("{self:?}")),
        }
    }
}

/// Surfaced failure shape: code, human-readable message, optional details
/// bag, and a stack only outside production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl WireError {
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
