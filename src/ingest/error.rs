//! Error taxonomy for the ingestion pipeline.
//!
//! Source errors are split by how the traversal must react: critical errors
//! abort the run, everything else counts against the page retry budget.

use thiserror::Error;

/// Errors raised while fetching a page from the upstream listing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Status code in the configured critical set; never retried.
    #[error("critical upstream status {status}: {message}")]
    Critical { status: u16, message: String },

    /// Retries exhausted on non-critical failures.
    #[error("upstream request failed after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    /// The endpoint answered but flagged the page as unsuccessful.
    #[error("upstream returned success=false at offset {offset}")]
    Api { offset: u64 },

    /// Payload could not be decoded.
    #[error("failed to decode upstream payload: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn critical(status: u16, message: impl Into<String>) -> Self {
        Self::Critical {
            status,
            message: message.into(),
        }
    }

    pub fn transient(attempts: u32, message: impl Into<String>) -> Self {
        Self::Transient {
            attempts,
            message: message.into(),
        }
    }

    /// Critical errors are fatal to the current run.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical { .. })
    }
}

/// Storage-layer failure for a single record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("persistence error{}: {message}", code_suffix(.code))]
pub struct PersistenceError {
    /// Backend error code (SQLSTATE where available).
    pub code: Option<String>,
    pub message: String,
}

impl PersistenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Stable category used for error breakdowns and metric labels.
    pub fn category(&self) -> String {
        if let Some(code) = self.code.as_deref() {
            let known = match code {
                "23505" => Some("unique_constraint_violation"),
                "23503" => Some("foreign_key_constraint_violation"),
                "02000" => Some("record_not_found"),
                "08001" | "08006" => Some("database_connection_error"),
                "57014" => Some("operation_timeout"),
                "53300" => Some("connection_pool_timeout"),
                _ => None,
            };
            return match known {
                Some(k) => k.to_string(),
                None => format!("db_error_{code}"),
            };
        }

        let msg = self.message.to_ascii_lowercase();
        if msg.contains("timeout") {
            "timeout".to_string()
        } else if msg.contains("connection refused") || msg.contains("econnrefused") {
            "connection_refused".to_string()
        } else if msg.contains("connect") {
            "connection_error".to_string()
        } else {
            "generic_error".to_string()
        }
    }
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default()
}

/// Invalid or inconsistent configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("filter rule `{id}` has an invalid pattern: {reason}")]
    FilterPattern { id: String, reason: String },

    #[error("duplicate category id `{0}`")]
    DuplicateCategory(String),

    #[error("unknown provider `{0}`")]
    UnknownProvider(String),

    #[error("cannot build http client: {0}")]
    HttpClient(String),
}

/// Errors that end a sync run as `failed`.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("unknown category `{0}`")]
    UnknownCategory(String),

    #[error("resume category `{0}` is not part of the requested categories")]
    ResumeOutsidePlan(String),

    #[error("gave up after {failures} consecutive page failures at offset {offset}: {message}")]
    ErrorBudgetExhausted {
        failures: u32,
        offset: u64,
        message: String,
    },
}
