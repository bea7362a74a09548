//! Error types for the synchronizer
//!
//! Per-record write failures are not propagated out of a reconciliation run;
//! they are bucketed into the report. Everything here that does propagate is
//! either a systemic failure (auth, transport during the initial fetch) or a
//! programmer error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// A field-level validation message returned by the Unified Listing API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    #[serde(rename = "dataPath", default)]
    pub data_path: String,
    #[serde(default)]
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.data_path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.data_path, self.message)
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote end could not be reached or the exchange broke off
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API rejected a record with field-level errors
    #[error("Validation failed ({status}): {message}{}", format_field_errors(.errors))]
    Validation {
        status: u16,
        message: String,
        errors: Vec<FieldError>,
    },

    /// Non-2xx response without a structured error body
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// Login to the Unified Listing API failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A queue or pipeline was driven with arguments no caller should pass
    #[error("Caller contract violated: {0}")]
    CallerContract(String),

    /// The run was cancelled before all work completed
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_field_errors(errors: &[FieldError]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!(" [{}]", joined.join("; "))
}

impl SyncError {
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn caller_contract(msg: impl Into<String>) -> Self {
        Self::CallerContract(msg.into())
    }

    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// Errors that must abort a whole run rather than a single record
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Auth(_) | SyncError::CallerContract(_) | SyncError::Config(_)
        )
    }
}

impl From<std::convert::Infallible> for SyncError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

impl From<ul_common::UlError> for SyncError {
    fn from(err: ul_common::UlError) -> Self {
        match err {
            ul_common::UlError::Io(e) => SyncError::Io(e),
            ul_common::UlError::Serialization(e) => SyncError::Json(e),
            other => SyncError::Config(other.to_string()),
        }
    }
}
