//! Error types for boardsync
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, missing config, malformed filter)
//! - 3: Blocked (lock held, unresolved conflict, partial create awaiting reconciliation)
//! - 4: Operation failed (network, auth, IO)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the boardsync CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for boardsync operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Board not initialized at {0} (missing .boardsync.toml)")]
    NotInitialized(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid filter '{0}' (expected *, is:open, is:closed, label:<name> or status:<name>)")]
    InvalidFilter(String),

    #[error("Task file not found: {0}")]
    TaskNotFound(PathBuf),

    /// Malformed local task file; skipped and reported, never fatal for a batch
    #[error("Invalid task file {path}: {message}")]
    Validation { path: PathBuf, message: String },

    // Blocked (exit code 3)
    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    /// The remote issue exists but a follow-up step of the create failed.
    /// Retrying as a fresh create would duplicate the issue.
    #[error("Issue {repository}#{issue_number} was created but {step} failed: {message}")]
    PartialCreate {
        repository: String,
        issue_number: u64,
        issue_node_id: String,
        step: String,
        message: String,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    // Operation failures (exit code 4)
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Remote rejected request: {0}")]
    Remote(String),

    #[error("Remote item not found: {0}")]
    RemoteNotFound(String),

    #[error("Store validation failed: {0}")]
    StoreInvalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::NotInitialized(_)
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::InvalidFilter(_)
            | Error::TaskNotFound(_)
            | Error::Validation { .. } => exit_codes::USER_ERROR,

            // Blocked
            Error::LockFailed(_)
            | Error::PartialCreate { .. }
            | Error::FileExists(_)
            | Error::Cancelled => exit_codes::BLOCKED,

            // Operation failures
            Error::Network(_)
            | Error::Auth(_)
            | Error::Remote(_)
            | Error::RemoteNotFound(_)
            | Error::StoreInvalid(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Yaml(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Transient failures worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Failures that abort the whole pass instead of a single item
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::StoreInvalid(_) | Error::Cancelled)
    }

    /// Short machine-readable kind, used in pass results and JSON output
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Network(_) => "network",
            Error::Auth(_) => "auth",
            Error::Validation { .. } => "validation",
            Error::PartialCreate { .. } => "partial_create",
            Error::LockFailed(_) => "lock",
            Error::Cancelled => "cancelled",
            Error::InvalidFilter(_) | Error::InvalidArgument(_) => "invalid_argument",
            Error::InvalidConfig(_) | Error::NotInitialized(_) => "config",
            Error::Remote(_) | Error::RemoteNotFound(_) | Error::StoreInvalid(_) => "remote",
            _ => "operation_failed",
        }
    }

    /// Structured details for JSON output
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::PartialCreate {
                repository,
                issue_number,
                issue_node_id,
                step,
                ..
            } => Some(serde_json::json!({
                "repository": repository,
                "issue_number": issue_number,
                "issue_node_id": issue_node_id,
                "failed_step": step,
            })),
            Error::Validation { path, .. } => Some(serde_json::json!({ "path": path })),
            _ => None,
        }
    }
}

/// Result type alias for boardsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
