//! Error types for the task graph runtime
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - Recoverable scheduling outcomes kept apart from hard failures
//! - Suggestions for embedders surfacing errors to users

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Data ledger errors (3xx)
    DataNotFound = 300,
    VersionNotFound = 301,
    AccessMismatch = 302,

    // Scheduling errors (4xx)
    ActionBlocked = 400,
    ActionUnassigned = 401,
    ActionNotFound = 402,
    InvalidTransition = 403,
    ResourceNotFound = 404,
    DuplicateResource = 405,

    // Execution errors (5xx)
    ExecutionFailed = 500,
    JobSubmission = 501,
    ExecutionCancelled = 502,
    RetriesExhausted = 503,

    // Transfer errors (6xx)
    TransferFailed = 600,
    TransferPreparation = 601,
    TransferTimeout = 602,

    // Internal errors (9xx)
    InternalError = 900,
    NotSupported = 902,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Coarse category name for log aggregation
    pub fn category(&self) -> &'static str {
        match *self as u16 {
            100..=199 => "config",
            200..=299 => "io",
            300..=399 => "data",
            400..=499 => "scheduling",
            500..=599 => "execution",
            600..=699 => "transfer",
            _ => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the runtime
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Data Ledger Errors
    // ─────────────────────────────────────────────────────────────

    /// No datum or logical data is registered under this key
    #[error("Data not found: {key}")]
    DataNotFound { key: String },

    /// The datum exists but the version was already evicted
    #[error("Version {version_id} of data {data_id} not found")]
    VersionNotFound { data_id: u64, version_id: u32 },

    /// An access descriptor was released against the wrong datum state
    #[error("Access mismatch on data {data_id}: {message}")]
    AccessMismatch { data_id: u64, message: String },

    // ─────────────────────────────────────────────────────────────
    // Scheduling Errors
    // ─────────────────────────────────────────────────────────────

    /// No resource can ever host any implementation of the action
    #[error("Action {action_id} is blocked: no compatible resource")]
    ActionBlocked { action_id: u64 },

    /// Some resource could host the action but none can right now
    #[error("Action {action_id} could not be assigned this round")]
    ActionUnassigned { action_id: u64 },

    /// Unknown action id
    #[error("Action not found: {action_id}")]
    ActionNotFound { action_id: u64 },

    /// A state machine transition that is not allowed
    #[error("Action {action_id} cannot go from {from} to {to}")]
    InvalidTransition {
        action_id: u64,
        from: String,
        to: String,
    },

    /// Unknown resource name
    #[error("Resource not found: {name}")]
    ResourceNotFound { name: String },

    /// A resource with the same name is already registered
    #[error("Resource already registered: {name}")]
    DuplicateResource { name: String },

    // ─────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────

    /// Task execution failed
    #[error("Task execution failed: {message}")]
    ExecutionFailed {
        task_id: Option<u64>,
        message: String,
    },

    /// The resource refused the job
    #[error("Job submission to {resource} failed: {message}")]
    JobSubmission { resource: String, message: String },

    /// Action was cancelled before it could finish
    #[error("Action {action_id} was cancelled")]
    ExecutionCancelled { action_id: u64 },

    /// Retry budget for the action ran out
    #[error("Task {task_id} failed after {attempts} attempts")]
    RetriesExhausted { task_id: u64, attempts: u32 },

    // ─────────────────────────────────────────────────────────────
    // Transfer Errors
    // ─────────────────────────────────────────────────────────────

    /// Physical copy or delete failed
    #[error("Transfer of {data} to {target} failed: {message}")]
    TransferFailed {
        data: String,
        target: String,
        message: String,
    },

    /// The operation could not even be prepared (no source, unknown data)
    #[error("Transfer of {data} could not be prepared: {message}")]
    TransferPreparation { data: String, message: String },

    /// Copy exceeded the configured timeout
    #[error("Transfer of {data} timed out after {timeout_ms}ms")]
    TransferTimeout { data: String, timeout_ms: u64 },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Feature not supported
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::DataNotFound { .. } => ErrorCode::DataNotFound,
            Error::VersionNotFound { .. } => ErrorCode::VersionNotFound,
            Error::AccessMismatch { .. } => ErrorCode::AccessMismatch,

            Error::ActionBlocked { .. } => ErrorCode::ActionBlocked,
            Error::ActionUnassigned { .. } => ErrorCode::ActionUnassigned,
            Error::ActionNotFound { .. } => ErrorCode::ActionNotFound,
            Error::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Error::ResourceNotFound { .. } => ErrorCode::ResourceNotFound,
            Error::DuplicateResource { .. } => ErrorCode::DuplicateResource,

            Error::ExecutionFailed { .. } => ErrorCode::ExecutionFailed,
            Error::JobSubmission { .. } => ErrorCode::JobSubmission,
            Error::ExecutionCancelled { .. } => ErrorCode::ExecutionCancelled,
            Error::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,

            Error::TransferFailed { .. } => ErrorCode::TransferFailed,
            Error::TransferPreparation { .. } => ErrorCode::TransferPreparation,
            Error::TransferTimeout { .. } => ErrorCode::TransferTimeout,

            Error::NotSupported(_) => ErrorCode::NotSupported,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if the error is absorbed by a later scheduling round
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ActionUnassigned { .. }
                | Error::TransferFailed { .. }
                | Error::TransferTimeout { .. }
                | Error::JobSubmission { .. }
                | Error::Io(_)
        )
    }

    /// Check if the error is fatal for the embedding application
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::Config(_)
                | Error::RetriesExhausted { .. }
                | Error::Internal(_)
        )
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Create one with taskgraph_core::config::init_config or drop the explicit path to use defaults."
            ),
            Error::ConfigParse { .. } => Some(
                "Check the TOML syntax of the configuration file."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration values. Policies are fifo, lifo, locality, load_balancing, constraints_fifo."
            ),
            Error::ActionBlocked { .. } => Some(
                "Add a resource whose capacity covers one of the task's implementations."
            ),
            Error::RetriesExhausted { .. } => Some(
                "Raise 'max_retries' in [scheduler] or inspect the resource that keeps failing the job."
            ),
            Error::TransferTimeout { .. } => Some(
                "Raise 'copy_timeout_ms' in [transfers] or set it to 0 to disable the timeout."
            ),
            Error::DuplicateResource { .. } => Some(
                "Resource names must be unique. Remove the old resource before adding it again."
            ),
            _ => None,
        }
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        let code = self.code();
        format!("[{}] {}", code.as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors (for ergonomic error creation)
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound {
            path: path.into(),
            source: None,
        }
    }

    /// Create a config validation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a data not found error
    pub fn data_not_found(key: impl Into<String>) -> Self {
        Error::DataNotFound { key: key.into() }
    }

    /// Create an execution failed error
    pub fn execution_failed(task_id: u64, message: impl Into<String>) -> Self {
        Error::ExecutionFailed {
            task_id: Some(task_id),
            message: message.into(),
        }
    }

    /// Create a transfer failed error
    pub fn transfer_failed(
        data: impl Into<String>,
        target: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Error::TransferFailed {
            data: data.into(),
            target: target.to_string(),
            message: message.into(),
        }
    }

    /// Create a transfer preparation error
    pub fn transfer_preparation(data: impl Into<String>, message: impl Into<String>) -> Self {
        Error::TransferPreparation {
            data: data.into(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
