//! Error types and handling for `workitems`.
//!
//! Every fallible operation in the crate returns [`IssueError`]. The
//! binary renders it through [`StructuredError`], which assigns a stable
//! machine-readable code, an HTTP-style status, and a process exit code.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Supports `anyhow` integration through the `Other` variant
//! - Provides recovery hints for user-facing errors
//! - Provides structured JSON output for scripted callers

mod context;
mod structured;

pub use context::{OptionExt, ResultExt};
pub use structured::{ErrorCode, StructuredError};

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `workitems` operations.
#[derive(Error, Debug)]
pub enum IssueError {
    // === Storage Errors ===
    /// Database file not found at the specified path.
    #[error("Database not found at '{path}'")]
    DatabaseNotFound { path: PathBuf },

    /// `SQLite` database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // === Lookup Errors ===
    /// Issue with the specified ID was not found (or is soft-deleted).
    #[error("Issue not found: {id}")]
    IssueNotFound { id: String },

    /// Some other project resource was not found.
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    // === Request Errors ===
    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Multiple validation errors occurred.
    #[error("Validation errors: {}", join_errors(errors))]
    ValidationErrors { errors: Vec<ValidationError> },

    /// The request is well formed but contradicts itself.
    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    /// A pagination cursor could not be decoded.
    #[error("Invalid cursor '{cursor}': {reason}")]
    InvalidCursor { cursor: String, reason: String },

    /// The acting user may not perform the operation.
    #[error("Permission denied: {action}")]
    Forbidden { action: String },

    // === Configuration Errors ===
    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Workspace not initialized.
    #[error("Workspace not initialized: run 'wi init' first")]
    NotInitialized,

    /// Already initialized.
    #[error("Already initialized at '{path}'")]
    AlreadyInitialized { path: PathBuf },

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Wrapped errors ===
    /// Error with additional context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single field validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field that failed validation.
    pub field: String,
    /// The reason for the validation failure.
    pub message: String,
}

impl ValidationError {
    /// Create a new validation error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl IssueError {
    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseNotFound { .. }
                | Self::NotInitialized
                | Self::IssueNotFound { .. }
                | Self::NotFound { .. }
                | Self::Validation { .. }
                | Self::ValidationErrors { .. }
                | Self::Conflict { .. }
                | Self::InvalidCursor { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run: wi init"),
            Self::DatabaseNotFound { .. } => Some("Check path or run: wi init"),
            Self::AlreadyInitialized { .. } => Some("Use --force to reinitialize"),
            Self::Conflict { .. } => Some("Choose a sub-group field different from group_by"),
            Self::InvalidCursor { .. } => {
                Some("Pass back a cursor exactly as returned, or omit it to start over")
            }
            Self::Forbidden { .. } => Some("Ask a project admin for a role with access"),
            _ => None,
        }
    }

    /// HTTP-style status code for this error category.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. }
            | Self::ValidationErrors { .. }
            | Self::Conflict { .. }
            | Self::InvalidCursor { .. } => 400,
            Self::Forbidden { .. } => 403,
            Self::IssueNotFound { .. } | Self::NotFound { .. } => 404,
            _ => 500,
        }
    }

    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a not-found error for a named resource.
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Create an invalid-cursor error.
    #[must_use]
    pub fn invalid_cursor(cursor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCursor {
            cursor: cursor.into(),
            reason: reason.into(),
        }
    }

    /// Create from multiple validation errors.
    #[must_use]
    pub fn from_validation_errors(errors: Vec<ValidationError>) -> Self {
        if errors.len() == 1 {
            let err = &errors[0];
            Self::Validation {
                field: err.field.clone(),
                reason: err.message.clone(),
            }
        } else {
            Self::ValidationErrors { errors }
        }
    }
}

/// Result type using `IssueError`.
pub type Result<T> = std::result::Result<T, IssueError>;
