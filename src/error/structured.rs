//! Structured error output for scripted callers.
//!
//! Provides machine-parseable error information with:
//! - Error codes for categorization
//! - Hints for self-correction
//! - Retryability flags
//! - Context for debugging
//!
//! Hints lean on two tricks: synonym tables for enum-valued fields
//! (`critical` means `urgent`, `done` means `completed`) and edit-distance
//! suggestions for misspelled grouping keys.

#![allow(clippy::option_if_let_else, clippy::manual_map)]

use crate::error::IssueError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Machine-readable error codes.
///
/// These codes are stable and can be used for programmatic error handling.
/// Format: `SCREAMING_SNAKE_CASE` for easy parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // === Database Errors (exit code 2) ===
    /// Database file not found
    DatabaseNotFound,
    /// Database operation failed
    DatabaseError,
    /// Workspace not initialized
    NotInitialized,
    /// Already initialized
    AlreadyInitialized,

    // === Lookup Errors (exit code 3) ===
    /// Issue with specified ID not found
    IssueNotFound,
    /// Other project resource not found
    NotFound,

    // === Request Errors (exit code 4) ===
    /// Field validation failed
    ValidationFailed,
    /// Request contradicts itself
    Conflict,
    /// Pagination cursor could not be decoded
    InvalidCursor,

    // === Permission Errors (exit code 5) ===
    /// Acting user lacks a role for the operation
    Forbidden,

    // === Config Errors (exit code 7) ===
    /// Configuration error
    ConfigError,

    // === I/O Errors (exit code 8) ===
    /// File I/O error
    IoError,
    /// JSON serialization error
    JsonError,
    /// YAML parsing error
    YamlError,

    // === Internal Errors (exit code 1) ===
    /// Unexpected internal error
    InternalError,
}

impl ErrorCode {
    /// Get the string representation for JSON output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DatabaseNotFound => "DATABASE_NOT_FOUND",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::IssueNotFound => "ISSUE_NOT_FOUND",
            Self::NotFound => "NOT_FOUND",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Conflict => "CONFLICT",
            Self::InvalidCursor => "INVALID_CURSOR",
            Self::Forbidden => "FORBIDDEN",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::YamlError => "YAML_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether this error is potentially retryable.
    ///
    /// Retryable means the caller might succeed after fixing its input.
    /// Nothing is retried internally.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed | Self::Conflict | Self::InvalidCursor
        )
    }

    /// Get the exit code for this error category.
    ///
    /// - 1: Internal/unknown errors
    /// - 2: Database errors
    /// - 3: Lookup errors
    /// - 4: Request errors
    /// - 5: Permission errors
    /// - 7: Config errors
    /// - 8: I/O errors
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::DatabaseNotFound
            | Self::DatabaseError
            | Self::NotInitialized
            | Self::AlreadyInitialized => 2,
            Self::IssueNotFound | Self::NotFound => 3,
            Self::ValidationFailed | Self::Conflict | Self::InvalidCursor => 4,
            Self::Forbidden => 5,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError | Self::YamlError => 8,
            Self::InternalError => 1,
        }
    }

    /// HTTP-style status for this code.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::ValidationFailed | Self::Conflict | Self::InvalidCursor => 400,
            Self::Forbidden => 403,
            Self::IssueNotFound | Self::NotFound => 404,
            _ => 500,
        }
    }
}

/// Structured error for machine-parseable output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional hint for fixing the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether the operation can be retried
    pub retryable: bool,
    /// Additional context data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StructuredError {
    /// Create a new structured error from an `IssueError`.
    #[must_use]
    pub fn from_error(err: &IssueError) -> Self {
        let (code, context) = Self::extract_code_and_context(err);
        let hint = Self::generate_hint(err);

        Self {
            code,
            message: err.to_string(),
            hint,
            retryable: code.is_retryable(),
            context,
        }
    }

    /// Create a structured error for not initialized.
    #[must_use]
    pub fn not_initialized() -> Self {
        Self {
            code: ErrorCode::NotInitialized,
            message: "Workspace not initialized: run 'wi init' first".to_string(),
            hint: Some("Run: wi init".to_string()),
            retryable: false,
            context: None,
        }
    }

    /// HTTP-style status for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Serialize to JSON value.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.code.as_str(),
                "status": self.http_status(),
                "message": self.message,
                "hint": self.hint,
                "retryable": self.retryable,
                "context": self.context,
            }
        })
    }

    /// Format for human-readable output.
    #[must_use]
    pub fn to_human(&self, color: bool) -> String {
        let mut output = String::new();

        if color {
            output.push_str("\x1b[31mError:\x1b[0m ");
        } else {
            output.push_str("Error: ");
        }

        output.push_str(&self.message);

        if let Some(hint) = &self.hint {
            output.push('\n');
            if color {
                output.push_str("\x1b[33mHint:\x1b[0m ");
            } else {
                output.push_str("Hint: ");
            }
            output.push_str(hint);
        }

        output
    }

    /// Extract error code and context from an `IssueError`.
    fn extract_code_and_context(err: &IssueError) -> (ErrorCode, Option<Value>) {
        match err {
            IssueError::DatabaseNotFound { path } => (
                ErrorCode::DatabaseNotFound,
                Some(json!({"path": path.display().to_string()})),
            ),
            IssueError::Database(_) => (ErrorCode::DatabaseError, None),
            IssueError::NotInitialized => (ErrorCode::NotInitialized, None),
            IssueError::AlreadyInitialized { path } => (
                ErrorCode::AlreadyInitialized,
                Some(json!({"path": path.display().to_string()})),
            ),
            IssueError::IssueNotFound { id } => {
                (ErrorCode::IssueNotFound, Some(json!({"searched_id": id})))
            }
            IssueError::NotFound { resource, id } => (
                ErrorCode::NotFound,
                Some(json!({"resource": resource, "id": id})),
            ),
            IssueError::Validation { field, reason } => (
                ErrorCode::ValidationFailed,
                Some(json!({"field": field, "reason": reason})),
            ),
            IssueError::ValidationErrors { errors } => (
                ErrorCode::ValidationFailed,
                Some(json!({
                    "errors": errors.iter()
                        .map(|e| json!({"field": e.field, "message": e.message}))
                        .collect::<Vec<_>>()
                })),
            ),
            IssueError::Conflict { reason } => {
                (ErrorCode::Conflict, Some(json!({"reason": reason})))
            }
            IssueError::InvalidCursor { cursor, reason } => (
                ErrorCode::InvalidCursor,
                Some(json!({"cursor": cursor, "reason": reason})),
            ),
            IssueError::Forbidden { action } => {
                (ErrorCode::Forbidden, Some(json!({"action": action})))
            }
            IssueError::Config(_) => (ErrorCode::ConfigError, None),
            IssueError::Io(_) => (ErrorCode::IoError, None),
            IssueError::Json(_) => (ErrorCode::JsonError, None),
            IssueError::Yaml(_) => (ErrorCode::YamlError, None),
            IssueError::WithContext { context, .. } => {
                (ErrorCode::InternalError, Some(json!({"context": context})))
            }
            IssueError::Other(_) => (ErrorCode::InternalError, None),
        }
    }

    /// Generate context-aware hint from error.
    fn generate_hint(err: &IssueError) -> Option<String> {
        if let Some(suggestion) = err.suggestion() {
            return Some(suggestion.to_string());
        }

        match err {
            IssueError::IssueNotFound { .. } => {
                Some("Run 'wi list' to see available issues.".to_string())
            }
            IssueError::Validation { field, reason } => validation_hint(field, reason),
            _ => None,
        }
    }
}

/// Hint for a single field failure, using the offending value quoted in
/// the reason when there is one.
fn validation_hint(field: &str, reason: &str) -> Option<String> {
    let provided = reason.split('\'').nth(1).unwrap_or_default();
    match field {
        "priority" => {
            if let Some(detected) = detect_priority_intent(provided) {
                Some(format!("Did you mean priority '{detected}'?"))
            } else {
                Some("Valid priorities: urgent, high, medium, low, none".to_string())
            }
        }
        "state_group" => {
            if let Some(detected) = detect_state_group_intent(provided) {
                Some(format!("Did you mean state group '{detected}'?"))
            } else {
                Some(
                    "Valid state groups: backlog, unstarted, started, completed, cancelled"
                        .to_string(),
                )
            }
        }
        "group_by" | "sub_group_by" => {
            let similar = find_similar(provided, GROUP_KEYS, 3);
            if similar.is_empty() {
                Some(format!("Valid grouping keys: {}", GROUP_KEYS.join(", ")))
            } else {
                Some(format!("Did you mean one of: {}?", similar.join(", ")))
            }
        }
        _ => None,
    }
}

// === Precomputed Valid Values ===

const GROUP_KEYS: &[&str] = &[
    "state_id",
    "state__group",
    "priority",
    "labels__id",
    "assignees__id",
    "issue_module__module_id",
    "cycle_id",
    "created_by",
    "parent_id",
    "start_date",
    "target_date",
];

/// Priority synonyms for intent detection.
static PRIORITY_SYNONYMS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    [
        ("critical", "urgent"),
        ("crit", "urgent"),
        ("highest", "urgent"),
        ("p0", "urgent"),
        ("p1", "high"),
        ("important", "high"),
        ("p2", "medium"),
        ("normal", "medium"),
        ("default", "medium"),
        ("p3", "low"),
        ("minor", "low"),
        ("p4", "none"),
        ("lowest", "none"),
        ("no", "none"),
    ]
    .into_iter()
    .collect()
});

/// State group synonyms for intent detection.
static STATE_GROUP_SYNONYMS: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| {
        [
            ("todo", "unstarted"),
            ("open", "unstarted"),
            ("new", "unstarted"),
            ("wip", "started"),
            ("in_progress", "started"),
            ("active", "started"),
            ("done", "completed"),
            ("closed", "completed"),
            ("finished", "completed"),
            ("canceled", "cancelled"),
            ("wontfix", "cancelled"),
            ("icebox", "backlog"),
        ]
        .into_iter()
        .collect()
    });

// === Intent Detection ===

fn detect_priority_intent(input: &str) -> Option<&'static str> {
    let lower = input.to_lowercase();
    PRIORITY_SYNONYMS.get(lower.as_str()).copied()
}

fn detect_state_group_intent(input: &str) -> Option<&'static str> {
    let lower = input.to_lowercase();
    STATE_GROUP_SYNONYMS.get(lower.as_str()).copied()
}

// === Levenshtein Distance ===

/// Calculate the Levenshtein distance between two strings.
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = usize::from(a_char != b_char);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Find candidates close to `searched`, nearest first.
///
/// Returns up to `max_suggestions` values with distance <= 3.
#[must_use]
pub fn find_similar(searched: &str, candidates: &[&str], max_suggestions: usize) -> Vec<String> {
    let mut scored: Vec<(usize, &str)> = candidates
        .iter()
        .map(|c| (levenshtein_distance(searched, c), *c))
        .filter(|(dist, _)| *dist <= 3)
        .collect();

    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(_, c)| c.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::IssueNotFound.as_str(), "ISSUE_NOT_FOUND");
        assert_eq!(ErrorCode::InvalidCursor.as_str(), "INVALID_CURSOR");
        assert_eq!(ErrorCode::NotInitialized.as_str(), "NOT_INITIALIZED");
    }

    #[test]
    fn test_error_code_is_retryable() {
        assert!(!ErrorCode::IssueNotFound.is_retryable());
        assert!(!ErrorCode::Forbidden.is_retryable());
        assert!(ErrorCode::ValidationFailed.is_retryable());
        assert!(ErrorCode::Conflict.is_retryable());
    }

    #[test]
    fn test_error_code_exit_codes() {
        assert_eq!(ErrorCode::NotInitialized.exit_code(), 2);
        assert_eq!(ErrorCode::IssueNotFound.exit_code(), 3);
        assert_eq!(ErrorCode::ValidationFailed.exit_code(), 4);
        assert_eq!(ErrorCode::Forbidden.exit_code(), 5);
        assert_eq!(ErrorCode::ConfigError.exit_code(), 7);
        assert_eq!(ErrorCode::IoError.exit_code(), 8);
        assert_eq!(ErrorCode::InternalError.exit_code(), 1);
    }

    #[test]
    fn test_structured_error_to_json() {
        let err = StructuredError::from_error(&IssueError::Conflict {
            reason: "group_by and sub_group_by are both 'priority'".to_string(),
        });
        let json = err.to_json();
        assert_eq!(json["error"]["code"], "CONFLICT");
        assert_eq!(json["error"]["status"], 400);
        assert!(json["error"]["retryable"].as_bool().unwrap());
    }

    #[test]
    fn test_priority_hint_from_synonym() {
        let err = StructuredError::from_error(&IssueError::validation(
            "priority",
            "'critical' is not a valid priority",
        ));
        assert_eq!(err.hint.as_deref(), Some("Did you mean priority 'urgent'?"));
    }

    #[test]
    fn test_group_by_hint_uses_edit_distance() {
        let err = StructuredError::from_error(&IssueError::validation(
            "group_by",
            "'priorty' is not a supported grouping key",
        ));
        assert!(err.hint.unwrap().contains("priority"));
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
        assert_eq!(levenshtein_distance("abc", "abd"), 1);
        assert_eq!(levenshtein_distance("abc", "abcd"), 1);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_detect_state_group_intent() {
        assert_eq!(detect_state_group_intent("done"), Some("completed"));
        assert_eq!(detect_state_group_intent("WIP"), Some("started"));
        assert_eq!(detect_state_group_intent("xyz"), None);
    }

    #[test]
    fn test_to_human_output() {
        let err = StructuredError {
            code: ErrorCode::IssueNotFound,
            message: "Issue not found: abc".to_string(),
            hint: Some("Run 'wi list' to see available issues.".to_string()),
            retryable: false,
            context: None,
        };

        let plain = err.to_human(false);
        assert!(plain.contains("Error: Issue not found: abc"));
        assert!(plain.contains("Hint: Run 'wi list'"));

        let colored = err.to_human(true);
        assert!(colored.contains("\x1b[31m"));
        assert!(colored.contains("\x1b[33m"));
    }
}
