//! Extension traits for attaching context to foreign errors and options.

use super::{IssueError, Result};

/// Attach a human-readable context string to any error.
pub trait ResultExt<T> {
    /// Wrap the error with a fixed context message.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::WithContext` when `self` is an error.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Wrap the error with a lazily built context message.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::WithContext` when `self` is an error.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| IssueError::WithContext {
            context: context.into(),
            source: Box::new(source),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| IssueError::WithContext {
            context: f(),
            source: Box::new(source),
        })
    }
}

/// Turn a missing lookup result into a typed not-found error.
pub trait OptionExt<T> {
    /// # Errors
    ///
    /// Returns `IssueError::NotFound` when `self` is `None`.
    fn ok_or_not_found(self, resource: &'static str, id: impl ToString) -> Result<T>;

    /// # Errors
    ///
    /// Returns `IssueError::IssueNotFound` when `self` is `None`.
    fn ok_or_issue_not_found(self, id: impl ToString) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: &'static str, id: impl ToString) -> Result<T> {
        self.ok_or_else(|| IssueError::not_found(resource, id))
    }

    fn ok_or_issue_not_found(self, id: impl ToString) -> Result<T> {
        self.ok_or_else(|| IssueError::IssueNotFound { id: id.to_string() })
    }
}
