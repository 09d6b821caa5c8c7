//! # Error Context Handling
//!
//! Context attached to errors as they cross the platform: the operation in
//! flight, the requesting user/session, the message language, and free-form
//! key-value data.

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{AppError, Result};

/// Context information attached to an error or passed to the mapper
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    /// The operation being performed when the error occurred
    pub operation: String,
    /// The requesting user, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// The request being served, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// The session, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Preferred language for user-facing messages (e.g. "en", "es")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Additional context keys and values
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Context {
    /// Creates a new context for the specified operation
    pub fn new<S: Into<String>>(operation: S) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// Sets the requesting user
    pub fn user<S: Into<String>>(mut self, user_id: S) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the request ID
    pub fn request<S: Into<String>>(mut self, request_id: S) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Sets the session ID
    pub fn session<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the preferred message language
    pub fn language<S: Into<String>>(mut self, language: S) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Adds a key-value pair to the context
    pub fn add<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.data.insert(key.into(), value);
        }
        self
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "during operation: {}", self.operation)?;
        if !self.data.is_empty() {
            write!(f, " [")?;
            let mut first = true;
            for (k, v) in &self.data {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", k, v)?;
                first = false;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// A trait for adding context to error results
pub trait WithContext<T> {
    /// Adds context to an error result, converting foreign errors into
    /// [`AppError`] via the classification heuristics
    fn with_context<F>(self, context_fn: F) -> Result<T>
    where
        F: FnOnce() -> Context;

    /// Adds operation context to an error result
    fn with_operation<S>(self, operation: S) -> Result<T>
    where
        S: Into<String>;
}

impl<T, E> WithContext<T> for std::result::Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn with_context<F>(self, context_fn: F) -> Result<T>
    where
        F: FnOnce() -> Context,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => {
                let context = context_fn();
                let mut app_error = AppError::from_unclassified(error)
                    .context("operation", context.operation.clone());
                for (k, v) in context.data {
                    app_error = app_error.context(k, v);
                }
                if let Some(user_id) = context.user_id {
                    app_error = app_error.context("user_id", user_id);
                }
                if let Some(request_id) = context.request_id {
                    app_error = app_error.context("request_id", request_id);
                }
                Err(app_error)
            }
        }
    }

    fn with_operation<S>(self, operation: S) -> Result<T>
    where
        S: Into<String>,
    {
        self.with_context(|| Context::new(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorCategory, ErrorCode};
    use std::io;

    #[test]
    fn test_context_creation() {
        let ctx = Context::new("grade_submission")
            .user("u-42")
            .language("en")
            .add("submission_id", 7);

        assert_eq!(ctx.operation, "grade_submission");
        assert_eq!(ctx.user_id.as_deref(), Some("u-42"));
        assert_eq!(ctx.data.len(), 1);
    }

    #[test]
    fn test_with_context_converts_and_annotates() {
        let res: std::result::Result<(), io::Error> = Err(io::Error::new(
            io::ErrorKind::Other,
            "database connection refused",
        ));

        let err = res
            .with_context(|| Context::new("load_marking_guide").add("guide_id", 3))
            .unwrap_err();

        assert_eq!(err.category, ErrorCategory::Database);
        assert!(err.context.get("operation").is_some());
        assert!(err.context.get("guide_id").is_some());
    }

    #[test]
    fn test_with_operation() {
        let res: std::result::Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::Other, "upload interrupted"));

        let err = res.with_operation("upload_submission").unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(
            err.context.get("operation").and_then(|v| v.as_str()),
            Some("upload_submission")
        );
    }
}
