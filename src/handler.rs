//! # Error Funnel
//!
//! The single entry point the platform's web and API layers call to turn any
//! failure into a tracked, logged, user-messaged outcome. Raw errors are
//! classified first; every handled error is tracked, logged at its
//! severity's level, appended to the NDJSON error log, and mapped to a
//! [`UserMessage`]. API callers get the JSON envelope with the fixed
//! code-to-status table; end users never see the technical message unless
//! debug mode is on.

use std::error::Error as StdError;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Context;
use crate::logging::{log_app_error, ErrorLog};
use crate::mapper::{ContextAwareMapper, ErrorMapper, UserMessage};
use crate::tracker::ErrorTracker;
use crate::types::{AppError, Severity};

/// The outcome of handling one error
#[derive(Debug, Clone, Serialize)]
pub struct HandledError {
    /// The tracked error's ID (`Uuid::nil()` if tracking itself failed)
    pub error_id: Uuid,
    /// What the user should see
    pub user_message: UserMessage,
    /// HTTP status for the response
    pub http_status: u16,
    /// Severity carried through for alerting
    pub severity: Severity,
    /// Retry hint in seconds, when the error is recoverable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// The technical message; only populated in debug mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_detail: Option<String>,
}

/// The JSON error envelope the API layer serializes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorEnvelope {
    /// Always false
    pub success: bool,
    /// The user-facing error text
    pub error: String,
    /// Reference ID for support
    pub error_id: String,
    /// HTTP status the response carries
    pub status: u16,
    /// Retry hint in seconds, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl From<&HandledError> for ApiErrorEnvelope {
    fn from(handled: &HandledError) -> Self {
        Self {
            success: false,
            error: handled.user_message.message.clone(),
            error_id: handled.error_id.to_string(),
            status: handled.http_status,
            retry_after: handled.retry_after,
        }
    }
}

/// Converts exceptions into tracked, logged, user-messaged outcomes
#[derive(Debug)]
pub struct ErrorHandler {
    tracker: Arc<ErrorTracker>,
    mapper: ContextAwareMapper,
    error_log: ErrorLog,
    debug_mode: bool,
}

impl ErrorHandler {
    /// Creates a handler over the given tracker and error log
    pub fn new(tracker: Arc<ErrorTracker>, error_log: ErrorLog, debug_mode: bool) -> Self {
        Self {
            tracker,
            mapper: ContextAwareMapper::new(),
            error_log,
            debug_mode,
        }
    }

    /// Handles an already-typed error: track, log, append, map
    pub fn handle_error(&self, error: AppError, context: Option<&Context>) -> HandledError {
        let mut error = error;
        if let Some(ctx) = context {
            if !ctx.operation.is_empty() && !error.context.contains_key("operation") {
                error = error.context("operation", ctx.operation.clone());
            }
        }

        let user_message = self.mapper.map_error(&error, context);
        let http_status = error.code.http_status();
        let severity = error.severity;
        let retry_after = error.retry_after;
        let debug_detail = if self.debug_mode {
            Some(error.message.clone())
        } else {
            None
        };

        log_app_error(&error);

        let user_id = context.and_then(|c| c.user_id.clone());
        let request_id = context.and_then(|c| c.request_id.clone());
        let error_id =
            self.tracker
                .track_error(error, user_id.as_deref(), request_id.as_deref(), None);
        if let Some(record) = self.tracker.get_error(error_id) {
            self.error_log.append(&record);
        }

        HandledError {
            error_id,
            user_message,
            http_status,
            severity,
            retry_after,
            debug_detail,
        }
    }

    /// Handles a raw error, classifying it with the best-effort heuristics
    pub fn handle_unclassified<E>(&self, error: E, context: Option<&Context>) -> HandledError
    where
        E: StdError + Send + Sync + 'static,
    {
        self.handle_error(AppError::from_unclassified(error), context)
    }

    /// Handles an error and shapes the outcome as the API envelope
    pub fn handle_api_error(
        &self,
        error: AppError,
        context: Option<&Context>,
    ) -> (ApiErrorEnvelope, HandledError) {
        let handled = self.handle_error(error, context);
        ((&handled).into(), handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerConfig;
    use crate::types::{ErrorCategory, ErrorCode};

    fn handler(debug: bool) -> (Arc<ErrorTracker>, ErrorHandler, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(ErrorTracker::new(TrackerConfig::default()));
        let handler = ErrorHandler::new(tracker.clone(), ErrorLog::new(dir.path()), debug);
        (tracker, handler, dir)
    }

    #[test]
    fn test_handle_error_tracks_and_maps() {
        let (tracker, handler, _dir) = handler(false);
        let ctx = Context::new("grade_submission").user("u-3");

        let handled = handler.handle_error(
            AppError::new(ErrorCode::Processing, "rubric engine panicked"),
            Some(&ctx),
        );

        assert_eq!(handled.http_status, 422);
        assert!(handled.debug_detail.is_none());
        let record = tracker.get_error(handled.error_id).unwrap();
        assert_eq!(record.user_id.as_deref(), Some("u-3"));
        assert_eq!(
            record.error.context.get("operation").and_then(|v| v.as_str()),
            Some("grade_submission")
        );
    }

    #[test]
    fn test_debug_mode_exposes_technical_detail() {
        let (_tracker, handler, _dir) = handler(true);
        let handled = handler.handle_error(
            AppError::new(ErrorCode::Internal, "stack trace here"),
            None,
        );
        assert_eq!(handled.debug_detail.as_deref(), Some("stack trace here"));
        // The user still sees only the mapped message
        assert_eq!(
            handled.user_message.message,
            "Something went wrong on our side. Please try again later."
        );
    }

    #[test]
    fn test_api_envelope_shape() {
        let (_tracker, handler, _dir) = handler(false);
        let (envelope, handled) = handler.handle_api_error(
            AppError::new(ErrorCode::RateLimit, "throttled by provider"),
            None,
        );

        assert!(!envelope.success);
        assert_eq!(envelope.status, 429);
        assert_eq!(envelope.error_id, handled.error_id.to_string());
        assert_eq!(envelope.retry_after, Some(60));

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["status"], 429);
        assert!(json["error"].as_str().unwrap().contains("Too many requests"));
    }

    #[test]
    fn test_unclassified_errors_are_classified_first() {
        let (tracker, handler, _dir) = handler(false);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "OpenAI API rate limit exceeded");

        let handled = handler.handle_unclassified(io, None);
        let record = tracker.get_error(handled.error_id).unwrap();
        assert_eq!(record.error.category, ErrorCategory::LlmService);
    }

    #[test]
    fn test_handled_error_appends_to_error_log() {
        let (_tracker, handler, dir) = handler(false);
        handler.handle_error(AppError::new(ErrorCode::Timeout, "slow llm"), None);

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
