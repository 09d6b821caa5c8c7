//! # Standardized Error Types
//!
//! This module provides the typed error vocabulary used throughout the
//! grading platform: error codes, severities, recovery-routing categories,
//! and the [`AppError`] type carried through tracking, mapping, and recovery.

use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A type alias for Result with the error type defaulting to [`AppError`]
pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// The severity level of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// A minor issue that does not affect overall functionality
    Low,
    /// A significant issue that may impact some functionality
    Medium,
    /// A serious issue impacting a feature or request
    High,
    /// An issue that severely impacts the system and needs immediate attention
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

/// The kind of failure, driving the default user message and HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Request data failed validation
    Validation,
    /// The caller is not authenticated
    Authentication,
    /// The caller is authenticated but not allowed
    Authorization,
    /// The requested resource does not exist
    NotFound,
    /// Processing of an otherwise valid request failed
    Processing,
    /// A dependency is temporarily unavailable
    ServiceUnavailable,
    /// The caller exceeded a rate limit
    RateLimit,
    /// The operation did not complete in time
    Timeout,
    /// Unexpected internal failure
    Internal,
}

impl ErrorCode {
    /// All codes, for table-driven tests and reports
    pub const ALL: [ErrorCode; 9] = [
        ErrorCode::Validation,
        ErrorCode::Authentication,
        ErrorCode::Authorization,
        ErrorCode::NotFound,
        ErrorCode::Processing,
        ErrorCode::ServiceUnavailable,
        ErrorCode::RateLimit,
        ErrorCode::Timeout,
        ErrorCode::Internal,
    ];

    /// The HTTP status the API layer serializes this code as
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::Validation => 400,
            ErrorCode::Authentication => 401,
            ErrorCode::Authorization => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::Processing => 422,
            ErrorCode::RateLimit => 429,
            ErrorCode::Internal => 500,
            ErrorCode::ServiceUnavailable => 503,
            ErrorCode::Timeout => 504,
        }
    }

    /// The default severity assigned when the caller does not override it
    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorCode::Validation | ErrorCode::NotFound => Severity::Low,
            ErrorCode::Authentication | ErrorCode::Authorization => Severity::Medium,
            ErrorCode::Processing | ErrorCode::RateLimit | ErrorCode::Timeout => Severity::Medium,
            ErrorCode::ServiceUnavailable => Severity::High,
            ErrorCode::Internal => Severity::High,
        }
    }

    /// Whether errors of this code are worth retrying by default
    pub fn default_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::Processing
                | ErrorCode::ServiceUnavailable
                | ErrorCode::RateLimit
                | ErrorCode::Timeout
        )
    }

    /// The default retry hint in seconds, for recoverable codes
    pub fn default_retry_after(&self) -> Option<u64> {
        match self {
            ErrorCode::RateLimit => Some(60),
            ErrorCode::ServiceUnavailable => Some(30),
            ErrorCode::Timeout | ErrorCode::Processing => Some(10),
            _ => None,
        }
    }

    /// The fixed default user-facing message for this code
    pub fn default_user_message(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "Please check your input and try again.",
            ErrorCode::Authentication => "Please sign in to continue.",
            ErrorCode::Authorization => "You do not have permission to perform this action.",
            ErrorCode::NotFound => "The requested item could not be found.",
            ErrorCode::Processing => "We could not process your request. Please try again.",
            ErrorCode::ServiceUnavailable => {
                "The service is temporarily unavailable. Please try again shortly."
            }
            ErrorCode::RateLimit => "Too many requests. Please wait a moment and try again.",
            ErrorCode::Timeout => "The operation took too long. Please try again.",
            ErrorCode::Internal => "Something went wrong on our side. Please try again later.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Validation => write!(f, "VALIDATION"),
            ErrorCode::Authentication => write!(f, "AUTHENTICATION"),
            ErrorCode::Authorization => write!(f, "AUTHORIZATION"),
            ErrorCode::NotFound => write!(f, "NOT_FOUND"),
            ErrorCode::Processing => write!(f, "PROCESSING"),
            ErrorCode::ServiceUnavailable => write!(f, "SERVICE_UNAVAILABLE"),
            ErrorCode::RateLimit => write!(f, "RATE_LIMIT"),
            ErrorCode::Timeout => write!(f, "TIMEOUT"),
            ErrorCode::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Domain bucket used to route category-specific recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Marking-guide or submission upload failures
    FileUpload,
    /// OCR engine failures
    OcrProcessing,
    /// LLM provider failures (rate limits, token limits, API errors)
    LlmService,
    /// PDF parsing or rendering failures
    PdfProcessing,
    /// Image decoding or preprocessing failures
    ImageProcessing,
    /// Database connectivity or query failures
    Database,
    /// Grading pipeline failures
    Grading,
    /// Anything that does not match a known domain
    System,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::FileUpload => write!(f, "FILE_UPLOAD"),
            ErrorCategory::OcrProcessing => write!(f, "OCR_PROCESSING"),
            ErrorCategory::LlmService => write!(f, "LLM_SERVICE"),
            ErrorCategory::PdfProcessing => write!(f, "PDF_PROCESSING"),
            ErrorCategory::ImageProcessing => write!(f, "IMAGE_PROCESSING"),
            ErrorCategory::Database => write!(f, "DATABASE"),
            ErrorCategory::Grading => write!(f, "GRADING"),
            ErrorCategory::System => write!(f, "SYSTEM"),
        }
    }
}

/// Core error type for the grading platform
///
/// Note: `Clone` is implemented manually so that cloned errors intentionally
/// drop the underlying `cause`. This keeps clones cheap and
/// serialization-friendly while preserving all structured metadata.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppError {
    /// A unique identifier for this error instance
    pub id: Uuid,
    /// The kind of error that occurred
    pub code: ErrorCode,
    /// Recovery-routing category
    pub category: ErrorCategory,
    /// Error severity level
    pub severity: Severity,
    /// Detailed developer-facing message
    pub message: String,
    /// User-facing message override; falls back to the code's default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    /// Whether a retry might succeed
    pub recoverable: bool,
    /// Suggested seconds to wait before retrying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// The offending field, for validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Structured details (e.g. validation_type, limits)
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
    /// Additional context as key-value pairs
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    /// The time when the error occurred
    pub timestamp: DateTime<Utc>,
    /// Chain of causes (not serialized)
    #[serde(skip)]
    pub cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            code: self.code,
            category: self.category,
            severity: self.severity,
            message: self.message.clone(),
            user_message: self.user_message.clone(),
            recoverable: self.recoverable,
            retry_after: self.retry_after,
            field: self.field.clone(),
            details: self.details.clone(),
            context: self.context.clone(),
            timestamp: self.timestamp,
            cause: None,
        }
    }
}

impl AppError {
    /// Creates a new error with the given code, applying the code's defaults
    /// for severity, recoverability, and retry hint
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            category: ErrorCategory::System,
            severity: code.default_severity(),
            message: message.into(),
            user_message: None,
            recoverable: code.default_recoverable(),
            retry_after: code.default_retry_after(),
            field: None,
            details: serde_json::Map::new(),
            context: serde_json::Map::new(),
            timestamp: Utc::now(),
            cause: None,
        }
    }

    /// Sets the recovery-routing category
    pub fn category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    /// Sets the error severity
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets a user-friendly message, overriding the code's default
    pub fn user_message<S: Into<String>>(mut self, message: S) -> Self {
        self.user_message = Some(message.into());
        self
    }

    /// Marks the error recoverable with an optional retry hint
    pub fn recoverable(mut self, retry_after: Option<u64>) -> Self {
        self.recoverable = true;
        self.retry_after = retry_after;
        self
    }

    /// Sets the offending field for validation errors
    pub fn field<S: Into<String>>(mut self, field: S) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Adds a structured detail to the error
    pub fn detail<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.details.insert(key.into(), value);
        }
        self
    }

    /// Adds context information to the error
    pub fn context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    /// Chains this error with its cause
    pub fn cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    /// The message shown to end users
    pub fn user_facing_message(&self) -> &str {
        self.user_message
            .as_deref()
            .unwrap_or_else(|| self.code.default_user_message())
    }

    /// Wraps an arbitrary error, classifying it with the best-effort
    /// category and severity heuristics
    pub fn from_unclassified<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let message = err.to_string();
        let type_name = std::any::type_name::<E>();
        let (category, code) = classify(&message, type_name);
        let severity = assess_severity(&message, type_name);
        Self::new(code, message)
            .category(category)
            .severity(severity)
            .cause(err)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.code, self.message)?;
        if let Some(field) = &self.field {
            write!(f, " [Field: {}]", field)?;
        }
        write!(f, " [Category: {}]", self.category)?;
        Ok(())
    }
}

impl StdError for AppError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::NotFound,
            std::io::ErrorKind::TimedOut => ErrorCode::Timeout,
            _ => ErrorCode::Internal,
        };
        Self::new(code, format!("I/O error: {}", err)).cause(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::Processing, format!("JSON error: {}", err)).cause(err)
    }
}

/// Ordered keyword table for category classification. First match wins.
const CATEGORY_KEYWORDS: &[(&[&str], ErrorCategory, ErrorCode)] = &[
    (
        &["file size", "upload", "file type", "multipart"],
        ErrorCategory::FileUpload,
        ErrorCode::Validation,
    ),
    (
        &["rate limit", "token", "openai", "llm", "completion"],
        ErrorCategory::LlmService,
        ErrorCode::ServiceUnavailable,
    ),
    (
        &["ocr", "tesseract", "image text"],
        ErrorCategory::OcrProcessing,
        ErrorCode::Processing,
    ),
    (&["pdf"], ErrorCategory::PdfProcessing, ErrorCode::Processing),
    (
        &["image", "png", "jpeg"],
        ErrorCategory::ImageProcessing,
        ErrorCode::Processing,
    ),
    (
        &["connection", "sql", "database", "deadlock"],
        ErrorCategory::Database,
        ErrorCode::ServiceUnavailable,
    ),
    (
        &["grading", "marking", "score", "submission"],
        ErrorCategory::Grading,
        ErrorCode::Processing,
    ),
];

/// Classifies a raw error message and type name into a category and code.
///
/// This is best-effort substring matching, not a correctness guarantee: a
/// message that happens to contain a keyword lands in that bucket. Defaults
/// to `(System, Internal)` when nothing matches.
pub fn classify(message: &str, type_name: &str) -> (ErrorCategory, ErrorCode) {
    let haystack = format!("{} {}", message, type_name).to_lowercase();
    for (keywords, category, code) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|kw| haystack.contains(kw)) {
            return (*category, *code);
        }
    }
    (ErrorCategory::System, ErrorCode::Internal)
}

/// Type names treated as unconditionally critical
const CRITICAL_TYPES: &[&str] = &["AllocError", "SystemExit", "OutOfMemory"];

/// Assesses severity from a raw error message and type name.
///
/// Independent of [`classify`]; the same best-effort caveat applies (a
/// validation message containing the word "critical" is reported Critical).
pub fn assess_severity(message: &str, type_name: &str) -> Severity {
    let lower = message.to_lowercase();
    if lower.contains("critical")
        || lower.contains("fatal")
        || CRITICAL_TYPES.iter().any(|t| type_name.contains(t))
    {
        return Severity::Critical;
    }
    if lower.contains("connection")
        || lower.contains("network")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("permission")
    {
        return Severity::High;
    }
    if lower.contains("invalid")
        || lower.contains("missing")
        || lower.contains("validation")
        || lower.contains("expected")
        || lower.contains("required")
    {
        return Severity::Medium;
    }
    Severity::Low
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_error_creation_applies_code_defaults() {
        let err = AppError::new(ErrorCode::RateLimit, "provider throttled us");
        assert_eq!(err.code, ErrorCode::RateLimit);
        assert_eq!(err.severity, Severity::Medium);
        assert!(err.recoverable);
        assert_eq!(err.retry_after, Some(60));

        let err = AppError::new(ErrorCode::Validation, "bad email");
        assert_eq!(err.severity, Severity::Low);
        assert!(!err.recoverable);
        assert_eq!(err.retry_after, None);
    }

    #[test]
    fn test_error_ids_are_unique() {
        let ids: HashSet<Uuid> = (0..1000)
            .map(|_| AppError::new(ErrorCode::Internal, "x").id)
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_default_user_message_per_code() {
        for code in ErrorCode::ALL {
            let err = AppError::new(code, "technical detail");
            assert_eq!(err.user_facing_message(), code.default_user_message());
        }
    }

    #[test]
    fn test_user_message_override() {
        let err = AppError::new(ErrorCode::Validation, "bad input")
            .user_message("The marking guide is missing a title.");
        assert_eq!(
            err.user_facing_message(),
            "The marking guide is missing a title."
        );
    }

    #[test]
    fn test_http_status_table() {
        assert_eq!(ErrorCode::Validation.http_status(), 400);
        assert_eq!(ErrorCode::Authentication.http_status(), 401);
        assert_eq!(ErrorCode::Authorization.http_status(), 403);
        assert_eq!(ErrorCode::NotFound.http_status(), 404);
        assert_eq!(ErrorCode::Processing.http_status(), 422);
        assert_eq!(ErrorCode::RateLimit.http_status(), 429);
        assert_eq!(ErrorCode::Internal.http_status(), 500);
        assert_eq!(ErrorCode::ServiceUnavailable.http_status(), 503);
        assert_eq!(ErrorCode::Timeout.http_status(), 504);
    }

    #[test]
    fn test_classify_known_domains() {
        let (cat, _) = classify("OpenAI API rate limit exceeded", "HttpError");
        assert_eq!(cat, ErrorCategory::LlmService);

        let (cat, code) = classify("database connection timeout", "PoolError");
        assert_eq!(cat, ErrorCategory::Database);
        assert_eq!(code, ErrorCode::ServiceUnavailable);

        let (cat, code) = classify("unrecognized gibberish", "SomeError");
        assert_eq!(cat, ErrorCategory::System);
        assert_eq!(code, ErrorCode::Internal);
    }

    #[test]
    fn test_classify_first_match_wins() {
        // "upload" appears before "pdf" in the table
        let (cat, _) = classify("pdf upload failed", "UploadError");
        assert_eq!(cat, ErrorCategory::FileUpload);
    }

    #[test]
    fn test_assess_severity_tiers() {
        assert_eq!(assess_severity("fatal corruption detected", "E"), Severity::Critical);
        assert_eq!(assess_severity("connection refused", "E"), Severity::High);
        assert_eq!(assess_severity("invalid value for field", "E"), Severity::Medium);
        assert_eq!(assess_severity("nothing notable", "E"), Severity::Low);
        // Documented fragility: keyword beats intent
        assert_eq!(
            assess_severity("validation failed: critical field empty", "E"),
            Severity::Critical
        );
    }

    #[test]
    fn test_clone_drops_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let err = AppError::new(ErrorCode::Internal, "wrapped").cause(io);
        assert!(err.cause.is_some());
        let cloned = err.clone();
        assert!(cloned.cause.is_none());
        assert_eq!(cloned.id, err.id);
        assert_eq!(cloned.message, err.message);
    }

    #[test]
    fn test_from_unclassified() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "database connection lost");
        let err = AppError::from_unclassified(io);
        assert_eq!(err.category, ErrorCategory::Database);
        assert_eq!(err.severity, Severity::High);
        assert!(err.cause.is_some());
    }
}
