//! # Error Handling & Recovery Framework
//!
//! The error-handling core of the automated exam grading platform:
//! standardized error types with best-effort classification, a bounded
//! in-memory tracker with analytics, context-aware user-facing message
//! mapping, retry/backoff/fallback recovery, and a two-tier cache.
//!
//! ## Features
//!
//! - Typed errors with per-code defaults for severity, recoverability,
//!   user message, and HTTP status
//! - Bounded, thread-safe tracking with resolution and windowed metrics
//! - Trend analysis and threshold-based operational recommendations
//! - Generic, localized, and field-aware user-message mapping
//! - Retry with immediate/fixed/linear/exponential backoff, jitter, and
//!   fallback that never masks the original failure
//! - Memory + disk caching with TTL and least-recently-accessed eviction
//!

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

pub mod analytics;
pub mod cache;
pub mod context;
pub mod handler;
pub mod logging;
pub mod mapper;
pub mod recovery;
pub mod tracker;
pub mod types;

// Re-export commonly used types
pub use analytics::{ErrorAnalytics, ErrorReport, TrendDirection};
pub use cache::{CacheConfig, DiskCache, HybridCache, MemoryCache};
pub use context::{Context, WithContext};
pub use handler::{ApiErrorEnvelope, ErrorHandler, HandledError};
pub use logging::{init_logging, log_app_error, ErrorLog, LoggingConfig};
pub use mapper::{ContextAwareMapper, ErrorMapper, GenericMapper, LocalizedMapper, UserMessage};
pub use recovery::{BackoffStrategy, RecoveryService, RecoveryStats, RetryConfig};
pub use tracker::{ErrorMetrics, ErrorRecord, ErrorTracker, TrackerConfig};
pub use types::{AppError, ErrorCategory, ErrorCode, Result, Severity};

/// Configuration for the whole framework
#[derive(Debug, Clone)]
pub struct ErrorHandlingConfig {
    /// Logging setup
    pub logging: LoggingConfig,
    /// Tracker limits
    pub tracker: TrackerConfig,
    /// Retry policy
    pub retry: RetryConfig,
    /// Cache tiers
    pub cache: CacheConfig,
    /// Directory for the NDJSON error log
    pub error_log_dir: PathBuf,
    /// Directory for the disk cache
    pub cache_dir: PathBuf,
    /// Whether handled errors expose their technical detail
    pub debug_mode: bool,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            tracker: TrackerConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            error_log_dir: PathBuf::from("logs/grading"),
            cache_dir: PathBuf::from("cache/grading"),
            debug_mode: false,
        }
    }
}

/// Process-scoped context holding explicitly constructed instances of every
/// subsystem. Constructed once at startup and passed where needed; there are
/// no module-level globals.
#[derive(Debug)]
pub struct ErrorHandling {
    /// Shared error tracker
    pub tracker: Arc<ErrorTracker>,
    /// Retry/fallback execution wrapper
    pub recovery: RecoveryService,
    /// Report generator
    pub analytics: ErrorAnalytics,
    /// The inbound error funnel
    pub handler: ErrorHandler,
    /// Two-tier cache for recomputation-heavy results
    pub cache: HybridCache<serde_json::Value>,
}

impl ErrorHandling {
    /// Initializes logging and constructs every subsystem
    pub fn init(config: ErrorHandlingConfig) -> Result<Self> {
        init_logging(Some(config.logging))?;

        let tracker = Arc::new(ErrorTracker::new(config.tracker));
        let recovery = RecoveryService::new(tracker.clone(), config.retry);
        let analytics = ErrorAnalytics::new(tracker.clone());
        let handler = ErrorHandler::new(
            tracker.clone(),
            ErrorLog::new(config.error_log_dir),
            config.debug_mode,
        );
        let cache = HybridCache::new(config.cache_dir, &config.cache)?;

        info!("Error handling framework initialized");
        Ok(Self {
            tracker,
            recovery,
            analytics,
            handler,
            cache,
        })
    }

    /// Initializes from a `config::Config`, overriding defaults with any
    /// keys present
    pub fn init_from(cfg: config::Config) -> Result<Self> {
        let mut app_config = ErrorHandlingConfig::default();
        if let Ok(logging) = LoggingConfig::try_from(cfg.clone()) {
            app_config.logging = logging;
        }
        if let Ok(tracker) = TrackerConfig::try_from(cfg.clone()) {
            app_config.tracker = tracker;
        }
        if let Ok(retry) = RetryConfig::try_from(cfg.clone()) {
            app_config.retry = retry;
        }
        if let Ok(cache) = CacheConfig::try_from(cfg.clone()) {
            app_config.cache = cache;
        }
        if let Ok(dir) = cfg.get::<String>("error_log_dir") {
            app_config.error_log_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = cfg.get::<String>("cache_dir") {
            app_config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(debug_mode) = cfg.get::<bool>("debug_mode") {
            app_config.debug_mode = debug_mode;
        }
        Self::init(app_config)
    }

    /// Releases the framework. Nothing is buffered in-process, so this only
    /// marks the lifecycle boundary in the log.
    pub fn shutdown(&self) {
        info!("Error handling framework shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> (ErrorHandlingConfig, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = ErrorHandlingConfig {
            error_log_dir: dir.path().join("logs"),
            cache_dir: dir.path().join("cache"),
            ..Default::default()
        };
        (config, dir)
    }

    #[test]
    fn test_init_and_end_to_end_funnel() {
        let (config, _dir) = test_config();
        let app = ErrorHandling::init(config).unwrap();

        let handled = app.handler.handle_error(
            AppError::new(ErrorCode::Validation, "missing rubric").field("rubric"),
            Some(&Context::new("upload_marking_guide")),
        );
        assert_eq!(handled.http_status, 400);
        assert_eq!(app.tracker.len(), 1);

        let report = app.analytics.generate_report(1);
        assert_eq!(report.metrics.total_errors, 1);

        app.cache
            .set("guide:1", serde_json::json!({"title": "Midterm"}), None)
            .unwrap();
        assert!(app.cache.get("guide:1").is_some());

        app.shutdown();
    }

    #[test]
    fn test_init_from_config_overrides() {
        let (base, _dir) = test_config();
        let cfg = config::Config::builder()
            .set_override("tracker.max_errors", 5i64)
            .unwrap()
            .set_override("retry.max_attempts", 7i64)
            .unwrap()
            .set_override("debug_mode", true)
            .unwrap()
            .set_override(
                "error_log_dir",
                base.error_log_dir.to_string_lossy().to_string(),
            )
            .unwrap()
            .set_override("cache_dir", base.cache_dir.to_string_lossy().to_string())
            .unwrap()
            .build()
            .unwrap();

        let app = ErrorHandling::init_from(cfg).unwrap();
        assert_eq!(app.recovery.config().max_attempts, 7);
    }
}
