//! # Error Tracker
//!
//! Bounded, thread-safe record of recent errors with point queries,
//! resolution tracking, and window-scoped aggregate metrics.
//!
//! All mutation happens under a single mutex; reads copy what they need and
//! release the lock before returning, so callers never observe a record
//! mid-mutation. `track_error` never fails: internal problems are logged and
//! reported with a sentinel ID instead of propagating.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{AppError, ErrorCode, Severity};

/// A tracked error with its capture metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// The error itself
    pub error: AppError,
    /// When the tracker captured it
    pub captured_at: DateTime<Utc>,
    /// The affected user, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// The request being served, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// The session, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Arbitrary capture context
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Whether the error has been marked resolved
    pub resolved: bool,
    /// Seconds from capture to resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_time: Option<f64>,
    /// Operator notes recorded at resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
}

/// Aggregate metrics over a trailing window.
///
/// Purely a function of the tracker's current contents: two calls against an
/// unchanged tracker within the same window return identical metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    /// Total errors in the window
    pub total_errors: usize,
    /// Counts keyed by error code
    pub by_code: HashMap<String, usize>,
    /// Counts keyed by severity
    pub by_severity: HashMap<String, usize>,
    /// Counts keyed by hour bucket ("YYYY-MM-DD HH:00")
    pub by_hour: HashMap<String, usize>,
    /// The most common developer messages, most frequent first
    pub top_messages: Vec<(String, usize)>,
    /// Errors per hour over the window
    pub error_rate: f64,
    /// Resolved errors divided by total (1.0 when the window is empty)
    pub recovery_success_rate: f64,
}

/// Configuration for the error tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Maximum records kept before oldest-first eviction
    pub max_errors: usize,
    /// Records older than this are expired opportunistically on each track
    pub retention_hours: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_errors: 1000,
            retention_hours: 24,
        }
    }
}

impl TryFrom<config::Config> for TrackerConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        // Start from defaults and selectively override from the provided config.
        let mut base = TrackerConfig::default();
        if let Ok(max_errors) = cfg.get::<usize>("tracker.max_errors") {
            base.max_errors = max_errors;
        }
        if let Ok(retention_hours) = cfg.get::<i64>("tracker.retention_hours") {
            base.retention_hours = retention_hours;
        }
        Ok(base)
    }
}

/// Bounded in-memory tracker of recent errors
#[derive(Debug)]
pub struct ErrorTracker {
    config: TrackerConfig,
    records: Mutex<VecDeque<ErrorRecord>>,
}

impl ErrorTracker {
    /// Creates a tracker with the given configuration
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            records: Mutex::new(VecDeque::new()),
        }
    }

    /// Creates a tracker with default limits
    pub fn with_defaults() -> Self {
        Self::new(TrackerConfig::default())
    }

    // Lock helper absorbing poisoning so track_error keeps its never-fails
    // contract even after a panicking writer.
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ErrorRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records an error. Never panics or propagates: on internal failure the
    /// sentinel `Uuid::nil()` is returned and a warning logged.
    pub fn track_error(
        &self,
        error: AppError,
        user_id: Option<&str>,
        request_id: Option<&str>,
        context: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Uuid {
        let error_id = error.id;
        let record = ErrorRecord {
            error,
            captured_at: Utc::now(),
            user_id: user_id.map(str::to_owned),
            request_id: request_id.map(str::to_owned),
            session_id: None,
            context: context.unwrap_or_default(),
            resolved: false,
            resolution_time: None,
            resolution_notes: None,
        };

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut records = self.lock();

            // Opportunistic retention-based expiry, then the hard capacity
            // cap. Capacity eviction is oldest-first and ignores resolution
            // state; it takes precedence over retention.
            let cutoff = Utc::now() - ChronoDuration::hours(self.config.retention_hours);
            while records
                .front()
                .map_or(false, |r| r.captured_at < cutoff)
            {
                records.pop_front();
            }

            records.push_back(record);
            while records.len() > self.config.max_errors {
                records.pop_front();
            }
        }));

        match result {
            Ok(()) => {
                counter!("grader.errors.tracked", 1);
                debug!(error_id = %error_id, "Error tracked");
                error_id
            }
            Err(_) => {
                warn!(error_id = %error_id, "Failed to track error; returning sentinel ID");
                Uuid::nil()
            }
        }
    }

    /// Returns records most-recent-first, optionally filtered by capture
    /// time, severity, and code, truncated to `limit`
    pub fn get_recent_errors(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
        severity: Option<Severity>,
        code: Option<ErrorCode>,
    ) -> Vec<ErrorRecord> {
        let records = self.lock();
        records
            .iter()
            .rev()
            .filter(|r| since.map_or(true, |s| r.captured_at >= s))
            .filter(|r| severity.map_or(true, |s| r.error.severity == s))
            .filter(|r| code.map_or(true, |c| r.error.code == c))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Looks up a single record by error ID
    pub fn get_error(&self, error_id: Uuid) -> Option<ErrorRecord> {
        let records = self.lock();
        records.iter().find(|r| r.error.id == error_id).cloned()
    }

    /// Marks a record resolved and computes its wall-clock resolution time.
    /// Returns false (without mutating anything) when the ID is unknown.
    pub fn resolve_error<S: Into<String>>(&self, error_id: Uuid, notes: S) -> bool {
        let mut records = self.lock();
        match records.iter_mut().find(|r| r.error.id == error_id) {
            Some(record) => {
                let now = Utc::now();
                record.resolved = true;
                record.resolution_time = Some(
                    (now - record.captured_at).num_milliseconds() as f64 / 1000.0,
                );
                record.resolution_notes = Some(notes.into());
                counter!("grader.errors.resolved", 1);
                true
            }
            None => false,
        }
    }

    /// Aggregates metrics over the trailing `hours` window
    pub fn get_error_metrics(&self, hours: i64) -> ErrorMetrics {
        let since = Utc::now() - ChronoDuration::hours(hours);
        let window: Vec<ErrorRecord> = {
            let records = self.lock();
            records
                .iter()
                .filter(|r| r.captured_at >= since)
                .cloned()
                .collect()
        };

        let mut by_code: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut by_hour: HashMap<String, usize> = HashMap::new();
        let mut message_counts: HashMap<String, usize> = HashMap::new();
        let mut resolved = 0usize;

        for record in &window {
            *by_code.entry(record.error.code.to_string()).or_default() += 1;
            *by_severity
                .entry(record.error.severity.to_string())
                .or_default() += 1;
            *by_hour
                .entry(record.captured_at.format("%Y-%m-%d %H:00").to_string())
                .or_default() += 1;
            *message_counts
                .entry(record.error.message.clone())
                .or_default() += 1;
            if record.resolved {
                resolved += 1;
            }
        }

        let mut top_messages: Vec<(String, usize)> = message_counts.into_iter().collect();
        top_messages.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_messages.truncate(5);

        let total = window.len();
        ErrorMetrics {
            total_errors: total,
            by_code,
            by_severity,
            by_hour,
            top_messages,
            error_rate: if hours > 0 {
                total as f64 / hours as f64
            } else {
                0.0
            },
            recovery_success_rate: if total > 0 {
                resolved as f64 / total as f64
            } else {
                1.0
            },
        }
    }

    /// Purges records older than the cutoff; returns the count removed
    pub fn clear_old_errors(&self, days: i64) -> usize {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        let mut records = self.lock();
        let before = records.len();
        records.retain(|r| r.captured_at >= cutoff);
        before - records.len()
    }

    /// Current number of records held
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no records are held
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
