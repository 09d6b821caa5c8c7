//! # Error Analytics
//!
//! Derives human-readable reports from [`ErrorTracker`] state: a metrics
//! snapshot, an hour-bucketed trend, the top offending users and operations,
//! and a list of threshold-based recommendations.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::tracker::{ErrorMetrics, ErrorTracker};
use crate::types::Severity;

/// Direction of the error trend across the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    /// Latest hour exceeds the previous by more than 10%
    Up,
    /// Latest hour is more than 10% below the previous
    Down,
    /// Neither threshold crossed
    Flat,
}

/// Hour-bucketed counts with an overall direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalysis {
    /// One (bucket label, count) pair per hour, oldest first
    pub hourly_counts: Vec<(String, usize)>,
    /// Trend over the two most recent buckets
    pub direction: TrendDirection,
}

/// A full analytics report over a trailing window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// When the report was generated
    pub generated_at: DateTime<Utc>,
    /// The trailing window size in hours
    pub window_hours: i64,
    /// Aggregate metrics for the window
    pub metrics: ErrorMetrics,
    /// Hourly trend analysis
    pub trend: TrendAnalysis,
    /// Users with the most errors, most first
    pub top_users: Vec<(String, usize)>,
    /// Operations with the most errors, most first
    pub top_operations: Vec<(String, usize)>,
    /// Threshold-based operational recommendations
    pub recommendations: Vec<String>,
}

/// Report generator over a shared tracker
#[derive(Debug)]
pub struct ErrorAnalytics {
    tracker: Arc<ErrorTracker>,
}

impl ErrorAnalytics {
    /// Creates analytics over the given tracker
    pub fn new(tracker: Arc<ErrorTracker>) -> Self {
        Self { tracker }
    }

    /// Produces a report over the trailing `hours` window
    pub fn generate_report(&self, hours: i64) -> ErrorReport {
        let metrics = self.tracker.get_error_metrics(hours);
        let since = Utc::now() - ChronoDuration::hours(hours);
        let records = self.tracker.get_recent_errors(usize::MAX, Some(since), None, None);

        let mut user_counts: HashMap<String, usize> = HashMap::new();
        let mut operation_counts: HashMap<String, usize> = HashMap::new();
        for record in &records {
            if let Some(user) = &record.user_id {
                *user_counts.entry(user.clone()).or_default() += 1;
            }
            let operation = record
                .error
                .context
                .get("operation")
                .and_then(|v| v.as_str())
                .or_else(|| record.context.get("operation").and_then(|v| v.as_str()));
            if let Some(op) = operation {
                *operation_counts.entry(op.to_string()).or_default() += 1;
            }
        }

        let trend = build_trend(&metrics, hours);
        let recommendations = build_recommendations(&metrics);

        ErrorReport {
            generated_at: Utc::now(),
            window_hours: hours,
            metrics,
            trend,
            top_users: top_n(user_counts, 5),
            top_operations: top_n(operation_counts, 5),
            recommendations,
        }
    }
}

fn top_n(counts: HashMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut entries: Vec<(String, usize)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}

fn build_trend(metrics: &ErrorMetrics, hours: i64) -> TrendAnalysis {
    // Walk each hour of the window in order, including the current one, so
    // hours without errors show up as zero buckets.
    let now = Utc::now();
    let mut hourly_counts = Vec::new();
    for offset in (0..hours).rev() {
        let bucket_time = now - ChronoDuration::hours(offset);
        let label = bucket_time
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .unwrap_or(bucket_time)
            .format("%Y-%m-%d %H:00")
            .to_string();
        let count = metrics.by_hour.get(&label).copied().unwrap_or(0);
        hourly_counts.push((label, count));
    }

    let direction = match hourly_counts.len() {
        0 | 1 => TrendDirection::Flat,
        n => {
            let latest = hourly_counts[n - 1].1 as f64;
            let previous = hourly_counts[n - 2].1 as f64;
            if latest > previous * 1.10 {
                TrendDirection::Up
            } else if previous > 0.0 && latest < previous * 0.90 {
                TrendDirection::Down
            } else {
                TrendDirection::Flat
            }
        }
    };

    TrendAnalysis {
        hourly_counts,
        direction,
    }
}

// Each rule is evaluated independently against the same metrics snapshot;
// ordering of the output lines carries no meaning.
fn build_recommendations(metrics: &ErrorMetrics) -> Vec<String> {
    let mut recommendations = Vec::new();

    if metrics.error_rate > 60.0 {
        recommendations.push(
            "Error rate exceeds one per minute; consider adding circuit breakers around failing dependencies."
                .to_string(),
        );
    }
    if metrics.recovery_success_rate < 0.5 {
        recommendations.push(
            "Less than half of tracked errors are being resolved; review retry logic and recovery coverage."
                .to_string(),
        );
    }
    if metrics
        .by_severity
        .get(&Severity::Critical.to_string())
        .copied()
        .unwrap_or(0)
        > 0
    {
        recommendations.push(
            "Critical errors occurred in this window; investigate immediately.".to_string(),
        );
    }
    let validation = metrics
        .by_code
        .get("VALIDATION")
        .copied()
        .unwrap_or(0) as f64;
    if metrics.total_errors > 0 && validation / metrics.total_errors as f64 > 0.30 {
        recommendations.push(
            "Validation errors exceed 30% of the total; review input validation on upload and grading forms."
                .to_string(),
        );
    }

    if recommendations.is_empty() {
        recommendations.push("Error monitoring looks healthy; no action needed.".to_string());
    }
    recommendations
}
