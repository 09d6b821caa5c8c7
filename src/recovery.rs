//! # Recovery Service
//!
//! Wraps arbitrary operations with retry-with-backoff and fallback
//! semantics, and provides best-effort recovery helpers for the known
//! failure domains (OCR, LLM calls, PDF and image processing).
//!
//! Per invocation: attempt, on failure categorize; a category outside the
//! configured allow-list stops retrying immediately; exhausted attempts fall
//! through to the fallback when one is configured. A failing fallback never
//! masks the original error: the original propagates and the fallback
//! failure is logged as secondary context only.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::tracker::ErrorTracker;
use crate::types::{AppError, ErrorCategory, Result};

/// How the inter-attempt delay grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// No delay between attempts
    Immediate,
    /// `base_delay` between every attempt
    Fixed,
    /// `base_delay * (attempt + 1)`
    Linear,
    /// `base_delay * multiplier^attempt`
    Exponential,
}

/// Configuration for the retry loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, counting the first
    pub max_attempts: usize,
    /// Base duration for backoff
    pub base_delay: Duration,
    /// Hard cap applied after the strategy computes its delay
    pub max_delay: Duration,
    /// Delay growth strategy
    pub strategy: BackoffStrategy,
    /// Multiplier for the exponential strategy
    pub multiplier: f64,
    /// Whether to apply ±10% uniform jitter after clamping
    pub jitter: bool,
    /// Allow-list of categories worth retrying; an error outside it stops
    /// the loop immediately
    pub error_categories: Option<Vec<ErrorCategory>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
            multiplier: 2.0,
            jitter: true,
            error_categories: None,
        }
    }
}

impl TryFrom<config::Config> for RetryConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        // Start from defaults and selectively override from the provided config.
        let mut base = RetryConfig::default();
        if let Ok(max_attempts) = cfg.get::<usize>("retry.max_attempts") {
            base.max_attempts = max_attempts;
        }
        if let Ok(secs) = cfg.get::<f64>("retry.base_delay_secs") {
            base.base_delay = Duration::from_secs_f64(secs);
        }
        if let Ok(secs) = cfg.get::<f64>("retry.max_delay_secs") {
            base.max_delay = Duration::from_secs_f64(secs);
        }
        if let Ok(strategy) = cfg.get::<String>("retry.strategy") {
            base.strategy = match strategy.as_str() {
                "immediate" => BackoffStrategy::Immediate,
                "fixed" => BackoffStrategy::Fixed,
                "linear" => BackoffStrategy::Linear,
                _ => BackoffStrategy::Exponential,
            };
        }
        if let Ok(multiplier) = cfg.get::<f64>("retry.multiplier") {
            base.multiplier = multiplier;
        }
        if let Ok(jitter) = cfg.get::<bool>("retry.jitter") {
            base.jitter = jitter;
        }
        Ok(base)
    }
}

/// Computes the delay before the attempt following 0-based `attempt`:
/// strategy value, clamped to `max_delay`, then optional ±10% jitter.
pub fn compute_delay(config: &RetryConfig, attempt: usize) -> Duration {
    let base = config.base_delay.as_secs_f64();
    let raw = match config.strategy {
        BackoffStrategy::Immediate => 0.0,
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Linear => base * (attempt as f64 + 1.0),
        BackoffStrategy::Exponential => base * config.multiplier.powi(attempt as i32),
    };
    let clamped = raw.min(config.max_delay.as_secs_f64());
    let final_secs = if config.jitter && clamped > 0.0 {
        let jitter_range = clamped * 0.1;
        clamped + rand::thread_rng().gen_range(-jitter_range..=jitter_range)
    } else {
        clamped
    };
    Duration::from_secs_f64(final_secs.max(0.0))
}

/// Monotonic recovery counters snapshot
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RecoveryStats {
    /// Attempts executed, successes included
    pub total_attempts: u64,
    /// Operations that succeeded after at least one failed attempt
    pub successful_recoveries: u64,
    /// Operations that exhausted every attempt
    pub failed_recoveries: u64,
    /// Times a fallback produced the returned value
    pub fallback_uses: u64,
}

/// Outcome of a domain-specific recovery walk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    /// Whether any alternative succeeded
    pub recovered: bool,
    /// Alternatives tried
    pub attempts: usize,
    /// One human-readable note per alternative
    pub notes: Vec<String>,
}

/// A boxed alternative operation for the domain recovery helpers
pub type AlternativeOp<T> =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<T>> + Send>> + Send + Sync>;

/// Retry/backoff/fallback execution wrapper
#[derive(Debug)]
pub struct RecoveryService {
    tracker: Arc<ErrorTracker>,
    config: RetryConfig,
    total_attempts: AtomicU64,
    successful_recoveries: AtomicU64,
    failed_recoveries: AtomicU64,
    fallback_uses: AtomicU64,
}

impl RecoveryService {
    /// Creates a recovery service reporting to the given tracker
    pub fn new(tracker: Arc<ErrorTracker>, config: RetryConfig) -> Self {
        Self {
            tracker,
            config,
            total_attempts: AtomicU64::new(0),
            successful_recoveries: AtomicU64::new(0),
            failed_recoveries: AtomicU64::new(0),
            fallback_uses: AtomicU64::new(0),
        }
    }

    /// The active retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Snapshot of the monotonic counters
    pub fn stats(&self) -> RecoveryStats {
        RecoveryStats {
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            successful_recoveries: self.successful_recoveries.load(Ordering::Relaxed),
            failed_recoveries: self.failed_recoveries.load(Ordering::Relaxed),
            fallback_uses: self.fallback_uses.load(Ordering::Relaxed),
        }
    }

    /// Executes `f` under the retry policy
    pub async fn execute<F, Fut, T>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.run_attempts(operation, &f).await {
            Ok(value) => Ok(value),
            Err(error) => {
                self.failed_recoveries.fetch_add(1, Ordering::Relaxed);
                counter!("grader.recovery.failed", 1);
                Err(error)
            }
        }
    }

    /// Executes `f` under the retry policy, invoking `fallback` once the
    /// attempts are exhausted. The original error propagates if the fallback
    /// also fails.
    pub async fn execute_with_fallback<F, Fut, FB, FutB, T>(
        &self,
        operation: &str,
        f: F,
        fallback: FB,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        FB: FnOnce() -> FutB,
        FutB: Future<Output = Result<T>>,
    {
        match self.run_attempts(operation, &f).await {
            Ok(value) => Ok(value),
            Err(original) => {
                warn!(
                    operation = %operation,
                    error = %original,
                    "Attempts exhausted; invoking fallback"
                );
                match fallback().await {
                    Ok(value) => {
                        self.fallback_uses.fetch_add(1, Ordering::Relaxed);
                        counter!("grader.recovery.fallback_used", 1);
                        Ok(value)
                    }
                    Err(fallback_error) => {
                        // Secondary context only; the original error is what
                        // the caller sees.
                        warn!(
                            operation = %operation,
                            fallback_error = %fallback_error,
                            "Fallback also failed"
                        );
                        self.failed_recoveries.fetch_add(1, Ordering::Relaxed);
                        counter!("grader.recovery.failed", 1);
                        Err(original)
                    }
                }
            }
        }
    }

    async fn run_attempts<F, Fut, T>(&self, operation: &str, f: &F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error: Option<AppError> = None;

        for attempt in 0..self.config.max_attempts {
            self.total_attempts.fetch_add(1, Ordering::Relaxed);
            counter!("grader.recovery.attempts", 1);

            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        self.successful_recoveries.fetch_add(1, Ordering::Relaxed);
                        counter!("grader.recovery.succeeded", 1);
                        info!(
                            operation = %operation,
                            attempt = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let mut attempt_context = serde_json::Map::new();
                    attempt_context
                        .insert("operation".into(), serde_json::json!(operation));
                    attempt_context
                        .insert("attempt".into(), serde_json::json!(attempt + 1));
                    self.tracker
                        .track_error(error.clone(), None, None, Some(attempt_context));

                    if let Some(allowed) = &self.config.error_categories {
                        if !allowed.contains(&error.category) {
                            debug!(
                                operation = %operation,
                                category = %error.category,
                                "Error category excluded from retry; stopping"
                            );
                            last_error = Some(error);
                            break;
                        }
                    }

                    if attempt + 1 < self.config.max_attempts {
                        let delay = compute_delay(&self.config, attempt);
                        debug!(
                            operation = %operation,
                            attempt = attempt + 1,
                            max_attempts = self.config.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Retrying after error"
                        );
                        sleep(delay).await;
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::new(
                crate::types::ErrorCode::Internal,
                format!("retry loop for '{}' produced no result", operation),
            )
        }))
    }

    /// Walks a list of named alternatives until one succeeds. Best-effort:
    /// a fully failed walk is reported in the outcome, not as an error.
    pub async fn try_alternatives<T>(
        &self,
        category: ErrorCategory,
        alternatives: Vec<(String, AlternativeOp<T>)>,
    ) -> (Option<T>, RecoveryOutcome) {
        let mut notes = Vec::new();
        let total = alternatives.len();

        for (index, (name, op)) in alternatives.into_iter().enumerate() {
            match op().await {
                Ok(value) => {
                    notes.push(format!("{}: succeeded", name));
                    info!(category = %category, alternative = %name, "Recovery alternative succeeded");
                    counter!("grader.recovery.alternative_succeeded", 1);
                    return (
                        Some(value),
                        RecoveryOutcome {
                            recovered: true,
                            attempts: index + 1,
                            notes,
                        },
                    );
                }
                Err(error) => {
                    notes.push(format!("{}: failed: {}", name, error.message));
                    let mut context = serde_json::Map::new();
                    context.insert("alternative".into(), serde_json::json!(name));
                    self.tracker
                        .track_error(error.category(category), None, None, Some(context));
                }
            }
        }

        (
            None,
            RecoveryOutcome {
                recovered: false,
                attempts: total,
                notes,
            },
        )
    }

    /// Tries alternative OCR engines/parameter sets in order
    pub async fn recover_ocr<T>(
        &self,
        alternatives: Vec<(String, AlternativeOp<T>)>,
    ) -> (Option<T>, RecoveryOutcome) {
        self.try_alternatives(ErrorCategory::OcrProcessing, alternatives)
            .await
    }

    /// Tries alternative LLM providers/models in order
    pub async fn recover_llm<T>(
        &self,
        alternatives: Vec<(String, AlternativeOp<T>)>,
    ) -> (Option<T>, RecoveryOutcome) {
        self.try_alternatives(ErrorCategory::LlmService, alternatives)
            .await
    }

    /// Tries alternative PDF parsers in order
    pub async fn recover_pdf<T>(
        &self,
        alternatives: Vec<(String, AlternativeOp<T>)>,
    ) -> (Option<T>, RecoveryOutcome) {
        self.try_alternatives(ErrorCategory::PdfProcessing, alternatives)
            .await
    }

    /// Tries alternative image decoders/preprocessors in order
    pub async fn recover_image<T>(
        &self,
        alternatives: Vec<(String, AlternativeOp<T>)>,
    ) -> (Option<T>, RecoveryOutcome) {
        self.try_alternatives(ErrorCategory::ImageProcessing, alternatives)
            .await
    }
}
