//! # Structured Logging
//!
//! Tracing setup plus the platform's error-specific outputs: severity-driven
//! structured log events and the append-only NDJSON error log
//! (`errors_<YYYYMMDD>.log`) the monitoring tooling tails.

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::tracker::ErrorRecord;
use crate::types::{AppError, ErrorCode, Result, Severity};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// The service name used for log file naming
    pub service_name: String,
    /// Whether to output logs to a rolling file
    pub file_output: bool,
    /// The directory to store log files in
    pub log_dir: Option<String>,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "grader".to_string(),
            file_output: false,
            log_dir: None,
            json_format: true,
        }
    }
}

impl TryFrom<config::Config> for LoggingConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        // Start from defaults and selectively override from the provided config.
        let mut base = LoggingConfig::default();
        if let Ok(level) = cfg.get::<String>("logging.level") {
            base.level = level;
        }
        if let Ok(service_name) = cfg.get::<String>("logging.service_name") {
            base.service_name = service_name;
        }
        if let Ok(file_output) = cfg.get::<bool>("logging.file_output") {
            base.file_output = file_output;
        }
        if let Ok(log_dir) = cfg.get::<String>("logging.log_dir") {
            base.log_dir = Some(log_dir);
        }
        if let Ok(json_format) = cfg.get::<bool>("logging.json_format") {
            base.json_format = json_format;
        }
        Ok(base)
    }
}

/// Initializes the structured logging system. Safe to call more than once;
/// only the first call installs a subscriber.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<()> {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if config.json_format {
        layers.push(
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_target(true)
                .boxed(),
        );
    } else {
        layers.push(fmt::layer().with_target(true).boxed());
    }

    if config.file_output {
        if let Some(log_dir) = &config.log_dir {
            let appender = tracing_appender::rolling::daily(
                log_dir,
                format!("{}.log", config.service_name),
            );
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            // Keep the guard alive for the lifetime of the process so
            // buffered lines are flushed.
            Box::leak(Box::new(guard));
            layers.push(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .boxed(),
            );
        }
    }

    let subscriber = tracing_subscriber::registry().with(layers).with(filter);
    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        AppError::new(
            ErrorCode::Internal,
            format!("Failed to set global subscriber: {}", e),
        )
    })?;

    info!(
        service = %config.service_name,
        level = %config.level,
        json = config.json_format,
        "Structured logging initialized"
    );
    Ok(())
}

/// Logs an error at the level its severity calls for
pub fn log_app_error(err: &AppError) {
    match err.severity {
        Severity::Critical => {
            error!(
                error_id = %err.id,
                code = %err.code,
                category = %err.category,
                severity = %err.severity,
                message = %err.message,
                critical = true,
                "Critical error occurred"
            );
        }
        Severity::High => {
            error!(
                error_id = %err.id,
                code = %err.code,
                category = %err.category,
                severity = %err.severity,
                message = %err.message,
                "Error occurred"
            );
        }
        Severity::Medium => {
            warn!(
                error_id = %err.id,
                code = %err.code,
                category = %err.category,
                severity = %err.severity,
                message = %err.message,
                "Warning occurred"
            );
        }
        Severity::Low => {
            info!(
                error_id = %err.id,
                code = %err.code,
                category = %err.category,
                severity = %err.severity,
                message = %err.message,
                "Minor error occurred"
            );
        }
    }
}

/// Append-only newline-delimited JSON error log, one file per day.
///
/// Write failures degrade to a tracing warning; callers never see them.
#[derive(Debug)]
pub struct ErrorLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ErrorLog {
    /// Creates the log directory (best effort) and the writer
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        let dir = dir.into();
        if let Err(err) = fs::create_dir_all(&dir) {
            warn!(error = %err, dir = %dir.display(), "Failed to create error log directory");
        }
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    /// The file today's lines land in
    pub fn current_path(&self) -> PathBuf {
        self.dir
            .join(format!("errors_{}.log", Utc::now().format("%Y%m%d")))
    }

    /// Appends one NDJSON line for the record
    pub fn append(&self, record: &ErrorRecord) {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "Failed to serialize error record for log");
                return;
            }
        };

        let path = self.current_path();
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(err) = result {
            warn!(error = %err, path = %path.display(), "Failed to append to error log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AppError;

    fn sample_record() -> ErrorRecord {
        ErrorRecord {
            error: AppError::new(ErrorCode::Processing, "ocr engine crashed"),
            captured_at: Utc::now(),
            user_id: Some("u-1".into()),
            request_id: None,
            session_id: None,
            context: serde_json::Map::new(),
            resolved: false,
            resolution_time: None,
            resolution_notes: None,
        }
    }

    #[test]
    fn test_error_log_appends_parseable_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::new(dir.path());

        log.append(&sample_record());
        log.append(&sample_record());

        let contents = fs::read_to_string(log.current_path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["error"]["message"], "ocr engine crashed");
            assert_eq!(value["user_id"], "u-1");
        }
    }

    #[test]
    fn test_error_log_filename_is_daily() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::new(dir.path());
        let name = log.current_path();
        let name = name.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("errors_"));
        assert!(name.ends_with(".log"));
        assert_eq!(name.len(), "errors_YYYYMMDD.log".len());
    }

    #[test]
    fn test_logging_config_overrides_from_config() {
        let cfg = config::Config::builder()
            .set_override("logging.level", "debug")
            .unwrap()
            .set_override("logging.json_format", false)
            .unwrap()
            .build()
            .unwrap();

        let logging = LoggingConfig::try_from(cfg).unwrap();
        assert_eq!(logging.level, "debug");
        assert!(!logging.json_format);
        // Untouched fields keep their defaults
        assert_eq!(logging.service_name, "grader");
    }
}
