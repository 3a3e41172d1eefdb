//! Pipeline configuration.
//!
//! All settings are plain structs handed to constructors. `from_env` reads
//! the `RACEFORGE_*` variables on top of the defaults.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::policy::{RunRetryPolicy, StagePolicy};
use crate::collectors::{ScrapingConfig, SourceConfig, SourceKind};
use crate::export::ExportFormat;
use crate::monitor::{AnomalyThresholds, MonitorConfig};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Fetch settings
    pub source: SourceConfig,
    pub scraping: ScrapingConfig,

    // Output settings
    /// Directory receiving the daily exports.
    pub export_dir: PathBuf,
    /// Directory receiving monitoring reports.
    pub reports_dir: PathBuf,
    /// Prefix of exported file names, e.g. `racing_data_2024-01-15.parquet`.
    pub dataset_kind: String,
    /// Formats written by every run, in order.
    pub export_formats: Vec<ExportFormat>,

    // Stage policies
    pub fetch_policy: StagePolicy,
    pub transform_policy: StagePolicy,
    pub export_policy: StagePolicy,
    pub run_retry: RunRetryPolicy,

    /// Upper bound on concurrently running dates during a backfill.
    pub max_parallel: usize,

    // Monitor settings
    pub monitor_days_back: u32,
    pub thresholds: AnomalyThresholds,
    pub alert_on_issues: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            scraping: ScrapingConfig::default(),

            export_dir: PathBuf::from("./data/exports"),
            reports_dir: PathBuf::from("./data/reports"),
            dataset_kind: "racing_data".to_string(),
            export_formats: vec![ExportFormat::Parquet, ExportFormat::Csv, ExportFormat::Summary],

            fetch_policy: StagePolicy::fetch(),
            transform_policy: StagePolicy::transform(),
            export_policy: StagePolicy::export(),
            run_retry: RunRetryPolicy::default(),

            max_parallel: 3,

            monitor_days_back: 7,
            thresholds: AnomalyThresholds::default(),
            alert_on_issues: true,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RACEFORGE_SOURCE_KIND`: `http` or `file` (default: http)
    /// - `RACEFORGE_SOURCE_NAME`: Source name stamped into records (default: tab_nz)
    /// - `RACEFORGE_BASE_URL`: HTTP source base URL
    /// - `RACEFORGE_PATH_TEMPLATE`: Request path, `{date}` is substituted
    /// - `RACEFORGE_DATA_DIR`: File source directory (default: ./raw_data)
    /// - `RACEFORGE_BASE_DELAY_MS`: Minimum inter-request delay (default: 1000)
    /// - `RACEFORGE_MAX_DELAY_MS`: Maximum inter-request delay (default: 3000)
    /// - `RACEFORGE_TIMEOUT_SECS`: Request timeout (default: 30)
    /// - `RACEFORGE_MAX_RETRIES`: Fetch attempts (default: 3)
    /// - `RACEFORGE_RESPECT_ROBOTS`: Honour robots.txt (default: true)
    /// - `RACEFORGE_USER_AGENT`: User agent header
    /// - `RACEFORGE_EXPORT_DIR`: Export directory (default: ./data/exports)
    /// - `RACEFORGE_REPORTS_DIR`: Report directory (default: ./data/reports)
    /// - `RACEFORGE_DATASET_KIND`: Export file prefix (default: racing_data)
    /// - `RACEFORGE_FORMATS`: Comma-separated export formats (default: parquet,csv,summary)
    /// - `RACEFORGE_MAX_PARALLEL`: Backfill parallelism (default: 3)
    /// - `RACEFORGE_RUN_ATTEMPTS`: Whole-run attempts (default: 2)
    /// - `RACEFORGE_RUN_COOLDOWN_SECS`: Delay between run attempts (default: 300)
    /// - `RACEFORGE_DAYS_BACK`: Monitor window in days (default: 7)
    /// - `RACEFORGE_ALERT_ON_ISSUES`: Log alerts for unhealthy reports (default: true)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Source settings
        if let Ok(val) = std::env::var("RACEFORGE_SOURCE_KIND") {
            config.source.kind = val.parse::<SourceKind>().map_err(|message| {
                ConfigError::InvalidValue {
                    key: "RACEFORGE_SOURCE_KIND".to_string(),
                    message,
                }
            })?;
        }

        if let Ok(val) = std::env::var("RACEFORGE_SOURCE_NAME") {
            config.source.name = val;
        }

        if let Ok(val) = std::env::var("RACEFORGE_BASE_URL") {
            config.source.base_url = val;
        }

        if let Ok(val) = std::env::var("RACEFORGE_PATH_TEMPLATE") {
            config.source.path_template = val;
        }

        if let Ok(val) = std::env::var("RACEFORGE_DATA_DIR") {
            config.source.data_dir = PathBuf::from(val);
        }

        // Scraping settings
        if let Ok(val) = std::env::var("RACEFORGE_BASE_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "RACEFORGE_BASE_DELAY_MS")?;
            config.scraping.base_delay = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("RACEFORGE_MAX_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "RACEFORGE_MAX_DELAY_MS")?;
            config.scraping.max_delay = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("RACEFORGE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "RACEFORGE_TIMEOUT_SECS")?;
            config.scraping.timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("RACEFORGE_MAX_RETRIES") {
            config.scraping.max_retries = parse_env_value(&val, "RACEFORGE_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("RACEFORGE_RESPECT_ROBOTS") {
            config.scraping.respect_robots = parse_env_bool(&val, "RACEFORGE_RESPECT_ROBOTS")?;
        }

        if let Ok(val) = std::env::var("RACEFORGE_USER_AGENT") {
            config.scraping.user_agent = val;
        }

        // Output settings
        if let Ok(val) = std::env::var("RACEFORGE_EXPORT_DIR") {
            config.export_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("RACEFORGE_REPORTS_DIR") {
            config.reports_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("RACEFORGE_DATASET_KIND") {
            config.dataset_kind = val;
        }

        if let Ok(val) = std::env::var("RACEFORGE_FORMATS") {
            config.export_formats =
                ExportFormat::parse_list(&val).map_err(|e| ConfigError::InvalidValue {
                    key: "RACEFORGE_FORMATS".to_string(),
                    message: e.to_string(),
                })?;
        }

        // Concurrency and retry settings
        if let Ok(val) = std::env::var("RACEFORGE_MAX_PARALLEL") {
            config.max_parallel = parse_env_value(&val, "RACEFORGE_MAX_PARALLEL")?;
        }

        if let Ok(val) = std::env::var("RACEFORGE_RUN_ATTEMPTS") {
            config.run_retry.max_attempts = parse_env_value(&val, "RACEFORGE_RUN_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("RACEFORGE_RUN_COOLDOWN_SECS") {
            let secs: u64 = parse_env_value(&val, "RACEFORGE_RUN_COOLDOWN_SECS")?;
            config.run_retry.cooldown = Duration::from_secs(secs);
        }

        // Monitor settings
        if let Ok(val) = std::env::var("RACEFORGE_DAYS_BACK") {
            config.monitor_days_back = parse_env_value(&val, "RACEFORGE_DAYS_BACK")?;
        }

        if let Ok(val) = std::env::var("RACEFORGE_ALERT_ON_ISSUES") {
            config.alert_on_issues = parse_env_bool(&val, "RACEFORGE_ALERT_ON_ISSUES")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_parallel must be greater than 0".to_string(),
            ));
        }

        if self.scraping.max_delay < self.scraping.base_delay {
            return Err(ConfigError::ValidationFailed(
                "max_delay cannot be less than base_delay".to_string(),
            ));
        }

        if self.scraping.max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_retries must be greater than 0".to_string(),
            ));
        }

        if self.export_formats.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "at least one export format is required".to_string(),
            ));
        }

        if self.dataset_kind.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "dataset_kind cannot be empty".to_string(),
            ));
        }

        if self.source.kind == SourceKind::Http && self.source.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "base_url is required for the http source".to_string(),
            ));
        }

        if self.run_retry.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "run_retry.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.monitor_days_back == 0 {
            return Err(ConfigError::ValidationFailed(
                "monitor_days_back must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Monitor settings derived from this configuration.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::new(self.export_dir.clone(), self.reports_dir.clone())
            .with_dataset_kind(self.dataset_kind.clone())
            .with_thresholds(self.thresholds.clone())
            .with_alerts(self.alert_on_issues)
    }

    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.source = source;
        self
    }

    pub fn with_scraping(mut self, scraping: ScrapingConfig) -> Self {
        self.scraping = scraping;
        self
    }

    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = dir.into();
        self
    }

    pub fn with_dataset_kind(mut self, kind: impl Into<String>) -> Self {
        self.dataset_kind = kind.into();
        self
    }

    pub fn with_export_formats(mut self, formats: Vec<ExportFormat>) -> Self {
        self.export_formats = formats;
        self
    }

    pub fn with_fetch_policy(mut self, policy: StagePolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    pub fn with_transform_policy(mut self, policy: StagePolicy) -> Self {
        self.transform_policy = policy;
        self
    }

    pub fn with_export_policy(mut self, policy: StagePolicy) -> Self {
        self.export_policy = policy;
        self
    }

    pub fn with_run_retry(mut self, policy: RunRetryPolicy) -> Self {
        self.run_retry = policy;
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max;
        self
    }

    pub fn with_monitor_days_back(mut self, days: u32) -> Self {
        self.monitor_days_back = days;
        self
    }

    pub fn with_alerts(mut self, enabled: bool) -> Self {
        self.alert_on_issues = enabled;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.dataset_kind, "racing_data");
        assert_eq!(config.max_parallel, 3);
        assert_eq!(
            config.export_formats,
            vec![ExportFormat::Parquet, ExportFormat::Csv, ExportFormat::Summary]
        );
        assert_eq!(config.scraping.max_retries, 3);
        assert_eq!(config.run_retry.max_attempts, 2);
        assert_eq!(config.fetch_policy.cache_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(config.export_policy.max_attempts, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::new()
            .with_export_dir("/tmp/exports")
            .with_dataset_kind("harness_data")
            .with_export_formats(vec![ExportFormat::Jsonl])
            .with_max_parallel(8)
            .with_alerts(false);

        assert_eq!(config.export_dir, PathBuf::from("/tmp/exports"));
        assert_eq!(config.dataset_kind, "harness_data");
        assert_eq!(config.export_formats, vec![ExportFormat::Jsonl]);
        assert_eq!(config.max_parallel, 8);

        let monitor = config.monitor_config();
        assert_eq!(monitor.dataset_kind, "harness_data");
        assert!(!monitor.alert_on_issues);
    }

    #[test]
    fn test_validation_zero_parallelism() {
        let result = PipelineConfig::default().with_max_parallel(0).validate();
        assert!(result
            .expect_err("zero parallelism")
            .to_string()
            .contains("max_parallel"));
    }

    #[test]
    fn test_validation_delay_order() {
        let scraping = ScrapingConfig::default()
            .with_delays(Duration::from_secs(5), Duration::from_secs(1));
        let result = PipelineConfig::default().with_scraping(scraping).validate();
        assert!(result
            .expect_err("inverted delays")
            .to_string()
            .contains("max_delay"));
    }

    #[test]
    fn test_validation_empty_formats() {
        let result = PipelineConfig::default()
            .with_export_formats(Vec::new())
            .validate();
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_env_value() {
        let parsed: usize = parse_env_value(" 4 ", "KEY").expect("parse");
        assert_eq!(parsed, 4);

        let err = parse_env_value::<usize>("four", "RACEFORGE_MAX_PARALLEL").expect_err("invalid");
        assert!(err.to_string().contains("RACEFORGE_MAX_PARALLEL"));
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("yes", "K").expect("bool"));
        assert!(!parse_env_bool("OFF", "K").expect("bool"));
        assert!(parse_env_bool("maybe", "K").is_err());
    }
}
