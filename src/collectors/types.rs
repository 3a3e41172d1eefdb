//! Common types shared by race-record sources.
//!
//! This module defines the raw record representation, the collector error
//! type, scraping configuration and the [`RaceSource`] capability trait that
//! concrete sources implement.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::policy::AccessPolicy;

/// Errors that can occur during a single source request.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// HTTP request failed before a response was received.
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// The request timed out.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Source rate limit exceeded.
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited {
        /// Optional retry-after duration in seconds.
        retry_after: Option<u64>,
    },

    /// The source returned a server-side error status.
    #[error("Server error: status {status}")]
    ServerError { status: u16 },

    /// The source explicitly refused access to the resource.
    #[error("Access denied for '{url}'")]
    AccessDenied { url: String },

    /// The source returned a status that retrying will not fix.
    #[error("Unexpected status {status} for '{url}'")]
    UnexpectedStatus { status: u16, url: String },

    /// Failed to parse response data.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CollectorError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollectorError::HttpError(_)
                | CollectorError::Timeout(_)
                | CollectorError::RateLimited { .. }
                | CollectorError::ServerError { .. }
                | CollectorError::Io(_)
        )
    }

    /// Wait the source asked for before the next request, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CollectorError::RateLimited {
                retry_after: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Result type alias for collector operations.
pub type CollectorResult<T> = Result<T, CollectorError>;

/// One race-event observation exactly as a source returned it.
///
/// Field names map to JSON scalars, except `runners`, which holds the nested
/// per-participant objects when the source provides them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style field insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a field only when it is absent.
    pub(crate) fn insert_if_absent(&mut self, key: &str, value: impl Into<Value>) {
        if !self.0.contains_key(key) {
            self.0.insert(key.to_string(), value.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// True when the field is absent or JSON null.
    pub fn is_null(&self, key: &str) -> bool {
        self.0.get(key).map_or(true, Value::is_null)
    }

    /// String value of a field, if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Integer value of a field, accepting integral floats and numeric strings.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(value_as_i64)
    }

    /// Float value of a field, accepting numeric strings.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(value_as_f64)
    }

    /// Nested participant objects, empty when absent.
    pub fn runners(&self) -> &[Value] {
        self.0
            .get("runners")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Lenient integer coercion shared by validation and transform.
pub(crate) fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Lenient float coercion shared by validation and transform.
pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Request pacing and retry behaviour for a fetch session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingConfig {
    /// Minimum delay between requests; also the backoff base.
    pub base_delay: Duration,
    /// Upper bound of the randomized inter-request delay.
    pub max_delay: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts per fetch before the source is declared unavailable.
    pub max_retries: u32,
    /// Check the source's robots.txt before the first request.
    pub respect_robots: bool,
    pub user_agent: String,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            respect_robots: true,
            user_agent: format!(
                "Mozilla/5.0 (compatible; raceforge/{})",
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

impl ScrapingConfig {
    /// Configuration with no pacing or backoff delays.
    pub fn without_delays() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_respect_robots(mut self, respect: bool) -> Self {
        self.respect_robots = respect;
        self
    }
}

/// Which concrete source implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// JSON endpoint over HTTP.
    Http,
    /// Previously captured JSON/JSONL files on disk.
    File,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Http => write!(f, "http"),
            SourceKind::File => write!(f, "file"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(SourceKind::Http),
            "file" => Ok(SourceKind::File),
            other => Err(format!("unknown source kind '{}'", other)),
        }
    }
}

/// Location and kind of the race-record source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Name stamped into each record's `source` field.
    pub name: String,
    pub base_url: String,
    /// Path appended to `base_url`; `{date}` is replaced by the ISO date.
    pub path_template: String,
    /// Directory read by the file source.
    pub data_dir: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Http,
            name: "tab_nz".to_string(),
            base_url: "https://www.tab.co.nz".to_string(),
            path_template: "/racing/{date}.json".to_string(),
            data_dir: PathBuf::from("./raw_data"),
        }
    }
}

/// Capability to fetch raw race records for a date.
///
/// Implementations perform exactly one request per call; pacing, retries and
/// policy enforcement belong to [`FetchSession`](super::FetchSession).
#[async_trait]
pub trait RaceSource: Send + Sync {
    /// Name stamped into each returned record's `source` field.
    fn name(&self) -> &str;

    /// Location the request for `date` will hit, checked against the policy.
    fn request_url(&self, date: NaiveDate) -> String;

    /// Resolve the source's access policy.
    async fn access_policy(&self, user_agent: &str) -> CollectorResult<AccessPolicy>;

    /// Fetch all records for `date`. An empty vector means "no data".
    async fn fetch_records(&self, date: NaiveDate) -> CollectorResult<Vec<RawRecord>>;
}
