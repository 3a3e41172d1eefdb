//! Daily summary report and cumulative export bookkeeping.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::format::ExportFormat;
use crate::transform::Dataset;

/// Aggregate statistics of one day's dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub race_date: Option<NaiveDate>,
    pub total_races: usize,
    pub unique_venues: usize,
    /// Earliest race start, minutes since midnight.
    pub first_race: Option<i64>,
    /// Latest race start, minutes since midnight.
    pub last_race: Option<i64>,
    /// Row count per source.
    pub sources: BTreeMap<String, usize>,
    pub latest_scrape: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

impl DailySummary {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let race_date = dataset
            .date_values("race_date")
            .and_then(|dates| dates.into_iter().flatten().min());

        let unique_venues = dataset
            .string_values("venue")
            .map(|venues| venues.into_iter().flatten().collect::<BTreeSet<_>>().len())
            .unwrap_or(0);

        // Zero is the parser's fallback for unknown times; leave it out.
        let minutes: Vec<i64> = dataset
            .i64_values("race_minutes")
            .map(|m| m.into_iter().flatten().filter(|m| *m > 0).collect())
            .unwrap_or_default();

        let mut sources = BTreeMap::new();
        for source in dataset.string_values("source").unwrap_or_default() {
            *sources
                .entry(source.unwrap_or_else(|| "unknown".to_string()))
                .or_insert(0) += 1;
        }

        let latest_scrape = dataset
            .timestamp_values("scraped_timestamp")
            .and_then(|ts| ts.into_iter().flatten().max());

        Self {
            race_date,
            total_races: dataset.num_rows(),
            unique_venues,
            first_race: minutes.iter().min().copied(),
            last_race: minutes.iter().max().copied(),
            sources,
            latest_scrape,
            generated_at: Utc::now(),
        }
    }
}

/// Cumulative counters across all exports of one exporter.
///
/// Only ever grows: each successful export adds to it, nothing rolls back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportStats {
    pub total_exports: u64,
    pub total_records: u64,
    pub formats_used: BTreeSet<ExportFormat>,
    pub last_export: Option<DateTime<Utc>>,
}

impl ExportStats {
    pub(crate) fn record(&mut self, format: ExportFormat, rows: usize) {
        self.total_exports += 1;
        self.total_records += rows as u64;
        self.formats_used.insert(format);
        self.last_export = Some(Utc::now());
    }
}

/// Outcome of exporting one dataset in several formats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    /// Path written per successful format.
    pub paths: BTreeMap<ExportFormat, PathBuf>,
    /// Error message per failed format.
    pub failures: BTreeMap<ExportFormat, String>,
    /// Exporter statistics after this dataset's exports.
    pub stats: ExportStats,
}

impl ExportManifest {
    pub fn record_success(&mut self, format: ExportFormat, path: PathBuf) {
        self.failures.remove(&format);
        self.paths.insert(format, path);
    }

    pub fn record_failure(&mut self, format: ExportFormat, message: impl Into<String>) {
        self.failures.insert(format, message.into());
    }

    pub fn succeeded_formats(&self) -> Vec<ExportFormat> {
        self.paths.keys().copied().collect()
    }

    pub fn failed_formats(&self) -> Vec<ExportFormat> {
        self.failures.keys().copied().collect()
    }

    /// Some formats succeeded and some failed.
    pub fn is_partial(&self) -> bool {
        !self.paths.is_empty() && !self.failures.is_empty()
    }

    pub fn path(&self, format: ExportFormat) -> Option<&PathBuf> {
        self.paths.get(&format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::RawRecord;
    use crate::transform::RaceDataTransformer;

    #[test]
    fn test_daily_summary() {
        let records = vec![
            RawRecord::new()
                .with("date", "2024-01-15")
                .with("venue", "Ellerslie")
                .with("source", "tab_nz")
                .with("race_time", "12:30"),
            RawRecord::new()
                .with("date", "2024-01-15")
                .with("venue", "Trentham")
                .with("source", "tab_nz")
                .with("race_time", "16:45"),
            RawRecord::new()
                .with("date", "2024-01-15")
                .with("venue", "ellerslie ")
                .with("source", "replay")
                .with("race_time", "TBA"),
        ];
        let dataset = RaceDataTransformer::new()
            .transform(&records)
            .expect("transform should succeed");

        let summary = DailySummary::from_dataset(&dataset);
        assert_eq!(summary.race_date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(summary.total_races, 3);
        assert_eq!(summary.unique_venues, 2);
        assert_eq!(summary.first_race, Some(750));
        assert_eq!(summary.last_race, Some(1005));
        assert_eq!(summary.sources.get("tab_nz"), Some(&2));
        assert_eq!(summary.sources.get("replay"), Some(&1));
        assert!(summary.latest_scrape.is_none());
    }

    #[test]
    fn test_manifest_partial() {
        let mut manifest = ExportManifest::default();
        manifest.record_success(ExportFormat::Parquet, PathBuf::from("a.parquet"));
        manifest.record_failure(ExportFormat::Csv, "disk full");

        assert!(manifest.is_partial());
        assert_eq!(manifest.succeeded_formats(), vec![ExportFormat::Parquet]);
        assert_eq!(manifest.failed_formats(), vec![ExportFormat::Csv]);

        manifest.record_success(ExportFormat::Csv, PathBuf::from("a.csv"));
        assert!(!manifest.is_partial());
    }

    #[test]
    fn test_stats_accumulate() {
        let mut stats = ExportStats::default();
        stats.record(ExportFormat::Parquet, 4);
        stats.record(ExportFormat::Parquet, 4);
        stats.record(ExportFormat::Csv, 4);

        assert_eq!(stats.total_exports, 3);
        assert_eq!(stats.total_records, 12);
        assert_eq!(stats.formats_used.len(), 2);
        assert!(stats.last_export.is_some());
    }
}
