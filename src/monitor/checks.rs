//! Freshness and anomaly computations over recently exported datasets.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MonitoringError;
use crate::transform::features::{normalize_venue, venue_category, UNKNOWN_VENUE_CATEGORY};
use crate::transform::transformer::parse_timestamp;
use crate::transform::Dataset;
use crate::validation::rules::parse_iso_date;

/// Thresholds for the monitor's checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyThresholds {
    /// Data older than this many hours is stale.
    pub stale_after_hours: f64,
    /// Standard deviations below the mean that flag a low-volume day.
    pub volume_std_devs: f64,
    /// Share of rows with an unknown venue category that flags a quality issue.
    pub max_unknown_venue_share: f64,
    /// Venues expected to appear in every window.
    pub expected_venues: Vec<String>,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            stale_after_hours: 25.0,
            volume_std_devs: 2.0,
            max_unknown_venue_share: 0.05,
            expected_venues: vec![
                "ELLERSLIE".to_string(),
                "TRENTHAM".to_string(),
                "RICCARTON".to_string(),
            ],
        }
    }
}

/// Freshness verdict for the most recent scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessStatus {
    Fresh,
    Stale,
}

/// Freshness and volume metrics over the loaded window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessMetrics {
    pub latest_scrape: DateTime<Utc>,
    pub data_age_hours: f64,
    pub data_freshness_status: FreshnessStatus,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    pub unique_dates: usize,
    pub total_records: usize,
    pub avg_daily_records: f64,
    pub min_daily_records: usize,
    pub max_daily_records: usize,
}

/// One detected anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Anomaly {
    /// A day's record count fell well below its peers.
    LowVolume {
        date: NaiveDate,
        count: usize,
        threshold: f64,
    },
    /// An expected venue produced no records in the window.
    MissingVenue { venue: String },
    /// Too many rows carry an unknown venue category.
    DataQuality { unknown_venue_percentage: f64 },
}

/// Scrape timestamps from `scraped_timestamp`, falling back to `scraped_at`.
fn scrape_times(dataset: &Dataset) -> Vec<DateTime<Utc>> {
    if let Some(values) = dataset.timestamp_values("scraped_timestamp") {
        return values.into_iter().flatten().collect();
    }
    dataset
        .string_values("scraped_at")
        .map(|values| {
            values
                .iter()
                .flatten()
                .filter_map(|s| parse_timestamp(s))
                .collect()
        })
        .unwrap_or_default()
}

/// Race dates from `race_date`, falling back to the raw `date` strings.
fn race_dates(dataset: &Dataset) -> Option<Vec<NaiveDate>> {
    if let Some(values) = dataset.date_values("race_date") {
        return Some(values.into_iter().flatten().collect());
    }
    dataset
        .string_values("date")
        .map(|values| values.iter().flatten().filter_map(|s| parse_iso_date(s)).collect())
}

/// Record count per race date across all datasets.
///
/// # Errors
///
/// Returns `MonitoringError::MissingColumn` when a non-empty dataset has no
/// usable date column.
pub fn daily_counts(datasets: &[Dataset]) -> Result<BTreeMap<NaiveDate, usize>, MonitoringError> {
    let mut counts = BTreeMap::new();
    for dataset in datasets.iter().filter(|d| !d.is_empty()) {
        let dates = race_dates(dataset)
            .ok_or_else(|| MonitoringError::MissingColumn("race_date".to_string()))?;
        for date in dates {
            *counts.entry(date).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

/// Compute freshness and volume metrics relative to `now`.
///
/// # Errors
///
/// Returns `MonitoringError::MissingColumn` when no row carries a scrape
/// timestamp or a race date.
pub fn calculate_data_freshness_metrics(
    datasets: &[Dataset],
    now: DateTime<Utc>,
    thresholds: &AnomalyThresholds,
) -> Result<FreshnessMetrics, MonitoringError> {
    let latest_scrape = datasets
        .iter()
        .flat_map(scrape_times)
        .max()
        .ok_or_else(|| MonitoringError::MissingColumn("scraped_at".to_string()))?;

    let data_age_hours = (now - latest_scrape).num_seconds() as f64 / 3600.0;
    let data_freshness_status = if data_age_hours > thresholds.stale_after_hours {
        FreshnessStatus::Stale
    } else {
        FreshnessStatus::Fresh
    };

    let counts = daily_counts(datasets)?;
    let total_records: usize = counts.values().sum();
    let unique_dates = counts.len();

    Ok(FreshnessMetrics {
        latest_scrape,
        data_age_hours,
        data_freshness_status,
        min_date: counts.keys().next().copied(),
        max_date: counts.keys().next_back().copied(),
        unique_dates,
        total_records,
        avg_daily_records: if unique_dates == 0 {
            0.0
        } else {
            total_records as f64 / unique_dates as f64
        },
        min_daily_records: counts.values().min().copied().unwrap_or(0),
        max_daily_records: counts.values().max().copied().unwrap_or(0),
    })
}

/// Mean and sample standard deviation; `None` below two samples.
fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, variance.sqrt()))
}

/// Days whose count is more than `std_devs` standard deviations below the
/// mean, either of the whole window or of the other days.
///
/// Skipped entirely with fewer than two days of data. A comparison is only
/// made when its standard deviation is non-zero.
pub fn detect_low_volume_days(counts: &BTreeMap<NaiveDate, usize>, std_devs: f64) -> Vec<Anomaly> {
    if counts.len() < 2 {
        return Vec::new();
    }

    let values: Vec<f64> = counts.values().map(|c| *c as f64).collect();
    let window = mean_and_std(&values).filter(|(_, std)| *std > 0.0);

    let mut anomalies = Vec::new();
    for (idx, (date, count)) in counts.iter().enumerate() {
        let value = *count as f64;

        let mut thresholds = Vec::new();
        if let Some((mean, std)) = window {
            thresholds.push(mean - std_devs * std);
        }
        let others: Vec<f64> = values
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != idx)
            .map(|(_, v)| *v)
            .collect();
        if let Some((mean, std)) = mean_and_std(&others).filter(|(_, std)| *std > 0.0) {
            thresholds.push(mean - std_devs * std);
        }

        if let Some(threshold) = thresholds
            .into_iter()
            .filter(|t| value < *t)
            .max_by(|a, b| a.total_cmp(b))
        {
            anomalies.push(Anomaly::LowVolume {
                date: *date,
                count: *count,
                threshold,
            });
        }
    }
    anomalies
}

/// Detect volume, missing-venue and categorical-quality anomalies.
///
/// # Errors
///
/// Returns `MonitoringError::MissingColumn` when the datasets carry no
/// usable date column.
pub fn detect_data_anomalies(
    datasets: &[Dataset],
    thresholds: &AnomalyThresholds,
) -> Result<Vec<Anomaly>, MonitoringError> {
    let counts = daily_counts(datasets)?;
    let mut anomalies = detect_low_volume_days(&counts, thresholds.volume_std_devs);

    let mut venues_seen = BTreeSet::new();
    let mut total_rows = 0usize;
    let mut unknown_rows = 0usize;
    for dataset in datasets {
        let venues = dataset.string_values("venue").unwrap_or_default();
        let categories = dataset.string_values("venue_category");

        for venue in venues.iter().flatten() {
            venues_seen.insert(normalize_venue(venue));
        }

        for row in 0..dataset.num_rows() {
            total_rows += 1;
            let category = match &categories {
                Some(values) => values.get(row).cloned().flatten(),
                None => venues
                    .get(row)
                    .cloned()
                    .flatten()
                    .map(|v| venue_category(&normalize_venue(&v)).to_string()),
            };
            let unknown = category
                .as_deref()
                .map_or(true, |c| c.is_empty() || c == UNKNOWN_VENUE_CATEGORY);
            if unknown {
                unknown_rows += 1;
            }
        }
    }

    for venue in &thresholds.expected_venues {
        if !venues_seen.contains(venue) {
            anomalies.push(Anomaly::MissingVenue {
                venue: venue.clone(),
            });
        }
    }

    if total_rows > 0 {
        let share = unknown_rows as f64 / total_rows as f64;
        if share > thresholds.max_unknown_venue_share {
            anomalies.push(Anomaly::DataQuality {
                unknown_venue_percentage: (share * 10_000.0).round() / 100.0,
            });
        }
    }

    Ok(anomalies)
}
