//! Record-to-dataset transformation and feature engineering.
//!
//! Steps, each building on the previous column set:
//! 1. date parsing and text normalization (`venue` uppercased, `source` lowercased)
//! 2. race-time parsing into minutes since midnight
//! 3. calendar and volume features plus provenance timestamps
//! 4. domain features: venue characteristics and field size
//!
//! Every input field survives as a column; derived columns follow in a fixed
//! order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Date32Builder, Float64Builder, Int32Builder, Int64Builder,
    StringBuilder, TimestampMicrosecondBuilder,
};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::{info, warn};

use super::dataset::{date_to_days, Dataset};
use super::features::{
    normalize_source, normalize_venue, try_parse_race_time, venue_category,
};
use crate::collectors::types::{value_as_f64, value_as_i64};
use crate::collectors::RawRecord;
use crate::error::TransformError;
use crate::validation::rules::parse_iso_date;

/// Columns appended by the transformer, in output order.
pub const DERIVED_COLUMNS: [&str; 10] = [
    "race_date",
    "race_minutes",
    "day_of_week",
    "month",
    "race_hour",
    "venue_race_count",
    "scraped_timestamp",
    "processed_at",
    "venue_category",
    "field_size",
];

/// Storage type chosen for an input field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Boolean,
    Int64,
    Float64,
    Utf8,
}

impl ColumnKind {
    /// Narrowest kind holding every non-null value.
    fn infer<'a>(values: impl Iterator<Item = &'a Value>) -> Self {
        let mut kind: Option<ColumnKind> = None;
        for value in values {
            let this = match value {
                Value::Null => continue,
                Value::Bool(_) => ColumnKind::Boolean,
                Value::Number(n) if n.is_i64() || n.is_u64() && n.as_i64().is_some() => {
                    ColumnKind::Int64
                }
                Value::Number(_) => ColumnKind::Float64,
                _ => ColumnKind::Utf8,
            };
            kind = Some(match (kind, this) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                (Some(ColumnKind::Int64), ColumnKind::Float64)
                | (Some(ColumnKind::Float64), ColumnKind::Int64) => ColumnKind::Float64,
                _ => ColumnKind::Utf8,
            });
            if kind == Some(ColumnKind::Utf8) {
                break;
            }
        }
        kind.unwrap_or(ColumnKind::Utf8)
    }
}

/// Per-row values shared by several derived columns.
struct RowContext {
    race_date: NaiveDate,
    venue: Option<String>,
    race_number: Option<i64>,
    race_minutes: i32,
}

/// Transforms validated raw records into a [`Dataset`].
#[derive(Debug, Clone, Default)]
pub struct RaceDataTransformer {
    processed_at: Option<DateTime<Utc>>,
}

impl RaceDataTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the `processed_at` provenance value instead of using the clock.
    pub fn with_processed_at(mut self, processed_at: DateTime<Utc>) -> Self {
        self.processed_at = Some(processed_at);
        self
    }

    /// Transform a batch of records.
    ///
    /// # Errors
    ///
    /// - [`TransformError::EmptyBatch`] for an empty input.
    /// - [`TransformError::InvalidDate`] when a row's `date` is missing or not
    ///   an ISO calendar date.
    /// - [`TransformError::Arrow`] if the columns cannot form a batch.
    ///
    /// Malformed race times, non-positive odds and non-positive finish
    /// positions are absorbed with a fallback and a warning.
    pub fn transform(&self, records: &[RawRecord]) -> Result<Dataset, TransformError> {
        if records.is_empty() {
            return Err(TransformError::EmptyBatch);
        }

        let rows = self.row_context(records)?;
        let mut columns: Vec<(String, ArrayRef)> = Vec::new();

        for name in input_field_names(records) {
            if DERIVED_COLUMNS.contains(&name.as_str()) {
                warn!(column = %name, "Input column shadows a derived column, replacing it");
                continue;
            }
            let column = build_input_column(&name, records);
            columns.push((name, column));
        }

        columns.extend(self.derived_columns(records, &rows));

        let batch = RecordBatch::try_from_iter(columns)?;
        info!(
            rows = batch.num_rows(),
            columns = batch.num_columns(),
            "Transformed records into dataset"
        );
        Ok(Dataset::new(batch))
    }

    fn row_context(&self, records: &[RawRecord]) -> Result<Vec<RowContext>, TransformError> {
        let mut malformed_times = 0usize;
        let mut sample: Option<String> = None;

        let rows = records
            .iter()
            .enumerate()
            .map(|(row, record)| {
                let race_date = record
                    .get_str("date")
                    .and_then(parse_iso_date)
                    .ok_or_else(|| TransformError::InvalidDate {
                        row,
                        value: record
                            .get("date")
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "<missing>".to_string()),
                    })?;

                let race_minutes = match record.get("race_time") {
                    None | Some(Value::Null) => 0,
                    Some(value) => {
                        let parsed = value.as_str().and_then(try_parse_race_time);
                        if parsed.is_none() {
                            malformed_times += 1;
                            sample.get_or_insert_with(|| value.to_string());
                        }
                        parsed.unwrap_or(0) as i32
                    }
                };

                Ok(RowContext {
                    race_date,
                    venue: record.get_str("venue").map(normalize_venue),
                    race_number: record.get_i64("race_number"),
                    race_minutes,
                })
            })
            .collect::<Result<Vec<_>, TransformError>>()?;

        if malformed_times > 0 {
            warn!(
                count = malformed_times,
                sample = sample.as_deref().unwrap_or(""),
                "Unparseable race times defaulted to 0"
            );
        }
        Ok(rows)
    }

    fn derived_columns(&self, records: &[RawRecord], rows: &[RowContext]) -> Vec<(String, ArrayRef)> {
        let processed_at = self
            .processed_at
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut venue_counts: HashMap<Option<&str>, i64> = HashMap::new();
        let mut race_sizes: HashMap<(NaiveDate, Option<&str>, Option<i64>), i64> = HashMap::new();
        for row in rows {
            *venue_counts.entry(row.venue.as_deref()).or_default() += 1;
            *race_sizes
                .entry((row.race_date, row.venue.as_deref(), row.race_number))
                .or_default() += 1;
        }

        let mut race_date = Date32Builder::with_capacity(rows.len());
        let mut race_minutes = Int32Builder::with_capacity(rows.len());
        let mut day_of_week = Int32Builder::with_capacity(rows.len());
        let mut month = Int32Builder::with_capacity(rows.len());
        let mut race_hour = Int32Builder::with_capacity(rows.len());
        let mut venue_race_count = Int64Builder::with_capacity(rows.len());
        let mut scraped = TimestampMicrosecondBuilder::with_capacity(rows.len()).with_timezone("UTC");
        let mut processed = StringBuilder::new();
        let mut category = StringBuilder::new();
        let mut field_size = Int64Builder::with_capacity(rows.len());

        for (record, row) in records.iter().zip(rows) {
            race_date.append_value(date_to_days(row.race_date));
            race_minutes.append_value(row.race_minutes);
            day_of_week.append_value(row.race_date.weekday().number_from_monday() as i32);
            month.append_value(row.race_date.month() as i32);
            race_hour.append_value(row.race_minutes / 60);
            venue_race_count.append_value(
                venue_counts.get(&row.venue.as_deref()).copied().unwrap_or(0),
            );
            scraped.append_option(
                record
                    .get_str("scraped_at")
                    .and_then(parse_timestamp)
                    .map(|ts| ts.timestamp_micros()),
            );
            processed.append_value(&processed_at);
            category.append_value(venue_category(row.venue.as_deref().unwrap_or("")));

            let size = match record.get("runners") {
                Some(Value::Array(runners)) => runners.len() as i64,
                _ => race_sizes
                    .get(&(row.race_date, row.venue.as_deref(), row.race_number))
                    .copied()
                    .unwrap_or(1),
            };
            field_size.append_value(size);
        }

        let columns: [(&str, ArrayRef); 10] = [
            ("race_date", Arc::new(race_date.finish())),
            ("race_minutes", Arc::new(race_minutes.finish())),
            ("day_of_week", Arc::new(day_of_week.finish())),
            ("month", Arc::new(month.finish())),
            ("race_hour", Arc::new(race_hour.finish())),
            ("venue_race_count", Arc::new(venue_race_count.finish())),
            ("scraped_timestamp", Arc::new(scraped.finish())),
            ("processed_at", Arc::new(processed.finish())),
            ("venue_category", Arc::new(category.finish())),
            ("field_size", Arc::new(field_size.finish())),
        ];
        columns
            .into_iter()
            .map(|(name, col)| (name.to_string(), col))
            .collect()
    }
}

/// Union of field names in first-seen order.
fn input_field_names(records: &[RawRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for record in records {
        for (name, _) in record.fields() {
            if seen.insert(name.as_str()) {
                names.push(name.clone());
            }
        }
    }
    names
}

fn build_input_column(name: &str, records: &[RawRecord]) -> ArrayRef {
    match name {
        "venue" => normalized_text_column(records, name, normalize_venue),
        "source" => normalized_text_column(records, name, normalize_source),
        "odds" => {
            let mut dropped = 0usize;
            let mut builder = Float64Builder::with_capacity(records.len());
            for record in records {
                let value = record.get(name).filter(|v| !v.is_null());
                let odds = value.and_then(value_as_f64).filter(|o| *o > 0.0);
                if value.is_some() && odds.is_none() {
                    dropped += 1;
                }
                builder.append_option(odds);
            }
            if dropped > 0 {
                warn!(count = dropped, "Invalid odds replaced with null");
            }
            Arc::new(builder.finish())
        }
        "finish_position" => {
            let mut dropped = 0usize;
            let mut builder = Int64Builder::with_capacity(records.len());
            for record in records {
                let value = record.get(name).filter(|v| !v.is_null());
                let position = value.and_then(value_as_i64).filter(|p| *p > 0);
                if value.is_some() && position.is_none() {
                    dropped += 1;
                }
                builder.append_option(position);
            }
            if dropped > 0 {
                warn!(count = dropped, "Unfinished or invalid finish positions set to null");
            }
            Arc::new(builder.finish())
        }
        _ => inferred_column(records, name),
    }
}

fn normalized_text_column(
    records: &[RawRecord],
    name: &str,
    normalize: fn(&str) -> String,
) -> ArrayRef {
    let mut builder = StringBuilder::new();
    for record in records {
        match record.get(name) {
            None | Some(Value::Null) => builder.append_null(),
            Some(Value::String(s)) => builder.append_value(normalize(s)),
            Some(other) => builder.append_value(normalize(&other.to_string())),
        }
    }
    Arc::new(builder.finish())
}

fn inferred_column(records: &[RawRecord], name: &str) -> ArrayRef {
    let values = || records.iter().map(|r| r.get(name).unwrap_or(&Value::Null));

    match ColumnKind::infer(values()) {
        ColumnKind::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(records.len());
            for value in values() {
                builder.append_option(value.as_bool());
            }
            Arc::new(builder.finish())
        }
        ColumnKind::Int64 => {
            let mut builder = Int64Builder::with_capacity(records.len());
            for value in values() {
                builder.append_option(value.as_i64());
            }
            Arc::new(builder.finish())
        }
        ColumnKind::Float64 => {
            let mut builder = Float64Builder::with_capacity(records.len());
            for value in values() {
                builder.append_option(value.as_f64());
            }
            Arc::new(builder.finish())
        }
        ColumnKind::Utf8 => {
            let mut builder = StringBuilder::new();
            for value in values() {
                match value {
                    Value::Null => builder.append_null(),
                    Value::String(s) => builder.append_value(s),
                    other => builder.append_value(other.to_string()),
                }
            }
            Arc::new(builder.finish())
        }
    }
}

/// Parse an RFC 3339 timestamp, or a naive ISO timestamp taken as UTC.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}
