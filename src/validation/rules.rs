//! Structural and domain rules for raw race records.
//!
//! Each rule contributes errors (fatal) and warnings (non-fatal). Diagnostics
//! are aggregated per rule, so a batch with fifty null dates yields a single
//! "50 records have null dates" error rather than fifty entries.

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::verdict::{ValidationStats, ValidationVerdict};
use crate::collectors::types::{value_as_f64, value_as_i64};
use crate::collectors::RawRecord;
use crate::utils::local_today;

/// Fields every batch must carry.
pub const REQUIRED_FIELDS: [&str; 4] = ["date", "race_number", "venue", "source"];

/// Number of rules applied to a batch.
const RULE_COUNT: usize = 5;
/// Check slots scored per rule.
const SLOTS_PER_RULE: usize = 4;

const RACE_NUMBER_RANGE: (i64, i64) = (1, 15);
const MAX_REASONABLE_ODDS: f64 = 1000.0;
const BARRIER_RANGE: (i64, i64) = (1, 20);
const WEIGHT_RANGE_KG: (f64, f64) = (50.0, 65.0);

#[derive(Debug, Default)]
struct RuleOutcome {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl RuleOutcome {
    fn error_if(&mut self, count: usize, message: impl FnOnce(usize) -> String) {
        if count > 0 {
            self.errors.push(message(count));
        }
    }

    fn warn_if(&mut self, count: usize, message: impl FnOnce(usize) -> String) {
        if count > 0 {
            self.warnings.push(message(count));
        }
    }
}

/// Validator for raw race records.
///
/// Pure: the only ambient input is the reference date used for the
/// future-date warning, which can be pinned with [`with_reference_date`].
///
/// [`with_reference_date`]: RaceDataValidator::with_reference_date
#[derive(Debug, Clone, Default)]
pub struct RaceDataValidator {
    reference_date: Option<NaiveDate>,
}

impl RaceDataValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `date` as "today" when flagging future dates.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    /// Validate a batch of raw records.
    ///
    /// Applies, in order: required-field presence, date sanity, race-number
    /// range, venue names and participant data. The quality score is
    /// `(check slots - errors) / check slots`, clamped to `[0, 1]`.
    pub fn validate(&self, records: &[RawRecord]) -> ValidationVerdict {
        if records.is_empty() {
            warn!("Validation called with an empty batch");
            return ValidationVerdict::new(
                vec!["No data provided for validation".to_string()],
                Vec::new(),
                ValidationStats::empty(),
            );
        }

        let today = self
            .reference_date
            .unwrap_or_else(local_today);

        let outcomes = [
            check_required_fields(records),
            check_dates(records, today),
            check_race_numbers(records),
            check_venues(records),
            check_participants(records),
        ];

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for outcome in outcomes {
            errors.extend(outcome.errors);
            warnings.extend(outcome.warnings);
        }

        let total_slots = (RULE_COUNT * SLOTS_PER_RULE) as f64;
        let score = ((total_slots - errors.len() as f64) / total_slots).clamp(0.0, 1.0);

        let stats = ValidationStats {
            total_records: records.len(),
            races_processed: count_races(records),
            runners_processed: count_participants(records),
            data_quality_score: score,
            validation_timestamp: Utc::now(),
        };

        debug!(
            records = records.len(),
            errors = errors.len(),
            warnings = warnings.len(),
            score,
            "Validated batch"
        );

        ValidationVerdict::new(errors, warnings, stats)
    }
}

/// Convenience wrapper around [`RaceDataValidator::validate`].
pub fn validate(records: &[RawRecord]) -> ValidationVerdict {
    RaceDataValidator::new().validate(records)
}

fn absent_everywhere(records: &[RawRecord], field: &str) -> bool {
    records.iter().all(|r| !r.contains_key(field))
}

fn check_required_fields(records: &[RawRecord]) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();
    for field in REQUIRED_FIELDS {
        let missing = records.iter().filter(|r| !r.contains_key(field)).count();
        if missing == records.len() {
            outcome.errors.push(format!("Missing required field: {}", field));
        } else if matches!(field, "race_number" | "source") {
            // Partial absence of date/venue is caught as nulls by their own rules.
            outcome.warn_if(missing, |n| format!("{} records missing '{}'", n, field));
        }
    }
    outcome
}

fn check_dates(records: &[RawRecord], today: NaiveDate) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();
    if absent_everywhere(records, "date") {
        return outcome;
    }

    let mut nulls = 0;
    let mut unparseable = 0;
    let mut future = 0;
    for record in records {
        match record.get("date") {
            None | Some(Value::Null) => nulls += 1,
            Some(value) => match value.as_str().and_then(parse_iso_date) {
                Some(date) if date > today => future += 1,
                Some(_) => {}
                None => unparseable += 1,
            },
        }
    }

    outcome.error_if(nulls, |n| format!("{} records have null dates", n));
    outcome.error_if(unparseable, |n| format!("{} records have unparseable dates", n));
    outcome.warn_if(future, |n| format!("{} records have future dates", n));
    outcome
}

fn check_race_numbers(records: &[RawRecord]) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();
    let mut non_integer = 0;
    let mut unusual = 0;
    for record in records {
        let Some(value) = record.get("race_number").filter(|v| !v.is_null()) else {
            continue;
        };
        match value_as_i64(value) {
            Some(n) if n < RACE_NUMBER_RANGE.0 || n > RACE_NUMBER_RANGE.1 => unusual += 1,
            Some(_) => {}
            None => non_integer += 1,
        }
    }

    outcome.warn_if(non_integer, |n| format!("{} records have non-integer race numbers", n));
    outcome.warn_if(unusual, |n| format!("{} records have unusual race numbers", n));
    outcome
}

fn check_venues(records: &[RawRecord]) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();
    if absent_everywhere(records, "venue") {
        return outcome;
    }

    let empty = records
        .iter()
        .filter(|r| match r.get("venue") {
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(Value::Null) | None => true,
            Some(_) => false,
        })
        .count();

    outcome.error_if(empty, |n| format!("{} records have missing venue names", n));
    outcome
}

#[derive(Debug, Default)]
struct ParticipantCounts {
    non_positive_odds: usize,
    non_numeric_odds: usize,
    extreme_odds: usize,
    unusual_barrier: usize,
    unusual_weight: usize,
    negative_position: usize,
}

impl ParticipantCounts {
    fn inspect<'v>(&mut self, get: impl Fn(&str) -> Option<&'v Value>) {
        if let Some(odds) = get("odds").filter(|v| !v.is_null()) {
            match value_as_f64(odds) {
                Some(o) if o <= 0.0 => self.non_positive_odds += 1,
                Some(o) if o > MAX_REASONABLE_ODDS => self.extreme_odds += 1,
                Some(_) => {}
                None => self.non_numeric_odds += 1,
            }
        }
        if let Some(barrier) = get("barrier").and_then(value_as_i64) {
            if barrier < BARRIER_RANGE.0 || barrier > BARRIER_RANGE.1 {
                self.unusual_barrier += 1;
            }
        }
        if let Some(weight) = get("weight").and_then(value_as_f64) {
            if weight < WEIGHT_RANGE_KG.0 || weight > WEIGHT_RANGE_KG.1 {
                self.unusual_weight += 1;
            }
        }
        if let Some(position) = get("finish_position").and_then(value_as_i64) {
            if position < 0 {
                self.negative_position += 1;
            }
        }
    }
}

fn check_participants(records: &[RawRecord]) -> RuleOutcome {
    let mut counts = ParticipantCounts::default();
    for record in records {
        counts.inspect(|key| record.get(key));
        for runner in record.runners() {
            if let Some(obj) = runner.as_object() {
                counts.inspect(|key| obj.get(key));
            }
        }
    }

    let mut outcome = RuleOutcome::default();
    outcome.error_if(counts.non_positive_odds, |n| {
        format!("{} participants have non-positive odds", n)
    });
    outcome.error_if(counts.negative_position, |n| {
        format!("{} participants have negative finish positions", n)
    });
    outcome.warn_if(counts.non_numeric_odds, |n| {
        format!("{} participants have non-numeric odds", n)
    });
    outcome.warn_if(counts.extreme_odds, |n| {
        format!("{} participants have odds above {}", n, MAX_REASONABLE_ODDS)
    });
    outcome.warn_if(counts.unusual_barrier, |n| {
        format!("{} participants have unusual barrier numbers", n)
    });
    outcome.warn_if(counts.unusual_weight, |n| {
        format!("{} participants have weights outside 50-65kg", n)
    });
    outcome
}

fn count_races(records: &[RawRecord]) -> usize {
    records
        .iter()
        .map(|r| {
            (
                r.get_str("date").map(str::to_string),
                r.get_str("venue").map(|v| v.trim().to_ascii_uppercase()),
                r.get_i64("race_number"),
            )
        })
        .collect::<HashSet<_>>()
        .len()
}

fn count_participants(records: &[RawRecord]) -> usize {
    records
        .iter()
        .map(|r| {
            let nested = r.runners().len();
            if nested > 0 {
                nested
            } else if r.contains_key("odds") || r.contains_key("barrier") {
                1
            } else {
                0
            }
        })
        .sum()
}

/// Parse an ISO `YYYY-MM-DD` date, ignoring any time suffix.
pub(crate) fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 20).expect("valid date")
    }

    fn validator() -> RaceDataValidator {
        RaceDataValidator::new().with_reference_date(today())
    }

    fn record(venue: &str, race_number: i64) -> RawRecord {
        RawRecord::new()
            .with("date", "2024-01-15")
            .with("race_number", race_number)
            .with("venue", venue)
            .with("source", "tab_nz")
    }

    #[test]
    fn test_clean_batch_scores_one() {
        let records = vec![
            record("Ellerslie", 1),
            record("Trentham", 2),
            record("Riccarton", 3),
            record("Ellerslie", 4),
        ];
        let verdict = validator().validate(&records);

        assert!(verdict.is_valid);
        assert!(verdict.errors.is_empty());
        assert_eq!(verdict.quality_score(), 1.0);
        assert_eq!(verdict.stats.total_records, 4);
        assert_eq!(verdict.stats.races_processed, 4);
    }

    #[test]
    fn test_empty_batch_is_invalid() {
        let verdict = validator().validate(&[]);
        assert!(!verdict.is_valid);
        assert_eq!(verdict.errors, vec!["No data provided for validation"]);
    }

    #[test]
    fn test_missing_required_field_named() {
        for field in REQUIRED_FIELDS {
            let records: Vec<RawRecord> = (1..=3)
                .map(|n| {
                    let mut map = record("Ellerslie", n).into_inner();
                    map.remove(field);
                    RawRecord::from(map)
                })
                .collect();
            let verdict = validator().validate(&records);
            assert!(!verdict.is_valid, "missing {} should fail", field);
            assert!(
                verdict.errors.iter().any(|e| e.contains(field)),
                "errors should name {}: {:?}",
                field,
                verdict.errors
            );
        }
    }

    #[test]
    fn test_warnings_do_not_block() {
        let records = vec![
            record("Ellerslie", 22),
            record("Trentham", 2).with("date", "2024-02-01"),
            record("Riccarton", 3).with("barrier", 30).with("weight", 80.0),
        ];
        let verdict = validator().validate(&records);

        assert!(verdict.is_valid);
        assert!(verdict.warnings.len() >= 4);
        assert!(verdict.warnings.iter().any(|w| w.contains("future dates")));
        assert!(verdict.warnings.iter().any(|w| w.contains("unusual race numbers")));
        assert_eq!(verdict.quality_score(), 1.0);
    }

    #[test]
    fn test_null_date_and_empty_venue_are_errors() {
        let records = vec![
            record("Ellerslie", 1).with("date", Value::Null),
            record("  ", 2),
            record("Trentham", 3).with("date", "15/01/2024"),
        ];
        let verdict = validator().validate(&records);

        assert!(!verdict.is_valid);
        assert_eq!(verdict.errors.len(), 3);
        assert!((verdict.quality_score() - 17.0 / 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_nested_runner_checks() {
        let records = vec![record("Ellerslie", 1).with(
            "runners",
            json!([
                {"name": "Fast", "odds": 3.5, "barrier": 4, "weight": 56.5},
                {"name": "Bad", "odds": 0.0},
                {"name": "Long", "odds": 1500.0, "finish_position": -1}
            ]),
        )];
        let verdict = validator().validate(&records);

        assert!(!verdict.is_valid);
        assert!(verdict.errors.iter().any(|e| e.contains("non-positive odds")));
        assert!(verdict.errors.iter().any(|e| e.contains("negative finish")));
        assert!(verdict.warnings.iter().any(|w| w.contains("odds above")));
        assert_eq!(verdict.stats.runners_processed, 3);
    }

    #[test]
    fn test_participant_fields_optional() {
        let records = vec![record("Ellerslie", 1), record("Ellerslie", 2).with("odds", 4.0)];
        let verdict = validator().validate(&records);
        assert!(verdict.is_valid);
        assert_eq!(verdict.stats.runners_processed, 1);
    }

    #[test]
    fn test_all_required_fields_missing() {
        let records = vec![RawRecord::new().with("distance", 1200)];
        let verdict = validator().validate(&records);
        assert_eq!(verdict.errors.len(), 4);
        assert!((verdict.quality_score() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_parse_iso_date() {
        assert_eq!(
            parse_iso_date("2024-01-15T10:00:00Z"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(parse_iso_date("2024-13-01"), None);
        assert_eq!(parse_iso_date(""), None);
    }
}
