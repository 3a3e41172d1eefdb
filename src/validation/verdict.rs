//! Validation outcome for one batch of raw records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters gathered while validating a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total_records: usize,
    /// Distinct `(date, venue, race_number)` combinations.
    pub races_processed: usize,
    /// Participant entries seen, nested `runners` plus record-level odds rows.
    pub runners_processed: usize,
    /// Share of check slots that passed, in `[0, 1]`.
    pub data_quality_score: f64,
    pub validation_timestamp: DateTime<Utc>,
}

impl ValidationStats {
    pub fn empty() -> Self {
        Self {
            total_records: 0,
            races_processed: 0,
            runners_processed: 0,
            data_quality_score: 0.0,
            validation_timestamp: Utc::now(),
        }
    }
}

/// Pass/fail verdict plus diagnostics.
///
/// `is_valid` is true iff `errors` is empty; warnings never block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    /// Hard failures, in rule order.
    pub errors: Vec<String>,
    /// Soft issues, in rule order.
    pub warnings: Vec<String>,
    pub stats: ValidationStats,
}

impl ValidationVerdict {
    /// Assemble a verdict; validity is derived from `errors`.
    pub fn new(errors: Vec<String>, warnings: Vec<String>, stats: ValidationStats) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            stats,
        }
    }

    pub fn quality_score(&self) -> f64 {
        self.stats.data_quality_score
    }

    /// All errors joined for a one-line diagnostic.
    pub fn error_summary(&self) -> String {
        self.errors.join("; ")
    }
}
