//! Export formats and deterministic output naming.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ExportError;

/// Output format for a dataset export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Columnar, zstd-compressed.
    Parquet,
    /// Header row plus one line per row.
    Csv,
    /// One JSON object per line.
    Jsonl,
    /// Daily summary report as a JSON document.
    Summary,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Parquet,
        ExportFormat::Csv,
        ExportFormat::Jsonl,
        ExportFormat::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Parquet => "parquet",
            ExportFormat::Csv => "csv",
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Summary => "summary",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Parquet => "parquet",
            ExportFormat::Csv => "csv",
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Summary => "json",
        }
    }

    /// File stem for `date`: `<dataset_kind>_<date>`, or `daily_summary_<date>`
    /// for the summary report.
    pub fn file_stem(&self, dataset_kind: &str, date: NaiveDate) -> String {
        match self {
            ExportFormat::Summary => format!("daily_summary_{}", date),
            _ => format!("{}_{}", dataset_kind, date),
        }
    }

    /// Parse a comma-separated format list, e.g. `"parquet,csv,summary"`.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::InvalidFormat` for an unknown entry.
    pub fn parse_list(list: &str) -> Result<Vec<ExportFormat>, ExportError> {
        let mut formats = Vec::new();
        for part in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let format: ExportFormat = part.parse()?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        Ok(formats)
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parquet" => Ok(ExportFormat::Parquet),
            "csv" => Ok(ExportFormat::Csv),
            "jsonl" | "json_lines" => Ok(ExportFormat::Jsonl),
            "summary" => Ok(ExportFormat::Summary),
            other => Err(ExportError::InvalidFormat(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stems() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date");
        assert_eq!(
            ExportFormat::Parquet.file_stem("racing_data", date),
            "racing_data_2024-01-15"
        );
        assert_eq!(
            ExportFormat::Summary.file_stem("racing_data", date),
            "daily_summary_2024-01-15"
        );
    }

    #[test]
    fn test_parse_list_dedups() {
        let formats = ExportFormat::parse_list("parquet, CSV,parquet,,summary").expect("valid list");
        assert_eq!(
            formats,
            vec![ExportFormat::Parquet, ExportFormat::Csv, ExportFormat::Summary]
        );
    }

    #[test]
    fn test_unknown_format() {
        let err = ExportFormat::parse_list("parquet,xlsx").expect_err("xlsx is unsupported");
        assert!(matches!(err, ExportError::InvalidFormat(ref f) if f == "xlsx"));
    }
}
