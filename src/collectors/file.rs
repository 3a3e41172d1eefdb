//! Local file race source for replays and backfills.
//!
//! Reads `<data_dir>/<YYYY-MM-DD>.json` (a JSON array) or, failing that,
//! `<data_dir>/<YYYY-MM-DD>.jsonl` (one record per line). A date with
//! neither file has no data.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use super::http::records_from_json;
use super::policy::AccessPolicy;
use super::types::{CollectorError, CollectorResult, RaceSource, RawRecord};

/// Race source reading previously captured records from disk.
#[derive(Debug, Clone)]
pub struct FileRaceSource {
    name: String,
    data_dir: PathBuf,
}

impl FileRaceSource {
    pub fn new(name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn json_path(&self, date: NaiveDate) -> PathBuf {
        self.data_dir.join(format!("{}.json", date))
    }

    fn jsonl_path(&self, date: NaiveDate) -> PathBuf {
        self.data_dir.join(format!("{}.jsonl", date))
    }
}

#[async_trait]
impl RaceSource for FileRaceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn request_url(&self, date: NaiveDate) -> String {
        self.json_path(date).display().to_string()
    }

    async fn access_policy(&self, _user_agent: &str) -> CollectorResult<AccessPolicy> {
        Ok(AccessPolicy::allow_all())
    }

    async fn fetch_records(&self, date: NaiveDate) -> CollectorResult<Vec<RawRecord>> {
        let json_path = self.json_path(date);
        if tokio::fs::try_exists(&json_path).await? {
            let content = tokio::fs::read_to_string(&json_path).await?;
            let body: Value = serde_json::from_str(&content).map_err(|e| {
                CollectorError::ParseError(format!("{}: {}", json_path.display(), e))
            })?;
            return records_from_json(body);
        }

        let jsonl_path = self.jsonl_path(date);
        if tokio::fs::try_exists(&jsonl_path).await? {
            let content = tokio::fs::read_to_string(&jsonl_path).await?;
            let mut records = Vec::new();
            for (idx, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let value: Value = serde_json::from_str(line).map_err(|e| {
                    CollectorError::ParseError(format!(
                        "{}:{}: {}",
                        jsonl_path.display(),
                        idx + 1,
                        e
                    ))
                })?;
                match value {
                    Value::Object(map) => records.push(RawRecord::from(map)),
                    _ => {
                        return Err(CollectorError::ParseError(format!(
                            "{}:{}: not a JSON object",
                            jsonl_path.display(),
                            idx + 1
                        )))
                    }
                }
            }
            return Ok(records);
        }

        tracing::debug!(dir = %self.data_dir.display(), %date, "No capture file for date");
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date")
    }

    #[tokio::test]
    async fn test_reads_json_array() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(
            dir.path().join("2024-01-15.json"),
            r#"[{"date":"2024-01-15","venue":"Ellerslie","race_number":1}]"#,
        )
        .expect("write capture");

        let source = FileRaceSource::new("replay", dir.path());
        let records = source.fetch_records(date()).await.expect("fetch");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_i64("race_number"), Some(1));
    }

    #[tokio::test]
    async fn test_reads_jsonl() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(
            dir.path().join("2024-01-15.jsonl"),
            "{\"venue\":\"Trentham\"}\n\n{\"venue\":\"Riccarton\"}\n",
        )
        .expect("write capture");

        let source = FileRaceSource::new("replay", dir.path());
        let records = source.fetch_records(date()).await.expect("fetch");
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_no_data() {
        let dir = TempDir::new().expect("temp dir");
        let source = FileRaceSource::new("replay", dir.path());
        assert!(source.fetch_records(date()).await.expect("fetch").is_empty());
    }

    #[tokio::test]
    async fn test_malformed_file_is_parse_error() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("2024-01-15.json"), "{not json").expect("write");
        let source = FileRaceSource::new("replay", dir.path());
        let err = source.fetch_records(date()).await.expect_err("malformed");
        assert!(matches!(err, CollectorError::ParseError(_)));
    }
}
