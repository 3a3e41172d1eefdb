//! Dataset exporter with cumulative statistics.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info};

use super::format::ExportFormat;
use super::store::{DatasetStore, LocalStore};
use super::summary::{DailySummary, ExportStats};
use crate::error::ExportError;
use crate::metrics;
use crate::transform::Dataset;

/// Writes datasets into one output directory.
///
/// Concurrent runs share an exporter safely: files are named per date and
/// format, and the statistics live behind a mutex.
pub struct DataExporter {
    output_dir: PathBuf,
    store: Arc<dyn DatasetStore>,
    stats: Mutex<ExportStats>,
}

impl DataExporter {
    /// Exporter writing to `output_dir` on the local filesystem.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self::with_store(output_dir, Arc::new(LocalStore::new()))
    }

    pub fn with_store(output_dir: impl Into<PathBuf>, store: Arc<dyn DatasetStore>) -> Self {
        Self {
            output_dir: output_dir.into(),
            store,
            stats: Mutex::new(ExportStats::default()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn store(&self) -> Arc<dyn DatasetStore> {
        Arc::clone(&self.store)
    }

    /// Path `export` would write for `filename` in `format`.
    pub fn output_path(&self, filename: &str, format: ExportFormat) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", filename, format.extension()))
    }

    /// Export `dataset` as `<output_dir>/<filename>.<ext>`.
    ///
    /// An existing file is replaced atomically. On success the cumulative
    /// statistics are updated; on failure they are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::EmptyDataset` for a dataset without rows, or the
    /// store's I/O error. Nothing is retried here.
    pub async fn export(
        &self,
        dataset: &Dataset,
        filename: &str,
        format: ExportFormat,
    ) -> Result<PathBuf, ExportError> {
        if dataset.is_empty() {
            return Err(ExportError::EmptyDataset);
        }

        let path = self.output_path(filename, format);
        let rows = dataset.num_rows();
        let store = Arc::clone(&self.store);
        let owned = dataset.clone();
        let target = path.clone();

        let result = tokio::task::spawn_blocking(move || match format {
            ExportFormat::Parquet => store.write_parquet(&owned, &target),
            ExportFormat::Csv => store.write_csv(&owned, &target),
            ExportFormat::Jsonl => store.write_jsonl(&owned, &target),
            ExportFormat::Summary => {
                let summary = DailySummary::from_dataset(&owned);
                let bytes = serde_json::to_vec_pretty(&summary)?;
                store.write_bytes(&bytes, &target)
            }
        })
        .await
        .map_err(|e| ExportError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
        .and_then(|inner| inner);

        match result {
            Ok(()) => {
                self.stats.lock().await.record(format, rows);
                metrics::record_export(format.as_str(), "success");
                info!(format = %format, path = %path.display(), rows, "Exported dataset");
                Ok(path)
            }
            Err(e) => {
                metrics::record_export(format.as_str(), "failure");
                error!(format = %format, path = %path.display(), error = %e, "Export failed");
                Err(e)
            }
        }
    }

    /// Snapshot of the cumulative export statistics.
    pub async fn export_summary(&self) -> ExportStats {
        self.stats.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::RawRecord;
    use crate::transform::RaceDataTransformer;
    use tempfile::TempDir;

    fn dataset(rows: usize) -> Dataset {
        let records: Vec<RawRecord> = (0..rows)
            .map(|i| {
                RawRecord::new()
                    .with("date", "2024-01-15")
                    .with("race_number", i as i64 + 1)
                    .with("venue", "Ellerslie")
                    .with("source", "tab_nz")
            })
            .collect();
        RaceDataTransformer::new()
            .transform(&records)
            .expect("transform should succeed")
    }

    #[tokio::test]
    async fn test_export_twice_is_additive_and_overwrites() {
        let dir = TempDir::new().expect("temp dir");
        let exporter = DataExporter::new(dir.path());

        let first = exporter
            .export(&dataset(4), "racing_data_2024-01-15", ExportFormat::Parquet)
            .await
            .expect("first export");
        let second = exporter
            .export(&dataset(2), "racing_data_2024-01-15", ExportFormat::Parquet)
            .await
            .expect("second export");
        assert_eq!(first, second);

        let stats = exporter.export_summary().await;
        assert_eq!(stats.total_exports, 2);
        assert_eq!(stats.total_records, 6);

        let loaded = exporter.store().read_parquet(&second).expect("read back");
        assert_eq!(loaded.num_rows(), 2);
    }

    #[tokio::test]
    async fn test_summary_export_writes_json() {
        let dir = TempDir::new().expect("temp dir");
        let exporter = DataExporter::new(dir.path());

        let path = exporter
            .export(&dataset(3), "daily_summary_2024-01-15", ExportFormat::Summary)
            .await
            .expect("summary export");
        assert!(path.ends_with("daily_summary_2024-01-15.json"));

        let summary: DailySummary =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read summary"))
                .expect("summary json");
        assert_eq!(summary.total_races, 3);
        assert_eq!(summary.unique_venues, 1);
    }

    #[tokio::test]
    async fn test_empty_dataset_rejected_without_stats() {
        let dir = TempDir::new().expect("temp dir");
        let exporter = DataExporter::new(dir.path());
        let empty = Dataset::new(arrow::record_batch::RecordBatch::new_empty(
            dataset(1).schema(),
        ));

        let err = exporter
            .export(&empty, "x", ExportFormat::Csv)
            .await
            .expect_err("empty dataset");
        assert!(matches!(err, ExportError::EmptyDataset));
        assert_eq!(exporter.export_summary().await, ExportStats::default());
    }

    #[tokio::test]
    async fn test_formats_used_tracked() {
        let dir = TempDir::new().expect("temp dir");
        let exporter = DataExporter::new(dir.path());
        let data = dataset(1);
        for format in [ExportFormat::Parquet, ExportFormat::Csv, ExportFormat::Jsonl] {
            exporter
                .export(&data, "racing_data_2024-01-15", format)
                .await
                .expect("export");
        }

        let stats = exporter.export_summary().await;
        assert_eq!(stats.formats_used.len(), 3);
        assert!(dir.path().join("racing_data_2024-01-15.csv").exists());
        assert!(dir.path().join("racing_data_2024-01-15.jsonl").exists());
    }
}
