//! Dataset storage: Parquet, CSV and JSONL files on the local filesystem.
//!
//! Every write goes to a temporary file in the destination directory which
//! is then renamed over the target, so readers never observe a half-written
//! file and a repeated export replaces the previous one.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use tempfile::NamedTempFile;

use crate::error::ExportError;
use crate::transform::Dataset;

/// Storage collaborator for exported datasets.
///
/// Failures surface as errors; nothing is swallowed.
pub trait DatasetStore: Send + Sync {
    fn write_parquet(&self, dataset: &Dataset, path: &Path) -> Result<(), ExportError>;

    fn write_csv(&self, dataset: &Dataset, path: &Path) -> Result<(), ExportError>;

    fn write_jsonl(&self, dataset: &Dataset, path: &Path) -> Result<(), ExportError>;

    /// Write an opaque document, e.g. a JSON report.
    fn write_bytes(&self, bytes: &[u8], path: &Path) -> Result<(), ExportError>;

    fn read_parquet(&self, path: &Path) -> Result<Dataset, ExportError>;
}

/// [`DatasetStore`] on the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalStore;

impl LocalStore {
    pub fn new() -> Self {
        Self
    }
}

/// Write through a temporary sibling file, then rename onto `path`.
fn write_atomic<F>(path: &Path, write: F) -> Result<(), ExportError>
where
    F: FnOnce(&mut File) -> Result<(), ExportError>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| ExportError::WriteFailed {
        path: path.display().to_string(),
        reason: e.error.to_string(),
    })?;
    Ok(())
}

fn parquet_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .build()
}

impl DatasetStore for LocalStore {
    fn write_parquet(&self, dataset: &Dataset, path: &Path) -> Result<(), ExportError> {
        let batch = dataset.record_batch();
        write_atomic(path, |file| {
            let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(parquet_properties()))?;
            writer.write(batch)?;
            writer.close()?;
            Ok(())
        })?;

        tracing::info!(path = %path.display(), rows = batch.num_rows(), "Parquet file written");
        Ok(())
    }

    fn write_csv(&self, dataset: &Dataset, path: &Path) -> Result<(), ExportError> {
        let batch = dataset.record_batch();
        write_atomic(path, |file| {
            let mut writer = arrow::csv::WriterBuilder::new()
                .with_header(true)
                .build(BufWriter::new(file));
            writer.write(batch)?;
            writer.into_inner().flush()?;
            Ok(())
        })?;

        tracing::info!(path = %path.display(), rows = batch.num_rows(), "CSV file written");
        Ok(())
    }

    fn write_jsonl(&self, dataset: &Dataset, path: &Path) -> Result<(), ExportError> {
        let batch = dataset.record_batch();
        write_atomic(path, |file| {
            let mut writer = arrow::json::LineDelimitedWriter::new(BufWriter::new(file));
            writer.write(batch)?;
            writer.finish()?;
            writer.into_inner().flush()?;
            Ok(())
        })?;

        tracing::info!(path = %path.display(), rows = batch.num_rows(), "JSONL file written");
        Ok(())
    }

    fn write_bytes(&self, bytes: &[u8], path: &Path) -> Result<(), ExportError> {
        write_atomic(path, |file| {
            file.write_all(bytes)?;
            Ok(())
        })
    }

    fn read_parquet(&self, path: &Path) -> Result<Dataset, ExportError> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let schema = builder.schema().clone();
        let reader = builder.build()?;

        let batches = reader.collect::<Result<Vec<RecordBatch>, _>>()?;
        let batch = match batches.len() {
            0 => RecordBatch::new_empty(schema),
            1 => batches.into_iter().next().unwrap_or_else(|| RecordBatch::new_empty(schema)),
            _ => arrow::compute::concat_batches(&schema, &batches)?,
        };
        Ok(Dataset::new(batch))
    }
}
