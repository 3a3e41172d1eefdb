//! Export stage: persist datasets in several formats.
//!
//! Provides the [`DatasetStore`] storage collaborator, the [`DataExporter`]
//! with its cumulative [`ExportStats`], and the per-run [`ExportManifest`].

pub mod exporter;
pub mod format;
pub mod store;
pub mod summary;

pub use exporter::DataExporter;
pub use format::ExportFormat;
pub use store::{DatasetStore, LocalStore};
pub use summary::{DailySummary, ExportManifest, ExportStats};
