//! Race-record sources and the fetch stage.
//!
//! This module provides:
//! - [`RaceSource`]: the capability to fetch raw records for a date
//! - [`HttpRaceSource`]: JSON endpoint source
//! - [`FileRaceSource`]: on-disk capture replay
//! - [`FetchSession`]: access policy, pacing, backoff and request counters

pub mod file;
pub mod http;
pub mod policy;
pub mod rate_limit;
pub mod session;
pub mod types;

use std::sync::Arc;

pub use file::FileRaceSource;
pub use http::HttpRaceSource;
pub use policy::AccessPolicy;
pub use rate_limit::{RateLimiter, RequestCounters, RequestStats};
pub use session::FetchSession;
pub use types::*;

/// Build the source selected by `source.kind`.
///
/// # Errors
///
/// Returns `CollectorError` if the HTTP client cannot be constructed.
pub fn build_source(
    source: &SourceConfig,
    scraping: &ScrapingConfig,
) -> CollectorResult<Arc<dyn RaceSource>> {
    match source.kind {
        SourceKind::Http => Ok(Arc::new(HttpRaceSource::new(source, scraping)?)),
        SourceKind::File => Ok(Arc::new(FileRaceSource::new(
            source.name.clone(),
            source.data_dir.clone(),
        ))),
    }
}
