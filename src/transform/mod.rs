//! Transform stage: typed, feature-bearing datasets from raw records.

pub mod dataset;
pub mod features;
pub mod transformer;

pub use dataset::{date_to_days, days_to_date, Dataset};
pub use features::{
    normalize_source, normalize_venue, parse_race_time, try_parse_race_time, venue_category,
    UNKNOWN_VENUE_CATEGORY, VENUE_CATEGORIES,
};
pub use transformer::{RaceDataTransformer, DERIVED_COLUMNS};
