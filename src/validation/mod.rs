//! Validation stage for raw race records.
//!
//! Validation is a deterministic gate: it never fails with an error value,
//! it returns a [`ValidationVerdict`] whose `is_valid` decides whether the
//! batch moves on to transformation.

pub mod rules;
pub mod verdict;

pub use rules::{validate, RaceDataValidator, REQUIRED_FIELDS};
pub use verdict::{ValidationStats, ValidationVerdict};
