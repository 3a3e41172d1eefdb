//! Helpers shared across subsystems.

use chrono::{Local, NaiveDate};

/// Today's date on the local clock.
///
/// Export file names, the future-date validation check and the monitoring
/// window all count days from this date.
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}
