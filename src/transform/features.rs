//! Scalar feature helpers: race-time parsing and venue characteristics.

use std::sync::LazyLock;

use regex::Regex;

/// Category assigned to venues missing from [`VENUE_CATEGORIES`].
pub const UNKNOWN_VENUE_CATEGORY: &str = "unknown";

/// Static venue characteristics, keyed by normalized (uppercased) venue name.
pub const VENUE_CATEGORIES: [(&str, &str); 4] = [
    ("ELLERSLIE", "flat_left_2000m"),
    ("TRENTHAM", "flat_right_2200m"),
    ("RICCARTON", "flat_right_1600m"),
    ("TE RAPA", "flat_right_1600m"),
];

static RACE_TIME_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^([0-9]{1,2}):([0-9]{2})(?::([0-9]{2}))?\s*([ap])\.?m\.?$|^([0-9]{1,2}):([0-9]{2})(?::([0-9]{2}))?$")
        .ok()
});

/// Minutes since midnight for a race-time string, if it can be interpreted.
///
/// Accepts `H:MM`, `HH:MM`, `HH:MM:SS`, each optionally followed by `am`/`pm`.
/// Seconds are validated but dropped.
pub fn try_parse_race_time(input: &str) -> Option<u32> {
    let re = RACE_TIME_RE.as_ref()?;
    let caps = re.captures(input.trim())?;

    // Groups 1-4 match the 12-hour form, 5-7 the 24-hour form.
    let (hours, minutes, seconds, meridiem) = match caps.get(1) {
        Some(h) => (h, caps.get(2)?, caps.get(3), caps.get(4)),
        None => (caps.get(5)?, caps.get(6)?, caps.get(7), None),
    };

    let mut hours: u32 = hours.as_str().parse().ok()?;
    let minutes: u32 = minutes.as_str().parse().ok()?;
    if let Some(seconds) = seconds {
        let seconds: u32 = seconds.as_str().parse().ok()?;
        if seconds > 59 {
            return None;
        }
    }
    if minutes > 59 {
        return None;
    }

    match meridiem.map(|m| m.as_str().to_ascii_lowercase()) {
        Some(m) => {
            if !(1..=12).contains(&hours) {
                return None;
            }
            hours %= 12;
            if m == "p" {
                hours += 12;
            }
        }
        None if hours > 23 => return None,
        None => {}
    }

    Some(hours * 60 + minutes)
}

/// Total race-time parser: malformed input yields `0`.
pub fn parse_race_time(input: &str) -> u32 {
    try_parse_race_time(input).unwrap_or(0)
}

/// Venue characteristic for a normalized venue name, never empty.
pub fn venue_category(venue: &str) -> &'static str {
    VENUE_CATEGORIES
        .iter()
        .find(|(name, _)| *name == venue)
        .map(|(_, category)| *category)
        .unwrap_or(UNKNOWN_VENUE_CATEGORY)
}

/// Trim and uppercase a venue name.
pub fn normalize_venue(venue: &str) -> String {
    venue.trim().to_uppercase()
}

/// Trim and lowercase a source name.
pub fn normalize_source(source: &str) -> String {
    source.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_24_hour_times() {
        assert_eq!(parse_race_time("14:30"), 870);
        assert_eq!(parse_race_time("9:05"), 545);
        assert_eq!(parse_race_time("00:00"), 0);
        assert_eq!(parse_race_time("23:59:59"), 1439);
        assert_eq!(parse_race_time(" 12:15 "), 735);
    }

    #[test]
    fn test_parse_meridiem_times() {
        assert_eq!(parse_race_time("2:30pm"), 870);
        assert_eq!(parse_race_time("2:30 PM"), 870);
        assert_eq!(parse_race_time("12:10am"), 10);
        assert_eq!(parse_race_time("12:10 p.m."), 730);
        assert_eq!(parse_race_time("11:00 am"), 660);
    }

    #[test]
    fn test_parser_is_total() {
        for input in ["", "TBA", "14", "14:3", "25:00", "14:60", "13:00pm", ":", "1:2:3", "١٤:٣٠"] {
            assert_eq!(parse_race_time(input), 0, "input {:?}", input);
            assert!(try_parse_race_time(input).is_none(), "input {:?}", input);
        }
    }

    #[test]
    fn test_venue_categories() {
        assert_eq!(venue_category("ELLERSLIE"), "flat_left_2000m");
        assert_eq!(venue_category("TE RAPA"), "flat_right_1600m");
        assert_eq!(venue_category("OTAKI"), UNKNOWN_VENUE_CATEGORY);
        assert_eq!(venue_category(""), UNKNOWN_VENUE_CATEGORY);
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_venue("  Te Rapa "), "TE RAPA");
        assert_eq!(normalize_source(" TAB_NZ"), "tab_nz");
    }
}
