//! Parsing of `--min-age` / `--max-age` durations.
//!
//! Accepts concatenated `<count><unit>` atoms, e.g. `5min`, `1d2h`, `3w`.
//! Months and years are extrapolated to 30 and 365 days.

use chrono::{DateTime, Duration, Utc};

use crate::error::{DiffError, Result};

const UNITS: &[(&str, i64)] = &[
    ("seconds", 1),
    ("minutes", 60),
    ("hours", 3600),
    ("days", 86_400),
    ("weeks", 7 * 86_400),
    ("months", 30 * 86_400),
    ("years", 365 * 86_400),
    // Shortcuts
    ("s", 1),
    ("min", 60),
    ("h", 3600),
    ("d", 86_400),
    ("w", 7 * 86_400),
    ("mon", 30 * 86_400),
    ("y", 365 * 86_400),
];

fn unit_seconds(unit: &str) -> Result<i64> {
    UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, secs)| *secs)
        .ok_or_else(|| {
            let supported = UNITS
                .iter()
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
                .join(", ");
            DiffError::Config(format!(
                "'{}' is not a recognized time unit. Supported units: {}",
                unit, supported
            ))
        })
}

/// Parse a time delta like `1d2h` or `90s`.
pub fn parse_age(text: &str) -> Result<Duration> {
    let mut rest = text.trim();
    if rest.is_empty() {
        return Err(DiffError::Config("No time difference specified".into()));
    }

    let mut total_seconds: i64 = 0;
    let mut seen_units: Vec<String> = Vec::new();
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| bad_delta(text))?;
        if digits_end == 0 {
            return Err(bad_delta(text));
        }
        let count: i64 = rest[..digits_end].parse().map_err(|_| bad_delta(text))?;

        let unit_end = rest[digits_end..]
            .find(|c: char| c.is_ascii_digit())
            .map(|i| digits_end + i)
            .unwrap_or(rest.len());
        let unit = &rest[digits_end..unit_end];

        if seen_units.iter().any(|u| u == unit) {
            return Err(DiffError::Config(format!(
                "Time unit '{}' specified more than once",
                unit
            )));
        }
        seen_units.push(unit.to_string());

        total_seconds = total_seconds
            .checked_add(count.checked_mul(unit_seconds(unit)?).ok_or_else(|| bad_delta(text))?)
            .ok_or_else(|| bad_delta(text))?;
        rest = &rest[unit_end..];
    }

    Ok(Duration::seconds(total_seconds))
}

fn bad_delta(text: &str) -> DiffError {
    DiffError::Config(format!(
        "Cannot parse '{}': not a recognized time delta",
        text
    ))
}

/// The instant `delta` before `now`.
pub fn time_before(now: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    now - delta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_units() {
        assert_eq!(parse_age("90s").unwrap(), Duration::seconds(90));
        assert_eq!(parse_age("5min").unwrap(), Duration::minutes(5));
        assert_eq!(parse_age("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_age("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_age("3w").unwrap(), Duration::weeks(3));
        assert_eq!(parse_age("1mon").unwrap(), Duration::days(30));
        assert_eq!(parse_age("2y").unwrap(), Duration::days(730));
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(parse_age("1d2h").unwrap(), Duration::hours(26));
        assert_eq!(parse_age("1h30min").unwrap(), Duration::minutes(90));
    }

    #[test]
    fn test_parse_long_names() {
        assert_eq!(parse_age("2hours").unwrap(), Duration::hours(2));
        assert_eq!(parse_age("10minutes").unwrap(), Duration::minutes(10));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_age("").is_err());
        assert!(parse_age("h5").is_err());
        assert!(parse_age("5fortnights").is_err());
        assert!(parse_age("5min5min").is_err());
    }

    #[test]
    fn test_time_before() {
        let now = Utc::now();
        assert_eq!(time_before(now, Duration::hours(1)), now - Duration::hours(1));
    }
}
