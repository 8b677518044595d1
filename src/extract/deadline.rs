//! `X-KernelTest-Deadline` parsing.
//!
//! The header carries a loosely ISO 8601 timestamp such as
//! `2016-06-13T11:30:00.000001+00:00`. The date hyphens and all colons are
//! removed, giving the compact form `20160613T113000.000001+0000`, which is
//! then tried against each accepted encoding in turn.

use chrono::{DateTime, Utc};

/// Accepted compact encodings, most specific last.
const DEADLINE_FORMATS: &[&str] = &[
    "%Y%m%dT%H%M%z",
    "%Y%m%dT%H%M%S%z",
    "%Y%m%dT%H%M%S%.f%z",
];

/// Parse a deadline header value into a UTC timestamp.
///
/// Returns `None` when no encoding matches; the caller falls back to its
/// default horizon.
pub fn parse_deadline(raw: &str) -> Option<DateTime<Utc>> {
    // Only the first two hyphens belong to the date; a later one is the
    // timezone sign.
    let compact = raw.trim().replacen('-', "", 2).replace(':', "");

    for format in DEADLINE_FORMATS {
        match DateTime::parse_from_str(&compact, format) {
            Ok(parsed) => return Some(parsed.with_timezone(&Utc)),
            Err(err) => {
                log::debug!("deadline `{}` does not match `{}`: {}", compact, format, err);
            }
        }
    }

    log::error!("unable to parse deadline `{}`", raw);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_deadline_with_fraction() {
        let parsed = parse_deadline("2016-06-13T11:30:00.000001+00:00").unwrap();
        let expected = Utc.with_ymd_and_hms(2016, 6, 13, 11, 30, 0).unwrap()
            + chrono::Duration::microseconds(1);
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_deadline_with_seconds() {
        let parsed = parse_deadline("2016-06-13T11:30:00+00:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2016, 6, 13, 11, 30, 0).unwrap());
    }

    #[test]
    fn test_deadline_minutes_only_negative_offset() {
        let parsed = parse_deadline("2016-06-13T11:30-02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2016, 6, 13, 13, 30, 0).unwrap());
    }

    #[test]
    fn test_deadline_positive_offset_is_converted() {
        let parsed = parse_deadline("2016-06-13T11:30:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2016, 6, 13, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_deadline_without_timezone_is_rejected() {
        assert_eq!(parse_deadline("2016-06-13T11:30:00"), None);
    }

    #[test]
    fn test_deadline_garbage_is_rejected() {
        assert_eq!(parse_deadline("tomorrow"), None);
    }
}
