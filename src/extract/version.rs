//! Kernel version correction.
//!
//! Announcement emails advertise the release that is about to be cut, while
//! the build under test is tagged with the previous patch level. `4.1.15-stable
//! review` is therefore built and described as `v4.1.14-<n>-g<sha>`.

use super::ParseError;
use regex::Regex;
use std::sync::OnceLock;

static RC_SUFFIX_REGEX: OnceLock<Regex> = OnceLock::new();

fn rc_suffix_regex() -> &'static Regex {
    RC_SUFFIX_REGEX.get_or_init(|| Regex::new(r"-rc\d+$").expect("Invalid rc suffix regex"))
}

/// Correct an announced kernel version to the version actually built.
///
/// - `-rcN` suffixes are dropped first (`4.1.3-rc12` → `4.1.2`).
/// - The last component is decremented (`4.1.14` → `4.1.13`, `4.1` → `4.0`).
/// - A three component version decremented to zero loses the component
///   (`4.1.1` → `4.1`).
/// - A trailing `0` is left alone: there is no previous release to infer.
/// - Versions with fewer than two components, or with a non-numeric last
///   component, are returned unchanged.
pub fn normalize_version(version: &str) -> String {
    match try_normalize_version(version) {
        Ok(normalized) => normalized,
        Err(err) => {
            log::error!("{}", err);
            version.to_string()
        }
    }
}

pub(crate) fn try_normalize_version(version: &str) -> Result<String, ParseError> {
    let base = rc_suffix_regex().replace(version, "");
    let mut parts: Vec<&str> = base.split('.').collect();

    if parts.len() < 2 {
        return Ok(version.to_string());
    }

    let last = parts[parts.len() - 1];
    let numeric: u32 = last.parse().map_err(|_| ParseError::NonNumericVersion {
        version: version.to_string(),
    })?;

    if numeric == 0 {
        log::warn!("kernel version {} ends with 0, leaving it unchanged", version);
        return Ok(parts.join("."));
    }

    parts.pop();
    if numeric == 1 && parts.len() >= 2 {
        return Ok(parts.join("."));
    }

    let mut joined = parts.join(".");
    joined.push('.');
    joined.push_str(&(numeric - 1).to_string());
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrements_patch_level() {
        assert_eq!(normalize_version("4.1.14"), "4.1.13");
    }

    #[test]
    fn test_decrements_two_components() {
        assert_eq!(normalize_version("4.1"), "4.0");
    }

    #[test]
    fn test_drops_component_reaching_zero() {
        assert_eq!(normalize_version("4.1.1"), "4.1");
    }

    #[test]
    fn test_zero_is_left_unchanged() {
        assert_eq!(normalize_version("4.0"), "4.0");
        assert_eq!(normalize_version("4.9.0"), "4.9.0");
    }

    #[test]
    fn test_strips_rc_suffix() {
        assert_eq!(normalize_version("4.1.3-rc1"), "4.1.2");
        assert_eq!(normalize_version("4.1.3-rc12"), "4.1.2");
    }

    #[test]
    fn test_non_numeric_is_returned_unchanged() {
        assert_eq!(normalize_version("foo"), "foo");
        assert_eq!(normalize_version("4.1.3-foo"), "4.1.3-foo");
        assert!(matches!(
            try_normalize_version("4.1.x"),
            Err(ParseError::NonNumericVersion { .. })
        ));
    }
}
