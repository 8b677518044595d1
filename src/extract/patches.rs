//! Patch count reconciliation.
//!
//! The announced series total is occasionally one lower than the number of
//! commits the backend describes on top of the release tag, so both values are
//! accepted when matching.

/// Expand a patch count into the ordered set of accepted counts.
///
/// `Some("45")` yields `["45", "46"]`, `None` yields nothing. A count that is
/// not a number is kept verbatim as the only accepted value.
pub fn reconcile_patch_count(count: Option<&str>) -> Vec<String> {
    let Some(count) = count.map(str::trim).filter(|c| !c.is_empty()) else {
        return Vec::new();
    };

    match count.parse::<u32>() {
        Ok(value) => match value.checked_add(1) {
            Some(next) => vec![value.to_string(), next.to_string()],
            None => vec![value.to_string()],
        },
        Err(_) => {
            log::warn!("patch count `{}` is not a number, matching it verbatim", count);
            vec![count.to_string()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_count() {
        assert_eq!(reconcile_patch_count(Some("45")), vec!["45", "46"]);
    }

    #[test]
    fn test_reconcile_keeps_numeric_order() {
        assert_eq!(reconcile_patch_count(Some("9")), vec!["9", "10"]);
    }

    #[test]
    fn test_reconcile_absent() {
        assert!(reconcile_patch_count(None).is_empty());
        assert!(reconcile_patch_count(Some("  ")).is_empty());
    }

    #[test]
    fn test_reconcile_non_numeric() {
        assert_eq!(reconcile_patch_count(Some("many")), vec!["many"]);
    }
}
