//! Job identity extraction from stable review subjects.
//!
//! Stable maintainers announce review cycles with subjects such as:
//! - `[PATCH 4.1 00/45] 4.1.15-stable review`
//! - `[PATCH 4.4 000/103] 4.4.31-stable review`
//!
//! The series total is the number of patches on top of the previous release,
//! the version is the release being prepared and the suffix names the tree.

use super::version::normalize_version;
use regex::Regex;
use std::sync::OnceLock;

/// Tree aliases used in review subjects, mapped to backend job names.
const SUBJECT_TREE_ALIASES: &[(&str, &str)] = &[("stable", "stable-queue")];

static SUBJECT_REGEX: OnceLock<Regex> = OnceLock::new();
static REPLY_REGEX: OnceLock<Regex> = OnceLock::new();

/// Get the compiled review subject regex
///
/// Captures:
/// 1. `patches` - the `n/total` series marker
/// 2. `version` - the announced kernel version
/// 3. `tree` - the tree name following the version
fn subject_regex() -> &'static Regex {
    SUBJECT_REGEX.get_or_init(|| {
        Regex::new(
            r"^\[PATCH\s+(?:\d+\.\d+(?:\.\d+)?)\s+(?P<patches>\d+/\d+)\]\s+(?P<version>\d+\.\d+(?:\.\d+)?)-(?P<tree>\w+)",
        )
        .expect("Invalid review subject regex")
    })
}

fn reply_regex() -> &'static Regex {
    REPLY_REGEX.get_or_init(|| Regex::new(r"(?i)^re:?").expect("Invalid reply regex"))
}

/// Identity parsed from a review subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectIdentity {
    pub tree: String,
    pub version: String,
    /// Raw series total, before off-by-one reconciliation.
    pub patches: String,
}

/// Whether the subject is a reply (`Re:`, `RE`, `re:` ...).
pub fn is_reply_subject(subject: &str) -> bool {
    reply_regex().is_match(subject.trim_start())
}

/// Extract the series total only, ignoring the rest of the identity.
pub fn extract_patch_count(subject: &str) -> Option<String> {
    if is_reply_subject(subject) {
        return None;
    }

    let caps = subject_regex().captures(subject)?;
    let (_, total) = caps.name("patches")?.as_str().split_once('/')?;
    Some(total.to_string())
}

/// Parse tree, corrected version and series total from a review subject.
///
/// Returns `None` for replies and for subjects that are not review
/// announcements; neither case is an error.
///
/// ```rust
/// use kernelci_reports::extract::subject::extract_from_subject;
///
/// let identity = extract_from_subject("[PATCH 4.1 00/45] 4.1.15-stable review").unwrap();
/// assert_eq!(identity.tree, "stable-queue");
/// assert_eq!(identity.version, "4.1.14");
/// assert_eq!(identity.patches, "45");
/// ```
pub fn extract_from_subject(subject: &str) -> Option<SubjectIdentity> {
    if is_reply_subject(subject) {
        return None;
    }

    let caps = subject_regex().captures(subject)?;
    let patches = extract_patch_count(subject)?;
    let version = normalize_version(caps.name("version")?.as_str());
    let tree = canonical_subject_tree(caps.name("tree")?.as_str());

    Some(SubjectIdentity {
        tree,
        version,
        patches,
    })
}

fn canonical_subject_tree(tree: &str) -> String {
    SUBJECT_TREE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == tree)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| tree.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_stable_review() {
        let result = extract_from_subject("[PATCH 4.1 00/45] 4.1.15-stable review");
        assert_eq!(
            result,
            Some(SubjectIdentity {
                tree: "stable-queue".to_string(),
                version: "4.1.14".to_string(),
                patches: "45".to_string(),
            })
        );
    }

    #[test]
    fn test_extract_reply_is_ignored() {
        assert_eq!(
            extract_from_subject("Re: [PATCH 4.1 00/45] 4.1.15-stable review"),
            None
        );
        assert_eq!(
            extract_from_subject("RE [PATCH 4.1 00/45] 4.1.15-stable review"),
            None
        );
    }

    #[test]
    fn test_extract_random_subject() {
        assert_eq!(extract_from_subject("foo review 4.1.5 bar kernel"), None);
    }

    #[test]
    fn test_extract_keeps_unknown_tree() {
        let result = extract_from_subject("[PATCH 4.4 000/103] 4.4.31-custom review").unwrap();
        assert_eq!(result.tree, "custom");
        assert_eq!(result.version, "4.4.30");
        assert_eq!(result.patches, "103");
    }

    #[test]
    fn test_extract_patch_count_only() {
        assert_eq!(
            extract_patch_count("[PATCH 4.6 00/47] 4.6.2-stable review"),
            Some("47".to_string())
        );
        assert_eq!(extract_patch_count("Re: [PATCH 4.6 00/47] 4.6.2-stable review"), None);
        assert_eq!(extract_patch_count("[PATCH 2/5] Fix memory leak"), None);
    }
}
