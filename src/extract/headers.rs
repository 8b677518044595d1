//! Job identity extraction from `X-KernelTest-*` headers.
//!
//! Maintainer tooling can annotate review emails with explicit metadata:
//!
//! ```text
//! X-KernelTest-Tree: git://git.kernel.org/pub/scm/linux/kernel/git/stable/linux-stable-rc.git
//! X-KernelTest-Branch: linux-4.6.y
//! X-KernelTest-Version: 4.6.2
//! X-KernelTest-PatchCount: 47
//! X-KernelTest-Deadline: 2016-06-13T11:30+00:00
//! ```
//!
//! Each header is optional. When present they take precedence over the subject.

use super::PartialIdentity;
use super::patches::reconcile_patch_count;
use super::version::normalize_version;
use mailparse::{MailHeader, MailHeaderMap};

pub const TREE_HEADER: &str = "X-KernelTest-Tree";
pub const BRANCH_HEADER: &str = "X-KernelTest-Branch";
pub const VERSION_HEADER: &str = "X-KernelTest-Version";
pub const PATCH_COUNT_HEADER: &str = "X-KernelTest-PatchCount";
pub const DEADLINE_HEADER: &str = "X-KernelTest-Deadline";

/// Namespace for branches built from locally applied review queues.
pub const LOCAL_BRANCH_PREFIX: &str = "local/";

/// Repository names mapped to backend job names.
const TREE_ALIASES: &[(&str, &str)] = &[("linux-stable-rc", "stable-rc")];

/// Reduce a tree URL to its repository name, applying known aliases.
///
/// `git://.../stable/linux-stable-rc.git` becomes `stable-rc`; values that are
/// not URLs pass through unchanged.
pub fn extract_tree_name(tree: &str) -> String {
    let trimmed = tree.trim().trim_end_matches('/');
    let last_segment = trimmed.rsplit('/').next().unwrap_or(trimmed);
    let name = last_segment.strip_suffix(".git").unwrap_or(last_segment);

    TREE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Prefix a branch name with the local namespace unless already namespaced.
pub fn local_branch(branch: &str) -> String {
    let branch = branch.trim();
    if branch.starts_with(LOCAL_BRANCH_PREFIX) {
        branch.to_string()
    } else {
        format!("{}{}", LOCAL_BRANCH_PREFIX, branch)
    }
}

fn header_value(headers: &[MailHeader], name: &str) -> Option<String> {
    headers
        .get_first_value(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Read whichever identity headers are present.
///
/// Absent headers leave the corresponding field empty; a message without any
/// of them yields an empty identity.
pub fn extract_from_headers(headers: &[MailHeader]) -> PartialIdentity {
    let tree = header_value(headers, TREE_HEADER).map(|value| extract_tree_name(&value));
    let branch = header_value(headers, BRANCH_HEADER).map(|value| local_branch(&value));
    let version = header_value(headers, VERSION_HEADER).map(|value| normalize_version(&value));
    let patches = reconcile_patch_count(header_value(headers, PATCH_COUNT_HEADER).as_deref());

    let identity = PartialIdentity {
        tree,
        version,
        branch,
        patches,
    };

    if !identity.is_empty() {
        log::debug!("identity from headers: {:?}", identity);
    }

    identity
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailparse::parse_mail;

    #[test]
    fn test_extract_tree_name_no_match() {
        assert_eq!(extract_tree_name("foo-bar"), "foo-bar");
    }

    #[test]
    fn test_extract_tree_name_linux_stable() {
        let tree = "git://git.kernel.org/pub/scm/linux/kernel/git/stable/linux-stable-rc.git";
        assert_eq!(extract_tree_name(tree), "stable-rc");
    }

    #[test]
    fn test_extract_tree_name_default() {
        let tree = "git://git.kernel.org/pub/scm/linux/kernel/git/stable/stable-queue.git";
        assert_eq!(extract_tree_name(tree), "stable-queue");
    }

    #[test]
    fn test_local_branch() {
        assert_eq!(local_branch("linux-4.6.y"), "local/linux-4.6.y");
        assert_eq!(local_branch("local/linux-4.6.y"), "local/linux-4.6.y");
    }

    #[test]
    fn test_extract_from_headers_correct() {
        let raw = concat!(
            "X-KernelTest-Tree: git://git.kernel.org/pub/scm/linux/kernel/git/stable/linux-stable-rc.git\r\n",
            "X-KernelTest-Branch: linux-4.6.y\r\n",
            "X-KernelTest-PatchCount: 47\r\n",
            "X-KernelTest-Version: 4.6.2\r\n",
            "\r\n",
            "foo\r\n"
        );
        let parsed = parse_mail(raw.as_bytes()).unwrap();

        let identity = extract_from_headers(&parsed.headers);
        assert_eq!(
            identity,
            PartialIdentity {
                tree: Some("stable-rc".to_string()),
                version: Some("4.6.1".to_string()),
                branch: Some("local/linux-4.6.y".to_string()),
                patches: vec!["47".to_string(), "48".to_string()],
            }
        );
    }

    #[test]
    fn test_extract_from_headers_partial() {
        let raw = "X-KernelTest-Version: 4.4.31\r\n\r\nfoo\r\n";
        let parsed = parse_mail(raw.as_bytes()).unwrap();

        let identity = extract_from_headers(&parsed.headers);
        assert_eq!(identity.version.as_deref(), Some("4.4.30"));
        assert!(identity.tree.is_none());
        assert!(identity.branch.is_none());
        assert!(identity.patches.is_empty());
    }

    #[test]
    fn test_extract_from_headers_no_headers() {
        let parsed = parse_mail(b"Subject: foo\r\n\r\nfoo\r\n").unwrap();
        assert!(extract_from_headers(&parsed.headers).is_empty());
    }
}
