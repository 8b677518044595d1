//! Matching backend results against report requests.

use crate::backend::BackendJobResult;
use crate::models::ReportRequest;
use regex::RegexSet;

/// Patterns accepted for a request: `^v<version>-<patches>-g.*` for every
/// accepted patch count.
fn describe_patterns(request: &ReportRequest) -> Vec<String> {
    let version = regex::escape(&request.version);
    request
        .patches
        .iter()
        .map(|patches| format!("^v{}-{}-g.*", version, regex::escape(patches)))
        .collect()
}

fn non_empty(describe: &Option<String>) -> Option<&str> {
    describe.as_deref().filter(|describe| !describe.is_empty())
}

/// Whether the result's build identifier belongs to the request.
///
/// `git_describe_v` is preferred over `git_describe`; empty values count as
/// absent and a result with neither never matches.
///
/// ```rust
/// use kernelci_reports::backend::{BackendJobResult, JobStatus};
/// use kernelci_reports::dispatch::matcher::is_valid_result;
/// # use kernelci_reports::models::{NewReportRequest, ReportRequest};
/// # use chrono::Utc;
/// # let request = ReportRequest::from_new(1, NewReportRequest {
/// #     tree: "stable-queue".into(), version: "4.4.30".into(), branch: None,
/// #     patches: vec!["70".into(), "71".into()], subject: String::new(),
/// #     message_id: String::new(), to_addrs: vec![], cc_addrs: vec![],
/// #     from_name: None, from_address: String::new(),
/// #     created_on: Utc::now(), deadline: Utc::now(),
/// # });
///
/// let result = BackendJobResult {
///     job: "stable-queue".into(),
///     kernel: "v4.4.30-70-g3a40a54aa275".into(),
///     git_branch: None,
///     status: JobStatus::Pass,
///     git_describe: Some("v4.4.30-70-g3a40a54aa275".into()),
///     git_describe_v: None,
///     boot_count: None,
/// };
/// assert!(is_valid_result(&result, &request));
/// ```
pub fn is_valid_result(result: &BackendJobResult, request: &ReportRequest) -> bool {
    let Some(describe) = non_empty(&result.git_describe_v).or(non_empty(&result.git_describe))
    else {
        return false;
    };

    let patterns = describe_patterns(request);
    if patterns.is_empty() {
        return false;
    }

    match RegexSet::new(&patterns) {
        Ok(set) => set.is_match(describe),
        Err(err) => {
            log::error!("invalid describe patterns for request {}: {}", request.id, err);
            false
        }
    }
}
