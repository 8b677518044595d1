//! Build/test backend contract.
//!
//! The dispatcher talks to three endpoints:
//! - `GET /job` lists job results for a tree and kernel version
//! - `GET /count/boot` counts boot results for one job/kernel pair
//! - `POST /send` schedules delivery of a report email
//!
//! [`Backend`] abstracts the transport so the state machine can be driven by
//! a scripted implementation in tests; [`BackendClient`] is the reqwest one.

pub mod client;

pub use client::BackendClient;

use crate::models::ReportRequest;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Connectivity failures. A status code, whatever its value, is not an error.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend HTTP error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid backend token: {0}")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),
}

/// Status code plus the decoded body.
///
/// `body` is only populated for `200 OK` responses that decode cleanly.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse<T> {
    pub status: StatusCode,
    pub body: Option<T>,
}

impl<T> BackendResponse<T> {
    pub fn ok(body: T) -> Self {
        Self {
            status: StatusCode::OK,
            body: Some(body),
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self { status, body: None }
    }
}

/// Job state reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pass,
    Fail,
    Build,
    #[serde(other)]
    Unknown,
}

/// One entry of a job query response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendJobResult {
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub git_branch: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub git_describe: Option<String>,
    #[serde(default)]
    pub git_describe_v: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_count")]
    pub boot_count: Option<u64>,
}

/// Body of `GET /job`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobQueryResult {
    #[serde(default, deserialize_with = "deserialize_count")]
    pub count: u64,
    #[serde(default)]
    pub result: Vec<BackendJobResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountEntry {
    #[serde(deserialize_with = "deserialize_count")]
    pub count: u64,
}

/// Body of `GET /count/boot`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountResult {
    #[serde(default)]
    pub result: Vec<CountEntry>,
}

impl CountResult {
    /// Count of the first entry; an empty result list counts as zero.
    pub fn total(&self) -> u64 {
        self.result.first().map(|entry| entry.count).unwrap_or(0)
    }
}

/// Counts arrive either as JSON numbers or as numeric strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawCount {
    Number(u64),
    Text(String),
}

impl RawCount {
    fn into_count<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            RawCount::Number(value) => Ok(value),
            RawCount::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid count `{}`", text))),
        }
    }
}

fn deserialize_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    RawCount::deserialize(deserializer)?.into_count()
}

fn deserialize_optional_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawCount>::deserialize(deserializer)?
        .map(RawCount::into_count)
        .transpose()
}

/// Filters for `GET /job`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobQuery {
    pub job: String,
    pub kernel_version: String,
    pub git_branch: Option<String>,
}

impl JobQuery {
    pub fn for_request(request: &ReportRequest) -> Self {
        Self {
            job: request.tree.clone(),
            kernel_version: request.version.clone(),
            git_branch: request.branch.clone(),
        }
    }

    pub fn params(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![
            ("job", self.job.as_str()),
            ("kernel_version", self.kernel_version.as_str()),
        ];
        if let Some(branch) = self.git_branch.as_deref() {
            params.push(("git_branch", branch));
        }
        params
    }
}

/// Kind of report the backend is asked to send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportKind {
    #[default]
    Boot,
    Build,
}

impl std::str::FromStr for ReportKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "boot" => Ok(ReportKind::Boot),
            "build" => Ok(ReportKind::Build),
            other => Err(format!("unknown report kind `{}`", other)),
        }
    }
}

/// Fixed delivery parameters shared by every send request.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOptions {
    /// Scheduling delay the backend waits before sending.
    pub delay: Duration,
    pub kind: ReportKind,
    pub formats: Vec<String>,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(12_600),
            kind: ReportKind::Boot,
            formats: vec!["txt".to_string()],
        }
    }
}

/// Body of `POST /send`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendRequest {
    pub delay: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_report: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_report: Option<u8>,
    pub job: String,
    pub kernel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    pub format: Vec<String>,
    pub send_to: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub send_cc: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl SendRequest {
    /// Build the delivery for a matched result, replying to the announcement.
    ///
    /// The requester comes first in `send_to`, followed by the original `To`
    /// recipients.
    pub fn for_result(
        result: &BackendJobResult,
        request: &ReportRequest,
        options: &DeliveryOptions,
    ) -> Self {
        let mut send_to = Vec::with_capacity(request.to_addrs.len() + 1);
        send_to.push(request.requester());
        send_to.extend(request.to_addrs.iter().cloned());

        let (boot_report, build_report) = match options.kind {
            ReportKind::Boot => (Some(1), None),
            ReportKind::Build => (None, Some(1)),
        };

        Self {
            delay: options.delay.as_secs(),
            boot_report,
            build_report,
            job: result.job.clone(),
            kernel: result.kernel.clone(),
            git_branch: result.git_branch.clone().or_else(|| request.branch.clone()),
            format: options.formats.clone(),
            send_to,
            send_cc: request.cc_addrs.clone(),
            in_reply_to: Some(request.message_id.clone()),
            subject: Some(format!("Re: {}", request.subject)),
        }
    }
}

/// Transport used by the dispatcher.
#[rocket::async_trait]
pub trait Backend: Send + Sync {
    async fn query_jobs(
        &self,
        query: &JobQuery,
    ) -> Result<BackendResponse<JobQueryResult>, BackendError>;

    async fn count_boots(
        &self,
        job: &str,
        kernel: &str,
    ) -> Result<BackendResponse<CountResult>, BackendError>;

    /// Submit a delivery, returning the backend's status code.
    async fn send_report(&self, request: &SendRequest) -> Result<StatusCode, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewReportRequest;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn request() -> ReportRequest {
        let created_on = Utc.with_ymd_and_hms(2016, 11, 1, 10, 0, 0).unwrap();
        ReportRequest::from_new(
            7,
            NewReportRequest {
                tree: "stable-queue".to_string(),
                version: "4.4.30".to_string(),
                branch: None,
                patches: vec!["70".to_string(), "71".to_string()],
                subject: "[PATCH 4.4 000/70] 4.4.31-stable review".to_string(),
                message_id: "<20161101@example.org>".to_string(),
                to_addrs: vec!["linux-kernel@vger.kernel.org".to_string()],
                cc_addrs: vec!["stable@vger.kernel.org".to_string()],
                from_name: Some("Greg KH".to_string()),
                from_address: "gregkh@example.org".to_string(),
                created_on,
                deadline: created_on + chrono::Duration::days(2),
            },
        )
    }

    #[test]
    fn test_job_query_result_decodes_string_counts() {
        let body: JobQueryResult = serde_json::from_value(json!({
            "count": "1",
            "result": [{
                "job": "stable-queue",
                "kernel": "v4.4.30-70-g3a40a54aa275",
                "status": "PASS",
                "git_describe": "v4.4.30-70-g3a40a54aa275",
                "boot_count": "12"
            }]
        }))
        .unwrap();

        assert_eq!(body.count, 1);
        assert_eq!(body.result[0].status, JobStatus::Pass);
        assert_eq!(body.result[0].boot_count, Some(12));
        assert_eq!(body.result[0].git_describe_v, None);
    }

    #[test]
    fn test_unknown_job_status() {
        let result: BackendJobResult =
            serde_json::from_value(json!({"status": "QUEUED"})).unwrap();
        assert_eq!(result.status, JobStatus::Unknown);
    }

    #[test]
    fn test_count_total() {
        let counts: CountResult =
            serde_json::from_value(json!({"result": [{"count": 3}]})).unwrap();
        assert_eq!(counts.total(), 3);
        assert_eq!(CountResult::default().total(), 0);
    }

    #[test]
    fn test_job_query_params() {
        let mut request = request();
        assert_eq!(
            JobQuery::for_request(&request).params(),
            vec![("job", "stable-queue"), ("kernel_version", "4.4.30")]
        );

        request.branch = Some("local/linux-4.4.y".to_string());
        let query = JobQuery::for_request(&request);
        assert_eq!(query.params().last(), Some(&("git_branch", "local/linux-4.4.y")));
    }

    #[test]
    fn test_send_request_body() {
        let result = BackendJobResult {
            job: "stable-queue".to_string(),
            kernel: "v4.4.30-70-g3a40a54aa275".to_string(),
            git_branch: Some("local/linux-4.4.y".to_string()),
            status: JobStatus::Pass,
            git_describe: Some("v4.4.30-70-g3a40a54aa275".to_string()),
            git_describe_v: None,
            boot_count: None,
        };

        let send = SendRequest::for_result(&result, &request(), &DeliveryOptions::default());
        let body = serde_json::to_value(&send).unwrap();

        assert_eq!(
            body,
            json!({
                "delay": 12600,
                "boot_report": 1,
                "job": "stable-queue",
                "kernel": "v4.4.30-70-g3a40a54aa275",
                "git_branch": "local/linux-4.4.y",
                "format": ["txt"],
                "send_to": ["Greg KH <gregkh@example.org>", "linux-kernel@vger.kernel.org"],
                "send_cc": ["stable@vger.kernel.org"],
                "in_reply_to": "<20161101@example.org>",
                "subject": "Re: [PATCH 4.4 000/70] 4.4.31-stable review"
            })
        );
    }

    #[test]
    fn test_build_report_kind() {
        let result: BackendJobResult =
            serde_json::from_value(json!({"job": "j", "kernel": "k", "status": "PASS"})).unwrap();
        let options = DeliveryOptions {
            kind: ReportKind::Build,
            ..Default::default()
        };

        let send = SendRequest::for_result(&result, &request(), &options);
        assert_eq!(send.boot_report, None);
        assert_eq!(send.build_report, Some(1));
        assert_eq!("build".parse::<ReportKind>(), Ok(ReportKind::Build));
        assert!("smoke".parse::<ReportKind>().is_err());
    }
}
