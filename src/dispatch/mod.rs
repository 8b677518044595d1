//! Dispatch state machine.
//!
//! One pass walks the pending report requests in creation order and, for each
//! one, decides between sending a report, discarding the request, or waiting
//! for a later pass:
//!
//! ```text
//! deadline reached (now + send delay >= deadline) -> discard
//! retry ceiling reached                           -> discard
//! GET /job
//!   400 / other permanent 4xx                     -> discard
//!   503 / 500 / other                             -> wait (no retry charged)
//!   200, no results or no matching result         -> wait
//!   200, matched FAIL                             -> discard
//!   200, matched BUILD                            -> wait
//!   200, matched PASS
//!     GET /count/boot not 200                     -> wait (no retry charged)
//!     zero boots                                  -> wait
//!     POST /send 200/202                          -> sent (delete)
//!     POST /send other                            -> deferred (untouched)
//! ```
//!
//! A connectivity failure aborts the remainder of the pass.

pub mod matcher;
pub mod policy;

pub use matcher::is_valid_result;
pub use policy::{RetryPolicy, StatusClass, classify_status, is_delivery_accepted};

use crate::backend::{
    Backend, BackendError, BackendJobResult, DeliveryOptions, JobQuery, JobStatus, SendRequest,
};
use crate::models::{DispatchSummary, ReportRequest};
use crate::store::{ReportStore, StoreError};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tunables for the state machine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispatchConfig {
    pub delivery: DeliveryOptions,
    pub retry: RetryPolicy,
}

/// Why a request was dropped without a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    DeadlineReached,
    RetriesExhausted,
    JobFailed,
    Rejected(StatusCode),
}

/// Why a request stays queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitReason {
    BackendUnavailable(StatusCode),
    UndecodableResponse,
    NoResults,
    NoMatch,
    Building,
    UnknownStatus,
    CountUnavailable(StatusCode),
    NoBoots,
}

impl WaitReason {
    /// Whether this wait counts against the retry ceiling. Only waits where
    /// the backend answered but nothing is ready yet do.
    pub fn counts_as_retry(&self) -> bool {
        match self {
            WaitReason::BackendUnavailable(_)
            | WaitReason::UndecodableResponse
            | WaitReason::CountUnavailable(_) => false,
            WaitReason::NoResults
            | WaitReason::NoMatch
            | WaitReason::Building
            | WaitReason::UnknownStatus
            | WaitReason::NoBoots => true,
        }
    }
}

/// Result of processing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Sent { job: String, kernel: String },
    Discarded(DiscardReason),
    Waiting(WaitReason),
    /// Delivery was refused; the request is retried next pass without
    /// counting against the retry ceiling.
    Deferred(StatusCode),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Sent { job, kernel } => write!(f, "report sent for {} {}", job, kernel),
            Outcome::Discarded(DiscardReason::DeadlineReached) => write!(f, "deadline reached"),
            Outcome::Discarded(DiscardReason::RetriesExhausted) => write!(f, "retries exhausted"),
            Outcome::Discarded(DiscardReason::JobFailed) => write!(f, "job failed"),
            Outcome::Discarded(DiscardReason::Rejected(status)) => {
                write!(f, "query rejected with {}", status)
            }
            Outcome::Waiting(WaitReason::BackendUnavailable(status)) => {
                write!(f, "backend returned {}", status)
            }
            Outcome::Waiting(WaitReason::UndecodableResponse) => {
                write!(f, "undecodable backend response")
            }
            Outcome::Waiting(WaitReason::NoResults) => write!(f, "no results yet"),
            Outcome::Waiting(WaitReason::NoMatch) => write!(f, "no matching result yet"),
            Outcome::Waiting(WaitReason::Building) => write!(f, "still building"),
            Outcome::Waiting(WaitReason::UnknownStatus) => write!(f, "unknown job status"),
            Outcome::Waiting(WaitReason::CountUnavailable(status)) => {
                write!(f, "boot count returned {}", status)
            }
            Outcome::Waiting(WaitReason::NoBoots) => write!(f, "no boot results yet"),
            Outcome::Deferred(status) => write!(f, "delivery refused with {}", status),
        }
    }
}

/// Whether a request can no longer be usefully delivered at `now`.
pub fn deadline_reached(
    request: &ReportRequest,
    now: DateTime<Utc>,
    send_delay: std::time::Duration,
) -> bool {
    let delay = chrono::Duration::from_std(send_delay).unwrap_or(chrono::Duration::MAX);
    let scheduled = now.checked_add_signed(delay);
    now >= request.deadline || scheduled.is_none_or(|at| at >= request.deadline)
}

/// Drives report requests to a terminal state.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn ReportStore>,
    backend: Arc<dyn Backend>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ReportStore>,
        backend: Arc<dyn Backend>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            backend,
            config,
        }
    }

    /// Decide the next step for one request. Does not touch the store.
    pub async fn process(
        &self,
        request: &ReportRequest,
        now: DateTime<Utc>,
    ) -> Result<Outcome, BackendError> {
        if deadline_reached(request, now, self.config.delivery.delay) {
            return Ok(Outcome::Discarded(DiscardReason::DeadlineReached));
        }
        if self.config.retry.exhausted(request.retries) {
            return Ok(Outcome::Discarded(DiscardReason::RetriesExhausted));
        }

        let response = self
            .backend
            .query_jobs(&JobQuery::for_request(request))
            .await?;

        match classify_status(response.status) {
            StatusClass::Ok => {}
            StatusClass::Permanent => {
                return Ok(Outcome::Discarded(DiscardReason::Rejected(response.status)));
            }
            StatusClass::Transient => {
                return Ok(Outcome::Waiting(WaitReason::BackendUnavailable(
                    response.status,
                )));
            }
        }

        let Some(body) = response.body else {
            return Ok(Outcome::Waiting(WaitReason::UndecodableResponse));
        };
        if body.result.is_empty() {
            return Ok(Outcome::Waiting(WaitReason::NoResults));
        }

        let Some(result) = body
            .result
            .iter()
            .find(|candidate| is_valid_result(candidate, request))
        else {
            return Ok(Outcome::Waiting(WaitReason::NoMatch));
        };

        match result.status {
            JobStatus::Fail => Ok(Outcome::Discarded(DiscardReason::JobFailed)),
            JobStatus::Build => Ok(Outcome::Waiting(WaitReason::Building)),
            JobStatus::Unknown => Ok(Outcome::Waiting(WaitReason::UnknownStatus)),
            JobStatus::Pass => self.deliver(result, request).await,
        }
    }

    async fn deliver(
        &self,
        result: &BackendJobResult,
        request: &ReportRequest,
    ) -> Result<Outcome, BackendError> {
        let counts = self.backend.count_boots(&result.job, &result.kernel).await?;
        if counts.status != StatusCode::OK {
            log::error!(
                "boot count for {} {} returned {}",
                result.job,
                result.kernel,
                counts.status
            );
            return Ok(Outcome::Waiting(WaitReason::CountUnavailable(counts.status)));
        }

        let Some(counts) = counts.body else {
            return Ok(Outcome::Waiting(WaitReason::UndecodableResponse));
        };
        if counts.total() == 0 {
            return Ok(Outcome::Waiting(WaitReason::NoBoots));
        }

        let send = SendRequest::for_result(result, request, &self.config.delivery);
        let status = self.backend.send_report(&send).await?;

        if is_delivery_accepted(status) {
            Ok(Outcome::Sent {
                job: result.job.clone(),
                kernel: result.kernel.clone(),
            })
        } else {
            Ok(Outcome::Deferred(status))
        }
    }

    /// Persist the effect of an outcome.
    pub async fn apply(&self, request: &ReportRequest, outcome: &Outcome) -> Result<(), StoreError> {
        match outcome {
            Outcome::Sent { .. } | Outcome::Discarded(_) => {
                self.store.delete(request.id).await?;
            }
            Outcome::Waiting(reason) if reason.counts_as_retry() => {
                self.store.increment_retries(request.id).await?
            }
            Outcome::Waiting(_) | Outcome::Deferred(_) => {}
        }
        Ok(())
    }

    /// Process every pending request once.
    ///
    /// Cancellation is checked between requests, so the request in flight
    /// always has its outcome persisted.
    pub async fn run_pass(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        let requests = match self.store.list_pending().await {
            Ok(requests) => requests,
            Err(err) => {
                log::error!("failed to load pending report requests: {}", err);
                summary.aborted = true;
                return summary;
            }
        };

        if requests.is_empty() {
            log::debug!("no pending report requests");
            return summary;
        }

        log::info!("dispatch pass over {} report requests", requests.len());

        for request in requests {
            if cancel.is_cancelled() {
                log::info!("dispatch pass cancelled");
                summary.aborted = true;
                break;
            }

            summary.examined += 1;
            let outcome = match self.process(&request, now).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    log::error!("backend unreachable, aborting dispatch pass: {}", err);
                    summary.aborted = true;
                    break;
                }
            };

            self.log_outcome(&request, &outcome);

            if let Err(err) = self.apply(&request, &outcome).await {
                log::error!("failed to update report request {}: {}", request.id, err);
                continue;
            }

            match outcome {
                Outcome::Sent { .. } => summary.sent += 1,
                Outcome::Discarded(_) => summary.discarded += 1,
                Outcome::Waiting(_) => summary.waiting += 1,
                Outcome::Deferred(_) => summary.deferred += 1,
            }
        }

        log::info!(
            "dispatch pass done: examined={} sent={} discarded={} waiting={} deferred={}",
            summary.examined,
            summary.sent,
            summary.discarded,
            summary.waiting,
            summary.deferred
        );

        summary
    }

    fn log_outcome(&self, request: &ReportRequest, outcome: &Outcome) {
        match outcome {
            Outcome::Sent { .. } | Outcome::Discarded(_) => log::info!(
                "request {} ({} {}): {}",
                request.id,
                request.tree,
                request.version,
                outcome
            ),
            Outcome::Waiting(WaitReason::BackendUnavailable(_))
            | Outcome::Waiting(WaitReason::UndecodableResponse)
            | Outcome::Deferred(_) => log::warn!(
                "request {} ({} {}): {}",
                request.id,
                request.tree,
                request.version,
                outcome
            ),
            Outcome::Waiting(_) => log::debug!(
                "request {} ({} {}): {}",
                request.id,
                request.tree,
                request.version,
                outcome
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewReportRequest;
    use chrono::{Duration, TimeZone};

    fn request_with_deadline(deadline: DateTime<Utc>) -> ReportRequest {
        ReportRequest::from_new(
            1,
            NewReportRequest {
                tree: "stable-queue".to_string(),
                version: "4.4.30".to_string(),
                branch: None,
                patches: vec!["70".to_string()],
                subject: "subject".to_string(),
                message_id: "<id@example.org>".to_string(),
                to_addrs: Vec::new(),
                cc_addrs: Vec::new(),
                from_name: None,
                from_address: "gregkh@example.org".to_string(),
                created_on: deadline - Duration::days(2),
                deadline,
            },
        )
    }

    #[test]
    fn test_deadline_reached() {
        let now = Utc.with_ymd_and_hms(2016, 11, 1, 12, 0, 0).unwrap();
        let delay = std::time::Duration::from_secs(12_600);

        assert!(deadline_reached(&request_with_deadline(now), now, delay));
        assert!(deadline_reached(
            &request_with_deadline(now - Duration::hours(1)),
            now,
            delay
        ));
        // inside the send delay window
        assert!(deadline_reached(
            &request_with_deadline(now + Duration::hours(3)),
            now,
            delay
        ));
        assert!(!deadline_reached(
            &request_with_deadline(now + Duration::hours(4)),
            now,
            delay
        ));
    }

    #[test]
    fn test_only_match_waits_count_as_retry() {
        assert!(WaitReason::NoResults.counts_as_retry());
        assert!(WaitReason::NoMatch.counts_as_retry());
        assert!(WaitReason::Building.counts_as_retry());
        assert!(WaitReason::NoBoots.counts_as_retry());
        assert!(!WaitReason::BackendUnavailable(StatusCode::SERVICE_UNAVAILABLE).counts_as_retry());
        assert!(!WaitReason::UndecodableResponse.counts_as_retry());
        assert!(!WaitReason::CountUnavailable(StatusCode::BAD_GATEWAY).counts_as_retry());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            Outcome::Waiting(WaitReason::BackendUnavailable(StatusCode::SERVICE_UNAVAILABLE))
                .to_string(),
            "backend returned 503 Service Unavailable"
        );
        assert_eq!(
            Outcome::Discarded(DiscardReason::DeadlineReached).to_string(),
            "deadline reached"
        );
    }
}
