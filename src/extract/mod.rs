//! Report request extraction from announcement emails.
//!
//! Turns one raw RFC 5322 message into a [`NewReportRequest`], or nothing when
//! the message is not a build/test announcement. Extraction never fails
//! outward: malformed values are logged and degrade to "no extraction" or to
//! a default deadline.
//!
//! # Pipeline
//!
//! 1. Thread replies (`In-Reply-To` and `References` both set) are skipped.
//! 2. Reply subjects (`Re:`) are skipped.
//! 3. Identity strategies run in order and are merged field by field, the
//!    first strategy to provide a field wins:
//!    - `X-KernelTest-*` headers ([`headers`])
//!    - the review subject line ([`subject`])
//! 4. Messages without a tree, version and patch count are skipped.
//! 5. Recipients, sender, Message-Id and Date are copied over; the deadline
//!    comes from `X-KernelTest-Deadline` ([`deadline`]) or defaults to the
//!    message date plus the configured horizon.

pub mod deadline;
pub mod headers;
pub mod patches;
pub mod subject;
pub mod version;

use crate::models::NewReportRequest;
use chrono::{DateTime, Duration, Utc};
use mailparse::{MailHeader, MailHeaderMap, parse_mail};
use thiserror::Error;

pub use deadline::parse_deadline;
pub use headers::{extract_from_headers, extract_tree_name};
pub use patches::reconcile_patch_count;
pub use subject::{SubjectIdentity, extract_from_subject, is_reply_subject};
pub use version::normalize_version;

/// Default time allowed for a report when the message carries no deadline.
pub const DEFAULT_DEADLINE_HORIZON: Duration = Duration::days(2);

/// Errors raised while reading values out of a message.
///
/// These are logged by the extractor and never returned to callers.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to parse MIME structure: {0}")]
    MimeParse(#[from] mailparse::MailParseError),
    #[error("non parsable kernel version `{version}`")]
    NonNumericVersion { version: String },
    #[error("missing {header} header")]
    MissingHeader { header: &'static str },
    #[error("invalid Date header `{raw}`: {error}")]
    InvalidDate { raw: String, error: String },
    #[error("missing sender address in `{raw}`")]
    MissingSender { raw: String },
}

/// Job identity fields gathered from one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialIdentity {
    pub tree: Option<String>,
    pub version: Option<String>,
    pub branch: Option<String>,
    /// Accepted patch counts, already reconciled.
    pub patches: Vec<String>,
}

impl PartialIdentity {
    pub fn is_empty(&self) -> bool {
        self.tree.is_none()
            && self.version.is_none()
            && self.branch.is_none()
            && self.patches.is_empty()
    }

    /// Fill fields still missing from `other`.
    pub fn merge(mut self, other: PartialIdentity) -> Self {
        if self.tree.is_none() {
            self.tree = other.tree;
        }
        if self.version.is_none() {
            self.version = other.version;
        }
        if self.branch.is_none() {
            self.branch = other.branch;
        }
        if self.patches.is_empty() {
            self.patches = other.patches;
        }
        self
    }
}

/// Identity strategies, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    Headers,
    Subject,
}

impl IdentitySource {
    pub const PRECEDENCE: [IdentitySource; 2] = [IdentitySource::Headers, IdentitySource::Subject];

    fn extract(self, headers: &[MailHeader], subject: &str) -> PartialIdentity {
        match self {
            IdentitySource::Headers => extract_from_headers(headers),
            IdentitySource::Subject => subject_identity(subject),
        }
    }
}

/// Subject strategy: the full identity when the subject is a review
/// announcement, otherwise nothing.
fn subject_identity(subject: &str) -> PartialIdentity {
    match extract_from_subject(subject) {
        Some(identity) => PartialIdentity {
            tree: Some(identity.tree),
            version: Some(identity.version),
            branch: None,
            patches: reconcile_patch_count(Some(&identity.patches)),
        },
        None => PartialIdentity::default(),
    }
}

/// Run every strategy and merge the results left to right.
pub fn resolve_identity(headers: &[MailHeader], subject: &str) -> PartialIdentity {
    IdentitySource::PRECEDENCE
        .iter()
        .fold(PartialIdentity::default(), |merged, source| {
            merged.merge(source.extract(headers, subject))
        })
}

/// Converts raw messages into report requests.
#[derive(Debug, Clone)]
pub struct EmailExtractor {
    default_horizon: Duration,
}

impl Default for EmailExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_DEADLINE_HORIZON)
    }
}

impl EmailExtractor {
    pub fn new(default_horizon: Duration) -> Self {
        Self { default_horizon }
    }

    /// Extract a report request from raw message bytes.
    ///
    /// Returns `None` for replies, non-announcements and unreadable messages.
    pub fn extract(&self, raw: &[u8]) -> Option<NewReportRequest> {
        match self.try_extract(raw) {
            Ok(request) => request,
            Err(err) => {
                log::warn!("skipping message: {}", err);
                None
            }
        }
    }

    fn try_extract(&self, raw: &[u8]) -> Result<Option<NewReportRequest>, ParseError> {
        let parsed = parse_mail(raw)?;
        let headers = parsed.headers.as_slice();

        if headers.get_first_value("In-Reply-To").is_some()
            && headers.get_first_value("References").is_some()
        {
            log::debug!("message is part of a thread, ignoring");
            return Ok(None);
        }

        let subject = headers
            .get_first_value("Subject")
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        log::debug!("received email with subject: {}", subject);

        if is_reply_subject(&subject) {
            log::debug!("reply subject, ignoring: {}", subject);
            return Ok(None);
        }

        let identity = resolve_identity(headers, &subject);
        let (Some(tree), Some(version)) = (identity.tree, identity.version) else {
            log::debug!("no job identity in: {}", subject);
            return Ok(None);
        };
        if identity.patches.is_empty() {
            log::warn!("no patch count for {} {} in: {}", tree, version, subject);
            return Ok(None);
        }

        let message_id = headers
            .get_first_value("Message-ID")
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(ParseError::MissingHeader {
                header: "Message-ID",
            })?;

        let created_on = parse_message_date(headers.get_first_value("Date"))?;
        let (from_name, from_address) = parse_sender(headers.get_first_value("From"))?;

        let deadline = headers
            .get_first_value(headers::DEADLINE_HEADER)
            .and_then(|raw| parse_deadline(&raw))
            .unwrap_or_else(|| {
                log::warn!(
                    "no deadline available for {}, defaulting to +{} hours",
                    message_id,
                    self.default_horizon.num_hours()
                );
                created_on + self.default_horizon
            });

        log::info!("new valid email found: {}", subject);

        Ok(Some(NewReportRequest {
            tree,
            version,
            branch: identity.branch,
            patches: identity.patches,
            subject,
            message_id,
            to_addrs: split_recipients(headers.get_first_value("To")),
            cc_addrs: split_recipients(headers.get_first_value("Cc")),
            from_name,
            from_address,
            created_on,
            deadline,
        }))
    }
}

/// Split a recipients header on commas, trimming each entry.
fn split_recipients(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|addr| addr.trim().to_string())
                .filter(|addr| !addr.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_message_date(raw: Option<String>) -> Result<DateTime<Utc>, ParseError> {
    let raw = raw
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .ok_or(ParseError::MissingHeader { header: "Date" })?;

    dateparser::parse(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| ParseError::InvalidDate {
            raw,
            error: err.to_string(),
        })
}

/// Split a `From` header into display name and address.
fn parse_sender(raw: Option<String>) -> Result<(Option<String>, String), ParseError> {
    let raw = raw.unwrap_or_default();
    let addrs = mailparse::addrparse(&raw).map_err(|_| ParseError::MissingSender { raw: raw.clone() })?;

    match addrs.iter().next() {
        Some(mailparse::MailAddr::Single(info)) if !info.addr.is_empty() => Ok((
            info.display_name
                .as_ref()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            info.addr.clone(),
        )),
        _ => Err(ParseError::MissingSender { raw }),
    }
}
