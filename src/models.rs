use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::FromRow;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ===== Report Request Models =====

/// A report request extracted from one announcement email, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NewReportRequest {
    pub tree: String,
    pub version: String,
    pub branch: Option<String>,
    pub patches: Vec<String>,
    pub subject: String,
    pub message_id: String,
    pub to_addrs: Vec<String>,
    pub cc_addrs: Vec<String>,
    pub from_name: Option<String>,
    pub from_address: String,
    pub created_on: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// A persisted report request waiting for a matching backend result.
///
/// Unique on `(message_id, subject)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct ReportRequest {
    pub id: i64,
    pub tree: String,
    pub version: String,
    pub branch: Option<String>,
    pub patches: Vec<String>,
    pub subject: String,
    pub message_id: String,
    pub to_addrs: Vec<String>,
    pub cc_addrs: Vec<String>,
    pub from_name: Option<String>,
    pub from_address: String,
    pub created_on: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub retries: i32,
}

impl ReportRequest {
    /// Attach a store-assigned identifier to a freshly extracted request.
    pub fn from_new(id: i64, new: NewReportRequest) -> Self {
        Self {
            id,
            tree: new.tree,
            version: new.version,
            branch: new.branch,
            patches: new.patches,
            subject: new.subject,
            message_id: new.message_id,
            to_addrs: new.to_addrs,
            cc_addrs: new.cc_addrs,
            from_name: new.from_name,
            from_address: new.from_address,
            created_on: new.created_on,
            deadline: new.deadline,
            retries: 0,
        }
    }

    /// Requester mailbox formatted for the report recipients list.
    pub fn requester(&self) -> String {
        match self.from_name.as_deref().filter(|name| !name.is_empty()) {
            Some(name) => format!("{} <{}>", name, self.from_address),
            None => self.from_address.clone(),
        }
    }
}

// ===== API Response Models =====

/// Generic data envelope for list responses.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DataResponse<T> {
    pub data: T,
}

/// Plain acknowledgement message.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MessageResponse {
    pub message: String,
}

// ===== Summary Models =====

/// Counters for one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IngestSummary {
    pub messages: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub ignored: usize,
    pub source_errors: usize,
}

/// Counters for one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DispatchSummary {
    pub examined: usize,
    pub sent: usize,
    pub discarded: usize,
    pub waiting: usize,
    pub deferred: usize,
    /// True when the pass stopped early on cancellation or a connectivity failure.
    pub aborted: bool,
}
