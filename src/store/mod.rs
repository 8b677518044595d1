//! Persistence of report requests.
//!
//! The store is the single source of truth across passes. Requests are unique
//! on `(message_id, subject)`; inserting a duplicate is a no-op.

pub mod migration;
pub mod postgres;

pub use migration::run_migrations;
pub use postgres::PgReportStore;

use crate::models::{NewReportRequest, ReportRequest};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Keyed collection of pending report requests.
#[rocket::async_trait]
pub trait ReportStore: Send + Sync {
    /// Insert a request, returning its id, or `None` when a request with the
    /// same `(message_id, subject)` already exists.
    async fn insert_if_absent(&self, request: &NewReportRequest)
    -> Result<Option<i64>, StoreError>;

    /// Every stored request, oldest `created_on` first.
    async fn list_pending(&self) -> Result<Vec<ReportRequest>, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<ReportRequest>, StoreError>;

    async fn increment_retries(&self, id: i64) -> Result<(), StoreError>;

    /// Remove a request, returning whether it existed.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;
}
