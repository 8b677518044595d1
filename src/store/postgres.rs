use super::{ReportStore, StoreError};
use crate::models::{NewReportRequest, ReportRequest};
use rocket_db_pools::sqlx::{self, PgPool};

const SELECT_COLUMNS: &str = "id, tree, version, branch, patches, subject, message_id, \
     to_addrs, cc_addrs, from_name, from_address, created_on, deadline, retries";

/// Postgres-backed [`ReportStore`] over the `report_requests` table.
#[derive(Clone)]
pub struct PgReportStore {
    pool: PgPool,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[rocket::async_trait]
impl ReportStore for PgReportStore {
    async fn insert_if_absent(
        &self,
        request: &NewReportRequest,
    ) -> Result<Option<i64>, StoreError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"INSERT INTO report_requests
                (tree, version, branch, patches, subject, message_id, to_addrs, cc_addrs,
                 from_name, from_address, created_on, deadline)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
               ON CONFLICT (message_id, subject) DO NOTHING
               RETURNING id"#,
        )
        .bind(&request.tree)
        .bind(&request.version)
        .bind(&request.branch)
        .bind(&request.patches)
        .bind(&request.subject)
        .bind(&request.message_id)
        .bind(&request.to_addrs)
        .bind(&request.cc_addrs)
        .bind(&request.from_name)
        .bind(&request.from_address)
        .bind(request.created_on)
        .bind(request.deadline)
        .fetch_optional(&self.pool)
        .await?;

        if id.is_none() {
            log::warn!(
                "duplicate report request for message {} ({})",
                request.message_id,
                request.subject
            );
        }

        Ok(id)
    }

    async fn list_pending(&self) -> Result<Vec<ReportRequest>, StoreError> {
        let query = format!(
            "SELECT {} FROM report_requests ORDER BY created_on ASC, id ASC",
            SELECT_COLUMNS
        );
        let requests = sqlx::query_as::<_, ReportRequest>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(requests)
    }

    async fn get(&self, id: i64) -> Result<Option<ReportRequest>, StoreError> {
        let query = format!("SELECT {} FROM report_requests WHERE id = $1", SELECT_COLUMNS);
        let request = sqlx::query_as::<_, ReportRequest>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(request)
    }

    async fn increment_retries(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE report_requests SET retries = retries + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM report_requests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
