use rocket_db_pools::{Database, sqlx};

/// Pool configured under `databases.reports_db`.
#[derive(Database)]
#[database("reports_db")]
pub struct ReportsDb(sqlx::PgPool);
