//! Schema migrations.
//!
//! Applied on startup before the service starts polling; launch aborts when
//! they fail.

use rocket_db_pools::sqlx::{self, PgPool, migrate::Migrator};

use super::StoreError;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run pending migrations. Already applied migrations are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    log::info!("checking database migration state");
    MIGRATOR.run(pool).await?;
    log::info!("database migrations up to date");
    Ok(())
}
