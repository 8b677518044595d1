use kernelci_reports::store::run_migrations;
use kernelci_reports::test_support::TestDatabase;
use sqlx::PgPool;
use sqlx::migrate::Migrator;

static TEST_MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn report_table_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'public' AND table_name = 'report_requests'",
    )
    .fetch_one(pool)
    .await
    .expect("lookup succeeded")
}

#[tokio::test]
async fn migrations_apply_and_revert_cleanly() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping migration revert test: {err}");
            return;
        }
    };

    let pool = test_db.pool_clone();

    // already applied during provisioning
    run_migrations(&pool).await.expect("migrations are idempotent");
    assert_eq!(report_table_count(&pool).await, 1);

    TEST_MIGRATOR
        .undo(&pool, 0)
        .await
        .expect("migrations revert");
    assert_eq!(
        report_table_count(&pool).await,
        0,
        "report_requests should be dropped after revert"
    );

    run_migrations(&pool).await.expect("migrations rerun");
    assert_eq!(report_table_count(&pool).await, 1);

    test_db.close().await.expect("failed to drop test database");
}
