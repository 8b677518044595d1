use chrono::{Duration, TimeZone, Utc};
use kernelci_reports::store::{PgReportStore, ReportStore};
use kernelci_reports::test_support::{TestDatabase, new_report_request};

async fn database() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(err) => {
            eprintln!("skipping Postgres store test: {}", err);
            None
        }
    }
}

#[tokio::test]
async fn insert_list_update_delete() {
    let Some(db) = database().await else {
        return;
    };
    let store = PgReportStore::new(db.pool_clone());
    let created_on = Utc.with_ymd_and_hms(2016, 11, 1, 10, 0, 0).unwrap();

    let newer = new_report_request("<newer@example.org>", created_on + Duration::hours(1));
    let older = new_report_request("<older@example.org>", created_on);

    let newer_id = store.insert_if_absent(&newer).await.unwrap().unwrap();
    let older_id = store.insert_if_absent(&older).await.unwrap().unwrap();

    let pending = store.list_pending().await.unwrap();
    let ids: Vec<i64> = pending.iter().map(|request| request.id).collect();
    assert_eq!(ids, vec![older_id, newer_id]);
    assert_eq!(pending[0].patches, vec!["70", "71"]);
    assert_eq!(pending[0].cc_addrs, vec!["stable@vger.kernel.org"]);
    assert_eq!(pending[0].created_on, created_on);
    assert_eq!(pending[0].retries, 0);

    store.increment_retries(older_id).await.unwrap();
    store.increment_retries(older_id).await.unwrap();
    let older_row = store.get(older_id).await.unwrap().unwrap();
    assert_eq!(older_row.retries, 2);
    assert_eq!(older_row.from_name.as_deref(), Some("Greg KH"));

    assert!(store.delete(older_id).await.unwrap());
    assert!(!store.delete(older_id).await.unwrap());
    assert!(store.get(older_id).await.unwrap().is_none());

    db.close().await.unwrap();
}

#[tokio::test]
async fn duplicate_message_and_subject_is_dropped() {
    let Some(db) = database().await else {
        return;
    };
    let store = PgReportStore::new(db.pool_clone());
    let created_on = Utc.with_ymd_and_hms(2016, 11, 1, 10, 0, 0).unwrap();

    let request = new_report_request("<dup@example.org>", created_on);
    assert!(store.insert_if_absent(&request).await.unwrap().is_some());
    assert!(store.insert_if_absent(&request).await.unwrap().is_none());

    // same message id, different subject is a different request
    let mut other = request.clone();
    other.subject = "[PATCH 4.8 000/35] 4.8.6-stable review".to_string();
    assert!(store.insert_if_absent(&other).await.unwrap().is_some());

    assert_eq!(store.list_pending().await.unwrap().len(), 2);

    db.close().await.unwrap();
}
