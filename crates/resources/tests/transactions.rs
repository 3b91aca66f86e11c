//! TransactionManager rollback and retry against SQLite.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tether_resources::{
    RollbackOperation, ServiceError, TransactionManager, TransactionOptions,
};
use tether_storage::{GatewayExt, Statement, StorageError};

use common::{count, seeded_db, FailingRuns};

fn failure(err: ServiceError) -> Box<tether_resources::TransactionError> {
    match err {
        ServiceError::Transaction(t) => t,
        other => panic!("expected transaction error, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_second_insert_leaves_row_count_unchanged() {
    let db = seeded_db().await;
    let tm = TransactionManager::new(db.clone());
    let before = count(&db, "SELECT COUNT(*) AS n FROM projects").await;

    let err = tm
        .execute(|tx| async move {
            tx.prepare("INSERT INTO projects (name) VALUES ('scratch')")
                .run()
                .await?;
            // Duplicate primary key: the second insert fails.
            tx.prepare("INSERT INTO projects (id, name) VALUES (1, 'again')")
                .run()
                .await?;
            Ok(())
        })
        .await
        .unwrap_err();

    let t = failure(err);
    assert!(t.message.contains("constraint"), "{}", t.message);
    assert!(t.rollback.success);
    assert_eq!(t.rollback.operations_rolled_back, 1);
    assert_eq!(count(&db, "SELECT COUNT(*) AS n FROM projects").await, before);
}

#[tokio::test]
async fn update_is_reported_not_reverted() {
    let db = seeded_db().await;
    let tm = TransactionManager::new(db.clone());

    let err = tm
        .execute(|tx| async move {
            tx.prepare("UPDATE projects SET name = 'renamed' WHERE id = 1")
                .run()
                .await?;
            let pending = tx.rollback_operations();
            assert!(matches!(pending.as_slice(), [RollbackOperation::Warning { .. }]));
            Err::<(), _>(ServiceError::System("later step failed".into()))
        })
        .await
        .unwrap_err();

    let t = failure(err);
    assert_eq!(t.rollback.operations_rolled_back, 0);
    assert_eq!(t.rollback.warnings.len(), 1);
    assert!(t.rollback.warnings[0].contains("projects"));

    let renamed = count(
        &db,
        "SELECT COUNT(*) AS n FROM projects WHERE id = 1 AND name = 'renamed'",
    )
    .await;
    assert_eq!(renamed, 1, "the update stays applied");
}

#[tokio::test]
async fn compensating_undo_reverts_update() {
    let db = seeded_db().await;
    let tm = TransactionManager::new(db.clone());

    let _ = tm
        .execute(|tx| async move {
            tx.run_with_undo(
                &Statement::prepare("UPDATE projects SET name = 'renamed' WHERE id = 1"),
                Statement::prepare("UPDATE projects SET name = 'web-app' WHERE id = 1"),
                "restore project name",
            )
            .await?;
            Err::<(), _>(ServiceError::System("later step failed".into()))
        })
        .await;

    let original = count(
        &db,
        "SELECT COUNT(*) AS n FROM projects WHERE id = 1 AND name = 'web-app'",
    )
    .await;
    assert_eq!(original, 1);
}

#[tokio::test]
async fn locked_database_is_retried_until_max_retries() {
    let db = seeded_db().await;
    let locked = Arc::new(FailingRuns::new(
        db.clone(),
        "INSERT",
        StorageError::Busy("database is locked".into()),
    ));
    let tm = TransactionManager::new(locked);
    let attempts = AtomicUsize::new(0);
    let ids = std::sync::Mutex::new(Vec::new());

    let options = TransactionOptions {
        max_retries: 2,
        ..Default::default()
    };
    let err = tm
        .execute_transaction(options, |tx| {
            attempts.fetch_add(1, Ordering::SeqCst);
            ids.lock().unwrap().push(tx.transaction_id());
            async move {
                tx.prepare("INSERT INTO projects (name) VALUES ('x')")
                    .run()
                    .await?;
                Ok(())
            }
        })
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let t = failure(err);
    assert_eq!(t.retry_count, 2);
    assert!(t.message.contains("database is locked"));

    let mut ids = ids.into_inner().unwrap();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3, "every attempt has its own id");
}

#[tokio::test]
async fn timed_out_work_is_rolled_back() {
    let db = seeded_db().await;
    let tm = TransactionManager::new(db.clone());
    let before = count(&db, "SELECT COUNT(*) AS n FROM projects").await;

    let options = TransactionOptions {
        timeout: Duration::from_millis(25),
        max_retries: 0,
        ..Default::default()
    };
    let err = tm
        .execute_transaction(options, |tx| async move {
            tx.prepare("INSERT INTO projects (name) VALUES ('slow')")
                .run()
                .await?;
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();

    let t = failure(err);
    assert_eq!(t.message, "system error: transaction timeout after 25ms");
    assert_eq!(t.retry_count, 0);
    assert_eq!(count(&db, "SELECT COUNT(*) AS n FROM projects").await, before);
    assert!(tm.active_transactions().is_empty());
}

#[tokio::test]
async fn timeout_counts_as_retryable() {
    let db = seeded_db().await;
    let tm = TransactionManager::new(db.clone());
    let attempts = AtomicUsize::new(0);

    let options = TransactionOptions {
        timeout: Duration::from_millis(10),
        max_retries: 1,
        ..Default::default()
    };
    let err = tm
        .execute_transaction(options, |_tx| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), ServiceError>(())
            }
        })
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(failure(err).retry_count, 1);
}
