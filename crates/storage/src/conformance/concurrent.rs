use std::future::Future;
use std::sync::Arc;

use super::{count_items, fresh, insert_item, TestResult};
use crate::traits::GatewayExt;
use crate::{StatementGateway, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: StatementGateway + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "concurrent_distinct_inserts_all_succeed",
            concurrent_distinct_inserts_all_succeed(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_duplicate_inserts_exactly_one_wins",
            concurrent_duplicate_inserts_exactly_one_wins(factory).await,
        ),
    ]
}

// ── Distinct inserts: all succeed ────────────────────────────────────────────

/// N tasks each insert a different row. No false constraint failures when
/// there is no contention.
async fn concurrent_distinct_inserts_all_succeed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StatementGateway + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = Arc::new(fresh(factory).await?);

    let mut handles = Vec::new();
    for i in 0..N {
        let g = gw.clone();
        handles.push(tokio::spawn(async move {
            insert_item(g.as_ref(), &format!("row-{i}"), i as i64).await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .map_err(|e| format!("task {i} panic: {e}"))??;
    }

    let n = count_items(gw.as_ref()).await?;
    if n != N as i64 {
        return Err(format!("expected {N} rows, got {n}"));
    }
    Ok(())
}

// ── Duplicate inserts: exactly one wins ──────────────────────────────────────

/// N tasks race to insert the same UNIQUE name. Exactly one succeeds; the
/// rest must get ConstraintViolation. This is what closes the
/// check-then-insert gap in the assignment service.
async fn concurrent_duplicate_inserts_exactly_one_wins<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: StatementGateway + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = Arc::new(fresh(factory).await?);

    let mut handles = Vec::new();
    for i in 0..N {
        let g = gw.clone();
        handles.push(tokio::spawn(async move {
            let result = g
                .prepare("INSERT INTO conformance_items (name, score) VALUES (?, ?)")
                .bind([serde_json::json!("contended"), serde_json::json!(i as i64)])
                .run()
                .await;
            match result {
                Ok(_) => Ok(true),
                Err(StorageError::ConstraintViolation(_)) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }
    Ok(())
}
