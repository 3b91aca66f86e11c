use std::future::Future;

use super::{count_items, fresh, insert_item, TestResult};
use crate::traits::GatewayExt;
use crate::StatementGateway;

pub(super) async fn run_run_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "run",
            "insert_reports_last_row_id",
            insert_reports_last_row_id(factory).await,
        ),
        TestResult::from_result(
            "run",
            "update_reports_changes",
            update_reports_changes(factory).await,
        ),
        TestResult::from_result(
            "run",
            "delete_by_rowid_removes_row",
            delete_by_rowid_removes_row(factory).await,
        ),
        TestResult::from_result(
            "run",
            "no_match_reports_zero_changes",
            no_match_reports_zero_changes(factory).await,
        ),
    ]
}

// ── Insert reports row id ────────────────────────────────────────────────────

/// Rollback synthesis depends on `last_row_id` for inserts.
async fn insert_reports_last_row_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = fresh(factory).await?;
    let first = insert_item(&gw, "alpha", 1).await?;
    let second = insert_item(&gw, "beta", 2).await?;

    if !first.success || !second.success {
        return Err("insert did not report success".to_string());
    }
    let (Some(a), Some(b)) = (first.meta.last_row_id, second.meta.last_row_id) else {
        return Err(format!(
            "expected row ids, got {:?} and {:?}",
            first.meta.last_row_id, second.meta.last_row_id
        ));
    };
    if a == b {
        return Err(format!("row ids must differ, both were {a}"));
    }
    if first.meta.changes != 1 {
        return Err(format!("expected 1 change, got {}", first.meta.changes));
    }
    Ok(())
}

// ── Update reports change count ──────────────────────────────────────────────

async fn update_reports_changes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = fresh(factory).await?;
    for (name, score) in [("a", 1), ("b", 1), ("c", 2)] {
        insert_item(&gw, name, score).await?;
    }
    let res = gw
        .prepare("UPDATE conformance_items SET note = ? WHERE score = ?")
        .bind([serde_json::json!("touched"), serde_json::json!(1)])
        .run()
        .await
        .map_err(|e| format!("update: {e}"))?;
    if res.meta.changes != 2 {
        return Err(format!("expected 2 changes, got {}", res.meta.changes));
    }
    Ok(())
}

// ── Delete by rowid ──────────────────────────────────────────────────────────

/// The exact statement shape the transaction manager synthesizes.
async fn delete_by_rowid_removes_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = fresh(factory).await?;
    insert_item(&gw, "keep", 1).await?;
    let inserted = insert_item(&gw, "drop", 2).await?;
    let row_id = inserted
        .meta
        .last_row_id
        .ok_or_else(|| "insert reported no row id".to_string())?;

    gw.prepare("DELETE FROM conformance_items WHERE rowid = ?")
        .bind([row_id])
        .run()
        .await
        .map_err(|e| format!("delete: {e}"))?;

    let n = count_items(&gw).await?;
    if n != 1 {
        return Err(format!("expected 1 row after delete, got {n}"));
    }
    Ok(())
}

async fn no_match_reports_zero_changes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = fresh(factory).await?;
    let res = gw
        .prepare("DELETE FROM conformance_items WHERE name = ?")
        .bind(["missing"])
        .run()
        .await
        .map_err(|e| format!("delete: {e}"))?;
    if res.meta.changes != 0 {
        return Err(format!("expected 0 changes, got {}", res.meta.changes));
    }
    if res.meta.last_row_id.is_some() {
        return Err("delete must not report a row id".to_string());
    }
    Ok(())
}
