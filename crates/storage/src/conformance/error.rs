use std::future::Future;

use super::{count_items, fresh, insert_item, TestResult};
use crate::traits::GatewayExt;
use crate::{StatementGateway, StorageError};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "error",
            "unique_violation_is_constraint_error",
            unique_violation_is_constraint_error(factory).await,
        ),
        TestResult::from_result(
            "error",
            "failed_insert_leaves_no_row",
            failed_insert_leaves_no_row(factory).await,
        ),
        TestResult::from_result(
            "error",
            "malformed_statement_is_an_error",
            malformed_statement_is_an_error(factory).await,
        ),
        TestResult::from_result(
            "error",
            "unknown_table_is_an_error",
            unknown_table_is_an_error(factory).await,
        ),
    ]
}

// ── 1. UNIQUE violation maps to ConstraintViolation ──────────────────────────

/// Services translate this variant into a conflict, so backends must not
/// report it as a generic backend error.
async fn unique_violation_is_constraint_error<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = fresh(factory).await?;
    insert_item(&gw, "dup", 1).await?;
    let result = gw
        .prepare("INSERT INTO conformance_items (name, score) VALUES (?, ?)")
        .bind([serde_json::json!("dup"), serde_json::json!(2)])
        .run()
        .await;
    match result {
        Err(StorageError::ConstraintViolation(_)) => Ok(()),
        other => Err(format!("expected ConstraintViolation, got {:?}", other)),
    }
}

// ── 2. A rejected insert changes nothing ─────────────────────────────────────

async fn failed_insert_leaves_no_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = fresh(factory).await?;
    insert_item(&gw, "one", 1).await?;
    let _ = gw
        .prepare("INSERT INTO conformance_items (name) VALUES (NULL)")
        .run()
        .await;
    let n = count_items(&gw).await?;
    if n != 1 {
        return Err(format!("expected 1 row after rejected insert, got {n}"));
    }
    Ok(())
}

// ── 3. Malformed SQL ─────────────────────────────────────────────────────────

async fn malformed_statement_is_an_error<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = fresh(factory).await?;
    match gw.prepare("SELEC FROM WHERE").all().await {
        Err(StorageError::InvalidStatement(_)) | Err(StorageError::Backend(_)) => Ok(()),
        other => Err(format!(
            "expected InvalidStatement or Backend, got {:?}",
            other
        )),
    }
}

// ── 4. Unknown table ─────────────────────────────────────────────────────────

async fn unknown_table_is_an_error<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = factory().await;
    match gw.prepare("SELECT * FROM no_such_table").first().await {
        Err(StorageError::ConstraintViolation(msg)) => Err(format!(
            "unknown table must not be a constraint violation: {msg}"
        )),
        Err(_) => Ok(()),
        Ok(row) => Err(format!("expected an error, got {:?}", row)),
    }
}
