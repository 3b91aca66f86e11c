use std::future::Future;

use super::{fresh, insert_item, TestResult};
use crate::traits::GatewayExt;
use crate::StatementGateway;

pub(super) async fn run_query_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "query",
            "first_on_empty_is_none",
            first_on_empty_is_none(factory).await,
        ),
        TestResult::from_result(
            "query",
            "first_returns_first_ordered_row",
            first_returns_first_ordered_row(factory).await,
        ),
        TestResult::from_result(
            "query",
            "all_returns_every_row",
            all_returns_every_row(factory).await,
        ),
        TestResult::from_result(
            "query",
            "null_and_bool_params_bind",
            null_and_bool_params_bind(factory).await,
        ),
    ]
}

async fn first_on_empty_is_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = fresh(factory).await?;
    let row = gw
        .prepare("SELECT * FROM conformance_items WHERE name = ?")
        .bind(["nobody"])
        .first()
        .await
        .map_err(|e| format!("first: {e}"))?;
    match row {
        None => Ok(()),
        Some(r) => Err(format!("expected None, got {r:?}")),
    }
}

async fn first_returns_first_ordered_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = fresh(factory).await?;
    insert_item(&gw, "low", 1).await?;
    insert_item(&gw, "high", 9).await?;
    let row = gw
        .prepare("SELECT name, score FROM conformance_items ORDER BY score DESC")
        .first()
        .await
        .map_err(|e| format!("first: {e}"))?
        .ok_or_else(|| "expected a row".to_string())?;
    if row.get("name").and_then(|v| v.as_str()) != Some("high") {
        return Err(format!("expected 'high' first, got {row:?}"));
    }
    if row.get("score").and_then(|v| v.as_i64()) != Some(9) {
        return Err(format!("expected integer score 9, got {row:?}"));
    }
    Ok(())
}

async fn all_returns_every_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = fresh(factory).await?;
    let empty = gw
        .prepare("SELECT * FROM conformance_items")
        .all()
        .await
        .map_err(|e| format!("all on empty: {e}"))?;
    if !empty.is_empty() {
        return Err(format!("expected no rows, got {}", empty.len()));
    }

    for i in 0..5 {
        insert_item(&gw, &format!("item-{i}"), i).await?;
    }
    let rows = gw
        .prepare("SELECT name FROM conformance_items ORDER BY id")
        .all()
        .await
        .map_err(|e| format!("all: {e}"))?;
    let names: Vec<&str> = rows
        .iter()
        .filter_map(|r| r.get("name").and_then(|v| v.as_str()))
        .collect();
    let expected = ["item-0", "item-1", "item-2", "item-3", "item-4"];
    if names != expected {
        return Err(format!("expected {expected:?}, got {names:?}"));
    }
    Ok(())
}

async fn null_and_bool_params_bind<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = fresh(factory).await?;
    gw.prepare("INSERT INTO conformance_items (name, score, note) VALUES (?, ?, ?)")
        .bind([
            serde_json::json!("flagged"),
            serde_json::json!(true),
            serde_json::Value::Null,
        ])
        .run()
        .await
        .map_err(|e| format!("insert: {e}"))?;
    let row = gw
        .prepare("SELECT score, note FROM conformance_items WHERE name = ?")
        .bind(["flagged"])
        .first()
        .await
        .map_err(|e| format!("first: {e}"))?
        .ok_or_else(|| "expected a row".to_string())?;
    if row.get("score").and_then(|v| v.as_i64()) != Some(1) {
        return Err(format!("true must bind as 1, got {row:?}"));
    }
    if !row.get("note").is_some_and(|v| v.is_null()) {
        return Err(format!("null must round-trip as null, got {row:?}"));
    }
    Ok(())
}
