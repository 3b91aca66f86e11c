//! Best-effort undo statements derived from executed statement text.
//!
//! Only plain inserts can be reversed: the gateway reports the inserted row
//! id and the row is deleted again by `rowid`. Updates, deletes and
//! replacing inserts have no before-image, so they produce a warning. Callers
//! that can name an exact undo use `TrackedGateway::run_with_undo` instead.

use std::sync::LazyLock;

use regex::Regex;
use tether_storage::{RunResult, Statement};

use super::tracked::RollbackOperation;

static INSERT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*INSERT\s+(?:OR\s+(ABORT|FAIL|IGNORE|ROLLBACK|REPLACE)\s+)?INTO\s+[`"\[]?([A-Za-z_][A-Za-z0-9_]*)"#)
        .unwrap()
});
static REPLACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*REPLACE\s+INTO\s+[`"\[]?([A-Za-z_][A-Za-z0-9_]*)"#).unwrap()
});
static UPDATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*UPDATE\s+(?:OR\s+[A-Za-z]+\s+)?[`"\[]?([A-Za-z_][A-Za-z0-9_]*)"#).unwrap()
});
static DELETE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*DELETE\s+FROM\s+[`"\[]?([A-Za-z_][A-Za-z0-9_]*)"#).unwrap()
});

/// Derive the rollback entry for a successful `run()`, if any.
pub(crate) fn synthesize_rollback(
    statement: &Statement,
    result: &RunResult,
) -> Option<RollbackOperation> {
    let query = statement.query.as_str();

    if let Some(caps) = INSERT_RE.captures(query) {
        let table = caps.get(2)?.as_str();
        let replacing = caps
            .get(1)
            .is_some_and(|c| c.as_str().eq_ignore_ascii_case("REPLACE"));
        if replacing {
            return Some(replace_warning(table, query));
        }
        if result.meta.changes == 0 {
            return None;
        }
        let Some(row_id) = result.meta.last_row_id else {
            tracing::debug!(
                target: "tether::transaction",
                table,
                "insert reported no row id; no rollback synthesized"
            );
            return None;
        };
        return Some(RollbackOperation::Delete {
            table: table.to_string(),
            row_id,
            statement: Statement::prepare(format!("DELETE FROM {table} WHERE rowid = ?"))
                .bind([row_id]),
        });
    }

    if let Some(caps) = REPLACE_RE.captures(query) {
        return Some(replace_warning(caps.get(1)?.as_str(), query));
    }

    if let Some(caps) = UPDATE_RE.captures(query) {
        let table = caps.get(1)?.as_str();
        return Some(RollbackOperation::Warning {
            description: format!("UPDATE on {table} cannot be automatically rolled back"),
            recommendation: Some(format!(
                "Verify {table} manually or register an undo statement with run_with_undo"
            )),
            query: query.to_string(),
        });
    }

    if let Some(caps) = DELETE_RE.captures(query) {
        let table = caps.get(1)?.as_str();
        return Some(RollbackOperation::Warning {
            description: format!("DELETE on {table} cannot be automatically rolled back"),
            recommendation: Some(format!(
                "Deleted rows of {table} must be restored from a backup or re-created"
            )),
            query: query.to_string(),
        });
    }

    None
}

fn replace_warning(table: &str, query: &str) -> RollbackOperation {
    RollbackOperation::Warning {
        description: format!("REPLACE on {table} may have overwritten an existing row"),
        recommendation: Some(format!("Verify {table} manually")),
        query: query.to_string(),
    }
}
