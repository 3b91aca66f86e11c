//! SQLite-backed [`StatementGateway`].
//!
//! A single `rusqlite::Connection` guarded by a mutex. Each call locks the
//! connection, executes one statement and releases it, so concurrent units
//! of work interleave at statement granularity, which is exactly the
//! contract the transaction manager is written against.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};

use crate::error::StorageError;
use crate::statement::{Row, RunResult, Statement};
use crate::traits::StatementGateway;

/// How long SQLite waits on a locked database before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

pub struct SqliteGateway {
    conn: Mutex<Connection>,
}

impl SqliteGateway {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(map_error)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database. Used heavily by tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(map_error)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(map_error)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(map_error)?;
        Ok(SqliteGateway {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Backend("sqlite connection mutex poisoned".to_string()))
    }

    fn query_rows(&self, statement: &Statement, limit: Option<usize>) -> Result<Vec<Row>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&statement.query).map_err(map_error)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let mut rows = stmt
            .query(params_from_iter(to_sql_values(&statement.params)))
            .map_err(map_error)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_error)? {
            let mut record = Row::new();
            for (idx, name) in columns.iter().enumerate() {
                let value = row.get_ref(idx).map_err(map_error)?;
                record.insert(name.clone(), from_sql_value(value));
            }
            out.push(record);
            if limit.is_some_and(|l| out.len() >= l) {
                break;
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl StatementGateway for SqliteGateway {
    async fn run(&self, statement: &Statement) -> Result<RunResult, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&statement.query).map_err(map_error)?;
        let changes = stmt
            .execute(params_from_iter(to_sql_values(&statement.params)))
            .map_err(map_error)?;
        let last_row_id = if changes > 0 && is_insert(&statement.query) {
            Some(conn.last_insert_rowid())
        } else {
            None
        };
        Ok(RunResult::new(last_row_id, changes as u64))
    }

    async fn first(&self, statement: &Statement) -> Result<Option<Row>, StorageError> {
        Ok(self.query_rows(statement, Some(1))?.into_iter().next())
    }

    async fn all(&self, statement: &Statement) -> Result<Vec<Row>, StorageError> {
        self.query_rows(statement, None)
    }
}

fn is_insert(query: &str) -> bool {
    let head = query.trim_start();
    ["INSERT", "REPLACE"].iter().any(|kw| {
        head.get(..kw.len())
            .is_some_and(|h| h.eq_ignore_ascii_case(kw))
    })
}

fn to_sql_values(params: &[serde_json::Value]) -> Vec<SqlValue> {
    params
        .iter()
        .map(|p| match p {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        })
        .collect()
}

fn from_sql_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::Array(b.iter().map(|x| (*x).into()).collect()),
    }
}

fn map_error(e: rusqlite::Error) -> StorageError {
    match &e {
        rusqlite::Error::SqliteFailure(err, msg) => {
            let detail = msg.clone().unwrap_or_else(|| err.to_string());
            match err.code {
                ErrorCode::ConstraintViolation => StorageError::ConstraintViolation(detail),
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StorageError::Busy(detail),
                ErrorCode::Unknown => StorageError::InvalidStatement(detail),
                _ => StorageError::Backend(detail),
            }
        }
        rusqlite::Error::InvalidParameterCount(..)
        | rusqlite::Error::ExecuteReturnedResults
        | rusqlite::Error::InvalidColumnIndex(_)
        | rusqlite::Error::MultipleStatement => StorageError::InvalidStatement(e.to_string()),
        _ => StorageError::Backend(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::GatewayExt;

    fn gateway() -> SqliteGateway {
        let gw = SqliteGateway::open_in_memory().unwrap();
        gw.lock()
            .unwrap()
            .execute_batch(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE, flag INTEGER, meta TEXT);",
            )
            .unwrap();
        gw
    }

    #[tokio::test]
    async fn insert_reports_row_id_and_changes() {
        let gw = gateway();
        let res = gw
            .prepare("INSERT INTO items (name, flag) VALUES (?, ?)")
            .bind([serde_json::json!("a"), serde_json::json!(true)])
            .run()
            .await
            .unwrap();
        assert!(res.success);
        assert_eq!(res.meta.changes, 1);
        assert_eq!(res.meta.last_row_id, Some(1));
    }

    #[tokio::test]
    async fn update_does_not_report_row_id() {
        let gw = gateway();
        gw.prepare("INSERT INTO items (name) VALUES ('a')")
            .run()
            .await
            .unwrap();
        let res = gw
            .prepare("UPDATE items SET flag = 1")
            .run()
            .await
            .unwrap();
        assert_eq!(res.meta.last_row_id, None);
        assert_eq!(res.meta.changes, 1);
    }

    #[tokio::test]
    async fn rows_come_back_as_json_maps() {
        let gw = gateway();
        gw.prepare("INSERT INTO items (name, flag, meta) VALUES (?, ?, ?)")
            .bind([
                serde_json::json!("a"),
                serde_json::json!(false),
                serde_json::json!({"k": 1}),
            ])
            .run()
            .await
            .unwrap();

        let row = gw
            .prepare("SELECT id, name, flag, meta FROM items WHERE name = ?")
            .bind(["a"])
            .first()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["id"], 1);
        assert_eq!(row["name"], "a");
        assert_eq!(row["flag"], 0);
        assert_eq!(row["meta"], "{\"k\":1}");
    }

    #[tokio::test]
    async fn unique_violation_maps_to_constraint_error() {
        let gw = gateway();
        let insert = "INSERT INTO items (name) VALUES ('dup')";
        gw.prepare(insert).run().await.unwrap();
        let err = gw.prepare(insert).run().await.unwrap_err();
        assert!(err.is_constraint_violation(), "got {err:?}");
    }

    #[tokio::test]
    async fn syntax_error_is_invalid_statement() {
        let gw = gateway();
        let err = gw.prepare("SELEC nonsense").all().await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidStatement(_)), "got {err:?}");
    }
}
