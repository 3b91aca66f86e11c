//! Shared fixture: an in-memory SQLite database with the Tether schema and
//! a small catalog.
//!
//! Catalog layout:
//!
//! - projects 1 (`web-app`) and 2 (`api`)
//! - agents a1, a2 active; a3 inactive; x1 -> x2 -> x3 -> x1 critical cycle
//! - rules r1, r2 active; r3 inactive
//! - hooks h1 enabled; h2 disabled
//! - a1 -> r1 critical, r2 -> hook h9 (nonexistent) critical,
//!   a2 -> r3 (inactive) non-critical
//! - a1's prompt mentions "style-guide", the name of r2

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use tether_resources::{apply_schema, load_catalog, Catalog, ServiceContext, TetherConfig};
use tether_storage::{GatewayExt, Row, RunResult, SqliteGateway, Statement, StatementGateway, StorageError};

pub const CATALOG: &str = r#"{
  "projects": [
    { "id": 1, "name": "web-app" },
    { "id": 2, "name": "api" }
  ],
  "agents": [
    { "id": "a1", "name": "reviewer", "category": "development",
      "system_prompt": "Review every change line by line and apply the style-guide rule." },
    { "id": "a2", "name": "planner", "system_prompt": "Break work into small steps." },
    { "id": "a3", "name": "ghost", "system_prompt": "Retired.", "is_active": false },
    { "id": "x1", "name": "cycle-one" },
    { "id": "x2", "name": "cycle-two" },
    { "id": "x3", "name": "cycle-three" }
  ],
  "rules": [
    { "id": "r1", "name": "test-first", "content": "Always write a failing test before the fix." },
    { "id": "r2", "name": "style-guide", "content": "Use rustfmt defaults for all code." },
    { "id": "r3", "name": "legacy", "content": "Never touch this.", "is_active": false }
  ],
  "hooks": [
    { "id": "h1", "name": "format", "hook_type": "PostToolUse", "command": "cargo fmt --all" },
    { "id": "h2", "name": "disabled-hook", "hook_type": "Stop", "command": "true", "is_enabled": false }
  ],
  "dependencies": [
    { "source_type": "agent", "source_id": "a1", "target_type": "rule", "target_id": "r1", "is_critical": true },
    { "source_type": "rule", "source_id": "r2", "target_type": "hook", "target_id": "h9", "is_critical": true },
    { "source_type": "agent", "source_id": "a2", "target_type": "rule", "target_id": "r3" },
    { "source_type": "agent", "source_id": "x1", "target_type": "agent", "target_id": "x2", "is_critical": true },
    { "source_type": "agent", "source_id": "x2", "target_type": "agent", "target_id": "x3", "is_critical": true },
    { "source_type": "agent", "source_id": "x3", "target_type": "agent", "target_id": "x1", "is_critical": true }
  ]
}"#;

pub struct Fixture {
    pub db: Arc<SqliteGateway>,
    pub ctx: Arc<ServiceContext>,
}

pub async fn seeded_db() -> Arc<SqliteGateway> {
    let db = Arc::new(SqliteGateway::open_in_memory().expect("open sqlite"));
    apply_schema(db.as_ref()).await.expect("apply schema");
    let catalog = Catalog::from_json_str(CATALOG).expect("parse catalog");
    load_catalog(db.as_ref(), &catalog).await.expect("load catalog");
    db
}

pub async fn setup() -> Fixture {
    let db = seeded_db().await;
    let ctx = ServiceContext::new(db.clone(), TetherConfig::default());
    Fixture { db, ctx }
}

/// A context over `gateway`, which should wrap a seeded database.
pub fn context_over(gateway: Arc<dyn StatementGateway>) -> Arc<ServiceContext> {
    ServiceContext::new(gateway, TetherConfig::default())
}

pub async fn count(db: &SqliteGateway, query: &str) -> i64 {
    db.prepare(query)
        .first()
        .await
        .expect("count query")
        .and_then(|row| row.values().next().and_then(|v| v.as_i64()))
        .expect("count value")
}

pub async fn assignment_count(db: &SqliteGateway) -> i64 {
    count(db, "SELECT COUNT(*) AS n FROM resource_assignments").await
}

/// Delegates to a real gateway, but fails `run()` for statements whose
/// text starts with `prefix`, or contains any of the extra patterns.
pub struct FailingRuns {
    pub inner: Arc<SqliteGateway>,
    pub prefix: &'static str,
    pub error: StorageError,
    pub also: Vec<(&'static str, StorageError)>,
}

impl FailingRuns {
    pub fn new(inner: Arc<SqliteGateway>, prefix: &'static str, error: StorageError) -> Self {
        FailingRuns {
            inner,
            prefix,
            error,
            also: Vec::new(),
        }
    }

    /// Also fail statements containing `pattern`.
    pub fn and(mut self, pattern: &'static str, error: StorageError) -> Self {
        self.also.push((pattern, error));
        self
    }
}

#[async_trait]
impl StatementGateway for FailingRuns {
    async fn run(&self, statement: &Statement) -> Result<RunResult, StorageError> {
        if statement.query.trim_start().starts_with(self.prefix) {
            return Err(self.error.clone());
        }
        if let Some((_, err)) = self.also.iter().find(|(p, _)| statement.query.contains(p)) {
            return Err(err.clone());
        }
        self.inner.run(statement).await
    }

    async fn first(&self, statement: &Statement) -> Result<Option<Row>, StorageError> {
        self.inner.first(statement).await
    }

    async fn all(&self, statement: &Statement) -> Result<Vec<Row>, StorageError> {
        self.inner.all(statement).await
    }
}
