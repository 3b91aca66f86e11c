//! Tables the services read and write.
//!
//! The gateway executes one statement per call, so the schema is a list of
//! statements rather than a script.

use tether_storage::{Statement, StatementGateway};

use crate::error::ServiceError;

pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
    )",
    "CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        system_prompt TEXT,
        category TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
    )",
    "CREATE TABLE IF NOT EXISTS rules (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        content TEXT,
        category TEXT,
        priority TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
    )",
    "CREATE TABLE IF NOT EXISTS hooks (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        hook_type TEXT,
        command TEXT,
        is_enabled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
    )",
    "CREATE TABLE IF NOT EXISTS resource_assignments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL,
        resource_type TEXT NOT NULL CHECK (resource_type IN ('agent', 'rule', 'hook')),
        resource_id TEXT NOT NULL,
        is_primary INTEGER NOT NULL DEFAULT 0,
        assignment_order INTEGER NOT NULL DEFAULT 0,
        config_overrides TEXT,
        assigned_by TEXT,
        assignment_reason TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (project_id, resource_type, resource_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_resource_assignments_resource
        ON resource_assignments (resource_type, resource_id)",
    "CREATE TABLE IF NOT EXISTS resource_dependencies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_type TEXT NOT NULL,
        source_id TEXT NOT NULL,
        target_type TEXT NOT NULL,
        target_id TEXT NOT NULL,
        dependency_type TEXT NOT NULL DEFAULT 'requires',
        is_critical INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        UNIQUE (source_type, source_id, target_type, target_id)
    )",
];

/// Create any missing tables. Safe to call on every start.
pub async fn apply_schema(gateway: &dyn StatementGateway) -> Result<(), ServiceError> {
    for ddl in SCHEMA {
        gateway.run(&Statement::prepare(*ddl)).await?;
    }
    tracing::debug!(target: "tether::schema", statements = SCHEMA.len(), "schema applied");
    Ok(())
}
