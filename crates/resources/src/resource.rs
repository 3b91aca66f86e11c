//! Resource kinds, keys and the assignment record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tether_storage::{GatewayExt, Row, Statement, StatementGateway};

use crate::error::ServiceError;

/// The three kinds of shareable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Agent,
    Rule,
    Hook,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [ResourceType::Agent, ResourceType::Rule, ResourceType::Hook];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Agent => "agent",
            ResourceType::Rule => "rule",
            ResourceType::Hook => "hook",
        }
    }

    /// Lookup table holding resources of this kind.
    pub fn table(self) -> &'static str {
        match self {
            ResourceType::Agent => "agents",
            ResourceType::Rule => "rules",
            ResourceType::Hook => "hooks",
        }
    }

    /// Flag column that marks a resource usable. Hooks are "enabled",
    /// everything else is "active".
    pub fn active_column(self) -> &'static str {
        match self {
            ResourceType::Hook => "is_enabled",
            _ => "is_active",
        }
    }

    /// Text columns scanned for references to other resources.
    pub fn content_columns(self) -> &'static [&'static str] {
        match self {
            ResourceType::Agent => &["description", "system_prompt"],
            ResourceType::Rule => &["description", "content"],
            ResourceType::Hook => &["description", "command"],
        }
    }

    /// Parse a caller-supplied kind, failing with a validation error.
    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        value.parse()
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(ResourceType::Agent),
            "rule" => Ok(ResourceType::Rule),
            "hook" => Ok(ResourceType::Hook),
            other => Err(ServiceError::invalid_field(
                "resource_type",
                format!("invalid resource type '{other}': expected one of agent, rule, hook"),
            )),
        }
    }
}

/// Identity of one resource across kinds. Displays as `kind:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_type: ResourceType,
    pub resource_id: String,
}

impl ResourceKey {
    pub fn new(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        ResourceKey {
            resource_type,
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.resource_id)
    }
}

/// The link between one resource and one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAssignment {
    pub id: i64,
    pub project_id: i64,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub is_primary: bool,
    pub assignment_order: i64,
    pub config_overrides: Option<serde_json::Value>,
    pub assigned_by: Option<String>,
    pub assignment_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ResourceAssignment {
    pub fn from_row(row: &Row) -> Result<Self, ServiceError> {
        Ok(ResourceAssignment {
            id: get_i64(row, "id")?,
            project_id: get_i64(row, "project_id")?,
            resource_type: get_str(row, "resource_type")?.parse()?,
            resource_id: get_str(row, "resource_id")?,
            is_primary: get_bool(row, "is_primary"),
            assignment_order: get_i64(row, "assignment_order").unwrap_or(0),
            config_overrides: get_json(row, "config_overrides")?,
            assigned_by: opt_str(row, "assigned_by"),
            assignment_reason: opt_str(row, "assignment_reason"),
            created_at: opt_str(row, "created_at").unwrap_or_default(),
            updated_at: opt_str(row, "updated_at").unwrap_or_default(),
        })
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type, self.resource_id.clone())
    }
}

/// A row of `projects`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

impl Project {
    pub async fn find(
        gateway: &dyn StatementGateway,
        project_id: i64,
    ) -> Result<Option<Project>, ServiceError> {
        let row = gateway
            .prepare("SELECT id, name, description FROM projects WHERE id = ?")
            .bind([project_id])
            .first()
            .await?;
        row.map(|row| {
            Ok(Project {
                id: get_i64(&row, "id")?,
                name: opt_str(&row, "name").unwrap_or_default(),
                description: opt_str(&row, "description"),
            })
        })
        .transpose()
    }
}

/// A resource as seen from the lookup tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSummary {
    pub resource_type: ResourceType,
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// `is_active` for agents and rules, `is_enabled` for hooks.
    pub active: bool,
}

impl ResourceSummary {
    fn from_row(resource_type: ResourceType, row: &Row) -> Result<Self, ServiceError> {
        Ok(ResourceSummary {
            resource_type,
            id: get_str(row, "id")?,
            name: opt_str(row, "name").unwrap_or_default(),
            description: opt_str(row, "description"),
            active: get_bool(row, "active"),
        })
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type, self.id.clone())
    }
}

/// Look up one resource regardless of its active flag.
pub(crate) async fn find_resource(
    gateway: &dyn StatementGateway,
    resource_type: ResourceType,
    resource_id: &str,
) -> Result<Option<ResourceSummary>, ServiceError> {
    let query = format!(
        "SELECT id, name, description, {} AS active FROM {} WHERE id = ?",
        resource_type.active_column(),
        resource_type.table()
    );
    gateway
        .prepare(&query)
        .bind([resource_id])
        .first()
        .await?
        .map(|row| ResourceSummary::from_row(resource_type, &row))
        .transpose()
}

/// True if the resource exists and is active (or enabled, for hooks).
pub(crate) async fn is_resource_active(
    gateway: &dyn StatementGateway,
    resource_type: ResourceType,
    resource_id: &str,
) -> Result<bool, ServiceError> {
    Ok(find_resource(gateway, resource_type, resource_id)
        .await?
        .is_some_and(|r| r.active))
}

/// Every active resource of one kind, ordered by id.
pub(crate) async fn list_active_resources(
    gateway: &dyn StatementGateway,
    resource_type: ResourceType,
) -> Result<Vec<ResourceSummary>, ServiceError> {
    let statement = Statement::prepare(format!(
        "SELECT id, name, description, {col} AS active FROM {table} WHERE {col} = 1 ORDER BY id",
        col = resource_type.active_column(),
        table = resource_type.table()
    ));
    gateway
        .all(&statement)
        .await?
        .iter()
        .map(|row| ResourceSummary::from_row(resource_type, row))
        .collect()
}

// ── Row accessors ────────────────────────────────────────────────────────────

pub(crate) fn get_i64(row: &Row, column: &str) -> Result<i64, ServiceError> {
    row.get(column)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ServiceError::System(format!("column '{column}' missing or not an integer")))
}

pub(crate) fn get_str(row: &Row, column: &str) -> Result<String, ServiceError> {
    opt_str(row, column)
        .ok_or_else(|| ServiceError::System(format!("column '{column}' missing or not text")))
}

pub(crate) fn opt_str(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// SQLite stores booleans as integers; accept either shape.
pub(crate) fn get_bool(row: &Row, column: &str) -> bool {
    match row.get(column) {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Number(n)) => n.as_i64().is_some_and(|i| i != 0),
        _ => false,
    }
}

/// JSON stored as TEXT. `NULL` and empty strings read as `None`.
pub(crate) fn get_json(row: &Row, column: &str) -> Result<Option<serde_json::Value>, ServiceError> {
    match row.get(column) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => serde_json::from_str(s)
            .map(Some)
            .map_err(|e| ServiceError::System(format!("column '{column}' holds invalid JSON: {e}"))),
        Some(other) => Ok(Some(other.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_rejects_unknown_kind() {
        let err = ResourceType::parse("plugin").unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("plugin"));
    }

    #[test]
    fn hooks_use_enabled_flag() {
        assert_eq!(ResourceType::Hook.active_column(), "is_enabled");
        assert_eq!(ResourceType::Rule.active_column(), "is_active");
        assert_eq!(ResourceType::Agent.table(), "agents");
    }

    #[test]
    fn assignment_reads_sqlite_shaped_row() {
        let row: Row = serde_json::from_value(json!({
            "id": 3,
            "project_id": 1,
            "resource_type": "rule",
            "resource_id": "r1",
            "is_primary": 1,
            "assignment_order": 2,
            "config_overrides": "{\"strict\":true}",
            "assigned_by": null,
            "assignment_reason": "setup",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        }))
        .unwrap();

        let a = ResourceAssignment::from_row(&row).unwrap();
        assert_eq!(a.resource_type, ResourceType::Rule);
        assert!(a.is_primary);
        assert_eq!(a.config_overrides, Some(json!({"strict": true})));
        assert_eq!(a.assigned_by, None);
        assert_eq!(a.key().to_string(), "rule:r1");
    }
}
