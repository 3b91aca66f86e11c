//! Seeding projects, resources and dependency edges from a JSON document.
//!
//! ```json
//! {
//!   "projects": [{ "id": 1, "name": "web" }],
//!   "agents": [{ "id": "a1", "name": "reviewer", "system_prompt": "..." }],
//!   "rules": [{ "id": "r1", "name": "tests", "content": "Always ..." }],
//!   "hooks": [{ "id": "h1", "name": "fmt", "hook_type": "PostToolUse", "command": "cargo fmt" }],
//!   "dependencies": [{ "source_type": "agent", "source_id": "a1",
//!                      "target_type": "rule", "target_id": "r1", "is_critical": true }]
//! }
//! ```
//!
//! Rows are written with `INSERT OR REPLACE`, so loading the same catalog
//! twice leaves one copy of each row.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tether_storage::{GatewayExt, StatementGateway};

use crate::error::ServiceError;
use crate::resource::ResourceType;

fn yes() -> bool {
    true
}

fn requires() -> String {
    "requires".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub projects: Vec<ProjectSeed>,
    pub agents: Vec<AgentSeed>,
    pub rules: Vec<RuleSeed>,
    pub hooks: Vec<HookSeed>,
    pub dependencies: Vec<DependencySeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSeed {
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSeed {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "yes")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSeed {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default = "yes")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookSeed {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hook_type: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "yes")]
    pub is_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySeed {
    pub source_type: ResourceType,
    pub source_id: String,
    pub target_type: ResourceType,
    pub target_id: String,
    #[serde(default = "requires")]
    pub dependency_type: String,
    #[serde(default)]
    pub is_critical: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogCounts {
    pub projects: usize,
    pub agents: usize,
    pub rules: usize,
    pub hooks: usize,
    pub dependencies: usize,
}

impl Catalog {
    pub fn from_json_str(content: &str) -> Result<Self, ServiceError> {
        serde_json::from_str(content)
            .map_err(|e| ServiceError::validation(format!("invalid catalog: {e}")))
    }
}

/// Write every row of `catalog`. Stops at the first failing row.
pub async fn load_catalog(
    gateway: &dyn StatementGateway,
    catalog: &Catalog,
) -> Result<CatalogCounts, ServiceError> {
    for p in &catalog.projects {
        gateway
            .prepare("INSERT OR REPLACE INTO projects (id, name, description) VALUES (?, ?, ?)")
            .bind([json!(p.id), json!(p.name), json!(p.description)])
            .run()
            .await?;
    }
    for a in &catalog.agents {
        gateway
            .prepare(
                "INSERT OR REPLACE INTO agents \
                 (id, name, description, system_prompt, category, is_active) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind([
                json!(a.id),
                json!(a.name),
                json!(a.description),
                json!(a.system_prompt),
                json!(a.category),
                json!(a.is_active),
            ])
            .run()
            .await?;
    }
    for r in &catalog.rules {
        gateway
            .prepare(
                "INSERT OR REPLACE INTO rules \
                 (id, name, description, content, category, priority, is_active) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind([
                json!(r.id),
                json!(r.name),
                json!(r.description),
                json!(r.content),
                json!(r.category),
                json!(r.priority),
                json!(r.is_active),
            ])
            .run()
            .await?;
    }
    for h in &catalog.hooks {
        gateway
            .prepare(
                "INSERT OR REPLACE INTO hooks \
                 (id, name, description, hook_type, command, is_enabled) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind([
                json!(h.id),
                json!(h.name),
                json!(h.description),
                json!(h.hook_type),
                json!(h.command),
                json!(h.is_enabled),
            ])
            .run()
            .await?;
    }
    for d in &catalog.dependencies {
        gateway
            .prepare(
                "INSERT OR REPLACE INTO resource_dependencies \
                 (source_type, source_id, target_type, target_id, dependency_type, is_critical) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind([
                json!(d.source_type),
                json!(d.source_id),
                json!(d.target_type),
                json!(d.target_id),
                json!(d.dependency_type),
                json!(d.is_critical),
            ])
            .run()
            .await?;
    }

    let counts = CatalogCounts {
        projects: catalog.projects.len(),
        agents: catalog.agents.len(),
        rules: catalog.rules.len(),
        hooks: catalog.hooks.len(),
        dependencies: catalog.dependencies.len(),
    };
    tracing::info!(target: "tether::catalog", ?counts, "catalog loaded");
    Ok(counts)
}
