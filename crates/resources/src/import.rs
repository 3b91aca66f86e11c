//! Bulk import of resources into a project, and its read-only preview.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tether_storage::{Statement, StatementGateway};
use tracing::{debug, info};

use crate::assignment::{
    check_overrides, create_assignment, find_assignment, project_assignments, restore_statement,
    verify_project, NewAssignment,
};
use crate::clock::now_rfc3339;
use crate::context::ServiceContext;
use crate::dependency::{DependencyEdge, DependencyResolver};
use crate::error::ServiceError;
use crate::resource::{find_resource, ResourceAssignment, ResourceKey, ResourceType};
use crate::transaction::TrackedGateway;

// ── Inputs ────────────────────────────────────────────────────────────────────

/// One resource to import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportItem {
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub assignment_order: Option<i64>,
    #[serde(default)]
    pub config_overrides: Option<Value>,
}

impl ImportItem {
    pub fn new(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        ImportItem {
            resource_type: resource_type.as_str().to_string(),
            resource_id: resource_id.into(),
            is_primary: false,
            assignment_order: None,
            config_overrides: None,
        }
    }
}

/// What to do when an imported resource is already assigned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    #[default]
    Skip,
    /// Replace the assignment's overrides, reason and assigner in place.
    Overwrite,
    /// Accepted for compatibility. No renaming scheme exists, so this
    /// behaves as `Skip` with a reason saying so.
    Rename,
}

impl ConflictResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictResolution::Skip => "skip",
            ConflictResolution::Overwrite => "overwrite",
            ConflictResolution::Rename => "rename",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolution {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(ConflictResolution::Skip),
            "overwrite" => Ok(ConflictResolution::Overwrite),
            "rename" => Ok(ConflictResolution::Rename),
            other => Err(ServiceError::invalid_field(
                "conflict_resolution",
                format!("invalid conflict resolution '{other}': expected skip, overwrite or rename"),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub resolve_dependencies: bool,
    pub conflict_resolution: ConflictResolution,
    pub assigned_by: Option<String>,
    pub import_reason: Option<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            resolve_dependencies: true,
            conflict_resolution: ConflictResolution::Skip,
            assigned_by: None,
            import_reason: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewOptions {
    pub include_dependencies: bool,
    pub check_compatibility: bool,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        PreviewOptions {
            include_dependencies: true,
            check_compatibility: true,
        }
    }
}

// ── Import results ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportAction {
    Created,
    Overwritten,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportedResource {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub action: ImportAction,
    pub assignment: ResourceAssignment,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedImport {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub reason: String,
    pub existing: ResourceAssignment,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedImport {
    pub resource_type: String,
    pub resource_id: String,
    pub code: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub dependencies: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportResult {
    pub successful: Vec<ImportedResource>,
    pub failed: Vec<FailedImport>,
    pub skipped: Vec<SkippedImport>,
    /// Dependencies of imported resources. Recorded, not imported.
    pub dependencies: Vec<DependencyEdge>,
    pub import_summary: ImportSummary,
}

enum ItemOutcome {
    Imported(ImportedResource),
    Skipped(SkippedImport),
}

// ── Preview results ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PreviewDependency {
    #[serde(flatten)]
    pub edge: DependencyEdge,
    /// The target exists and is assigned to the project or part of the batch.
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewConflict {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub existing: ResourceAssignment,
    pub resolution_options: Vec<ConflictResolution>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourcePreview {
    pub resource_type: String,
    pub resource_id: String,
    pub name: Option<String>,
    pub exists: bool,
    pub already_assigned: bool,
    pub dependencies: Vec<PreviewDependency>,
    pub missing_critical_dependencies: usize,
    /// `None` when compatibility checking is off.
    pub compatibility_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreviewSummary {
    pub total_resources: usize,
    pub existing_resources: usize,
    pub missing_resources: usize,
    pub conflicts: usize,
    pub dependencies: usize,
    /// Missing critical dependencies across the batch.
    pub critical_dependencies: usize,
    /// Mean score over existing resources, 0 when none exist.
    pub overall_compatibility: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportPreview {
    pub project_id: i64,
    pub resources: Vec<ResourcePreview>,
    pub conflicts: Vec<PreviewConflict>,
    pub summary: PreviewSummary,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Heuristic score in tenths: 5, +3 if the resource exists, +2 if it is
/// not yet assigned, -1 per missing critical dependency, clamped to 0..=10.
pub fn compatibility_score(exists: bool, already_assigned: bool, missing_critical: usize) -> f64 {
    let mut tenths: i64 = 5;
    if exists {
        tenths += 3;
    }
    if !already_assigned {
        tenths += 2;
    }
    tenths -= i64::try_from(missing_critical).unwrap_or(i64::MAX);
    tenths.clamp(0, 10) as f64 / 10.0
}

// ── Planner ───────────────────────────────────────────────────────────────────

pub struct ImportPlanner {
    ctx: Arc<ServiceContext>,
}

impl ImportPlanner {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        ImportPlanner { ctx }
    }

    /// Import `imports` into `project_id`.
    ///
    /// Only a missing project fails the call. Each item runs in its own
    /// transaction, and a failing item is recorded in `failed` without
    /// affecting the others.
    pub async fn import_resources(
        &self,
        project_id: i64,
        imports: &[ImportItem],
        options: ImportOptions,
    ) -> Result<ImportResult, ServiceError> {
        let verified = verify_project(&*self.ctx.gateway, project_id).await;
        self.ctx.track(verified, "import_resources")?;

        let mut result = ImportResult::default();
        for item in imports {
            match self.import_one(project_id, item, &options).await {
                Ok((outcome, deps)) => {
                    match outcome {
                        ItemOutcome::Imported(imported) => result.successful.push(imported),
                        ItemOutcome::Skipped(skipped) => result.skipped.push(skipped),
                    }
                    result.dependencies.extend(deps);
                }
                Err(e) => {
                    let e = self.ctx.report(e, "import_resources");
                    result.failed.push(FailedImport {
                        resource_type: item.resource_type.clone(),
                        resource_id: item.resource_id.clone(),
                        code: e.code().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        result.import_summary = ImportSummary {
            total: imports.len(),
            successful: result.successful.len(),
            failed: result.failed.len(),
            skipped: result.skipped.len(),
            dependencies: result.dependencies.len(),
        };
        info!(
            target: "tether::import",
            project_id,
            total = result.import_summary.total,
            successful = result.import_summary.successful,
            failed = result.import_summary.failed,
            skipped = result.import_summary.skipped,
            "import finished"
        );
        Ok(result)
    }

    async fn import_one(
        &self,
        project_id: i64,
        item: &ImportItem,
        options: &ImportOptions,
    ) -> Result<(ItemOutcome, Vec<DependencyEdge>), ServiceError> {
        let kind = ResourceType::parse(&item.resource_type)?;
        check_overrides(item.config_overrides.as_ref())?;

        self.ctx
            .transactions
            .execute(|tx| async move {
                let key = ResourceKey::new(kind, item.resource_id.as_str());
                let outcome = match find_assignment(&tx, project_id, kind, &item.resource_id).await? {
                    Some(existing) => resolve_conflict(&tx, item, options, existing).await?,
                    None => {
                        let new = NewAssignment {
                            project_id,
                            resource_type: kind,
                            resource_id: &item.resource_id,
                            is_primary: item.is_primary,
                            assignment_order: item.assignment_order,
                            config_overrides: item.config_overrides.as_ref(),
                            assigned_by: options.assigned_by.as_deref(),
                            assignment_reason: options.import_reason.as_deref(),
                        };
                        let assignment = create_assignment(&tx, &new).await?;
                        ItemOutcome::Imported(ImportedResource {
                            resource_type: kind,
                            resource_id: item.resource_id.clone(),
                            action: ImportAction::Created,
                            assignment,
                        })
                    }
                };

                let deps = match &outcome {
                    ItemOutcome::Imported(_) if options.resolve_dependencies => {
                        DependencyResolver::new(&tx)
                            .get_dependencies(kind, &item.resource_id)
                            .await?
                    }
                    _ => Vec::new(),
                };
                debug!(target: "tether::import", resource = %key, deps = deps.len(), "item processed");
                Ok::<_, ServiceError>((outcome, deps))
            })
            .await
    }

    /// Read-only view of what `import_resources` would do.
    pub async fn preview_import(
        &self,
        project_id: i64,
        imports: &[ImportItem],
        options: PreviewOptions,
    ) -> Result<ImportPreview, ServiceError> {
        let result = self.preview(project_id, imports, &options).await;
        self.ctx.track(result, "preview_import")
    }

    async fn preview(
        &self,
        project_id: i64,
        imports: &[ImportItem],
        options: &PreviewOptions,
    ) -> Result<ImportPreview, ServiceError> {
        let gateway: &dyn StatementGateway = &*self.ctx.gateway;
        verify_project(gateway, project_id).await?;

        let assigned: HashSet<ResourceKey> = project_assignments(gateway, project_id, None)
            .await?
            .iter()
            .map(ResourceAssignment::key)
            .collect();
        let batch: HashSet<ResourceKey> = imports
            .iter()
            .filter_map(|i| {
                let kind = i.resource_type.parse::<ResourceType>().ok()?;
                Some(ResourceKey::new(kind, i.resource_id.as_str()))
            })
            .collect();

        let resolver = DependencyResolver::new(gateway);
        let mut preview = ImportPreview {
            project_id,
            resources: Vec::with_capacity(imports.len()),
            conflicts: Vec::new(),
            summary: PreviewSummary::default(),
            warnings: Vec::new(),
            recommendations: Vec::new(),
        };
        let mut scores = Vec::new();

        for item in imports {
            let Ok(kind) = item.resource_type.parse::<ResourceType>() else {
                preview.warnings.push(format!(
                    "{}:{} has an invalid resource type",
                    item.resource_type, item.resource_id
                ));
                preview.resources.push(ResourcePreview {
                    resource_type: item.resource_type.clone(),
                    resource_id: item.resource_id.clone(),
                    name: None,
                    exists: false,
                    already_assigned: false,
                    dependencies: Vec::new(),
                    missing_critical_dependencies: 0,
                    compatibility_score: options.check_compatibility.then_some(0.0),
                });
                continue;
            };
            let key = ResourceKey::new(kind, item.resource_id.as_str());

            let found = find_resource(gateway, kind, &item.resource_id).await?;
            let exists = found.as_ref().is_some_and(|r| r.active);
            let name = found.map(|r| r.name);

            let existing = if assigned.contains(&key) {
                find_assignment(gateway, project_id, kind, &item.resource_id).await?
            } else {
                None
            };
            let already_assigned = existing.is_some();
            if let Some(existing) = existing {
                preview.conflicts.push(PreviewConflict {
                    resource_type: kind,
                    resource_id: item.resource_id.clone(),
                    existing,
                    resolution_options: vec![ConflictResolution::Skip, ConflictResolution::Overwrite],
                });
            }

            let mut dependencies = Vec::new();
            if exists && (options.include_dependencies || options.check_compatibility) {
                for edge in resolver.get_dependencies(kind, &item.resource_id).await? {
                    let target = edge.target();
                    let available =
                        edge.exists && (assigned.contains(&target) || batch.contains(&target));
                    dependencies.push(PreviewDependency { edge, available });
                }
            }
            let missing_critical: Vec<ResourceKey> = dependencies
                .iter()
                .filter(|d| d.edge.is_critical && !d.available)
                .map(|d| d.edge.target())
                .collect();
            for target in &missing_critical {
                preview
                    .warnings
                    .push(format!("{key} is missing critical dependency {target}"));
            }
            if !exists {
                preview
                    .warnings
                    .push(format!("{key} does not exist or is not active"));
            }

            let score = options
                .check_compatibility
                .then(|| compatibility_score(exists, already_assigned, missing_critical.len()));
            if exists {
                if let Some(s) = score {
                    scores.push(s);
                }
            }

            preview.summary.dependencies += dependencies.len();
            preview.summary.critical_dependencies += missing_critical.len();
            preview.resources.push(ResourcePreview {
                resource_type: kind.as_str().to_string(),
                resource_id: item.resource_id.clone(),
                name,
                exists,
                already_assigned,
                dependencies: if options.include_dependencies {
                    dependencies
                } else {
                    Vec::new()
                },
                missing_critical_dependencies: missing_critical.len(),
                compatibility_score: score,
            });
        }

        let summary = &mut preview.summary;
        summary.total_resources = imports.len();
        summary.existing_resources = preview.resources.iter().filter(|r| r.exists).count();
        summary.missing_resources = summary.total_resources - summary.existing_resources;
        summary.conflicts = preview.conflicts.len();
        summary.overall_compatibility = options.check_compatibility.then(|| {
            if scores.is_empty() {
                0.0
            } else {
                scores.iter().sum::<f64>() / scores.len() as f64
            }
        });

        if summary.conflicts > 0 {
            preview.warnings.push(format!(
                "{} resource(s) are already assigned to project {project_id}",
                summary.conflicts
            ));
            preview.recommendations.push(
                "Import with conflict resolution 'skip' to keep existing assignments or 'overwrite' to update them"
                    .to_string(),
            );
        }
        if summary.missing_resources > 0 {
            preview
                .recommendations
                .push("Create or activate missing resources before importing".to_string());
        }
        if summary.critical_dependencies > 0 {
            preview
                .recommendations
                .push("Add missing critical dependencies to the import batch".to_string());
        }

        Ok(preview)
    }
}

async fn resolve_conflict(
    tx: &TrackedGateway,
    item: &ImportItem,
    options: &ImportOptions,
    existing: ResourceAssignment,
) -> Result<ItemOutcome, ServiceError> {
    let kind = existing.resource_type;
    match options.conflict_resolution {
        ConflictResolution::Skip => Ok(ItemOutcome::Skipped(SkippedImport {
            resource_type: kind,
            resource_id: item.resource_id.clone(),
            reason: "already assigned".to_string(),
            existing,
        })),
        ConflictResolution::Rename => Ok(ItemOutcome::Skipped(SkippedImport {
            resource_type: kind,
            resource_id: item.resource_id.clone(),
            reason: "already assigned; rename is not supported, so the resource was skipped"
                .to_string(),
            existing,
        })),
        ConflictResolution::Overwrite => {
            let forward = Statement::prepare(
                "UPDATE resource_assignments \
                 SET config_overrides = ?, assignment_reason = ?, assigned_by = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind([
                json!(item.config_overrides.as_ref().map(Value::to_string)),
                json!(options.import_reason),
                json!(options.assigned_by),
                json!(now_rfc3339()),
                json!(existing.id),
            ]);
            tx.run_with_undo(&forward, restore_statement(&existing), "restore overwritten assignment")
                .await?;
            let assignment = find_assignment(tx, existing.project_id, kind, &item.resource_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("assignment", existing.id))?;
            Ok(ItemOutcome::Imported(ImportedResource {
                resource_type: kind,
                resource_id: item.resource_id.clone(),
                action: ImportAction::Overwritten,
                assignment,
            }))
        }
    }
}
