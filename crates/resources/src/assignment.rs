//! Assigning resources to projects.
//!
//! Every multi-statement mutation runs inside one transaction. The "at most
//! one primary per (project, kind)" rule is kept by clearing the current
//! primary before the new one is written, with a registered undo so a later
//! failure restores it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tether_storage::{GatewayExt, Statement, StatementGateway, StorageError};
use tracing::{debug, info, warn};

use crate::clock::now_rfc3339;
use crate::context::ServiceContext;
use crate::error::ServiceError;
use crate::resource::{
    find_resource, get_i64, get_str, opt_str, ResourceAssignment, ResourceKey, ResourceSummary, ResourceType,
};
use crate::transaction::TrackedGateway;

const ASSIGNMENT_COLUMNS: &str = "id, project_id, resource_type, resource_id, is_primary, \
     assignment_order, config_overrides, assigned_by, assignment_reason, created_at, updated_at";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignOptions {
    pub is_primary: bool,
    /// Defaults to one past the highest order used for the kind.
    pub assignment_order: Option<i64>,
    pub config_overrides: Option<Value>,
    pub assigned_by: Option<String>,
    pub assignment_reason: Option<String>,
}

/// Fields of an existing assignment to change. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentUpdate {
    pub is_primary: Option<bool>,
    pub assignment_order: Option<i64>,
    pub config_overrides: Option<Value>,
    pub assignment_reason: Option<String>,
}

pub struct ResourceAssignmentService {
    ctx: Arc<ServiceContext>,
}

impl ResourceAssignmentService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        ResourceAssignmentService { ctx }
    }

    /// Assign one resource to a project.
    ///
    /// Fails with `Validation` for an unknown kind, `NotFound` for a missing
    /// project or a missing/inactive resource, and `Conflict` (carrying the
    /// existing row) when the resource is already assigned.
    pub async fn assign_resource(
        &self,
        project_id: i64,
        resource_type: &str,
        resource_id: &str,
        options: AssignOptions,
    ) -> Result<ResourceAssignment, ServiceError> {
        let result = self
            .assign(project_id, resource_type, resource_id, &options)
            .await;
        self.ctx.track(result, "assign_resource")
    }

    async fn assign(
        &self,
        project_id: i64,
        resource_type: &str,
        resource_id: &str,
        options: &AssignOptions,
    ) -> Result<ResourceAssignment, ServiceError> {
        let kind = ResourceType::parse(resource_type)?;
        check_overrides(options.config_overrides.as_ref())?;

        let assignment = self
            .ctx
            .transactions
            .execute(|tx| async move {
                verify_project(&tx, project_id).await?;
                let new = NewAssignment {
                    project_id,
                    resource_type: kind,
                    resource_id,
                    is_primary: options.is_primary,
                    assignment_order: options.assignment_order,
                    config_overrides: options.config_overrides.as_ref(),
                    assigned_by: options.assigned_by.as_deref(),
                    assignment_reason: options.assignment_reason.as_deref(),
                };
                create_assignment(&tx, &new).await
            })
            .await?;

        info!(
            target: "tether::assignment",
            project_id,
            resource = %assignment.key(),
            is_primary = assignment.is_primary,
            "resource assigned"
        );
        Ok(assignment)
    }

    /// Remove one assignment. `NotFound` when there was nothing to remove.
    pub async fn unassign_resource(
        &self,
        project_id: i64,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<(), ServiceError> {
        let result: Result<(), ServiceError> = async {
            let kind = ResourceType::parse(resource_type)?;
            let res = self
                .ctx
                .gateway
                .prepare(
                    "DELETE FROM resource_assignments \
                     WHERE project_id = ? AND resource_type = ? AND resource_id = ?",
                )
                .bind([json!(project_id), json!(kind.as_str()), json!(resource_id)])
                .run()
                .await?;
            if res.meta.changes == 0 {
                return Err(assignment_not_found(project_id, kind, resource_id));
            }
            info!(
                target: "tether::assignment",
                project_id,
                resource = %ResourceKey::new(kind, resource_id),
                "resource unassigned"
            );
            Ok(())
        }
        .await;
        self.ctx.track(result, "unassign_resource")
    }

    /// A project's assignments, by kind, primary first, then by order.
    pub async fn get_project_resources(
        &self,
        project_id: i64,
        resource_type: Option<&str>,
    ) -> Result<Vec<ResourceAssignment>, ServiceError> {
        let result: Result<Vec<ResourceAssignment>, ServiceError> = async {
            let kind = resource_type.map(ResourceType::parse).transpose()?;
            verify_project(&*self.ctx.gateway, project_id).await?;
            project_assignments(&*self.ctx.gateway, project_id, kind).await
        }
        .await;
        self.ctx.track(result, "get_project_resources")
    }

    /// Active resources not yet assigned to the project, across kinds
    /// unless one is given.
    pub async fn get_available_resources(
        &self,
        project_id: i64,
        resource_type: Option<&str>,
    ) -> Result<Vec<ResourceSummary>, ServiceError> {
        let result: Result<Vec<ResourceSummary>, ServiceError> = async {
            let kinds = match resource_type {
                Some(t) => vec![ResourceType::parse(t)?],
                None => ResourceType::ALL.to_vec(),
            };
            verify_project(&*self.ctx.gateway, project_id).await?;

            let mut available = Vec::new();
            for kind in kinds {
                let statement = Statement::prepare(format!(
                    "SELECT id, name, description, {col} AS active FROM {table} \
                     WHERE {col} = 1 AND id NOT IN ( \
                         SELECT resource_id FROM resource_assignments \
                         WHERE project_id = ? AND resource_type = ?) \
                     ORDER BY id",
                    col = kind.active_column(),
                    table = kind.table()
                ))
                .bind([json!(project_id), json!(kind.as_str())]);
                for row in self.ctx.gateway.all(&statement).await? {
                    available.push(ResourceSummary {
                        resource_type: kind,
                        id: get_str(&row, "id")?,
                        name: opt_str(&row, "name").unwrap_or_default(),
                        description: opt_str(&row, "description"),
                        active: true,
                    });
                }
            }
            Ok(available)
        }
        .await;
        self.ctx.track(result, "get_available_resources")
    }

    /// Change an existing assignment.
    ///
    /// Promoting to primary clears the current primary first and runs both
    /// steps in one transaction; any other change is a single statement.
    pub async fn update_resource_assignment(
        &self,
        project_id: i64,
        resource_type: &str,
        resource_id: &str,
        update: AssignmentUpdate,
    ) -> Result<ResourceAssignment, ServiceError> {
        let result = self
            .update(project_id, resource_type, resource_id, &update)
            .await;
        self.ctx.track(result, "update_resource_assignment")
    }

    async fn update(
        &self,
        project_id: i64,
        resource_type: &str,
        resource_id: &str,
        update: &AssignmentUpdate,
    ) -> Result<ResourceAssignment, ServiceError> {
        let kind = ResourceType::parse(resource_type)?;
        check_overrides(update.config_overrides.as_ref())?;
        let gateway = &*self.ctx.gateway;

        let existing = find_assignment(gateway, project_id, kind, resource_id)
            .await?
            .ok_or_else(|| assignment_not_found(project_id, kind, resource_id))?;

        let forward = update_statement(&existing, update);
        if update.is_primary == Some(true) && !existing.is_primary {
            let existing = &existing;
            let forward = &forward;
            self.ctx
                .transactions
                .execute(|tx| async move {
                    clear_primary(&tx, project_id, kind, Some(existing.id)).await?;
                    tx.run_with_undo(forward, restore_statement(existing), "restore assignment")
                        .await?;
                    Ok::<(), ServiceError>(())
                })
                .await?;
        } else {
            gateway.run(&forward).await?;
        }

        let updated = find_assignment(gateway, project_id, kind, resource_id)
            .await?
            .ok_or_else(|| assignment_not_found(project_id, kind, resource_id))?;
        debug!(
            target: "tether::assignment",
            project_id,
            resource = %updated.key(),
            is_primary = updated.is_primary,
            "assignment updated"
        );
        Ok(updated)
    }
}

// ── Shared steps ──────────────────────────────────────────────────────────────

/// Inputs for [`create_assignment`].
pub(crate) struct NewAssignment<'a> {
    pub(crate) project_id: i64,
    pub(crate) resource_type: ResourceType,
    pub(crate) resource_id: &'a str,
    pub(crate) is_primary: bool,
    pub(crate) assignment_order: Option<i64>,
    pub(crate) config_overrides: Option<&'a Value>,
    pub(crate) assigned_by: Option<&'a str>,
    pub(crate) assignment_reason: Option<&'a str>,
}

/// Verify, clear primaries if needed, insert, then propagate the shared
/// signal. The project must already be verified.
pub(crate) async fn create_assignment(
    tx: &TrackedGateway,
    new: &NewAssignment<'_>,
) -> Result<ResourceAssignment, ServiceError> {
    verify_resource(tx, new.resource_type, new.resource_id).await?;

    if let Some(existing) = find_assignment(tx, new.project_id, new.resource_type, new.resource_id).await? {
        return Err(already_assigned(existing));
    }

    if new.is_primary {
        clear_primary(tx, new.project_id, new.resource_type, None).await?;
    }

    let assignment = insert_assignment(tx, new).await?;
    propagate_shared(tx, new.resource_type, new.resource_id).await;
    Ok(assignment)
}

pub(crate) async fn verify_project(
    gateway: &dyn StatementGateway,
    project_id: i64,
) -> Result<(), ServiceError> {
    let row = gateway
        .prepare("SELECT id FROM projects WHERE id = ?")
        .bind([project_id])
        .first()
        .await?;
    match row {
        Some(_) => Ok(()),
        None => Err(ServiceError::not_found("project", project_id)),
    }
}

pub(crate) async fn verify_resource(
    gateway: &dyn StatementGateway,
    resource_type: ResourceType,
    resource_id: &str,
) -> Result<ResourceSummary, ServiceError> {
    match find_resource(gateway, resource_type, resource_id).await? {
        Some(r) if r.active => Ok(r),
        _ => Err(ServiceError::not_found(resource_type.as_str(), resource_id)),
    }
}

pub(crate) async fn find_assignment(
    gateway: &dyn StatementGateway,
    project_id: i64,
    resource_type: ResourceType,
    resource_id: &str,
) -> Result<Option<ResourceAssignment>, ServiceError> {
    let query = format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM resource_assignments \
         WHERE project_id = ? AND resource_type = ? AND resource_id = ?"
    );
    gateway
        .prepare(&query)
        .bind([json!(project_id), json!(resource_type.as_str()), json!(resource_id)])
        .first()
        .await?
        .map(|row| ResourceAssignment::from_row(&row))
        .transpose()
}

pub(crate) async fn project_assignments(
    gateway: &dyn StatementGateway,
    project_id: i64,
    resource_type: Option<ResourceType>,
) -> Result<Vec<ResourceAssignment>, ServiceError> {
    let mut query = format!("SELECT {ASSIGNMENT_COLUMNS} FROM resource_assignments WHERE project_id = ?");
    let mut params = vec![json!(project_id)];
    if let Some(kind) = resource_type {
        query.push_str(" AND resource_type = ?");
        params.push(json!(kind.as_str()));
    }
    query.push_str(" ORDER BY resource_type, is_primary DESC, assignment_order, id");

    gateway
        .all(&Statement::prepare(query).bind(params))
        .await?
        .iter()
        .map(ResourceAssignment::from_row)
        .collect()
}

/// Clear `is_primary` on the current primaries of `(project, kind)`, other
/// than `except`, registering an undo that restores exactly those rows.
pub(crate) async fn clear_primary(
    tx: &TrackedGateway,
    project_id: i64,
    resource_type: ResourceType,
    except: Option<i64>,
) -> Result<(), ServiceError> {
    let rows = tx
        .prepare(
            "SELECT id FROM resource_assignments \
             WHERE project_id = ? AND resource_type = ? AND is_primary = 1 \
             ORDER BY id",
        )
        .bind([json!(project_id), json!(resource_type.as_str())])
        .all()
        .await?;
    let mut ids = Vec::with_capacity(rows.len());
    for row in &rows {
        let id = get_i64(row, "id")?;
        if Some(id) != except {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return Ok(());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let forward = Statement::prepare(format!(
        "UPDATE resource_assignments SET is_primary = 0 WHERE id IN ({placeholders})"
    ))
    .bind(ids.iter().copied());
    let undo = Statement::prepare(format!(
        "UPDATE resource_assignments SET is_primary = 1 WHERE id IN ({placeholders})"
    ))
    .bind(ids.iter().copied());

    tx.run_with_undo(&forward, undo, "restore previous primary assignment")
        .await?;
    debug!(
        target: "tether::assignment",
        project_id,
        resource_type = resource_type.as_str(),
        cleared = ids.len(),
        "cleared previous primary"
    );
    Ok(())
}

async fn insert_assignment(
    tx: &TrackedGateway,
    new: &NewAssignment<'_>,
) -> Result<ResourceAssignment, ServiceError> {
    let order = match new.assignment_order {
        Some(order) => order,
        None => next_order(tx, new.project_id, new.resource_type).await?,
    };
    let now = now_rfc3339();
    let insert = Statement::prepare(
        "INSERT INTO resource_assignments \
         (project_id, resource_type, resource_id, is_primary, assignment_order, \
          config_overrides, assigned_by, assignment_reason, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind([
        json!(new.project_id),
        json!(new.resource_type.as_str()),
        json!(new.resource_id),
        json!(new.is_primary),
        json!(order),
        json!(new.config_overrides.map(Value::to_string)),
        json!(new.assigned_by),
        json!(new.assignment_reason),
        json!(now),
        json!(now),
    ]);

    let res = match tx.run(&insert).await {
        Ok(res) => res,
        Err(StorageError::ConstraintViolation(detail)) => {
            debug!(target: "tether::assignment", %detail, "insert hit unique constraint");
            let existing =
                find_assignment(tx, new.project_id, new.resource_type, new.resource_id).await?;
            return Err(match existing {
                Some(existing) => already_assigned(existing),
                None => ServiceError::Conflict {
                    message: format!(
                        "{} could not be assigned to project {}: {detail}",
                        ResourceKey::new(new.resource_type, new.resource_id),
                        new.project_id
                    ),
                    existing: None,
                },
            });
        }
        Err(e) => return Err(e.into()),
    };

    let row_id = res.meta.last_row_id.ok_or_else(|| {
        ServiceError::System("assignment insert reported no row id".to_string())
    })?;
    let row = tx
        .prepare(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM resource_assignments WHERE id = ?"
        ))
        .bind([row_id])
        .first()
        .await?
        .ok_or_else(|| ServiceError::System(format!("assignment {row_id} vanished after insert")))?;
    ResourceAssignment::from_row(&row)
}

async fn next_order(
    gateway: &dyn StatementGateway,
    project_id: i64,
    resource_type: ResourceType,
) -> Result<i64, ServiceError> {
    let row = gateway
        .prepare(
            "SELECT COALESCE(MAX(assignment_order), 0) + 1 AS next_order \
             FROM resource_assignments WHERE project_id = ? AND resource_type = ?",
        )
        .bind([json!(project_id), json!(resource_type.as_str())])
        .first()
        .await?;
    Ok(row.and_then(|r| get_i64(&r, "next_order").ok()).unwrap_or(1))
}

/// When a resource is attached to more than one project, touch all of its
/// assignments. Failures are logged and never abort the caller.
pub(crate) async fn propagate_shared(tx: &TrackedGateway, resource_type: ResourceType, resource_id: &str) {
    let key = ResourceKey::new(resource_type, resource_id);
    let outcome: Result<u64, ServiceError> = async {
        let row = tx
            .prepare(
                "SELECT COUNT(DISTINCT project_id) AS projects FROM resource_assignments \
                 WHERE resource_type = ? AND resource_id = ?",
            )
            .bind([resource_type.as_str(), resource_id])
            .first()
            .await?;
        let projects = row.and_then(|r| get_i64(&r, "projects").ok()).unwrap_or(0);
        if projects <= 1 {
            return Ok(0);
        }
        let res = tx
            .prepare(
                "UPDATE resource_assignments SET updated_at = ? \
                 WHERE resource_type = ? AND resource_id = ?",
            )
            .bind([now_rfc3339().as_str(), resource_type.as_str(), resource_id])
            .run()
            .await?;
        Ok(res.meta.changes)
    }
    .await;

    match outcome {
        Ok(0) => {}
        Ok(touched) => debug!(
            target: "tether::assignment",
            resource = %key,
            touched,
            "propagated shared resource update"
        ),
        Err(e) => warn!(
            target: "tether::assignment",
            resource = %key,
            error = %e,
            "shared resource propagation failed"
        ),
    }
}

fn update_statement(existing: &ResourceAssignment, update: &AssignmentUpdate) -> Statement {
    let mut sets = vec!["updated_at = ?"];
    let mut params = vec![json!(now_rfc3339())];
    if let Some(primary) = update.is_primary {
        sets.push("is_primary = ?");
        params.push(json!(primary));
    }
    if let Some(order) = update.assignment_order {
        sets.push("assignment_order = ?");
        params.push(json!(order));
    }
    if let Some(overrides) = &update.config_overrides {
        sets.push("config_overrides = ?");
        params.push(json!(overrides.to_string()));
    }
    if let Some(reason) = &update.assignment_reason {
        sets.push("assignment_reason = ?");
        params.push(json!(reason));
    }
    params.push(json!(existing.id));
    Statement::prepare(format!(
        "UPDATE resource_assignments SET {} WHERE id = ?",
        sets.join(", ")
    ))
    .bind(params)
}

/// Before-image of an assignment's mutable columns.
pub(crate) fn restore_statement(existing: &ResourceAssignment) -> Statement {
    Statement::prepare(
        "UPDATE resource_assignments SET is_primary = ?, assignment_order = ?, \
         config_overrides = ?, assigned_by = ?, assignment_reason = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind([
        json!(existing.is_primary),
        json!(existing.assignment_order),
        json!(existing.config_overrides.as_ref().map(Value::to_string)),
        json!(existing.assigned_by),
        json!(existing.assignment_reason),
        json!(existing.updated_at),
        json!(existing.id),
    ])
}

pub(crate) fn check_overrides(overrides: Option<&Value>) -> Result<(), ServiceError> {
    match overrides {
        None | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(ServiceError::invalid_field(
            "config_overrides",
            "config_overrides must be a JSON object",
        )),
    }
}

pub(crate) fn already_assigned(existing: ResourceAssignment) -> ServiceError {
    ServiceError::Conflict {
        message: format!(
            "{} is already assigned to project {}",
            existing.key(),
            existing.project_id
        ),
        existing: Some(Box::new(existing)),
    }
}

fn assignment_not_found(project_id: i64, resource_type: ResourceType, resource_id: &str) -> ServiceError {
    ServiceError::not_found(
        "assignment",
        format!("{} in project {project_id}", ResourceKey::new(resource_type, resource_id)),
    )
}
