//! ResourceAssignmentService against SQLite.

mod common;

use std::sync::Arc;

use serde_json::json;
use tether_resources::{AssignOptions, AssignmentUpdate, ResourceAssignmentService, ServiceError};
use tether_storage::{Statement, StatementGateway, StorageError};

use common::{assignment_count, context_over, count, seeded_db, setup, FailingRuns};

fn primary() -> AssignOptions {
    AssignOptions {
        is_primary: true,
        ..Default::default()
    }
}

// ── assign_resource ───────────────────────────────────────────────────────────

#[tokio::test]
async fn assign_creates_assignment_with_defaults() {
    let fx = setup().await;
    let svc = ResourceAssignmentService::new(fx.ctx.clone());

    let a = svc
        .assign_resource(
            1,
            "rule",
            "r1",
            AssignOptions {
                config_overrides: Some(json!({"strict": true})),
                assigned_by: Some("alice".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(a.project_id, 1);
    assert_eq!(a.resource_id, "r1");
    assert!(!a.is_primary);
    assert_eq!(a.assignment_order, 1);
    assert_eq!(a.config_overrides, Some(json!({"strict": true})));
    assert_eq!(a.assigned_by.as_deref(), Some("alice"));

    let b = svc
        .assign_resource(1, "rule", "r2", AssignOptions::default())
        .await
        .unwrap();
    assert_eq!(b.assignment_order, 2, "order continues after the current max");
}

#[tokio::test]
async fn second_assignment_is_a_conflict_and_creates_no_row() {
    let fx = setup().await;
    let svc = ResourceAssignmentService::new(fx.ctx.clone());

    let first = svc
        .assign_resource(1, "agent", "a1", AssignOptions::default())
        .await
        .unwrap();
    let err = svc
        .assign_resource(1, "agent", "a1", AssignOptions::default())
        .await
        .unwrap_err();

    match err {
        ServiceError::Conflict { existing, .. } => {
            assert_eq!(existing.expect("existing row").id, first.id);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(assignment_count(&fx.db).await, 1);
    assert_eq!(fx.ctx.errors.len(), 1, "the conflict is recorded in the error log");
}

#[tokio::test]
async fn concurrent_duplicate_assignments_yield_one_row() {
    let fx = setup().await;
    let svc = Arc::new(ResourceAssignmentService::new(fx.ctx.clone()));

    let (left, right) = tokio::join!(
        svc.assign_resource(1, "hook", "h1", AssignOptions::default()),
        svc.assign_resource(1, "hook", "h1", AssignOptions::default()),
    );
    let outcomes = [left, right];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(ServiceError::Conflict { .. }))));
    assert_eq!(assignment_count(&fx.db).await, 1);
}

#[tokio::test]
async fn new_primary_replaces_old_primary() {
    let fx = setup().await;
    let svc = ResourceAssignmentService::new(fx.ctx.clone());

    svc.assign_resource(1, "agent", "a1", primary()).await.unwrap();
    svc.assign_resource(1, "agent", "a2", primary()).await.unwrap();

    let agents = svc.get_project_resources(1, Some("agent")).await.unwrap();
    assert_eq!(agents.len(), 2);
    let a1 = agents.iter().find(|a| a.resource_id == "a1").unwrap();
    let a2 = agents.iter().find(|a| a.resource_id == "a2").unwrap();
    assert!(!a1.is_primary);
    assert!(a2.is_primary);
    assert_eq!(agents[0].resource_id, "a2", "primary is listed first");
}

#[tokio::test]
async fn primaries_are_scoped_to_project_and_kind() {
    let fx = setup().await;
    let svc = ResourceAssignmentService::new(fx.ctx.clone());

    svc.assign_resource(1, "agent", "a1", primary()).await.unwrap();
    svc.assign_resource(1, "rule", "r1", primary()).await.unwrap();
    svc.assign_resource(2, "agent", "a2", primary()).await.unwrap();

    let primaries = count(
        &fx.db,
        "SELECT COUNT(*) AS n FROM resource_assignments WHERE is_primary = 1",
    )
    .await;
    assert_eq!(primaries, 3);
}

#[tokio::test]
async fn failed_insert_restores_previous_primary() {
    let db = seeded_db().await;
    let healthy = context_over(db.clone());
    ResourceAssignmentService::new(healthy)
        .assign_resource(1, "agent", "a1", primary())
        .await
        .unwrap();

    let broken = context_over(Arc::new(FailingRuns::new(
        db.clone(),
        "INSERT INTO resource_assignments",
        StorageError::Backend("disk I/O error".into()),
    )));
    let err = ResourceAssignmentService::new(broken)
        .assign_resource(1, "agent", "a2", primary())
        .await
        .unwrap_err();

    let t = match err {
        ServiceError::Transaction(t) => t,
        other => panic!("expected transaction error, got {other:?}"),
    };
    assert_eq!(t.retry_count, 0);
    assert!(t.rollback.success);
    assert_eq!(t.rollback.operations_rolled_back, 1);

    let primaries = count(
        &db,
        "SELECT COUNT(*) AS n FROM resource_assignments WHERE is_primary = 1 AND resource_id = 'a1'",
    )
    .await;
    assert_eq!(primaries, 1, "a1 is primary again after rollback");
    assert_eq!(assignment_count(&db).await, 1);
}

#[tokio::test]
async fn conflict_with_failed_undo_reports_the_rollback() {
    let db = seeded_db().await;
    ResourceAssignmentService::new(context_over(db.clone()))
        .assign_resource(1, "agent", "a1", primary())
        .await
        .unwrap();

    let broken = context_over(Arc::new(
        FailingRuns::new(
            db.clone(),
            "INSERT INTO resource_assignments",
            StorageError::ConstraintViolation("UNIQUE constraint failed".into()),
        )
        .and(
            "SET is_primary = 1",
            StorageError::Backend("disk I/O error".into()),
        ),
    ));
    let err = ResourceAssignmentService::new(broken)
        .assign_resource(1, "agent", "a2", primary())
        .await
        .unwrap_err();

    let t = match err {
        ServiceError::Transaction(t) => t,
        other => panic!("expected transaction error, got {other:?}"),
    };
    assert!(!t.rollback.success);
    assert_eq!(t.rollback.operations_failed, 1);
    assert!(t.rollback.errors[0].contains("restore previous primary"), "{:?}", t.rollback.errors);
    assert!(t.message.contains("agent:a2"), "{}", t.message);
    assert_eq!(t.retry_count, 0);

    let primaries = count(
        &db,
        "SELECT COUNT(*) AS n FROM resource_assignments WHERE is_primary = 1",
    )
    .await;
    assert_eq!(primaries, 0, "the lost primary is what the report describes");
}

#[tokio::test]
async fn unknown_kind_is_a_validation_error() {
    let fx = setup().await;
    let svc = ResourceAssignmentService::new(fx.ctx.clone());
    let err = svc
        .assign_resource(1, "plugin", "p1", AssignOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(assignment_count(&fx.db).await, 0);
}

#[tokio::test]
async fn missing_project_and_inactive_resources_are_not_found() {
    let fx = setup().await;
    let svc = ResourceAssignmentService::new(fx.ctx.clone());

    for (project, kind, id) in [(99, "agent", "a1"), (1, "agent", "a3"), (1, "hook", "h2"), (1, "rule", "nope")] {
        let err = svc
            .assign_resource(project, kind, id, AssignOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RESOURCE_NOT_FOUND", "{project} {kind}:{id}");
    }
    assert_eq!(assignment_count(&fx.db).await, 0);
}

#[tokio::test]
async fn non_object_overrides_are_rejected() {
    let fx = setup().await;
    let svc = ResourceAssignmentService::new(fx.ctx.clone());
    let err = svc
        .assign_resource(
            1,
            "agent",
            "a1",
            AssignOptions {
                config_overrides: Some(json!("loud")),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation { field: Some(ref f), .. } if f == "config_overrides"));
}

#[tokio::test]
async fn shared_resource_touches_every_assignment() {
    let fx = setup().await;
    let svc = ResourceAssignmentService::new(fx.ctx.clone());

    let first = svc
        .assign_resource(1, "rule", "r1", AssignOptions::default())
        .await
        .unwrap();
    // Make the first row's timestamp recognizably old.
    fx.db
        .run(
            &Statement::prepare(
                "UPDATE resource_assignments SET updated_at = '2000-01-01T00:00:00Z' WHERE id = ?",
            )
            .bind([first.id]),
        )
        .await
        .unwrap();

    svc.assign_resource(2, "rule", "r1", AssignOptions::default())
        .await
        .unwrap();

    let stale = count(
        &fx.db,
        "SELECT COUNT(*) AS n FROM resource_assignments WHERE updated_at = '2000-01-01T00:00:00Z'",
    )
    .await;
    assert_eq!(stale, 0);
}

// ── reads, unassign and update ────────────────────────────────────────────────

#[tokio::test]
async fn available_resources_exclude_assigned_and_inactive() {
    let fx = setup().await;
    let svc = ResourceAssignmentService::new(fx.ctx.clone());
    svc.assign_resource(1, "rule", "r1", AssignOptions::default())
        .await
        .unwrap();

    let rules = svc.get_available_resources(1, Some("rule")).await.unwrap();
    let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["r2"]);

    let all = svc.get_available_resources(1, None).await.unwrap();
    assert!(all.iter().any(|r| r.id == "a1"));
    assert!(all.iter().any(|r| r.id == "h1"));
    assert!(!all.iter().any(|r| r.id == "a3" || r.id == "h2" || r.id == "r1"));
}

#[tokio::test]
async fn unassign_removes_once_then_is_not_found() {
    let fx = setup().await;
    let svc = ResourceAssignmentService::new(fx.ctx.clone());
    svc.assign_resource(1, "hook", "h1", AssignOptions::default())
        .await
        .unwrap();

    svc.unassign_resource(1, "hook", "h1").await.unwrap();
    assert_eq!(assignment_count(&fx.db).await, 0);

    let err = svc.unassign_resource(1, "hook", "h1").await.unwrap_err();
    assert_eq!(err.code(), "RESOURCE_NOT_FOUND");
}

#[tokio::test]
async fn update_promotes_to_primary_and_demotes_the_other() {
    let fx = setup().await;
    let svc = ResourceAssignmentService::new(fx.ctx.clone());
    svc.assign_resource(1, "agent", "a1", primary()).await.unwrap();
    svc.assign_resource(1, "agent", "a2", AssignOptions::default())
        .await
        .unwrap();

    let updated = svc
        .update_resource_assignment(
            1,
            "agent",
            "a2",
            AssignmentUpdate {
                is_primary: Some(true),
                assignment_reason: Some("lead reviewer".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.is_primary);
    assert_eq!(updated.assignment_reason.as_deref(), Some("lead reviewer"));

    let agents = svc.get_project_resources(1, Some("agent")).await.unwrap();
    let primaries: Vec<&str> = agents
        .iter()
        .filter(|a| a.is_primary)
        .map(|a| a.resource_id.as_str())
        .collect();
    assert_eq!(primaries, vec!["a2"]);
}

#[tokio::test]
async fn update_of_missing_assignment_is_not_found() {
    let fx = setup().await;
    let svc = ResourceAssignmentService::new(fx.ctx.clone());
    let err = svc
        .update_resource_assignment(1, "agent", "a1", AssignmentUpdate::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RESOURCE_NOT_FOUND");
}

#[tokio::test]
async fn listing_an_unknown_project_is_not_found() {
    let fx = setup().await;
    let svc = ResourceAssignmentService::new(fx.ctx.clone());
    let err = svc.get_project_resources(42, None).await.unwrap_err();
    assert_eq!(err.code(), "RESOURCE_NOT_FOUND");
}
