//! DependencyResolver and export validation against SQLite.

mod common;

use tether_resources::{
    AssignOptions, DependencyResolver, ExportResource, Project, ResourceAssignmentService,
    ResourceKey, ResourceType, Validator,
};

use common::setup;

fn key(kind: ResourceType, id: &str) -> ResourceKey {
    ResourceKey::new(kind, id)
}

fn export(kind: ResourceType, id: &str, is_primary: bool) -> ExportResource {
    ExportResource {
        resource_type: kind,
        resource_id: id.to_string(),
        is_primary,
    }
}

fn project(name: &str) -> Project {
    Project {
        id: 1,
        name: name.to_string(),
        description: None,
    }
}

// ── get_dependencies ──────────────────────────────────────────────────────────

#[tokio::test]
async fn explicit_edges_report_target_existence() {
    let fx = setup().await;
    let resolver = DependencyResolver::new(fx.db.as_ref());

    let a1 = resolver.get_dependencies(ResourceType::Agent, "a1").await.unwrap();
    assert!(a1[0].exists && !a1[0].inferred);
    assert_eq!(a1[0].dependency_type, "requires");

    let a2 = resolver.get_dependencies(ResourceType::Agent, "a2").await.unwrap();
    assert_eq!(a2.len(), 1);
    assert_eq!(a2[0].target(), key(ResourceType::Rule, "r3"));
    assert!(!a2[0].exists, "inactive target");

    let r2 = resolver.get_dependencies(ResourceType::Rule, "r2").await.unwrap();
    assert_eq!(r2[0].target(), key(ResourceType::Hook, "h9"));
    assert!(!r2[0].exists, "missing target");
    assert!(r2[0].is_critical);
}

#[tokio::test]
async fn mentions_of_resource_names_become_inferred_edges() {
    let fx = setup().await;
    let edges = DependencyResolver::new(fx.db.as_ref())
        .get_dependencies(ResourceType::Agent, "a1")
        .await
        .unwrap();

    let inferred: Vec<_> = edges.iter().filter(|e| e.inferred).collect();
    assert_eq!(inferred.len(), 1);
    assert_eq!(inferred[0].target(), key(ResourceType::Rule, "r2"));
    assert_eq!(inferred[0].dependency_type, "references");
    assert!(!inferred[0].is_critical);
}

#[tokio::test]
async fn unknown_resource_has_no_dependencies() {
    let fx = setup().await;
    let edges = DependencyResolver::new(fx.db.as_ref())
        .get_dependencies(ResourceType::Hook, "nope")
        .await
        .unwrap();
    assert!(edges.is_empty());
}

// ── validate_dependencies ─────────────────────────────────────────────────────

#[tokio::test]
async fn stored_cycle_is_reported_once() {
    let fx = setup().await;
    let set = [
        key(ResourceType::Agent, "x1"),
        key(ResourceType::Agent, "x2"),
        key(ResourceType::Agent, "x3"),
    ];
    let v = DependencyResolver::new(fx.db.as_ref())
        .validate_dependencies(&set)
        .await
        .unwrap();

    assert!(!v.is_valid());
    assert_eq!(
        v.circular_dependencies,
        vec!["agent:x1 -> agent:x2 -> agent:x3 -> agent:x1".to_string()]
    );
    assert!(v.missing_dependencies.is_empty());
}

#[tokio::test]
async fn missing_members_split_into_errors_and_warnings() {
    let fx = setup().await;
    let set = [key(ResourceType::Agent, "a1"), key(ResourceType::Agent, "a2")];
    let v = DependencyResolver::new(fx.db.as_ref())
        .validate_dependencies(&set)
        .await
        .unwrap();

    // a1 -> r1 critical, a1 -> r2 inferred, a2 -> r3 optional.
    assert_eq!(v.missing_dependencies.len(), 3);
    assert_eq!(v.errors.len(), 1);
    assert!(v.errors[0].contains("rule:r1"));
    assert_eq!(v.warnings.len(), 2);

    let closed = DependencyResolver::new(fx.db.as_ref())
        .validate_dependencies(&[
            key(ResourceType::Agent, "a1"),
            key(ResourceType::Rule, "r1"),
            key(ResourceType::Rule, "r2"),
        ])
        .await
        .unwrap();
    // r2 -> h9 is still critical and missing.
    assert_eq!(closed.errors.len(), 1);
    assert!(closed.errors[0].contains("hook:h9"));
}

// ── validate_export_requirements ──────────────────────────────────────────────

#[tokio::test]
async fn export_without_resources_is_invalid() {
    let fx = setup().await;
    let v = Validator::new(fx.db.as_ref())
        .validate_export_requirements(&project("web-app"), &[])
        .await
        .unwrap();
    assert!(!v.is_valid);
    assert!(v.missing_components.contains(&"resources".to_string()));
}

#[tokio::test]
async fn export_warns_about_agents_and_names() {
    let fx = setup().await;
    let validator = Validator::new(fx.db.as_ref());

    let no_agents = validator
        .validate_export_requirements(&project("web-app"), &[export(ResourceType::Rule, "r1", false)])
        .await
        .unwrap();
    assert!(no_agents.is_valid);
    assert!(no_agents.warnings.iter().any(|w| w.contains("no agents")));

    let two_primaries = validator
        .validate_export_requirements(
            &project("web-app"),
            &[
                export(ResourceType::Agent, "a2", true),
                export(ResourceType::Agent, "x1", true),
                export(ResourceType::Agent, "x2", false),
                export(ResourceType::Agent, "x3", false),
            ],
        )
        .await
        .unwrap();
    assert!(two_primaries.warnings.iter().any(|w| w.contains("2 primary agents")));
    assert!(
        two_primaries.errors.iter().any(|e| e.starts_with("circular dependency")),
        "{:?}",
        two_primaries.errors
    );

    let unsafe_name = validator
        .validate_export_requirements(&project("web app/v2"), &[export(ResourceType::Hook, "h1", false)])
        .await
        .unwrap();
    assert!(unsafe_name.suggested_name.is_some());
    assert!(unsafe_name.is_valid);
}

#[tokio::test]
async fn export_of_assigned_set_uses_assignment_rows() {
    let fx = setup().await;
    let svc = ResourceAssignmentService::new(fx.ctx.clone());
    for (kind, id) in [("agent", "a1"), ("rule", "r1"), ("hook", "h1")] {
        svc.assign_resource(1, kind, id, AssignOptions::default())
            .await
            .unwrap();
    }

    let project = Project::find(fx.db.as_ref(), 1).await.unwrap().unwrap();
    let resources: Vec<ExportResource> = svc
        .get_project_resources(1, None)
        .await
        .unwrap()
        .iter()
        .map(ExportResource::from)
        .collect();
    let v = Validator::new(fx.db.as_ref())
        .validate_export_requirements(&project, &resources)
        .await
        .unwrap();

    assert!(v.is_valid, "{:?}", v.errors);
    assert!(v.missing_components.is_empty());
    // a1 still mentions r2, which is not assigned.
    assert_eq!(v.warnings.len(), 1);
}
