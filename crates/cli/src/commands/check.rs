use std::path::Path;
use std::process;

use serde_json::Value;
use tether_resources::{
    DependencyResolver, ExportResource, Project, ResourceAssignmentService, ResourceType,
    ServiceError, Validator,
};

use crate::print_json;
use crate::session::Session;

/// Print errors, warnings and recommendations of a report in text mode.
fn say_findings(session: &Session, errors: &[String], warnings: &[String], recommendations: &[String]) {
    for e in errors {
        session.say(&format!("error: {}", e));
    }
    for w in warnings {
        session.say(&format!("warning: {}", w));
    }
    for r in recommendations {
        session.say(&format!("recommendation: {}", r));
    }
}

pub(crate) async fn cmd_deps(session: &Session, resource_type: &str, resource_id: &str) {
    let kind = session.expect_ok(ResourceType::parse(resource_type));
    let edges = session.expect_ok(
        DependencyResolver::new(&*session.ctx.gateway)
            .get_dependencies(kind, resource_id)
            .await,
    );
    if session.json() {
        print_json(&edges);
        return;
    }
    if edges.is_empty() {
        session.say(&format!("{}:{} has no dependencies", kind, resource_id));
    }
    for edge in &edges {
        let mut tags = vec![edge.dependency_type.clone()];
        if edge.is_critical {
            tags.push("critical".to_string());
        }
        if edge.inferred {
            tags.push("inferred".to_string());
        }
        if !edge.exists {
            tags.push("missing".to_string());
        }
        session.say(&format!("{} ({})", edge.target(), tags.join(", ")));
    }
}

/// Exits 1 when the definition has errors.
pub(crate) fn cmd_validate(session: &Session, resource_type: &str, file: &Path) {
    let data: Value = session.read_json(file);
    let report = Validator::new(&*session.ctx.gateway).validate_resource_definition(resource_type, &data);
    if session.json() {
        print_json(&report);
    } else {
        session.say(if report.is_valid { "valid" } else { "invalid" });
        say_findings(session, &report.errors, &report.warnings, &report.recommendations);
    }
    if !report.is_valid {
        process::exit(1);
    }
}

/// Exits 1 when the project's assignments cannot be exported.
pub(crate) async fn cmd_export_check(session: &Session, project_id: i64) {
    let gateway = &*session.ctx.gateway;
    let project = session.expect_ok(Project::find(gateway, project_id).await);
    let Some(project) = project else {
        crate::exit_with(
            &ServiceError::not_found("project", project_id),
            session.output,
            session.quiet,
        );
    };
    let assignments = session.expect_ok(
        ResourceAssignmentService::new(session.ctx.clone())
            .get_project_resources(project_id, None)
            .await,
    );
    let resources: Vec<ExportResource> = assignments.iter().map(ExportResource::from).collect();
    let validation = session.expect_ok(
        Validator::new(gateway)
            .validate_export_requirements(&project, &resources)
            .await,
    );

    if session.json() {
        print_json(&validation);
    } else {
        session.say(&format!(
            "project {} is {}exportable ({} resource(s))",
            project.name,
            if validation.is_valid { "" } else { "not " },
            resources.len()
        ));
        say_findings(
            session,
            &validation.errors,
            &validation.warnings,
            &validation.recommendations,
        );
        if let Some(name) = &validation.suggested_name {
            session.say(&format!("suggested export name: {}", name));
        }
    }
    if !validation.is_valid {
        process::exit(1);
    }
}
