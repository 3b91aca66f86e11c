use tether_resources::{
    AssignOptions, AssignmentUpdate, ResourceAssignment, ResourceAssignmentService,
};

use super::parse_overrides;
use crate::print_json;
use crate::session::Session;

pub(crate) struct AssignArgs<'a> {
    pub(crate) project: i64,
    pub(crate) resource_type: &'a str,
    pub(crate) resource_id: &'a str,
    pub(crate) primary: bool,
    pub(crate) order: Option<i64>,
    pub(crate) overrides: Option<&'a str>,
    pub(crate) by: Option<String>,
    pub(crate) reason: Option<String>,
}

pub(crate) struct UpdateArgs<'a> {
    pub(crate) primary: Option<bool>,
    pub(crate) order: Option<i64>,
    pub(crate) overrides: Option<&'a str>,
    pub(crate) reason: Option<String>,
}

fn describe(a: &ResourceAssignment) -> String {
    let mut line = format!("{}. {}:{}", a.assignment_order, a.resource_type, a.resource_id);
    if a.is_primary {
        line.push_str(" (primary)");
    }
    line
}

pub(crate) async fn cmd_assign(session: &Session, args: AssignArgs<'_>) {
    let options = AssignOptions {
        is_primary: args.primary,
        assignment_order: args.order,
        config_overrides: parse_overrides(session, args.overrides),
        assigned_by: args.by,
        assignment_reason: args.reason,
    };
    let svc = ResourceAssignmentService::new(session.ctx.clone());
    let assignment = session.expect_ok(
        svc.assign_resource(args.project, args.resource_type, args.resource_id, options)
            .await,
    );
    if session.json() {
        print_json(&assignment);
    } else {
        session.say(&format!(
            "assigned {} to project {}",
            describe(&assignment),
            assignment.project_id
        ));
    }
}

pub(crate) async fn cmd_unassign(
    session: &Session,
    project: i64,
    resource_type: &str,
    resource_id: &str,
) {
    let svc = ResourceAssignmentService::new(session.ctx.clone());
    session.expect_ok(svc.unassign_resource(project, resource_type, resource_id).await);
    if session.json() {
        print_json(&serde_json::json!({ "unassigned": true }));
    } else {
        session.say(&format!(
            "unassigned {}:{} from project {}",
            resource_type, resource_id, project
        ));
    }
}

pub(crate) async fn cmd_update(
    session: &Session,
    project: i64,
    resource_type: &str,
    resource_id: &str,
    args: UpdateArgs<'_>,
) {
    let update = AssignmentUpdate {
        is_primary: args.primary,
        assignment_order: args.order,
        config_overrides: parse_overrides(session, args.overrides),
        assignment_reason: args.reason,
    };
    let svc = ResourceAssignmentService::new(session.ctx.clone());
    let assignment = session.expect_ok(
        svc.update_resource_assignment(project, resource_type, resource_id, update)
            .await,
    );
    if session.json() {
        print_json(&assignment);
    } else {
        session.say(&format!("updated {}", describe(&assignment)));
    }
}

pub(crate) async fn cmd_list(session: &Session, project: i64, resource_type: Option<&str>) {
    let svc = ResourceAssignmentService::new(session.ctx.clone());
    let assignments = session.expect_ok(svc.get_project_resources(project, resource_type).await);
    if session.json() {
        print_json(&assignments);
        return;
    }
    if assignments.is_empty() {
        session.say(&format!("project {} has no assignments", project));
    }
    for a in &assignments {
        session.say(&describe(a));
    }
}

pub(crate) async fn cmd_available(session: &Session, project: i64, resource_type: Option<&str>) {
    let svc = ResourceAssignmentService::new(session.ctx.clone());
    let resources = session.expect_ok(svc.get_available_resources(project, resource_type).await);
    if session.json() {
        print_json(&resources);
        return;
    }
    for r in &resources {
        session.say(&format!("{}  {}", r.key(), r.name));
    }
}
