use std::path::Path;

use tether_resources::{
    ConflictResolution, ImportItem, ImportOptions, ImportPlanner, PreviewOptions,
};

use crate::print_json;
use crate::session::Session;

pub(crate) async fn cmd_import(
    session: &Session,
    project: i64,
    file: &Path,
    conflict: ConflictResolution,
    resolve_dependencies: bool,
    by: Option<String>,
    reason: Option<String>,
) {
    let items: Vec<ImportItem> = session.read_json(file);
    let options = ImportOptions {
        resolve_dependencies,
        conflict_resolution: conflict,
        assigned_by: by,
        import_reason: reason,
    };
    let result = session.expect_ok(
        ImportPlanner::new(session.ctx.clone())
            .import_resources(project, &items, options)
            .await,
    );

    if session.json() {
        print_json(&result);
        return;
    }
    let s = &result.import_summary;
    session.say(&format!(
        "{} resource(s): {} imported, {} skipped, {} failed, {} dependency edge(s)",
        s.total, s.successful, s.skipped, s.failed, s.dependencies
    ));
    for skipped in &result.skipped {
        session.say(&format!(
            "  skipped {}:{}: {}",
            skipped.resource_type, skipped.resource_id, skipped.reason
        ));
    }
    for failed in &result.failed {
        session.say(&format!(
            "  failed {}:{} [{}]: {}",
            failed.resource_type, failed.resource_id, failed.code, failed.error
        ));
    }
    for dep in &result.dependencies {
        let mut line = format!("  {} -> {}", dep.source(), dep.target());
        if dep.is_critical {
            line.push_str(" (critical)");
        }
        session.say(&line);
    }
}

pub(crate) async fn cmd_preview(
    session: &Session,
    project: i64,
    file: &Path,
    include_dependencies: bool,
    check_compatibility: bool,
) {
    let items: Vec<ImportItem> = session.read_json(file);
    let options = PreviewOptions {
        include_dependencies,
        check_compatibility,
    };
    let preview = session.expect_ok(
        ImportPlanner::new(session.ctx.clone())
            .preview_import(project, &items, options)
            .await,
    );

    if session.json() {
        print_json(&preview);
        return;
    }
    for r in &preview.resources {
        let mut line = format!("{}:{}", r.resource_type, r.resource_id);
        if !r.exists {
            line.push_str(" missing");
        }
        if r.already_assigned {
            line.push_str(" assigned");
        }
        if let Some(score) = r.compatibility_score {
            line.push_str(&format!(" score={:.1}", score));
        }
        session.say(&line);
    }
    if let Some(overall) = preview.summary.overall_compatibility {
        session.say(&format!("overall compatibility: {:.2}", overall));
    }
    for w in &preview.warnings {
        session.say(&format!("warning: {}", w));
    }
    for r in &preview.recommendations {
        session.say(&format!("recommendation: {}", r));
    }
}
