//! Resource definition and export-readiness checks.
//!
//! Errors mark a definition unusable. Warnings and recommendations never
//! block.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tether_storage::StatementGateway;

use crate::dependency::DependencyResolver;
use crate::error::ServiceError;
use crate::resource::{Project, ResourceAssignment, ResourceKey, ResourceType};

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;
const MIN_SYSTEM_PROMPT_LEN: usize = 50;
const MIN_RULE_CONTENT_LEN: usize = 20;
const HOOK_TIMEOUT_SECS: std::ops::RangeInclusive<i64> = 1..=600;

pub const AGENT_CATEGORIES: &[&str] = &[
    "development",
    "testing",
    "documentation",
    "security",
    "devops",
    "data",
    "design",
    "general",
];

pub const RULE_PRIORITIES: &[&str] = &["low", "medium", "high", "critical"];

pub const RULE_CATEGORIES: &[&str] = &[
    "coding-style",
    "security",
    "testing",
    "documentation",
    "performance",
    "architecture",
    "workflow",
    "general",
];

pub const HOOK_TYPES: &[&str] = &[
    "PreToolUse",
    "PostToolUse",
    "Notification",
    "UserPromptSubmit",
    "Stop",
    "SubagentStop",
    "PreCompact",
    "SessionStart",
    "SessionEnd",
];

static ACTIONABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(must|should|always|never|use|avoid|prefer|ensure|require|do not|don't)\b")
        .unwrap()
});

static DANGEROUS_COMMANDS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\brm\s+-[a-zA-Z]*[rR][a-zA-Z]*\s+(/|~|\*|/\*)(\s|;|$)", "recursive delete of a root, home or wildcard path"),
        (r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", "fork bomb"),
        (r"\bmkfs(\.[a-z0-9]+)?\b", "filesystem formatting"),
        (r"\bdd\s+[^;|]*\bof=/dev/", "raw write to a device"),
        (r">\s*/dev/(sd[a-z]|hd[a-z]|nvme\d|disk\d)", "redirect onto a block device"),
        (r"\bchmod\s+(-[a-zA-Z]*\s+)*777\s+/(\s|$)", "world-writable root"),
        (r"\b(curl|wget)\b[^|;]*\|\s*(sudo\s+)?(ba|z|da)?sh\b", "piping a download into a shell"),
        (r"\b(shutdown|reboot|halt|poweroff)\b", "host power control"),
    ]
    .into_iter()
    .map(|(p, label)| (Regex::new(p).unwrap(), label))
    .collect()
});

static UNSAFE_FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).unwrap());

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ValidationReport {
    fn finish(mut self) -> Self {
        self.is_valid = self.errors.is_empty();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub required_components: Vec<String>,
    pub missing_components: Vec<String>,
    /// Set when the project name is not filesystem-safe.
    pub suggested_name: Option<String>,
}

/// One member of the set being exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportResource {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub is_primary: bool,
}

impl From<&ResourceAssignment> for ExportResource {
    fn from(a: &ResourceAssignment) -> Self {
        ExportResource {
            resource_type: a.resource_type,
            resource_id: a.resource_id.clone(),
            is_primary: a.is_primary,
        }
    }
}

/// Check a resource definition given as a JSON object.
pub fn validate_resource_definition(resource_type: &str, data: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();
    let Ok(kind) = resource_type.parse::<ResourceType>() else {
        report
            .errors
            .push(format!("unknown resource type '{resource_type}'"));
        return report.finish();
    };
    if !data.is_object() {
        report
            .errors
            .push(format!("{kind} definition must be a JSON object"));
        return report.finish();
    }

    check_name(data, &mut report);
    if let Some(desc) = text(data, "description") {
        if desc.chars().count() > MAX_DESCRIPTION_LEN {
            report.warnings.push(format!(
                "description is longer than {MAX_DESCRIPTION_LEN} characters"
            ));
        }
    } else {
        report
            .recommendations
            .push("Add a description so the resource is easier to find".to_string());
    }

    match kind {
        ResourceType::Agent => check_agent(data, &mut report),
        ResourceType::Rule => check_rule(data, &mut report),
        ResourceType::Hook => check_hook(data, &mut report),
    }
    report.finish()
}

fn check_name(data: &Value, report: &mut ValidationReport) {
    match text(data, "name") {
        None => report.errors.push("name is required".to_string()),
        Some(name) if name.chars().count() > MAX_NAME_LEN => report
            .errors
            .push(format!("name must be at most {MAX_NAME_LEN} characters")),
        Some(_) => {}
    }
}

fn check_agent(data: &Value, report: &mut ValidationReport) {
    match text(data, "system_prompt") {
        None => report.errors.push("system_prompt is required".to_string()),
        Some(p) if p.chars().count() < MIN_SYSTEM_PROMPT_LEN => report.warnings.push(format!(
            "system_prompt is shorter than {MIN_SYSTEM_PROMPT_LEN} characters"
        )),
        Some(_) => {}
    }
    check_enum(data, "category", AGENT_CATEGORIES, report);

    match data.get("tools") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
        Some(_) => report
            .errors
            .push("tools must be an array of strings".to_string()),
    }
}

fn check_rule(data: &Value, report: &mut ValidationReport) {
    match text(data, "content") {
        None => report.errors.push("content is required".to_string()),
        Some(content) => {
            if content.chars().count() < MIN_RULE_CONTENT_LEN {
                report.warnings.push(format!(
                    "content is shorter than {MIN_RULE_CONTENT_LEN} characters"
                ));
            }
            if !ACTIONABLE_RE.is_match(content) {
                report.warnings.push(
                    "content has no actionable language (must, should, always, never, ...)"
                        .to_string(),
                );
                report
                    .recommendations
                    .push("Phrase the rule as an instruction the agent can follow".to_string());
            }
        }
    }
    check_enum(data, "priority", RULE_PRIORITIES, report);
    check_enum(data, "category", RULE_CATEGORIES, report);
}

fn check_hook(data: &Value, report: &mut ValidationReport) {
    match text(data, "command") {
        None => report.errors.push("command is required".to_string()),
        Some(command) => {
            for (re, label) in DANGEROUS_COMMANDS.iter() {
                if re.is_match(command) {
                    report
                        .errors
                        .push(format!("command contains a dangerous pattern: {label}"));
                }
            }
        }
    }

    match text(data, "hook_type") {
        None => report.errors.push("hook_type is required".to_string()),
        Some(t) if !HOOK_TYPES.contains(&t) => report.errors.push(format!(
            "unknown hook_type '{t}': expected one of {}",
            HOOK_TYPES.join(", ")
        )),
        Some(_) => {}
    }

    match data.get("timeout") {
        None | Some(Value::Null) => {}
        Some(v) => match v.as_i64() {
            Some(secs) if HOOK_TIMEOUT_SECS.contains(&secs) => {}
            _ => report.warnings.push(format!(
                "timeout should be between {} and {} seconds",
                HOOK_TIMEOUT_SECS.start(),
                HOOK_TIMEOUT_SECS.end()
            )),
        },
    }
}

fn check_enum(data: &Value, field: &str, allowed: &[&str], report: &mut ValidationReport) {
    if let Some(value) = text(data, field) {
        if !allowed.contains(&value) {
            report.warnings.push(format!(
                "unknown {field} '{value}': expected one of {}",
                allowed.join(", ")
            ));
        }
    }
}

/// Non-blank string field, trimmed.
fn text<'a>(data: &'a Value, field: &str) -> Option<&'a str> {
    data.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// `name` made usable as a directory name, or `None` if it already is.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let trimmed_ok = name.trim_matches(|c: char| c == '.' || c.is_whitespace()) == name;
    if !UNSAFE_FILENAME_RE.is_match(name) && trimmed_ok && !name.is_empty() {
        return None;
    }
    let replaced = UNSAFE_FILENAME_RE.replace_all(name, "-");
    let mut out = String::with_capacity(replaced.len());
    for c in replaced.trim_matches(|c: char| c == '.' || c == '-' || c.is_whitespace()).chars() {
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    if out.is_empty() {
        out.push_str("project");
    }
    Some(out)
}

pub struct Validator<'g> {
    resolver: DependencyResolver<'g>,
}

impl<'g> Validator<'g> {
    pub fn new(gateway: &'g dyn StatementGateway) -> Self {
        Validator {
            resolver: DependencyResolver::new(gateway),
        }
    }

    pub fn validate_resource_definition(&self, resource_type: &str, data: &Value) -> ValidationReport {
        validate_resource_definition(resource_type, data)
    }

    /// Check that `project` and `resources` form an exportable set.
    pub async fn validate_export_requirements(
        &self,
        project: &Project,
        resources: &[ExportResource],
    ) -> Result<ExportValidation, ServiceError> {
        let mut v = ExportValidation {
            required_components: vec!["project_name".to_string(), "resources".to_string()],
            ..Default::default()
        };

        let name = project.name.trim();
        if name.is_empty() {
            v.errors.push("project name is required".to_string());
            v.missing_components.push("project_name".to_string());
        } else if let Some(suggested) = sanitize_file_name(name) {
            v.warnings.push(format!(
                "project name '{name}' is not filesystem-safe"
            ));
            v.recommendations
                .push(format!("Export under the directory name '{suggested}'"));
            v.suggested_name = Some(suggested);
        }

        if resources.is_empty() {
            v.errors.push("project has no resources to export".to_string());
            v.missing_components.push("resources".to_string());
        }

        let count = |kind: ResourceType| resources.iter().filter(|r| r.resource_type == kind).count();
        if !resources.is_empty() {
            if count(ResourceType::Agent) == 0 {
                v.warnings.push("project has no agents".to_string());
                v.missing_components.push("agent".to_string());
            }
            if count(ResourceType::Rule) == 0 {
                v.recommendations
                    .push("Add rules to capture project conventions".to_string());
                v.missing_components.push("rule".to_string());
            }
            if count(ResourceType::Hook) == 0 {
                v.recommendations
                    .push("Add hooks to automate checks around tool use".to_string());
                v.missing_components.push("hook".to_string());
            }
        }

        let primary_agents = resources
            .iter()
            .filter(|r| r.resource_type == ResourceType::Agent && r.is_primary)
            .count();
        if primary_agents > 1 {
            v.warnings.push(format!(
                "project has {primary_agents} primary agents; at most one is expected"
            ));
        }

        let keys: Vec<ResourceKey> = resources
            .iter()
            .map(|r| ResourceKey::new(r.resource_type, r.resource_id.clone()))
            .collect();
        let deps = self.resolver.validate_dependencies(&keys).await?;
        v.errors.extend(deps.errors);
        v.warnings.extend(deps.warnings);

        v.is_valid = v.errors.is_empty();
        Ok(v)
    }
}
