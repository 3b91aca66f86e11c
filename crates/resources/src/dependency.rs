//! Dependency discovery and validation between resources.
//!
//! Edges come from two places. Explicit edges are rows of
//! `resource_dependencies`, re-checked against the lookup tables on every
//! read. Inferred edges are found by scanning a resource's own text for the
//! names of other active resources; they are never stored and never
//! critical.
//!
//! Validation runs over a closed set of resources: edges leaving the set
//! are missing dependencies, and cycles inside it are errors.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tether_storage::{GatewayExt, Row, StatementGateway};

use crate::error::ServiceError;
use crate::resource::{
    get_bool, get_str, is_resource_active, list_active_resources, opt_str, ResourceKey,
    ResourceType,
};

/// Dependency type given to edges found by content scanning.
pub const INFERRED_DEPENDENCY_TYPE: &str = "references";

/// Names shorter than this are too ambiguous to infer references from.
const MIN_INFERRED_NAME_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    pub source_type: ResourceType,
    pub source_id: String,
    pub target_type: ResourceType,
    pub target_id: String,
    pub dependency_type: String,
    pub is_critical: bool,
    /// The target is present and active.
    pub exists: bool,
    /// Found by content scanning rather than stored.
    pub inferred: bool,
}

impl DependencyEdge {
    pub fn source(&self) -> ResourceKey {
        ResourceKey::new(self.source_type, self.source_id.clone())
    }

    pub fn target(&self) -> ResourceKey {
        ResourceKey::new(self.target_type, self.target_id.clone())
    }
}

/// An edge whose target lies outside the validated set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDependency {
    pub source: ResourceKey,
    pub target: ResourceKey,
    pub dependency_type: String,
    pub is_critical: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub missing_dependencies: Vec<MissingDependency>,
    pub circular_dependencies: Vec<String>,
}

impl DependencyValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct DependencyResolver<'g> {
    gateway: &'g dyn StatementGateway,
}

impl<'g> DependencyResolver<'g> {
    pub fn new(gateway: &'g dyn StatementGateway) -> Self {
        DependencyResolver { gateway }
    }

    /// Explicit edges (stored order) followed by inferred edges.
    pub async fn get_dependencies(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Vec<DependencyEdge>, ServiceError> {
        let mut edges = self.explicit_edges(resource_type, resource_id).await?;
        let inferred = self
            .inferred_edges(resource_type, resource_id, &edges)
            .await?;
        edges.extend(inferred);
        Ok(edges)
    }

    /// Load edges for every member of `resources` and analyze the set.
    pub async fn validate_dependencies(
        &self,
        resources: &[ResourceKey],
    ) -> Result<DependencyValidation, ServiceError> {
        let mut edges = Vec::new();
        let mut seen = HashSet::new();
        for key in resources {
            if seen.insert(key) {
                edges.extend(
                    self.get_dependencies(key.resource_type, &key.resource_id)
                        .await?,
                );
            }
        }
        Ok(analyze_dependencies(resources, &edges))
    }

    async fn explicit_edges(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Vec<DependencyEdge>, ServiceError> {
        let rows = self
            .gateway
            .prepare(
                "SELECT target_type, target_id, dependency_type, is_critical \
                 FROM resource_dependencies \
                 WHERE source_type = ? AND source_id = ? \
                 ORDER BY id",
            )
            .bind([resource_type.as_str(), resource_id])
            .all()
            .await?;

        let mut edges = Vec::with_capacity(rows.len());
        for row in &rows {
            let target_type = match get_str(row, "target_type")?.parse::<ResourceType>() {
                Ok(t) => t,
                Err(_) => {
                    tracing::warn!(
                        target: "tether::dependency",
                        source = %ResourceKey::new(resource_type, resource_id),
                        target_type = opt_str(row, "target_type").as_deref().unwrap_or(""),
                        "ignoring dependency with unknown target type"
                    );
                    continue;
                }
            };
            let target_id = get_str(row, "target_id")?;
            let exists = is_resource_active(self.gateway, target_type, &target_id).await?;
            edges.push(DependencyEdge {
                source_type: resource_type,
                source_id: resource_id.to_string(),
                target_type,
                target_id,
                dependency_type: opt_str(row, "dependency_type")
                    .unwrap_or_else(|| "requires".to_string()),
                is_critical: get_bool(row, "is_critical"),
                exists,
                inferred: false,
            });
        }
        Ok(edges)
    }

    async fn inferred_edges(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        explicit: &[DependencyEdge],
    ) -> Result<Vec<DependencyEdge>, ServiceError> {
        let Some(content) = self.content_of(resource_type, resource_id).await? else {
            return Ok(Vec::new());
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let source = ResourceKey::new(resource_type, resource_id);
        let known: BTreeSet<ResourceKey> = explicit.iter().map(DependencyEdge::target).collect();

        let mut edges = Vec::new();
        for kind in ResourceType::ALL {
            for candidate in list_active_resources(self.gateway, kind).await? {
                let key = candidate.key();
                if key == source || known.contains(&key) {
                    continue;
                }
                if mentions(&content, &candidate.name) {
                    edges.push(DependencyEdge {
                        source_type: resource_type,
                        source_id: resource_id.to_string(),
                        target_type: kind,
                        target_id: candidate.id,
                        dependency_type: INFERRED_DEPENDENCY_TYPE.to_string(),
                        is_critical: false,
                        exists: true,
                        inferred: true,
                    });
                }
            }
        }
        Ok(edges)
    }

    /// The resource's scannable text columns joined by newlines.
    async fn content_of(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Option<String>, ServiceError> {
        let columns = resource_type.content_columns();
        let query = format!(
            "SELECT {} FROM {} WHERE id = ?",
            columns.join(", "),
            resource_type.table()
        );
        let row: Option<Row> = self.gateway.prepare(&query).bind([resource_id]).first().await?;
        Ok(row.map(|row| {
            columns
                .iter()
                .filter_map(|c| opt_str(&row, c))
                .collect::<Vec<_>>()
                .join("\n")
        }))
    }
}

/// Whole-word, case-insensitive search for `name` in `content`.
fn mentions(content: &str, name: &str) -> bool {
    let name = name.trim();
    if name.chars().count() < MIN_INFERRED_NAME_LEN {
        return false;
    }
    word_pattern(name).is_some_and(|re| re.is_match(content))
}

fn word_pattern(name: &str) -> Option<Regex> {
    let escaped = regex::escape(name);
    let start = if name.starts_with(|c: char| c.is_alphanumeric() || c == '_') {
        r"\b"
    } else {
        ""
    };
    let end = if name.ends_with(|c: char| c.is_alphanumeric() || c == '_') {
        r"\b"
    } else {
        ""
    };
    RegexBuilder::new(&format!("{start}{escaped}{end}"))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Missing-dependency and cycle analysis over exactly `resources`.
///
/// Edges whose source is outside the set are ignored. The result depends on
/// the order of `resources` but not on the order of `edges`: missing
/// dependencies are sorted by source and target, a pair reached by several
/// edges is critical if any of them is, and the cycle search visits
/// neighbours in key order.
pub fn analyze_dependencies(
    resources: &[ResourceKey],
    edges: &[DependencyEdge],
) -> DependencyValidation {
    let mut order: Vec<&ResourceKey> = Vec::new();
    let mut members: BTreeSet<&ResourceKey> = BTreeSet::new();
    for key in resources {
        if members.insert(key) {
            order.push(key);
        }
    }

    let mut adjacency: BTreeMap<ResourceKey, BTreeSet<ResourceKey>> = BTreeMap::new();
    let mut missing: BTreeMap<(ResourceKey, ResourceKey), (bool, String)> = BTreeMap::new();

    for edge in edges {
        let source = edge.source();
        if !members.contains(&source) {
            continue;
        }
        let target = edge.target();
        if members.contains(&target) {
            adjacency.entry(source).or_default().insert(target);
            continue;
        }
        let candidate = (edge.is_critical, edge.dependency_type.clone());
        missing
            .entry((source, target))
            .and_modify(|current| {
                // Critical wins, then the smallest dependency type.
                if (candidate.0, std::cmp::Reverse(&candidate.1))
                    > (current.0, std::cmp::Reverse(&current.1))
                {
                    *current = candidate.clone();
                }
            })
            .or_insert_with(|| candidate.clone());
    }

    let mut result = DependencyValidation::default();
    for ((source, target), (is_critical, dependency_type)) in missing {
        if is_critical {
            result.errors.push(format!(
                "{source} has a critical dependency on {target}, which is not included"
            ));
        } else {
            result
                .warnings
                .push(format!("{source} depends on {target}, which is not included"));
        }
        result.missing_dependencies.push(MissingDependency {
            source,
            target,
            dependency_type,
            is_critical,
        });
    }

    let mut visited: HashSet<ResourceKey> = HashSet::new();
    for start in order {
        if !visited.contains(start) {
            let mut path = Vec::new();
            find_cycles(start, &adjacency, &mut visited, &mut path, &mut result.circular_dependencies);
        }
    }
    for cycle in &result.circular_dependencies {
        result.errors.push(format!("circular dependency: {cycle}"));
    }

    result
}

/// Depth-first search. `path` doubles as the recursion stack.
fn find_cycles(
    node: &ResourceKey,
    adjacency: &BTreeMap<ResourceKey, BTreeSet<ResourceKey>>,
    visited: &mut HashSet<ResourceKey>,
    path: &mut Vec<ResourceKey>,
    cycles: &mut Vec<String>,
) {
    visited.insert(node.clone());
    path.push(node.clone());

    for next in adjacency.get(node).into_iter().flatten() {
        if let Some(pos) = path.iter().position(|k| k == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(ToString::to_string).collect();
            cycle.push(next.to_string());
            cycles.push(cycle.join(" -> "));
        } else if !visited.contains(next) {
            find_cycles(next, adjacency, visited, path, cycles);
        }
    }

    path.pop();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(t: ResourceType, id: &str) -> ResourceKey {
        ResourceKey::new(t, id)
    }

    fn edge(src: &str, dst: &str, critical: bool) -> DependencyEdge {
        DependencyEdge {
            source_type: ResourceType::Agent,
            source_id: src.to_string(),
            target_type: ResourceType::Agent,
            target_id: dst.to_string(),
            dependency_type: "requires".to_string(),
            is_critical: critical,
            exists: true,
            inferred: false,
        }
    }

    fn agents(ids: &[&str]) -> Vec<ResourceKey> {
        ids.iter().map(|id| key(ResourceType::Agent, id)).collect()
    }

    #[test]
    fn three_node_cycle_is_reported_once_in_order() {
        let set = agents(&["A", "B", "C"]);
        let edges = [edge("A", "B", true), edge("B", "C", true), edge("C", "A", true)];
        let result = analyze_dependencies(&set, &edges);

        assert_eq!(
            result.circular_dependencies,
            vec!["agent:A -> agent:B -> agent:C -> agent:A".to_string()]
        );
        assert_eq!(result.errors.len(), 1);
        assert!(result.missing_dependencies.is_empty());
    }

    #[test]
    fn independent_cycles_are_all_reported() {
        let set = agents(&["A", "B", "C", "D"]);
        let edges = [
            edge("A", "B", false),
            edge("B", "A", false),
            edge("C", "D", false),
            edge("D", "C", false),
        ];
        let result = analyze_dependencies(&set, &edges);
        assert_eq!(result.circular_dependencies.len(), 2);
        assert!(!result.is_valid());
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let set = agents(&["A"]);
        let result = analyze_dependencies(&set, &[edge("A", "A", false)]);
        assert_eq!(result.circular_dependencies, vec!["agent:A -> agent:A".to_string()]);
    }

    #[test]
    fn edges_leaving_the_set_are_missing() {
        let set = agents(&["A"]);
        let edges = [edge("A", "X", true), edge("A", "Y", false)];
        let result = analyze_dependencies(&set, &edges);

        assert_eq!(result.missing_dependencies.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("agent:X"));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("agent:Y"));
        assert!(result.circular_dependencies.is_empty());
    }

    #[test]
    fn edges_from_outside_the_set_are_ignored() {
        let set = agents(&["A"]);
        let result = analyze_dependencies(&set, &[edge("Z", "Q", true)]);
        assert_eq!(result, DependencyValidation::default());
    }

    #[test]
    fn edge_order_does_not_change_reported_sets() {
        let set = agents(&["A", "B", "C"]);
        // From A both B and C are reachable, so the DFS prunes whichever
        // it reaches second.
        let forward = [
            edge("A", "B", true),
            edge("A", "C", true),
            edge("B", "C", true),
            edge("C", "B", true),
            edge("A", "X", false),
            edge("B", "X", true),
            edge("A", "X", true),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = analyze_dependencies(&set, &forward);
        let b = analyze_dependencies(&set, &reversed);
        assert_eq!(a, b);
        assert_eq!(
            a.circular_dependencies,
            vec!["agent:B -> agent:C -> agent:B".to_string()]
        );
        assert!(a.warnings.is_empty(), "A -> X is critical through one of its edges");
        assert_eq!(a.missing_dependencies.len(), 2);
        assert_eq!(a.errors.len(), 3);
    }

    #[test]
    fn name_mentions_are_whole_word_and_case_insensitive() {
        assert!(mentions("Ask the Code Reviewer first.", "code reviewer"));
        assert!(!mentions("precode reviewers", "code reviewer"));
        assert!(!mentions("use qa now", "qa"), "short names are ignored");
        assert!(mentions("run lint.fix (c++) after", "c++"));
    }
}
