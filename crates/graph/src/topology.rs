//! Plant dependency graph.
//!
//! Nodes are process units, edges point from an upstream unit to the unit it
//! feeds. Sensors report with a physical id, the topology is keyed by logical
//! id, and `physical_index` bridges the two.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use plantwatch_core::{Criticality, UpstreamNode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Topology parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Node as declared in the topology file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub physical_id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub criticality: Option<Criticality>,
}

impl Node {
    fn bare(id: &str) -> Self {
        Self {
            id: id.to_string(),
            physical_id: None,
            label: None,
            criticality: None,
        }
    }

    fn to_upstream(&self) -> UpstreamNode {
        UpstreamNode {
            logical_id: self.id.clone(),
            label: self.label.clone(),
            physical_id: self.physical_id.clone(),
            criticality: self.criticality,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TopologyFile {
    #[serde(default)]
    nodes: Vec<Node>,
    /// `[from, to]` pairs, upstream first.
    #[serde(default)]
    edges: Vec<(String, String)>,
}

/// Criticality and label of one machine, for display next to an alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeContext {
    pub criticality: Criticality,
    pub label: String,
}

impl Default for NodeContext {
    fn default() -> Self {
        Self {
            criticality: Criticality::C,
            label: "Unknown".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub mapped_physical_ids: usize,
}

/// Read-only after construction; share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, Node>,
    physical_index: HashMap<String, String>,
    incoming: HashMap<String, Vec<String>>,
    edge_count: usize,
}

impl DependencyGraph {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json(raw: &str) -> Result<Self, TopologyError> {
        let file: TopologyFile = serde_json::from_str(raw)?;
        Ok(Self::build(file))
    }

    pub fn from_file(path: &Path) -> Result<Self, TopologyError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Load the topology, or start with an empty graph if it cannot be read.
    /// Lookups against an empty graph return no context.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(graph) => {
                let stats = graph.stats();
                info!(
                    path = %path.display(),
                    nodes = stats.node_count,
                    edges = stats.edge_count,
                    "loaded plant topology"
                );
                graph
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "topology unavailable, alerts will carry no upstream context");
                Self::empty()
            }
        }
    }

    fn build(file: TopologyFile) -> Self {
        let mut graph = Self::empty();

        for node in file.nodes {
            if let Some(pid) = &node.physical_id {
                if let Some(previous) = graph.physical_index.insert(pid.clone(), node.id.clone()) {
                    warn!(physical_id = %pid, previous = %previous, current = %node.id, "physical id mapped twice, keeping the later node");
                }
            }
            graph.nodes.insert(node.id.clone(), node);
        }

        for (from, to) in file.edges {
            for id in [&from, &to] {
                if !graph.nodes.contains_key(id) {
                    graph.nodes.insert(id.clone(), Node::bare(id));
                }
            }
            let parents = graph.incoming.entry(to).or_default();
            if !parents.contains(&from) {
                parents.push(from);
                graph.edge_count += 1;
            }
        }

        graph
    }

    /// Logical id of the node a sensor reports as.
    pub fn resolve(&self, physical_id: &str) -> Option<&str> {
        self.physical_index.get(physical_id).map(String::as_str)
    }

    /// Every node with a directed path into `physical_id`'s node, nearest first.
    ///
    /// Excludes the node itself and anything downstream of it. Unknown ids
    /// yield an empty list.
    pub fn get_upstream_dependencies(&self, physical_id: &str) -> Vec<UpstreamNode> {
        let Some(start) = self.resolve(physical_id) else {
            return Vec::new();
        };

        let mut seen: HashSet<&str> = HashSet::from([start]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(start, 0)]);
        let mut found: Vec<(usize, &Node)> = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            let Some(parents) = self.incoming.get(current) else {
                continue;
            };
            for parent in parents {
                if seen.insert(parent.as_str()) {
                    if let Some(node) = self.nodes.get(parent) {
                        found.push((depth + 1, node));
                    }
                    queue.push_back((parent.as_str(), depth + 1));
                }
            }
        }

        found.sort_by(|(da, a), (db, b)| da.cmp(db).then_with(|| a.id.cmp(&b.id)));
        found.into_iter().map(|(_, node)| node.to_upstream()).collect()
    }

    /// Criticality and label for a sensor's node, `{C, "Unknown"}` when unmapped.
    pub fn get_context(&self, physical_id: &str) -> NodeContext {
        let Some(node) = self.resolve(physical_id).and_then(|id| self.nodes.get(id)) else {
            return NodeContext::default();
        };
        let fallback = NodeContext::default();
        NodeContext {
            criticality: node.criticality.unwrap_or(fallback.criticality),
            label: node.label.clone().unwrap_or(fallback.label),
        }
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.nodes.len(),
            edge_count: self.edge_count,
            mapped_physical_ids: self.physical_index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference plant: R1→R2→R3→R6, R4→R5→R6, R6→R7→R8.
    fn plant() -> DependencyGraph {
        DependencyGraph::from_json(
            r#"{
                "nodes": [
                    {"id": "R1", "physical_id": "M-01", "label": "Raw Feed", "criticality": "C"},
                    {"id": "R2", "physical_id": "M-02", "label": "Crusher", "criticality": "C"},
                    {"id": "R3", "physical_id": "M-03", "label": "Mixer", "criticality": "B"},
                    {"id": "R4", "physical_id": "M-04", "label": "Additive Feed", "criticality": "C"},
                    {"id": "R5", "physical_id": "M-05", "label": "Preheater", "criticality": "B"},
                    {"id": "R6", "physical_id": "M-06", "label": "Kiln", "criticality": "A"},
                    {"id": "R7", "physical_id": "M-07", "label": "Cooler", "criticality": "A"},
                    {"id": "R8", "physical_id": "M-08", "label": "Finish Mill", "criticality": "A"}
                ],
                "edges": [
                    ["R1", "R2"], ["R2", "R3"], ["R3", "R6"],
                    ["R4", "R5"], ["R5", "R6"],
                    ["R6", "R7"], ["R7", "R8"]
                ]
            }"#,
        )
        .unwrap()
    }

    fn ids(nodes: &[UpstreamNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.logical_id.as_str()).collect()
    }

    #[test]
    fn upstream_is_strict_ancestor_set() {
        let g = plant();
        let deps = g.get_upstream_dependencies("M-06");
        let mut up = ids(&deps);
        up.sort();
        assert_eq!(up, vec!["R1", "R2", "R3", "R4", "R5"]);
    }

    #[test]
    fn upstream_excludes_self_and_descendants() {
        let g = plant();
        let up = g.get_upstream_dependencies("M-07");
        assert!(!ids(&up).contains(&"R7"));
        assert!(!ids(&up).contains(&"R8"));
        assert_eq!(up.len(), 6);
    }

    #[test]
    fn upstream_nearest_first() {
        let g = plant();
        let up = g.get_upstream_dependencies("M-06");
        assert_eq!(&ids(&up)[..2], &["R3", "R5"]);
        assert_eq!(up[0].criticality, Some(Criticality::B));
        assert_eq!(up[0].physical_id.as_deref(), Some("M-03"));
    }

    #[test]
    fn source_node_has_no_upstream() {
        assert!(plant().get_upstream_dependencies("M-01").is_empty());
    }

    #[test]
    fn unknown_physical_id_is_empty() {
        let g = plant();
        assert!(g.get_upstream_dependencies("R6").is_empty());
        assert!(g.get_upstream_dependencies("nope").is_empty());
    }

    #[test]
    fn context_defaults_for_unknown_machine() {
        let g = plant();
        assert_eq!(g.get_context("M-06").label, "Kiln");
        assert_eq!(g.get_context("M-06").criticality, Criticality::A);
        assert_eq!(g.get_context("ghost"), NodeContext::default());
    }

    #[test]
    fn edge_to_undeclared_node_creates_bare_ancestor() {
        let g = DependencyGraph::from_json(
            r#"{"nodes": [{"id": "K", "physical_id": "K"}], "edges": [["X", "K"]]}"#,
        )
        .unwrap();
        let up = g.get_upstream_dependencies("K");
        assert_eq!(up.len(), 1);
        assert_eq!(up[0].logical_id, "X");
        assert_eq!(up[0].label, None);
        assert_eq!(g.get_context("K").label, "Unknown");
    }

    #[test]
    fn cycles_terminate_and_exclude_self() {
        let g = DependencyGraph::from_json(
            r#"{"nodes": [{"id": "A", "physical_id": "a"}, {"id": "B"}],
                "edges": [["A", "B"], ["B", "A"]]}"#,
        )
        .unwrap();
        assert_eq!(ids(&g.get_upstream_dependencies("a")), vec!["B"]);
    }

    #[test]
    fn duplicate_edges_count_once() {
        let g = DependencyGraph::from_json(r#"{"edges": [["A", "B"], ["A", "B"]]}"#).unwrap();
        assert_eq!(g.stats().edge_count, 1);
        assert_eq!(g.stats().node_count, 2);
    }

    #[test]
    fn missing_file_gives_empty_graph() {
        let g = DependencyGraph::load_or_empty(Path::new("/nonexistent/plant_topology.json"));
        assert!(g.is_empty());
        assert!(g.get_upstream_dependencies("M-06").is_empty());
    }

    #[test]
    fn malformed_file_gives_empty_graph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plant_topology.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(DependencyGraph::load_or_empty(&path).is_empty());
    }
}
