//! # Decision Graph
//!
//! Named routing graphs keyed by flow id. A node resolves the next
//! destination for a finished result through an ordered condition check:
//! domain conditions first, then an exact operation-type match, then a
//! default edge. A destination may name another component, a nested
//! sub-flow, or nothing at all (end of flow).
//!
//! Conditions are stored as an unordered map but always evaluated in the
//! fixed [`CONDITION_PRIORITY`] order, so resolution is deterministic even
//! though storage order is not.

use crate::core::error::{ControlPlaneError, ControlResult};
use crate::core::types::OperationResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Domain conditions, in evaluation priority order.
pub const CONDITION_PRIORITY: [&str; 6] = [
    "success",
    "failure",
    "timeout",
    "cache_hit",
    "cache_miss",
    "high_priority",
];

/// Destination prefix that names a nested sub-flow instead of a component.
const SUBFLOW_PREFIX: &str = "subflow:";

/// One node of a decision graph.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphNode {
    /// Component this node is associated with (informational).
    #[serde(default)]
    pub target: Option<String>,

    /// Operation the node's component performs (informational).
    #[serde(default)]
    pub operation: Option<String>,

    /// Destination when no condition matches and no `default` entry exists.
    #[serde(default)]
    pub default_next: Option<String>,

    /// Condition name (or operation type, or `default`) to destination.
    #[serde(default)]
    pub conditions: HashMap<String, String>,
}

/// Named routing graph for one flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionGraph {
    /// Flow this graph belongs to.
    pub flow_id: String,

    /// Node evaluation starts here when the current node is unknown.
    pub start_node: String,

    /// Node id to node.
    pub nodes: HashMap<String, GraphNode>,
}

/// Resolution outcome for a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextHop {
    /// Dispatch to this component next.
    Component(String),
    /// Evaluate this nested flow from its own start node.
    SubFlow(String),
    /// No next hop; deliver to the terminal sink.
    EndOfFlow,
}

impl DecisionGraph {
    /// A graph whose start node routes everything to the end of the flow.
    /// Used for flows with no registered graph.
    pub fn terminal(flow_id: impl Into<String>) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("start".to_string(), GraphNode::default());
        Self {
            flow_id: flow_id.into(),
            start_node: "start".to_string(),
            nodes,
        }
    }

    /// Check that the declared start node exists.
    pub fn validate(&self) -> ControlResult<()> {
        if !self.nodes.contains_key(&self.start_node) {
            return Err(ControlPlaneError::StartNodeMissing {
                flow: self.flow_id.clone(),
                node: self.start_node.clone(),
            });
        }
        Ok(())
    }
}

/// Resolve the next hop for `result` at `node_id` in `graph`.
///
/// An unknown node id restarts from the graph's declared start node; a
/// missing start node is a configuration error. Pure function: evaluation
/// never mutates the graph and has no side effects.
pub fn evaluate(
    graph: &DecisionGraph,
    node_id: &str,
    result: &OperationResult,
) -> ControlResult<NextHop> {
    let node = match graph.nodes.get(node_id) {
        Some(node) => node,
        None => graph
            .nodes
            .get(&graph.start_node)
            .ok_or_else(|| ControlPlaneError::StartNodeMissing {
                flow: graph.flow_id.clone(),
                node: graph.start_node.clone(),
            })?,
    };

    // Domain conditions in fixed priority order.
    for condition in CONDITION_PRIORITY {
        if result.matches_condition(condition) {
            if let Some(destination) = node.conditions.get(condition) {
                return Ok(classify(destination));
            }
        }
    }

    // Exact operation-type match.
    if let Some(destination) = node.conditions.get(&result.op_type) {
        return Ok(classify(destination));
    }

    // Default entry, then the node-level default edge.
    if let Some(destination) = node.conditions.get("default") {
        return Ok(classify(destination));
    }
    if let Some(destination) = &node.default_next {
        return Ok(classify(destination));
    }

    Ok(NextHop::EndOfFlow)
}

fn classify(destination: &str) -> NextHop {
    match destination.strip_prefix(SUBFLOW_PREFIX) {
        Some(flow) => NextHop::SubFlow(flow.to_string()),
        None => NextHop::Component(destination.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Operation;

    fn graph_with_node(node: GraphNode) -> DecisionGraph {
        let mut nodes = HashMap::new();
        nodes.insert("parser".to_string(), node);
        DecisionGraph {
            flow_id: "ingest".to_string(),
            start_node: "parser".to_string(),
            nodes,
        }
    }

    fn success_result() -> OperationResult {
        OperationResult::from_operation(&Operation::new("tokenize"), "parser", true)
    }

    #[test]
    fn test_domain_condition_outranks_operation_type() {
        let node = GraphNode {
            conditions: HashMap::from([
                ("success".to_string(), "enricher".to_string()),
                ("tokenize".to_string(), "archiver".to_string()),
            ]),
            ..Default::default()
        };
        let graph = graph_with_node(node);
        assert_eq!(
            evaluate(&graph, "parser", &success_result()).unwrap(),
            NextHop::Component("enricher".to_string())
        );
    }

    #[test]
    fn test_operation_type_outranks_default() {
        let node = GraphNode {
            conditions: HashMap::from([
                ("tokenize".to_string(), "archiver".to_string()),
                ("default".to_string(), "sink-stage".to_string()),
            ]),
            ..Default::default()
        };
        let graph = graph_with_node(node);
        assert_eq!(
            evaluate(&graph, "parser", &success_result()).unwrap(),
            NextHop::Component("archiver".to_string())
        );
    }

    #[test]
    fn test_failure_routes_before_success_edge() {
        let node = GraphNode {
            conditions: HashMap::from([
                ("success".to_string(), "enricher".to_string()),
                ("failure".to_string(), "dead-letter".to_string()),
            ]),
            ..Default::default()
        };
        let graph = graph_with_node(node);
        let mut result = success_result();
        result.success = false;
        assert_eq!(
            evaluate(&graph, "parser", &result).unwrap(),
            NextHop::Component("dead-letter".to_string())
        );
    }

    #[test]
    fn test_default_edge_and_end_of_flow() {
        let node = GraphNode {
            default_next: Some("archiver".to_string()),
            ..Default::default()
        };
        let graph = graph_with_node(node);
        assert_eq!(
            evaluate(&graph, "parser", &success_result()).unwrap(),
            NextHop::Component("archiver".to_string())
        );

        let bare = graph_with_node(GraphNode::default());
        assert_eq!(
            evaluate(&bare, "parser", &success_result()).unwrap(),
            NextHop::EndOfFlow
        );
    }

    #[test]
    fn test_unknown_node_restarts_from_start() {
        let node = GraphNode {
            conditions: HashMap::from([("success".to_string(), "enricher".to_string())]),
            ..Default::default()
        };
        let graph = graph_with_node(node);
        assert_eq!(
            evaluate(&graph, "never-heard-of-it", &success_result()).unwrap(),
            NextHop::Component("enricher".to_string())
        );
    }

    #[test]
    fn test_missing_start_node_is_configuration_error() {
        let graph = DecisionGraph {
            flow_id: "ingest".to_string(),
            start_node: "gone".to_string(),
            nodes: HashMap::new(),
        };
        assert!(graph.validate().is_err());
        let err = evaluate(&graph, "also-gone", &success_result()).unwrap_err();
        assert!(matches!(err, ControlPlaneError::StartNodeMissing { .. }));
    }

    #[test]
    fn test_subflow_destination_is_classified() {
        let node = GraphNode {
            conditions: HashMap::from([(
                "success".to_string(),
                "subflow:enrichment".to_string(),
            )]),
            ..Default::default()
        };
        let graph = graph_with_node(node);
        assert_eq!(
            evaluate(&graph, "parser", &success_result()).unwrap(),
            NextHop::SubFlow("enrichment".to_string())
        );
    }
}
