//! Relationship graph between extracted objects and text chunks.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Node data: an extraction object or a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    /// Object type (`equation`, `table`...) or `chunk`.
    pub kind: String,
    pub page: u64,
}

/// Edge data: a typed reference and how often it occurs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEdge {
    #[serde(rename = "type")]
    pub edge_type: String,
    pub mentions: u64,
}

/// Exported edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub mentions: u64,
}

/// Directed reference graph keyed by node id.
#[derive(Debug, Default)]
pub struct RelationshipGraph {
    graph: DiGraph<GraphNode, ReferenceEdge>,
    index: HashMap<String, NodeIndex>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, or return the existing one with the same id.
    pub fn add_node(&mut self, id: impl Into<String>, kind: impl Into<String>, page: u64) -> NodeIndex {
        let id = id.into();
        if let Some(idx) = self.index.get(&id) {
            return *idx;
        }
        let idx = self.graph.add_node(GraphNode {
            id: id.clone(),
            kind: kind.into(),
            page,
        });
        self.index.insert(id, idx);
        idx
    }

    /// Record one mention of `target` from `source`.
    ///
    /// Repeated mentions increase the edge's count instead of adding edges.
    /// Returns false if either node is unknown.
    pub fn add_mention(&mut self, source: &str, target: &str, edge_type: &str) -> bool {
        let (Some(&from), Some(&to)) = (self.index.get(source), self.index.get(target)) else {
            return false;
        };
        let existing = self
            .graph
            .edges_connecting(from, to)
            .find(|e| e.weight().edge_type == edge_type)
            .map(|e| e.id());
        match existing {
            Some(edge) => self.graph[edge].mentions += 1,
            None => {
                self.graph.add_edge(
                    from,
                    to,
                    ReferenceEdge {
                        edge_type: edge_type.to_string(),
                        mentions: 1,
                    },
                );
            }
        }
        true
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Mention count on the edge between two nodes, summed over edge types.
    pub fn mentions(&self, source: &str, target: &str) -> u64 {
        match (self.index.get(source), self.index.get(target)) {
            (Some(&from), Some(&to)) => self
                .graph
                .edges_connecting(from, to)
                .map(|e| e.weight().mentions)
                .sum(),
            _ => 0,
        }
    }

    /// Ids of nodes that reference `target`.
    pub fn referrers(&self, target: &str) -> Vec<&str> {
        let Some(&idx) = self.index.get(target) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, petgraph::Direction::Incoming)
            .map(|e| self.graph[e.source()].id.as_str())
            .collect()
    }

    pub fn nodes(&self) -> Vec<GraphNode> {
        self.graph.node_weights().cloned().collect()
    }

    pub fn edges(&self) -> Vec<GraphEdge> {
        self.graph
            .edge_references()
            .map(|e| GraphEdge {
                source: self.graph[e.source()].id.clone(),
                target: self.graph[e.target()].id.clone(),
                edge_type: e.weight().edge_type.clone(),
                mentions: e.weight().mentions,
            })
            .collect()
    }

    /// Export as `{"nodes": [...], "edges": [...]}`.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "nodes": self.nodes(),
            "edges": self.edges(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_mentions_counted_on_one_edge() {
        let mut graph = RelationshipGraph::new();
        graph.add_node("eq-4", "equation", 0);
        graph.add_node("chunk-0", "chunk", 1);

        assert!(graph.add_mention("chunk-0", "eq-4", "cites_equation"));
        assert!(graph.add_mention("chunk-0", "eq-4", "cites_equation"));
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.mentions("chunk-0", "eq-4"), 2);
        assert_eq!(graph.referrers("eq-4"), vec!["chunk-0"]);
    }

    #[test]
    fn test_unknown_nodes_rejected() {
        let mut graph = RelationshipGraph::new();
        graph.add_node("a", "chunk", 0);
        assert!(!graph.add_mention("a", "missing", "cites_table"));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let mut graph = RelationshipGraph::new();
        let first = graph.add_node("a", "table", 0);
        let second = graph.add_node("a", "table", 0);
        assert_eq!(first, second);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_export_shape() {
        let mut graph = RelationshipGraph::new();
        graph.add_node("t1", "table", 2);
        graph.add_node("c0", "chunk", 2);
        graph.add_mention("c0", "t1", "cites_table");

        let value = graph.to_value();
        assert_eq!(value["nodes"][0]["id"], "t1");
        assert_eq!(value["edges"][0]["source"], "c0");
        assert_eq!(value["edges"][0]["type"], "cites_table");
        assert_eq!(value["edges"][0]["mentions"], 1);
    }
}
