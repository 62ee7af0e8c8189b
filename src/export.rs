//! Read-only export of graphs: the tuple view consumed by external
//! serializers, plus a DOT rendering with per-relation edge colors and
//! transition probabilities.

use itertools::Itertools;
use tracing::warn;

use crate::graph::{Graph, NodeId};
use crate::math::Map;
use crate::event::TIME_RELATION;

/// One exported node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportNode {
    /// Stable node identifier within this run.
    pub id: NodeId,
    /// Display label of the node's event type.
    pub label: String,
    /// Whether this is the INITIAL node.
    pub is_initial: bool,
    /// Whether this is the TERMINAL node.
    pub is_terminal: bool,
}

/// One exported edge.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportEdge {
    /// Source node identifier.
    pub source: NodeId,
    /// Target node identifier.
    pub target: NodeId,
    /// Relation tag of the edge.
    pub relation: String,
    /// Number of underlying transitions the edge aggregates.
    pub count: u64,
    /// Fraction of the source's event nodes taking this edge, when the
    /// source aggregates more than a single node.
    pub probability: Option<f64>,
}

/// A snapshot of a graph, ready for serialization. Node identifiers are
/// stable within one run.
#[derive(Debug, Clone)]
pub struct ExportView {
    nodes: Vec<ExportNode>,
    edges: Vec<ExportEdge>,
}

impl ExportView {
    /// Captures the given graph. Edge probabilities are filled in for nodes
    /// standing for more than one event node.
    pub fn capture(graph: &impl Graph) -> Self {
        use crate::Show;
        let nodes = graph
            .node_ids()
            .into_iter()
            .map(|id| ExportNode {
                id,
                label: graph.etype_of(id).show(),
                is_initial: id == graph.initial_id(),
                is_terminal: id == graph.terminal_id(),
            })
            .collect_vec();
        let edges = graph
            .edge_tuples()
            .into_iter()
            .map(|(source, target, relation, count)| {
                let size = graph.node_size(source);
                ExportEdge {
                    source,
                    target,
                    relation,
                    count,
                    probability: (size > 1).then(|| count as f64 / size as f64),
                }
            })
            .collect_vec();
        Self { nodes, edges }
    }

    /// The exported nodes.
    pub fn nodes(&self) -> &[ExportNode] {
        &self.nodes
    }

    /// The exported edges.
    pub fn edges(&self) -> &[ExportEdge] {
        &self.edges
    }

    /// Serializes the view to the DOT format. Relations are distinguished by
    /// edge color; edges carry their transition probability (two decimals)
    /// as label where one is known.
    pub fn to_dot(&self, name: &str) -> String {
        let mut colors = RelationColors::new();
        let header = std::iter::once(format!("digraph \"{name}\" {{"));
        let nodes = self.nodes.iter().map(|node| {
            if node.is_initial || node.is_terminal {
                format!("  {} [label=\"{}\", shape=box]", node.id, node.label)
            } else {
                format!("  {} [label=\"{}\"]", node.id, node.label)
            }
        });
        let edges = self.edges.iter().map(|edge| {
            let label = edge
                .probability
                .map(|p| prob_to_string(p))
                .unwrap_or_default();
            format!(
                "  {} -> {} [label=\"{}\", color=\"{}\"]",
                edge.source,
                edge.target,
                label,
                colors.color_for(&edge.relation),
            )
        });
        header
            .chain(nodes)
            .chain(edges)
            .chain(std::iter::once("}".to_string()))
            .join("\n")
    }
}

/// Rounds an edge probability to two decimal places for display.
fn prob_to_string(probability: f64) -> String {
    format!("{:.2}", probability)
}

/// Hands out one X11 color per relation, falling back to the default color
/// once the palette is exhausted.
struct RelationColors {
    available: Vec<&'static str>,
    assigned: Map<String, &'static str>,
    reported_deficiency: bool,
}

const DEFAULT_RELATION_COLOR: &str = "black";

impl RelationColors {
    fn new() -> Self {
        let mut assigned = Map::new();
        assigned.insert(TIME_RELATION.to_string(), DEFAULT_RELATION_COLOR);
        Self {
            available: vec![
                "darkorange1",
                "goldenrod",
                "darkseagreen",
                "green3",
                "gray66",
                "indianred",
                "indigo",
                "yellow1",
                "thistle",
            ],
            assigned,
            reported_deficiency: false,
        }
    }

    fn color_for(&mut self, relation: &str) -> &'static str {
        if let Some(&color) = self.assigned.get(relation) {
            return color;
        }
        if self.available.is_empty() {
            if !self.reported_deficiency {
                warn!(
                    relation,
                    "ran out of edge colors for relations, using the default"
                );
                self.reported_deficiency = true;
            }
            return DEFAULT_RELATION_COLOR;
        }
        let color = self.available.remove(0);
        self.assigned.insert(relation.to_string(), color);
        color
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariants::TemporalInvariantSet;
    use crate::partition_graph::PartitionGraph;
    use crate::trace_graph::ChainsTraceGraph;

    #[test]
    fn trace_graph_capture_lists_every_transition() {
        let graph = ChainsTraceGraph::from_label_traces([["a", "b"]]).unwrap();
        let view = ExportView::capture(&graph);
        assert_eq!(view.nodes().len(), 4);
        // INITIAL -> a -> b -> TERMINAL
        assert_eq!(view.edges().len(), 3);
        assert!(view.edges().iter().all(|e| e.probability.is_none()));
        assert!(view.nodes().iter().any(|n| n.is_initial));
        assert!(view.nodes().iter().any(|n| n.is_terminal));
    }

    #[test]
    fn partition_graph_capture_carries_probabilities() {
        let graph = ChainsTraceGraph::from_label_traces([["a", "b"], ["a", "c"]]).unwrap();
        let pg = PartitionGraph::initialize_from(
            graph.as_trace_graph(),
            TemporalInvariantSet::new(),
        )
        .unwrap();
        let view = ExportView::capture(&pg);

        let a_partition = view
            .nodes()
            .iter()
            .find(|n| n.label == "a")
            .expect("a partition exported");
        let from_a: Vec<&ExportEdge> = view
            .edges()
            .iter()
            .filter(|e| e.source == a_partition.id)
            .collect();
        assert_eq!(from_a.len(), 2);
        for edge in from_a {
            assert_eq!(edge.count, 1);
            assert_eq!(edge.probability, Some(0.5));
        }
    }

    #[test]
    fn dot_output_shapes_sentinels_and_colors_relations() {
        use crate::event::Event;
        let graph = ChainsTraceGraph::builder()
            .trace_with_relations([
                (Event::with_label("a"), vec![]),
                (Event::with_label("b"), vec!["spawns".to_string()]),
            ])
            .build()
            .unwrap();
        let dot = ExportView::capture(&graph).to_dot("model");

        assert!(dot.starts_with("digraph \"model\" {"));
        assert!(dot.ends_with('}'));
        assert!(dot.contains("label=\"INITIAL\", shape=box"));
        assert!(dot.contains("color=\"black\""));
        assert!(dot.contains("color=\"darkorange1\""));
    }

    #[test]
    fn probabilities_render_with_two_decimals() {
        assert_eq!(prob_to_string(0.5), "0.50");
        assert_eq!(prob_to_string(1.0 / 3.0), "0.33");
    }
}
