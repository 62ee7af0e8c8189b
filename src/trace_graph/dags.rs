//! Construction of trace graphs from partially ordered (vector-clocked)
//! traces. Transitions follow immediate precedence under the componentwise
//! partial order, so each trace becomes a DAG instead of a chain.

use itertools::Itertools;
use tracing::debug;

use crate::event::{Event, EventType, TIME_RELATION};
use crate::graph::{Graph, NodeId};
use crate::math::OrderedSet;
use crate::time::VectorTime;
use crate::trace_graph::{GraphBuildError, TraceGraph};

/// A trace graph whose traces are vector-clock-ordered DAGs.
#[derive(Debug, Clone)]
pub struct DagsTraceGraph(TraceGraph);

impl std::ops::Deref for DagsTraceGraph {
    type Target = TraceGraph;
    fn deref(&self) -> &TraceGraph {
        &self.0
    }
}

impl DagsTraceGraph {
    /// Builds a DAG trace graph from clocked events. Within a trace a
    /// transition `u -> v` is wired iff `clock(u)` immediately precedes
    /// `clock(v)`, i.e. no third event fits strictly between the two.
    pub fn from_traces(
        traces: impl IntoIterator<Item = Vec<(Event, VectorTime)>>,
    ) -> Result<Self, GraphBuildError> {
        let mut graph = TraceGraph::new();
        for (trace_idx, events) in traces.into_iter().enumerate() {
            if events.is_empty() {
                return Err(GraphBuildError::EmptyTrace { trace: trace_idx });
            }
            if events.iter().any(|(e, _)| e.etype().is_sentinel()) {
                return Err(GraphBuildError::SentinelEvent { trace: trace_idx });
            }
            for (left, right) in events.iter().tuple_combinations() {
                if left.1 == right.1 {
                    return Err(GraphBuildError::InconsistentClocks { trace: trace_idx });
                }
            }

            let trace_id = graph.traces.len();
            let members = events
                .into_iter()
                .map(|(event, clock)| graph.add_clocked_node(trace_id, event, clock))
                .collect_vec();

            for (&u, &v) in members.iter().cartesian_product(members.iter()) {
                if u == v {
                    continue;
                }
                let cu = graph.node(u).vector_time().expect("clocked node").clone();
                let cv = graph.node(v).vector_time().expect("clocked node").clone();
                if !cu.happens_before(&cv) {
                    continue;
                }
                let immediate = !members.iter().any(|&w| {
                    w != u && w != v && {
                        let cw = graph.node(w).vector_time().expect("clocked node");
                        cu.happens_before(cw) && cw.happens_before(&cv)
                    }
                });
                if immediate {
                    graph.link(u, v, [TIME_RELATION.to_string()]);
                }
            }

            // Minimal events hang off INITIAL, maximal ones drain into TERMINAL.
            let minimal = members
                .iter()
                .copied()
                .filter(|&v| {
                    !members.iter().any(|&u| {
                        u != v
                            && graph
                                .node(u)
                                .vector_time()
                                .expect("clocked node")
                                .happens_before(graph.node(v).vector_time().expect("clocked node"))
                    })
                })
                .collect_vec();
            let maximal = members
                .iter()
                .copied()
                .filter(|&u| {
                    !members.iter().any(|&v| {
                        v != u
                            && graph
                                .node(u)
                                .vector_time()
                                .expect("clocked node")
                                .happens_before(graph.node(v).vector_time().expect("clocked node"))
                    })
                })
                .collect_vec();
            let initial = graph.initial();
            let terminal = graph.terminal();
            for v in minimal {
                graph.link(initial, v, [TIME_RELATION.to_string()]);
            }
            for u in maximal {
                graph.link(u, terminal, [TIME_RELATION.to_string()]);
            }
            graph.register_trace(members);
        }
        debug!(
            traces = graph.traces.len(),
            nodes = graph.nodes.len(),
            "built DAG trace graph"
        );
        Ok(DagsTraceGraph(graph))
    }

    /// A view of the underlying trace graph.
    pub fn as_trace_graph(&self) -> &TraceGraph {
        &self.0
    }

    /// Whether some trace witnesses the two event types as concurrent, i.e.
    /// holds occurrences with incomparable vector clocks.
    pub fn witnesses_concurrency(&self, a: &EventType, b: &EventType) -> bool {
        self.0.traces.iter().any(|trace| {
            trace
                .members()
                .iter()
                .tuple_combinations()
                .any(|(&u, &v)| {
                    let (nu, nv) = (self.0.node(u), self.0.node(v));
                    let matches_pair = (nu.etype() == a && nv.etype() == b)
                        || (nu.etype() == b && nv.etype() == a);
                    matches_pair
                        && nu
                            .vector_time()
                            .expect("DAG nodes are clocked")
                            .concurrent_with(nv.vector_time().expect("DAG nodes are clocked"))
                })
        })
    }
}

impl Graph for DagsTraceGraph {
    fn node_ids(&self) -> Vec<NodeId> {
        self.0.node_ids()
    }
    fn etype_of(&self, id: NodeId) -> &EventType {
        self.0.etype_of(id)
    }
    fn initial_id(&self) -> NodeId {
        self.0.initial_id()
    }
    fn terminal_id(&self) -> NodeId {
        self.0.terminal_id()
    }
    fn relations(&self) -> &OrderedSet<String> {
        Graph::relations(&self.0)
    }
    fn edge_tuples(&self) -> Vec<(NodeId, NodeId, String, u64)> {
        self.0.edge_tuples()
    }
    fn node_size(&self, id: NodeId) -> usize {
        self.0.node_size(id)
    }
}
