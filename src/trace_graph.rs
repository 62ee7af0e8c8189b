//! The trace graph: an arena of event nodes with relation-tagged transitions,
//! partitioned into traces that all hang off a single shared INITIAL node and
//! drain into a single shared TERMINAL node.

pub mod dags;
pub mod relation_path;

use itertools::Itertools;
use thiserror::Error;
use tracing::debug;

use crate::event::{Event, EventType, TIME_RELATION};
use crate::graph::{Graph, NodeId};
use crate::math::OrderedSet;
use crate::time::VectorTime;

pub use dags::DagsTraceGraph;
pub use relation_path::RelationPath;

/// Identifier of a trace within a trace graph.
pub type TraceId = usize;

/// Errors raised while assembling a trace graph from parsed events.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphBuildError {
    /// A trace contained no events.
    #[error("trace {trace} contains no events")]
    EmptyTrace {
        /// Index of the offending trace.
        trace: TraceId,
    },
    /// An input event used one of the reserved sentinel types.
    #[error("trace {trace} uses a reserved sentinel event type")]
    SentinelEvent {
        /// Index of the offending trace.
        trace: TraceId,
    },
    /// Two events of one trace carried identical vector clocks, which would
    /// wire a cycle.
    #[error("trace {trace} contains two events with identical vector clocks")]
    InconsistentClocks {
        /// Index of the offending trace.
        trace: TraceId,
    },
    /// Time normalization was requested but an event carries no timestamp.
    #[error("trace {trace} has an event without a timestamp, cannot normalize")]
    MissingTime {
        /// Index of the offending trace.
        trace: TraceId,
    },
}

/// A directed, relation-tagged transition between two event nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    target: NodeId,
    relations: OrderedSet<String>,
}

impl Transition {
    /// The node this transition points to.
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// The set of relation tags on this transition.
    pub fn relations(&self) -> &OrderedSet<String> {
        &self.relations
    }
}

/// One occurrence of an [`Event`] inside a trace, holding its ordered list of
/// outgoing transitions. Nodes live in the arena of their [`TraceGraph`] and
/// are referenced by stable [`NodeId`]s, which keeps cyclic fixtures and
/// memoization straightforward.
#[derive(Debug, Clone)]
pub struct EventNode {
    id: NodeId,
    trace: Option<TraceId>,
    event: Event,
    vector_time: Option<VectorTime>,
    transitions: Vec<Transition>,
}

impl EventNode {
    /// The stable identifier of this node.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The trace this node belongs to. Sentinels belong to no trace.
    pub fn trace(&self) -> Option<TraceId> {
        self.trace
    }

    /// The event this node is an occurrence of.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// The event type of this node.
    pub fn etype(&self) -> &EventType {
        self.event.etype()
    }

    /// The vector clock of this node, present only in DAG trace graphs.
    pub fn vector_time(&self) -> Option<&VectorTime> {
        self.vector_time.as_ref()
    }

    /// All outgoing transitions in insertion order.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Transitions whose relation set equals `relations` exactly.
    pub fn transitions_with_exact_relations(
        &self,
        relations: &OrderedSet<String>,
    ) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| &t.relations == relations)
            .collect()
    }

    /// Transitions whose relation set intersects `relations`.
    pub fn transitions_with_intersecting_relations(
        &self,
        relations: &OrderedSet<String>,
    ) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| t.relations.intersection(relations).next().is_some())
            .collect()
    }

    /// Transitions carrying the single relation tag `relation`.
    pub fn transitions_with(&self, relation: &str) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| t.relations.contains(relation))
            .collect()
    }
}

/// One observed execution: the event nodes of a single input partition, in
/// ordering-relation order for chains and in insertion order for DAGs.
#[derive(Debug, Clone)]
pub struct Trace {
    id: TraceId,
    members: Vec<NodeId>,
}

impl Trace {
    /// The identifier of this trace.
    pub fn id(&self) -> TraceId {
        self.id
    }

    /// The event nodes of this trace.
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    /// The first non-sentinel node.
    pub fn first(&self) -> NodeId {
        self.members[0]
    }

    /// The last non-sentinel node.
    pub fn last(&self) -> NodeId {
        *self.members.last().expect("traces are never empty")
    }
}

/// The disjoint union of all traces plus the two shared sentinel nodes.
/// Immutable once construction is finished; the mining and partitioning
/// stages only ever read it.
#[derive(Debug, Clone)]
pub struct TraceGraph {
    nodes: Vec<EventNode>,
    traces: Vec<Trace>,
    relations: OrderedSet<String>,
    initial: NodeId,
    terminal: NodeId,
}

impl TraceGraph {
    /// Creates an empty graph holding only the INITIAL and TERMINAL
    /// sentinels. Building blocks for the chain/DAG constructors and for
    /// hand-made (possibly cyclic) fixtures.
    pub fn new() -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            traces: Vec::new(),
            relations: OrderedSet::from([TIME_RELATION.to_string()]),
            initial: 0,
            terminal: 0,
        };
        graph.initial = graph.push_node(None, Event::new(EventType::Initial), None);
        graph.terminal = graph.push_node(None, Event::new(EventType::Terminal), None);
        graph
    }

    fn push_node(
        &mut self,
        trace: Option<TraceId>,
        event: Event,
        vector_time: Option<VectorTime>,
    ) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(EventNode {
            id,
            trace,
            event,
            vector_time,
            transitions: Vec::new(),
        });
        id
    }

    /// Adds an event node belonging to the given trace. Trace bookkeeping is
    /// the caller's responsibility; the chain and DAG constructors use this
    /// together with [`TraceGraph::link`].
    pub fn add_event_node(&mut self, trace: Option<TraceId>, event: Event) -> NodeId {
        self.push_node(trace, event, None)
    }

    fn add_clocked_node(&mut self, trace: TraceId, event: Event, clock: VectorTime) -> NodeId {
        self.push_node(Some(trace), event, Some(clock))
    }

    /// Wires a transition from `source` to `target` tagged with `relations`.
    /// If a transition between the two nodes already exists, the tags are
    /// merged onto it instead of adding a parallel edge.
    pub fn link(
        &mut self,
        source: NodeId,
        target: NodeId,
        relations: impl IntoIterator<Item = String>,
    ) {
        let relations: OrderedSet<String> = relations.into_iter().collect();
        self.relations.extend(relations.iter().cloned());
        let node = &mut self.nodes[source];
        if let Some(existing) = node.transitions.iter_mut().find(|t| t.target == target) {
            existing.relations.extend(relations);
        } else {
            node.transitions.push(Transition { target, relations });
        }
    }

    /// Records a trace over previously added nodes. The chain and DAG
    /// constructors call this; hand-made fixtures may too.
    pub fn register_trace(&mut self, members: Vec<NodeId>) -> TraceId {
        let id = self.traces.len();
        self.traces.push(Trace { id, members });
        id
    }

    /// The node with the given identifier.
    pub fn node(&self, id: NodeId) -> &EventNode {
        &self.nodes[id]
    }

    /// All nodes in identifier order.
    pub fn nodes(&self) -> &[EventNode] {
        &self.nodes
    }

    /// Number of nodes, sentinels included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All traces of this graph.
    pub fn traces(&self) -> &[Trace] {
        &self.traces
    }

    /// The shared INITIAL node.
    pub fn initial(&self) -> NodeId {
        self.initial
    }

    /// The shared TERMINAL node.
    pub fn terminal(&self) -> NodeId {
        self.terminal
    }

    /// Identifiers of all non-sentinel nodes, in identifier order.
    pub fn event_node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .filter(|n| !n.etype().is_sentinel())
            .map(|n| n.id)
    }

    /// The relation tags occurring in this graph.
    pub fn relations(&self) -> &OrderedSet<String> {
        &self.relations
    }

    /// All event types occurring in the graph, sentinels excluded.
    pub fn event_types(&self) -> OrderedSet<EventType> {
        self.nodes
            .iter()
            .filter(|n| !n.etype().is_sentinel())
            .map(|n| n.etype().clone())
            .collect()
    }
}

impl Default for TraceGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph for TraceGraph {
    fn node_ids(&self) -> Vec<NodeId> {
        (0..self.nodes.len()).collect()
    }

    fn etype_of(&self, id: NodeId) -> &EventType {
        self.nodes[id].etype()
    }

    fn initial_id(&self) -> NodeId {
        self.initial
    }

    fn terminal_id(&self) -> NodeId {
        self.terminal
    }

    fn relations(&self) -> &OrderedSet<String> {
        &self.relations
    }

    fn edge_tuples(&self) -> Vec<(NodeId, NodeId, String, u64)> {
        self.nodes
            .iter()
            .flat_map(|n| {
                n.transitions.iter().flat_map(move |t| {
                    t.relations
                        .iter()
                        .map(move |r| (n.id, t.target, r.clone(), 1))
                })
            })
            .collect()
    }

    fn node_size(&self, _id: NodeId) -> usize {
        1
    }
}

/// A trace graph whose traces are linear chains of totally ordered events.
#[derive(Debug, Clone)]
pub struct ChainsTraceGraph(TraceGraph);

impl std::ops::Deref for ChainsTraceGraph {
    type Target = TraceGraph;
    fn deref(&self) -> &TraceGraph {
        &self.0
    }
}

impl ChainsTraceGraph {
    /// Starts building a chains trace graph.
    pub fn builder() -> ChainsBuilder {
        ChainsBuilder::default()
    }

    /// Builds a graph from traces of plain events ordered by the default
    /// time relation.
    pub fn from_traces(
        traces: impl IntoIterator<Item = Vec<Event>>,
    ) -> Result<Self, GraphBuildError> {
        let mut builder = Self::builder();
        for trace in traces {
            builder = builder.trace(trace);
        }
        builder.build()
    }

    /// Builds a graph from traces given as bare event-type labels. Intended
    /// for tests and examples.
    pub fn from_label_traces<I, S>(traces: I) -> Result<Self, GraphBuildError>
    where
        I: IntoIterator,
        I::Item: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_traces(
            traces
                .into_iter()
                .map(|t| t.into_iter().map(|l| Event::with_label(l)).collect_vec()),
        )
    }

    /// A view of the underlying trace graph.
    pub fn as_trace_graph(&self) -> &TraceGraph {
        &self.0
    }

    /// The single relation path of `trace` over the ordering relation, or the
    /// transitive relation paths over a secondary relation. For the ordering
    /// relation the result always holds exactly one path spanning the whole
    /// trace; for a secondary relation it holds one transitive path covering
    /// the relation's stretch of the trace, or none when the relation does
    /// not occur in the trace.
    pub fn single_relation_paths<'g>(
        &'g self,
        trace: TraceId,
        relation: &str,
    ) -> Vec<RelationPath<'g>> {
        let t = &self.0.traces[trace];
        if relation == TIME_RELATION {
            return vec![RelationPath::new(
                &self.0,
                t.first(),
                t.last(),
                TIME_RELATION,
                TIME_RELATION,
                false,
            )];
        }
        match self.relation_span(t, relation) {
            Some(path) => vec![path],
            None => vec![],
        }
    }

    /// The bi-relational path of `trace`: the stretch of the trace touched by
    /// `relation`, traversed along the ordering relation.
    pub fn bi_relational_path<'g>(
        &'g self,
        trace: TraceId,
        relation: &str,
    ) -> Option<RelationPath<'g>> {
        self.relation_span(&self.0.traces[trace], relation)
    }

    /// Computes the first and last node of `trace` incident to `relation` and
    /// whether INITIAL is only transitively connected to that stretch.
    fn relation_span<'g>(&'g self, trace: &Trace, relation: &str) -> Option<RelationPath<'g>> {
        let mut incident: OrderedSet<NodeId> = OrderedSet::new();
        for &m in &trace.members {
            for t in self.0.node(m).transitions_with(relation) {
                incident.insert(m);
                incident.insert(t.target());
            }
        }
        for t in self.0.node(self.0.initial).transitions_with(relation) {
            incident.insert(t.target());
        }
        incident.remove(&self.0.terminal);

        let first = trace
            .members
            .iter()
            .copied()
            .find(|m| incident.contains(m))?;
        let last = trace
            .members
            .iter()
            .copied()
            .rev()
            .find(|m| incident.contains(m))
            .expect("a non-empty incident set has a last member");
        let directly_connected = self
            .0
            .node(self.0.initial)
            .transitions_with(relation)
            .iter()
            .any(|t| t.target() == first);
        Some(RelationPath::new(
            &self.0,
            first,
            last,
            relation,
            TIME_RELATION,
            !directly_connected,
        ))
    }
}

impl Graph for ChainsTraceGraph {
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

/// Accumulates traces for a [`ChainsTraceGraph`].
///
/// Each event may carry secondary relation tags which are attached to the
/// transition entering that event, on top of the default time relation. Tags
/// on the first event of a trace land on the transition leaving INITIAL.
#[derive(Debug, Default)]
pub struct ChainsBuilder {
    traces: Vec<Vec<(Event, Vec<String>)>>,
    normalize: bool,
}

impl ChainsBuilder {
    /// Rescale every trace's event times into `[0, 1]` while building.
    pub fn normalize_times(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Adds a trace of events ordered by the default time relation.
    pub fn trace(mut self, events: impl IntoIterator<Item = Event>) -> Self {
        self.traces
            .push(events.into_iter().map(|e| (e, Vec::new())).collect());
        self
    }

    /// Adds a trace whose events carry secondary relation tags for their
    /// incoming transitions.
    pub fn trace_with_relations(
        mut self,
        events: impl IntoIterator<Item = (Event, Vec<String>)>,
    ) -> Self {
        self.traces.push(events.into_iter().collect());
        self
    }

    /// Assembles the graph.
    pub fn build(self) -> Result<ChainsTraceGraph, GraphBuildError> {
        let mut graph = TraceGraph::new();
        for (trace_idx, mut events) in self.traces.into_iter().enumerate() {
            if events.is_empty() {
                return Err(GraphBuildError::EmptyTrace { trace: trace_idx });
            }
            if events.iter().any(|(e, _)| e.etype().is_sentinel()) {
                return Err(GraphBuildError::SentinelEvent { trace: trace_idx });
            }
            if self.normalize {
                let last = events
                    .iter()
                    .map(|(e, _)| e.time().copied())
                    .last()
                    .flatten()
                    .ok_or(GraphBuildError::MissingTime { trace: trace_idx })?;
                for (event, _) in &mut events {
                    let time = event
                        .time()
                        .copied()
                        .ok_or(GraphBuildError::MissingTime { trace: trace_idx })?;
                    event.set_time(time.normalized(&last));
                }
            }

            let trace_id = graph.traces.len();
            let mut members = Vec::with_capacity(events.len());
            let mut prev = graph.initial;
            for (event, extra_relations) in events {
                let node = graph.add_event_node(Some(trace_id), event);
                members.push(node);
                let tags = std::iter::once(TIME_RELATION.to_string()).chain(extra_relations);
                graph.link(prev, node, tags);
                prev = node;
            }
            graph.link(prev, graph.terminal, [TIME_RELATION.to_string()]);
            graph.register_trace(members);
        }
        debug!(
            traces = graph.traces.len(),
            nodes = graph.nodes.len(),
            "built chains trace graph"
        );
        Ok(ChainsTraceGraph(graph))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Timestamp;

    #[test]
    fn chains_wiring() {
        let g = ChainsTraceGraph::from_label_traces([["a", "b"], ["a", "c"]]).unwrap();
        assert_eq!(g.traces().len(), 2);
        assert_eq!(g.node_count(), 6);

        let initial = g.node(g.initial());
        assert_eq!(initial.transitions().len(), 2);
        let first = g.traces()[0].first();
        assert_eq!(g.node(first).etype(), &EventType::label("a"));
        let b = g.node(first).transitions()[0].target();
        assert_eq!(g.node(b).etype(), &EventType::label("b"));
        assert_eq!(g.node(b).transitions()[0].target(), g.terminal());
    }

    #[test]
    fn empty_trace_is_rejected() {
        let err = ChainsTraceGraph::from_traces([vec![]]).unwrap_err();
        assert_eq!(err, GraphBuildError::EmptyTrace { trace: 0 });
    }

    #[test]
    fn sentinel_events_are_rejected() {
        let err = ChainsTraceGraph::from_traces([vec![Event::new(EventType::Initial)]])
            .unwrap_err();
        assert_eq!(err, GraphBuildError::SentinelEvent { trace: 0 });
    }

    #[test]
    fn secondary_relations_tag_incoming_transitions() {
        let g = ChainsTraceGraph::builder()
            .trace_with_relations([
                (Event::with_label("a"), vec![]),
                (Event::with_label("b"), vec!["spawns".to_string()]),
            ])
            .build()
            .unwrap();
        let a = g.traces()[0].first();
        let tags = g.node(a).transitions()[0].relations();
        assert!(tags.contains("spawns"));
        assert!(tags.contains(TIME_RELATION));
        assert!(Graph::relations(&g).contains("spawns"));
    }

    #[test]
    fn time_normalization_rescales_into_unit_interval() {
        let g = ChainsTraceGraph::builder()
            .normalize_times(true)
            .trace([
                Event::with_label("a").at(Timestamp::new(0.0)),
                Event::with_label("b").at(Timestamp::new(5.0)),
                Event::with_label("c").at(Timestamp::new(10.0)),
            ])
            .build()
            .unwrap();
        let times: Vec<f64> = g.traces()[0]
            .members()
            .iter()
            .map(|&m| g.node(m).event().time().unwrap().value())
            .collect();
        assert_eq!(times, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn normalization_requires_times() {
        let err = ChainsTraceGraph::builder()
            .normalize_times(true)
            .trace([Event::with_label("a")])
            .build()
            .unwrap_err();
        assert_eq!(err, GraphBuildError::MissingTime { trace: 0 });
    }

    #[test]
    fn manual_graphs_may_contain_cycles() {
        let mut g = TraceGraph::new();
        let n0 = g.add_event_node(Some(0), Event::with_label("a"));
        let n1 = g.add_event_node(Some(0), Event::with_label("a"));
        g.link(n0, n1, [TIME_RELATION.to_string()]);
        g.link(n1, n0, [TIME_RELATION.to_string()]);
        assert_eq!(g.node(n1).transitions()[0].target(), n0);
    }
}
