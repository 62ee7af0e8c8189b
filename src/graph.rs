use crate::event::EventType;
use crate::math::OrderedSet;

/// Identifier of a node inside a graph. Identifiers are assigned at
/// construction time, are stable for the lifetime of the graph and double as
/// deterministic tie-breaks.
pub type NodeId = usize;

/// The read-only capability set shared by the trace graph and the partition
/// graph. Exporters and generic algorithms see graphs only through this
/// trait; everything that mutates works on the concrete types.
pub trait Graph {
    /// All node identifiers, in a deterministic order.
    fn node_ids(&self) -> Vec<NodeId>;

    /// The event type labelling the given node.
    fn etype_of(&self, id: NodeId) -> &EventType;

    /// The shared INITIAL node.
    fn initial_id(&self) -> NodeId;

    /// The shared TERMINAL node.
    fn terminal_id(&self) -> NodeId;

    /// The relation tags occurring in this graph.
    fn relations(&self) -> &OrderedSet<String>;

    /// All edges as `(source, target, relation, count)` tuples, in a
    /// deterministic order. `count` is the number of underlying transitions
    /// the edge aggregates; for plain trace graphs it is always `1`.
    fn edge_tuples(&self) -> Vec<(NodeId, NodeId, String, u64)>;

    /// How many underlying event nodes the given node stands for. `1` for
    /// event nodes themselves, the member count for partitions.
    fn node_size(&self, id: NodeId) -> usize;
}
