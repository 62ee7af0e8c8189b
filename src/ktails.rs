//! Bounded-depth behavioral equivalence on event nodes and partitions, and
//! the k-tails quotient construction seeded from it.
//!
//! For `k <= 1` two nodes are equivalent iff their event types match. For
//! larger `k` the types must match and there must be a bijection between the
//! outgoing neighbors (grouped by relation set) under which every pair is
//! equivalent at depth `k - 1`. The recursion is bounded by `k`, so cyclic
//! graphs are handled without special casing.

use crate::graph::NodeId;
use crate::invariants::TemporalInvariantSet;
use crate::math::{Bijection, Map, OrderedMap, OrderedSet};
use crate::partition_graph::{PartitionError, PartitionGraph, PartitionId};
use crate::trace_graph::TraceGraph;

/// Memoized k-equivalence queries between the nodes of two trace graphs
/// (which may be the same graph). Results are cached per `(a, b, k)` for the
/// lifetime of the query batch.
pub struct KTails<'l, 'r> {
    left: &'l TraceGraph,
    right: &'r TraceGraph,
    same_graph: bool,
    memo: Map<(NodeId, NodeId, usize), bool>,
}

impl<'l, 'r> KTails<'l, 'r> {
    /// Creates a query batch comparing nodes of `left` against nodes of
    /// `right`.
    pub fn new(left: &'l TraceGraph, right: &'r TraceGraph) -> Self {
        Self {
            left,
            right,
            same_graph: std::ptr::eq(left, right),
            memo: Map::new(),
        }
    }

    /// Whether node `a` of the left graph and node `b` of the right graph
    /// are k-equivalent. Symmetric and reflexive.
    pub fn k_equals(&mut self, a: NodeId, b: NodeId, k: usize) -> bool {
        if self.same_graph && a == b {
            return true;
        }
        if let Some(&cached) = self.memo.get(&(a, b, k)) {
            return cached;
        }
        let result = self.compute(a, b, k);
        self.memo.insert((a, b, k), result);
        result
    }

    fn compute(&mut self, a: NodeId, b: NodeId, k: usize) -> bool {
        let left = self.left.node(a);
        let right = self.right.node(b);
        if left.etype() != right.etype() {
            return false;
        }
        if k <= 1 {
            return true;
        }

        let mut groups_left = group_by_relations(self.left, a);
        let mut groups_right = group_by_relations(self.right, b);
        if !groups_left.keys().eq(groups_right.keys()) {
            return false;
        }
        for (key, xs) in groups_left.iter_mut() {
            let ys = groups_right.get_mut(key).expect("key sets match");
            if xs.len() != ys.len() {
                return false;
            }
            sort_neighbors(self.left, xs);
            sort_neighbors(self.right, ys);
            let mut pairing: Bijection<usize, usize> = Bijection::new();
            if !self.match_neighbors(xs, ys, k - 1, 0, &mut pairing) {
                return false;
            }
        }
        true
    }

    /// Backtracking search for a bijection pairing each of `xs` with a
    /// (k-equivalent) element of `ys`. Candidates are tried in event-type
    /// order, then node-id order, so the search is deterministic.
    fn match_neighbors(
        &mut self,
        xs: &[NodeId],
        ys: &[NodeId],
        k: usize,
        index: usize,
        pairing: &mut Bijection<usize, usize>,
    ) -> bool {
        if index == xs.len() {
            return true;
        }
        for (j, &y) in ys.iter().enumerate() {
            if pairing.contains_right(&j) {
                continue;
            }
            if self.k_equals(xs[index], y, k) {
                pairing.insert(index, j);
                if self.match_neighbors(xs, ys, k, index + 1, pairing) {
                    return true;
                }
                pairing.remove_by_left(&index);
            }
        }
        false
    }
}

/// Convenience wrapper for a single query.
pub fn k_equals(
    left: &TraceGraph,
    a: NodeId,
    right: &TraceGraph,
    b: NodeId,
    k: usize,
) -> bool {
    KTails::new(left, right).k_equals(a, b, k)
}

fn group_by_relations(
    graph: &TraceGraph,
    node: NodeId,
) -> OrderedMap<OrderedSet<String>, Vec<NodeId>> {
    let mut groups: OrderedMap<OrderedSet<String>, Vec<NodeId>> = OrderedMap::new();
    for transition in graph.node(node).transitions() {
        groups
            .entry(transition.relations().clone())
            .or_default()
            .push(transition.target());
    }
    groups
}

fn sort_neighbors(graph: &TraceGraph, nodes: &mut [NodeId]) {
    nodes.sort_by(|&x, &y| {
        graph
            .node(x)
            .etype()
            .cmp(graph.node(y).etype())
            .then(x.cmp(&y))
    });
}

/// Builds the partition graph whose partitions are the equivalence classes
/// of k-equivalence over the trace graph's event nodes, with the sentinels
/// in their own singletons.
pub fn perform_ktails(graph: &TraceGraph, k: usize) -> Result<PartitionGraph<'_>, PartitionError> {
    let mut ktails = KTails::new(graph, graph);
    let mut classes: Vec<Vec<NodeId>> = Vec::new();
    for node in graph.event_node_ids() {
        match classes
            .iter_mut()
            .find(|class| ktails.k_equals(class[0], node, k))
        {
            Some(class) => class.push(node),
            None => classes.push(vec![node]),
        }
    }
    PartitionGraph::from_clusters(graph, TemporalInvariantSet::new(), classes)
}

/// Memoized k-equivalence on the partitions of a partition graph, used by
/// the coarsening engine to filter merge candidates. The definition mirrors
/// the node-level one, with induced transitions in place of node
/// transitions.
#[derive(Debug, Default)]
pub struct PartitionKTails {
    memo: Map<(PartitionId, PartitionId, usize), bool>,
}

impl PartitionKTails {
    /// Creates an empty query batch. Drop it after mutating the graph; the
    /// cache does not survive re-partitioning.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the two partitions are k-equivalent on the current partition
    /// graph.
    pub fn k_equals(
        &mut self,
        graph: &mut PartitionGraph<'_>,
        a: PartitionId,
        b: PartitionId,
        k: usize,
    ) -> Result<bool, PartitionError> {
        if a == b {
            return Ok(true);
        }
        if let Some(&cached) = self.memo.get(&(a, b, k)) {
            return Ok(cached);
        }
        let result = self.compute(graph, a, b, k)?;
        self.memo.insert((a, b, k), result);
        Ok(result)
    }

    fn compute(
        &mut self,
        graph: &mut PartitionGraph<'_>,
        a: PartitionId,
        b: PartitionId,
        k: usize,
    ) -> Result<bool, PartitionError> {
        if graph.partition(a)?.etype() != graph.partition(b)?.etype() {
            return Ok(false);
        }
        if k <= 1 {
            return Ok(true);
        }
        let out_left: OrderedMap<String, Vec<PartitionId>> = graph
            .outgoing(a)?
            .iter()
            .map(|(r, targets)| (r.clone(), targets.iter().copied().collect()))
            .collect();
        let out_right: OrderedMap<String, Vec<PartitionId>> = graph
            .outgoing(b)?
            .iter()
            .map(|(r, targets)| (r.clone(), targets.iter().copied().collect()))
            .collect();
        if !out_left.keys().eq(out_right.keys()) {
            return Ok(false);
        }
        for (relation, xs) in &out_left {
            let ys = &out_right[relation];
            if xs.len() != ys.len() {
                return Ok(false);
            }
            let mut pairing: Bijection<usize, usize> = Bijection::new();
            if !self.match_targets(graph, xs, ys, k - 1, 0, &mut pairing)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn match_targets(
        &mut self,
        graph: &mut PartitionGraph<'_>,
        xs: &[PartitionId],
        ys: &[PartitionId],
        k: usize,
        index: usize,
        pairing: &mut Bijection<usize, usize>,
    ) -> Result<bool, PartitionError> {
        if index == xs.len() {
            return Ok(true);
        }
        for (j, &y) in ys.iter().enumerate() {
            if pairing.contains_right(&j) {
                continue;
            }
            if self.k_equals(graph, xs[index], y, k)? {
                pairing.insert(index, j);
                if self.match_targets(graph, xs, ys, k, index + 1, pairing)? {
                    return Ok(true);
                }
                pairing.remove_by_left(&index);
            }
        }
        Ok(false)
    }
}
