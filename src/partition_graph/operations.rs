//! Reversible mutations of the partition graph. Every operation is a reified
//! value: applying it mutates the graph and hands back the operation that
//! undoes it. Validation happens entirely before the first mutation, so a
//! surfaced error leaves the graph untouched.

use bit_set::BitSet;
use itertools::Itertools;
use tracing::trace;

use crate::graph::NodeId;
use crate::math::OrderedSet;
use crate::partition_graph::{PartitionError, PartitionGraph, PartitionId};

/// A mutation of the partition graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Replaces a partition by two or more non-empty groups of its event
    /// nodes.
    MultiSplit {
        /// The partition being split.
        partition: PartitionId,
        /// The replacement groups; together they must hold exactly the
        /// partition's event nodes.
        groups: Vec<Vec<NodeId>>,
    },
    /// Unions two or more partitions of identical event type into the first.
    Merge {
        /// The partitions being merged; the first one's identifier survives.
        parts: Vec<PartitionId>,
    },
}

impl Operation {
    /// A split of `partition` into exactly two groups.
    pub fn split(partition: PartitionId, stay: Vec<NodeId>, leave: Vec<NodeId>) -> Self {
        Operation::MultiSplit {
            partition,
            groups: vec![stay, leave],
        }
    }

    /// A pairwise merge.
    pub fn merge(left: PartitionId, right: PartitionId) -> Self {
        Operation::Merge {
            parts: vec![left, right],
        }
    }

    /// Applies the operation and returns its inverse. On error the graph is
    /// exactly as it was before the call.
    pub fn apply(self, graph: &mut PartitionGraph<'_>) -> Result<Operation, PartitionError> {
        match self {
            Operation::MultiSplit { partition, groups } => apply_split(graph, partition, groups),
            Operation::Merge { parts } => apply_merge(graph, parts),
        }
    }
}

fn apply_split(
    graph: &mut PartitionGraph<'_>,
    partition: PartitionId,
    groups: Vec<Vec<NodeId>>,
) -> Result<Operation, PartitionError> {
    let target = graph.partition(partition)?;
    if target.is_sentinel() {
        return Err(PartitionError::SentinelPartition(partition));
    }
    if groups.len() < 2 || groups.iter().any(|g| g.is_empty()) {
        return Err(PartitionError::DegenerateSplit { partition });
    }
    let mut claimed = BitSet::new();
    for &node in groups.iter().flatten() {
        if !target.members.contains(node) || !claimed.insert(node) {
            return Err(PartitionError::SplitNotAPartition { partition });
        }
    }
    if claimed.len() != target.members.len() {
        return Err(PartitionError::SplitNotAPartition { partition });
    }
    let etype = target.etype.clone();

    let removed = graph
        .partitions
        .shift_remove(&partition)
        .expect("validated above");
    let new_ids = groups
        .into_iter()
        .map(|group| graph.insert_partition(etype.clone(), group))
        .collect_vec();
    let mut stale: OrderedSet<PartitionId> = OrderedSet::from([partition]);
    stale.extend(removed.members.iter().map(|n| graph.node_to_partition[n]));
    graph.invalidate_caches_referencing(&stale);
    trace!(partition, ?new_ids, "split partition");

    Ok(Operation::Merge { parts: new_ids })
}

fn apply_merge(
    graph: &mut PartitionGraph<'_>,
    parts: Vec<PartitionId>,
) -> Result<Operation, PartitionError> {
    if parts.len() < 2 || !parts.iter().all_unique() {
        return Err(PartitionError::DegenerateMerge);
    }
    for &p in &parts {
        let partition = graph.partition(p)?;
        if partition.is_sentinel() {
            return Err(PartitionError::SentinelPartition(p));
        }
    }
    let keep = parts[0];
    let keep_type = graph.partition(keep)?.etype.clone();
    for &p in &parts[1..] {
        if graph.partition(p)?.etype != keep_type {
            return Err(PartitionError::MergeTypeMismatch {
                left: keep,
                right: p,
            });
        }
    }

    let groups: Vec<Vec<NodeId>> = parts
        .iter()
        .map(|&p| graph.partitions[&p].members.iter().collect())
        .collect();

    for &p in &parts[1..] {
        let absorbed = graph
            .partitions
            .shift_remove(&p)
            .expect("validated above");
        for node in absorbed.members.iter() {
            graph.node_to_partition[node] = keep;
        }
        let kept = graph
            .partitions
            .get_mut(&keep)
            .expect("validated above");
        kept.members.union_with(&absorbed.members);
    }
    graph
        .partitions
        .get_mut(&keep)
        .expect("validated above")
        .outgoing = None;
    let stale: OrderedSet<PartitionId> = parts.iter().copied().collect();
    graph.invalidate_caches_referencing(&stale);
    trace!(?parts, keep, "merged partitions");

    Ok(Operation::MultiSplit {
        partition: keep,
        groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::graph::Graph;
    use crate::invariants::TemporalInvariantSet;
    use crate::trace_graph::ChainsTraceGraph;

    fn label(l: &str) -> EventType {
        EventType::label(l)
    }

    fn setup(traces: &[&[&str]]) -> ChainsTraceGraph {
        ChainsTraceGraph::from_label_traces(traces.iter().map(|t| t.iter().copied())).unwrap()
    }

    // Partition identifiers change across operations, so state comparisons
    // go through the id-free shape of the quotient.
    fn quotient_shape(pg: &PartitionGraph<'_>) -> Vec<(String, usize)> {
        pg.partition_ids()
            .into_iter()
            .map(|p| {
                let partition = pg.partition(p).unwrap();
                (partition.etype().to_string(), partition.size())
            })
            .sorted()
            .collect()
    }

    #[test]
    fn split_increases_partition_count_and_reverses() {
        let graph = setup(&[&["a", "b"], &["a", "c"]]);
        let mut pg =
            PartitionGraph::initialize_from(graph.as_trace_graph(), TemporalInvariantSet::new())
                .unwrap();
        let before = quotient_shape(&pg);
        let a = pg.partitions_of_type(&label("a"))[0];
        let members: Vec<_> = pg.partition(a).unwrap().members().collect();
        assert_eq!(members.len(), 2);

        let inverse = Operation::split(a, vec![members[0]], vec![members[1]])
            .apply(&mut pg)
            .unwrap();
        assert_eq!(pg.size(), 6);
        assert_eq!(pg.partitions_of_type(&label("a")).len(), 2);
        assert!(!pg.contains_partition(a));

        let redo = inverse.apply(&mut pg).unwrap();
        assert_eq!(quotient_shape(&pg), before.clone());
        assert!(matches!(redo, Operation::MultiSplit { .. }));
    }

    #[test]
    fn merge_coalesces_induced_edges() {
        let graph = setup(&[&["a", "b"], &["a", "c"]]);
        let mut pg =
            PartitionGraph::initialize_from(graph.as_trace_graph(), TemporalInvariantSet::new())
                .unwrap();
        let a = pg.partitions_of_type(&label("a"))[0];
        let members: Vec<_> = pg.partition(a).unwrap().members().collect();
        Operation::split(a, vec![members[0]], vec![members[1]])
            .apply(&mut pg)
            .unwrap();
        let split_parts = pg.partitions_of_type(&label("a"));

        Operation::merge(split_parts[0], split_parts[1])
            .apply(&mut pg)
            .unwrap();
        let merged = pg.partitions_of_type(&label("a"))[0];
        let b = pg.partitions_of_type(&label("b"))[0];
        let c = pg.partitions_of_type(&label("c"))[0];
        let out = pg.outgoing(merged).unwrap();
        assert_eq!(
            out[crate::event::TIME_RELATION],
            OrderedSet::from([b, c])
        );
    }

    #[test]
    fn sentinels_are_protected() {
        let graph = setup(&[&["a"]]);
        let mut pg =
            PartitionGraph::initialize_from(graph.as_trace_graph(), TemporalInvariantSet::new())
                .unwrap();
        let initial = pg.initial_partition();
        let node = pg.partition(initial).unwrap().members().next().unwrap();
        let err = Operation::split(initial, vec![node], vec![])
            .apply(&mut pg)
            .unwrap_err();
        assert_eq!(err, PartitionError::SentinelPartition(initial));

        let a = pg.partitions_of_type(&label("a"))[0];
        let err = Operation::merge(initial, a).apply(&mut pg).unwrap_err();
        assert_eq!(err, PartitionError::SentinelPartition(initial));
    }

    #[test]
    fn merge_across_types_is_rejected_without_mutation() {
        let graph = setup(&[&["a", "b"]]);
        let mut pg =
            PartitionGraph::initialize_from(graph.as_trace_graph(), TemporalInvariantSet::new())
                .unwrap();
        let before = quotient_shape(&pg);
        let a = pg.partitions_of_type(&label("a"))[0];
        let b = pg.partitions_of_type(&label("b"))[0];
        let err = Operation::merge(a, b).apply(&mut pg).unwrap_err();
        assert_eq!(
            err,
            PartitionError::MergeTypeMismatch { left: a, right: b }
        );
        assert_eq!(quotient_shape(&pg), before);
    }

    #[test]
    fn malformed_splits_are_rejected_without_mutation() {
        let graph = setup(&[&["a", "b"], &["a", "c"]]);
        let mut pg =
            PartitionGraph::initialize_from(graph.as_trace_graph(), TemporalInvariantSet::new())
                .unwrap();
        let before = quotient_shape(&pg);
        let a = pg.partitions_of_type(&label("a"))[0];
        let members: Vec<_> = pg.partition(a).unwrap().members().collect();

        // One group.
        let err = Operation::MultiSplit {
            partition: a,
            groups: vec![members.clone()],
        }
        .apply(&mut pg)
        .unwrap_err();
        assert_eq!(err, PartitionError::DegenerateSplit { partition: a });

        // Duplicated node.
        let err = Operation::split(a, vec![members[0]], vec![members[0]])
            .apply(&mut pg)
            .unwrap_err();
        assert_eq!(err, PartitionError::SplitNotAPartition { partition: a });

        // Not covering all members.
        let err = Operation::MultiSplit {
            partition: a,
            groups: vec![vec![members[0]], vec![]],
        }
        .apply(&mut pg)
        .unwrap_err();
        assert_eq!(err, PartitionError::DegenerateSplit { partition: a });

        assert_eq!(quotient_shape(&pg), before);
    }

    #[test]
    fn quotient_stays_total_after_operations() {
        let graph = setup(&[&["a", "b", "a"], &["a", "c"]]);
        let mut pg =
            PartitionGraph::initialize_from(graph.as_trace_graph(), TemporalInvariantSet::new())
                .unwrap();
        let a = pg.partitions_of_type(&label("a"))[0];
        let members: Vec<_> = pg.partition(a).unwrap().members().collect();
        Operation::MultiSplit {
            partition: a,
            groups: vec![vec![members[0]], vec![members[1]], vec![members[2]]],
        }
        .apply(&mut pg)
        .unwrap();

        let edge_pairs: OrderedSet<(PartitionId, PartitionId)> = pg
            .edge_tuples()
            .into_iter()
            .map(|(src, dst, _, _)| (src, dst))
            .collect();
        for node in graph.nodes() {
            for transition in node.transitions() {
                let src = pg.partition_of(node.id());
                let dst = pg.partition_of(transition.target());
                assert!(edge_pairs.contains(&(src, dst)));
            }
        }
    }
}
