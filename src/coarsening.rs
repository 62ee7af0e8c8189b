//! Invariant-preserving coarsening: k-equivalent partitions of the same
//! event type are merged greedily, keeping a merge only when no mined
//! invariant acquires a counterexample. Rejected merges are rolled back via
//! the operation protocol, so the graph is never left half-mutated.

use std::collections::VecDeque;

use itertools::Itertools;
use tracing::debug;

use crate::invariants::Invariant;
use crate::ktails::PartitionKTails;
use crate::math::{Map, OrderedSet};
use crate::partition_graph::operations::Operation;
use crate::partition_graph::{PartitionError, PartitionGraph, PartitionId};

/// Greedily merges k-equivalent same-type partitions while every invariant
/// of the graph's set stays satisfied. Returns the number of merges kept.
pub fn coarsen(graph: &mut PartitionGraph<'_>, k: usize) -> Result<usize, PartitionError> {
    let invariants: Vec<Invariant> = graph.invariants().iter().cloned().collect();
    let seeds = graph.partition_ids();
    let mut worklist: VecDeque<(PartitionId, PartitionId)> =
        candidate_pairs(graph, seeds, k)?.into();
    // Rolling back a merge reinstates the operands under fresh identifiers;
    // queued pairs referring to the old ones are chased through this map.
    let mut renames: Map<PartitionId, PartitionId> = Map::new();
    let mut merges = 0usize;

    debug!(candidates = worklist.len(), k, "starting coarsening");
    while let Some((a, b)) = worklist.pop_front() {
        let a = resolve(&renames, a);
        let b = resolve(&renames, b);
        if a == b || !graph.contains_partition(a) || !graph.contains_partition(b) {
            continue;
        }
        // The graph has changed since the pair was enqueued; re-check.
        if !PartitionKTails::new().k_equals(graph, a, b, k)? {
            continue;
        }

        let inverse = Operation::merge(a, b).apply(graph)?;
        let mut violated = None;
        for invariant in &invariants {
            if graph.counterexample(invariant)?.is_some() {
                violated = Some(invariant.clone());
                break;
            }
        }
        match violated {
            Some(invariant) => {
                let redo = inverse.apply(graph)?;
                let Operation::Merge { parts } = redo else {
                    unreachable!("the inverse of a split is a merge");
                };
                renames.insert(a, parts[0]);
                renames.insert(b, parts[1]);
                debug!(a, b, %invariant, "rejected merge");
            }
            None => {
                merges += 1;
                debug!(merged = a, absorbed = b, merges, "kept merge");
                // New equivalences can only appear at the merged partition
                // and its neighborhood.
                let mut affected: OrderedSet<PartitionId> = graph.predecessors(a)?;
                affected.insert(a);
                affected.extend(
                    graph
                        .outgoing(a)?
                        .values()
                        .flat_map(|targets| targets.iter().copied()),
                );
                for pair in candidate_pairs(graph, affected.into_iter().collect(), k)? {
                    worklist.push_back(pair);
                }
            }
        }
    }

    Ok(merges)
}

/// All candidate pairs among `within`: distinct partitions of identical
/// non-sentinel event type that are currently k-equivalent, each pair in
/// ascending id order, the list sorted for determinism.
fn candidate_pairs(
    graph: &mut PartitionGraph<'_>,
    within: Vec<PartitionId>,
    k: usize,
) -> Result<Vec<(PartitionId, PartitionId)>, PartitionError> {
    let mut ktails = PartitionKTails::new();
    let mut pairs = Vec::new();
    for (&a, &b) in within.iter().sorted().tuple_combinations() {
        if !graph.contains_partition(a) || !graph.contains_partition(b) {
            continue;
        }
        let (pa, pb) = (graph.partition(a)?, graph.partition(b)?);
        if pa.is_sentinel() || pb.is_sentinel() || pa.etype() != pb.etype() {
            continue;
        }
        if ktails.k_equals(graph, a, b, k)? {
            pairs.push((a, b));
        }
    }
    Ok(pairs)
}

fn resolve(renames: &Map<PartitionId, PartitionId>, mut id: PartitionId) -> PartitionId {
    while let Some(&next) = renames.get(&id) {
        id = next;
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, TIME_RELATION};
    use crate::invariants::miner::{mine_invariants, MinerOptions};
    use crate::invariants::TemporalInvariantSet;
    use crate::ktails::perform_ktails;
    use crate::refinement::refine;
    use crate::trace_graph::ChainsTraceGraph;

    fn label(l: &str) -> EventType {
        EventType::label(l)
    }

    #[test]
    fn equivalent_tails_are_merged() {
        // Fully split quotient of two identical traces: every pair of
        // same-position partitions is k-equivalent and merging them cannot
        // violate anything.
        let graph =
            ChainsTraceGraph::from_label_traces([["a", "b", "c"], ["a", "b", "c"]]).unwrap();
        let pg = perform_ktails(graph.as_trace_graph(), 100).unwrap();
        assert_eq!(pg.size(), 5);

        // Deepen the split so coarsening has work to do.
        let fully_split: Vec<Vec<_>> = graph
            .event_node_ids()
            .map(|n| vec![n])
            .collect();
        let mut pg = PartitionGraph::from_clusters(
            graph.as_trace_graph(),
            TemporalInvariantSet::new(),
            fully_split,
        )
        .unwrap();
        assert_eq!(pg.size(), 8);
        let merges = coarsen(&mut pg, 100).unwrap();
        assert_eq!(merges, 3);
        assert_eq!(pg.size(), 5);
    }

    #[test]
    fn merges_preserve_every_invariant() {
        let graph = ChainsTraceGraph::from_label_traces([
            vec!["x", "a", "b"],
            vec!["y", "a", "c"],
            vec!["x", "a", "b"],
        ])
        .unwrap();
        let invariants =
            mine_invariants(&graph, TIME_RELATION, &MinerOptions::default()).unwrap();
        let mut pg =
            PartitionGraph::initialize_from(graph.as_trace_graph(), invariants).unwrap();
        refine(&mut pg).unwrap();
        coarsen(&mut pg, 1).unwrap();

        let invariants: Vec<Invariant> = pg.invariants().iter().cloned().collect();
        for invariant in invariants {
            assert!(
                pg.counterexample(&invariant).unwrap().is_none(),
                "coarsening broke {invariant}"
            );
        }
    }

    #[test]
    fn violating_merges_are_rolled_back() {
        // After refinement the two a partitions must stay apart: merging
        // them would recreate the spurious x..c path. With k = 1 they are
        // merge candidates (same type), so coarsening must try and reject.
        let graph =
            ChainsTraceGraph::from_label_traces([["x", "a", "b"], ["y", "a", "c"]]).unwrap();
        let invariants =
            mine_invariants(&graph, TIME_RELATION, &MinerOptions::default()).unwrap();
        let mut pg =
            PartitionGraph::initialize_from(graph.as_trace_graph(), invariants).unwrap();
        refine(&mut pg).unwrap();
        assert_eq!(pg.partitions_of_type(&label("a")).len(), 2);

        coarsen(&mut pg, 1).unwrap();
        assert_eq!(pg.partitions_of_type(&label("a")).len(), 2);
    }

    #[test]
    fn sentinels_are_never_candidates() {
        let graph = ChainsTraceGraph::from_label_traces([["a"], ["a"]]).unwrap();
        let mut pg = PartitionGraph::from_clusters(
            graph.as_trace_graph(),
            TemporalInvariantSet::new(),
            graph.event_node_ids().map(|n| vec![n]).collect(),
        )
        .unwrap();
        coarsen(&mut pg, 1).unwrap();
        assert!(pg
            .partition(pg.initial_partition())
            .unwrap()
            .is_sentinel());
        assert_eq!(pg.partition(pg.initial_partition()).unwrap().size(), 1);
        assert_eq!(pg.partitions_of_type(&label("a")).len(), 1);
    }

    #[test]
    fn coarsening_is_deterministic() {
        let run = || {
            let graph = ChainsTraceGraph::from_label_traces([
                vec!["a", "b", "c"],
                vec!["a", "b", "c"],
                vec!["a", "b"],
            ])
            .unwrap();
            let invariants =
                mine_invariants(&graph, TIME_RELATION, &MinerOptions::default()).unwrap();
            let mut pg = PartitionGraph::from_clusters(
                graph.as_trace_graph(),
                invariants,
                graph.event_node_ids().map(|n| vec![n]).collect(),
            )
            .unwrap();
            coarsen(&mut pg, 2).unwrap();
            let mut shape: Vec<(String, usize)> = pg
                .partition_ids()
                .into_iter()
                .map(|p| {
                    let partition = pg.partition(p).unwrap();
                    (partition.etype().to_string(), partition.size())
                })
                .collect();
            shape.sort();
            shape
        };
        assert_eq!(run(), run());
    }
}
