//! Counterexample-guided refinement: partitions are split until the
//! partition graph satisfies every mined invariant.
//!
//! Each counterexample path is simulated on the underlying event nodes. The
//! simulation tracks, per path position, which event nodes are actually
//! reachable; the first position where the set runs dry marks the partition
//! whose split eliminates the path. A counterexample that simulates all the
//! way through is a genuine violation of the invariant on the trace graph,
//! which cannot happen for invariants mined from that same graph and is
//! surfaced as [`RefinementError::Unsatisfiable`].

use std::collections::VecDeque;

use thiserror::Error;
use tracing::debug;

use crate::event::EventType;
use crate::graph::NodeId;
use crate::invariants::Invariant;
use crate::math::{Map, OrderedSet};
use crate::partition_graph::operations::Operation;
use crate::partition_graph::{PartitionError, PartitionGraph, PartitionId};
use crate::trace_graph::TraceGraph;

/// Failures of the refinement loop.
#[derive(Debug, Error)]
pub enum RefinementError {
    /// A structural partition-graph error; the graph is unchanged.
    #[error(transparent)]
    Partition(#[from] PartitionError),
    /// No split can eliminate the invariant's counterexample because the
    /// counterexample is realizable on the trace graph itself.
    #[error("invariant \"{invariant}\" is violated by the traces themselves; stalled on partition {partition}")]
    Unsatisfiable {
        /// The unsatisfiable invariant.
        invariant: Invariant,
        /// The partition at which progress stalled.
        partition: PartitionId,
    },
}

/// Splits partitions until no invariant of the graph's set has a
/// counterexample. Returns the number of splits applied.
pub fn refine(graph: &mut PartitionGraph<'_>) -> Result<usize, RefinementError> {
    let mut queue: VecDeque<Invariant> = graph.invariants().iter().cloned().collect();
    let mut cache: Map<Invariant, Vec<PartitionId>> = Map::new();
    let mut splits = 0usize;

    while let Some(invariant) = queue.pop_front() {
        let path = match cache.get(&invariant) {
            Some(path) => Some(path.clone()),
            None => {
                let found = graph.counterexample(&invariant)?;
                if let Some(path) = &found {
                    cache.insert(invariant.clone(), path.clone());
                }
                found
            }
        };
        // No counterexample: the invariant holds and, since splits only ever
        // remove quotient paths, it stays satisfied. Retire it.
        let Some(path) = path else {
            continue;
        };

        let (partition, stay, leave) = choose_split(graph, &invariant, &path)?;
        let touched: OrderedSet<PartitionId> = {
            let mut set = graph.predecessors(partition)?;
            set.insert(partition);
            set
        };
        Operation::split(partition, stay, leave).apply(graph)?;
        splits += 1;
        debug!(%invariant, partition, splits, "split to eliminate counterexample");

        // Only counterexamples that ran through the split partition or its
        // neighbors may have changed; the rest stay valid.
        cache.shift_remove(&invariant);
        cache.retain(|_, cached| !cached.iter().any(|p| touched.contains(p)));
        queue.push_back(invariant);
    }

    Ok(splits)
}

/// Picks the partition to split and the two groups, per the preference
/// order: break the counterexample as close to its origin as possible, with
/// the smallest possible leaving group, tie-broken on partition identity.
/// The first position where the simulated node set dies is the unique
/// earliest split that eliminates the path, and separating exactly the
/// nodes that continue into the next path partition is the smallest one.
fn choose_split(
    graph: &PartitionGraph<'_>,
    invariant: &Invariant,
    path: &[PartitionId],
) -> Result<(PartitionId, Vec<NodeId>, Vec<NodeId>), RefinementError> {
    let relation = invariant.relation();
    let traces = graph.trace_graph();

    let mut current: Vec<NodeId> = graph.partition(path[0])?.members().collect();
    for window in path.windows(2) {
        let (previous, here) = (window[0], window[1]);
        let members: Vec<NodeId> = graph.partition(here)?.members().collect();
        let next: Vec<NodeId> = members
            .iter()
            .copied()
            .filter(|&v| current.iter().any(|&u| edge_matches(traces, u, v, relation)))
            .collect();
        if next.is_empty() {
            let (leave, stay): (Vec<NodeId>, Vec<NodeId>) = graph
                .partition(previous)?
                .members()
                .partition(|&u| members.iter().any(|&v| edge_matches(traces, u, v, relation)));
            if leave.is_empty() || stay.is_empty() {
                return Err(RefinementError::Unsatisfiable {
                    invariant: invariant.clone(),
                    partition: previous,
                });
            }
            return Ok((previous, stay, leave));
        }
        current = next;
    }

    // The path is realizable on the trace graph: the violation is real.
    Err(RefinementError::Unsatisfiable {
        invariant: invariant.clone(),
        partition: *path.last().expect("counterexample paths are non-empty"),
    })
}

/// Whether the event-node transition `u -> v` supports a quotient edge on
/// `relation`. The sentinel boundary transitions only carry the ordering
/// relation and stay traversable for every relation, mirroring the
/// counterexample search.
fn edge_matches(graph: &TraceGraph, u: NodeId, v: NodeId, relation: &str) -> bool {
    graph.node(u).transitions().iter().any(|t| {
        t.target() == v
            && (t.relations().contains(relation)
                || graph.node(u).etype() == &EventType::Initial
                || graph.node(v).etype() == &EventType::Terminal)
    })
}
