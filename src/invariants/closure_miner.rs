//! The transitive-closure invariant miner. Instead of walking relation
//! paths it closes the reachability relation of every trace and reads
//! AFby, AP and NFby off the closure. InterruptedBy is not derivable from
//! reachability alone, so this miner never emits it.
//!
//! Unlike the chain walker this miner also handles partially ordered (DAG)
//! traces, and for those it can additionally mine `NeverConcurrent`.

use bit_set::BitSet;
use thiserror::Error;
use tracing::debug;

use crate::event::EventType;
use crate::graph::NodeId;
use crate::invariants::{Invariant, InvariantKind, TemporalInvariantSet};
use crate::math::{Map, OrderedSet};
use crate::trace_graph::{DagsTraceGraph, Trace, TraceGraph, TraceId};

/// Errors raised by closure computation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClosureMiningError {
    /// The relation-restricted subgraph of a trace admits a cycle, so no
    /// reachability closure exists.
    #[error("trace {trace} is cyclic under relation {relation:?}")]
    CyclicTrace {
        /// Index of the offending trace.
        trace: TraceId,
        /// The relation that was being closed.
        relation: String,
    },
}

/// Mines AFby, AP, NFby and the `INITIAL AFby x` invariants by closing each
/// trace's reachability relation. Produces the same set as the chain-walking
/// miner for those kinds.
pub fn mine_invariants(
    graph: &TraceGraph,
    relation: &str,
    support_counts: bool,
) -> Result<TemporalInvariantSet, ClosureMiningError> {
    let mut event_counts: Map<EventType, u64> = Map::new();
    // Per event-node: its type, the types reachable strictly after it and
    // the types reaching it strictly before.
    let mut node_types: Vec<(EventType, OrderedSet<EventType>, OrderedSet<EventType>)> =
        Vec::new();
    let mut eventually: Option<OrderedSet<EventType>> = None;
    let trace_count = graph.traces().len() as u64;

    for trace in graph.traces() {
        let order = topological_order(graph, trace, relation)?;
        let closure = forward_closure(graph, trace, relation, &order);

        let mut trace_types: OrderedSet<EventType> = OrderedSet::new();
        let mut before: Map<NodeId, OrderedSet<EventType>> = Map::new();
        for &u in trace.members() {
            let etype = graph.node(u).etype().clone();
            trace_types.insert(etype.clone());
            *event_counts.entry(etype).or_insert(0) += 1;
            for w in closure[&u].iter() {
                before
                    .entry(w)
                    .or_default()
                    .insert(graph.node(u).etype().clone());
            }
        }
        for &u in trace.members() {
            let after: OrderedSet<EventType> = closure[&u]
                .iter()
                .map(|w| graph.node(w).etype().clone())
                .collect();
            node_types.push((
                graph.node(u).etype().clone(),
                after,
                before.swap_remove(&u).unwrap_or_default(),
            ));
        }

        eventually = Some(match eventually.take() {
            None => trace_types,
            Some(acc) => acc.intersection(&trace_types).cloned().collect(),
        });
    }

    let etypes: Vec<EventType> = event_counts.keys().cloned().collect();
    let mut result = TemporalInvariantSet::new();
    let mut emit = |invariant: Invariant, support: u64| {
        if support_counts {
            result.add(invariant.with_support(support));
        } else {
            result.add(invariant);
        }
    };

    for t in eventually.iter().flatten() {
        emit(
            Invariant::over_relation(
                EventType::Initial,
                InvariantKind::AlwaysFollowedBy,
                t.clone(),
                relation,
            ),
            trace_count,
        );
    }

    for a in &etypes {
        for b in &etypes {
            let afby = node_types
                .iter()
                .filter(|(t, _, _)| t == a)
                .all(|(_, after, _)| after.contains(b));
            let nfby = node_types
                .iter()
                .filter(|(t, _, _)| t == a)
                .all(|(_, after, _)| !after.contains(b));
            let ap = node_types
                .iter()
                .filter(|(t, _, _)| t == b)
                .all(|(_, _, before)| before.contains(a));
            if afby {
                emit(
                    Invariant::over_relation(
                        a.clone(),
                        InvariantKind::AlwaysFollowedBy,
                        b.clone(),
                        relation,
                    ),
                    event_counts[a],
                );
            }
            if nfby {
                emit(
                    Invariant::over_relation(
                        a.clone(),
                        InvariantKind::NeverFollowedBy,
                        b.clone(),
                        relation,
                    ),
                    event_counts[a],
                );
            }
            if ap {
                emit(
                    Invariant::over_relation(
                        a.clone(),
                        InvariantKind::AlwaysPrecedes,
                        b.clone(),
                        relation,
                    ),
                    event_counts[a],
                );
            }
        }
    }

    debug!(
        relation,
        invariants = result.len(),
        "mined invariants via transitive closure"
    );
    Ok(result)
}

/// Mines `NeverConcurrent` invariants from a DAG trace graph: a pair of
/// types qualifies when no trace holds occurrences of the two with
/// incomparable vector clocks.
pub fn mine_never_concurrent(
    graph: &DagsTraceGraph,
    support_counts: bool,
) -> TemporalInvariantSet {
    let mut counts: Map<EventType, u64> = Map::new();
    for trace in graph.traces() {
        for &m in trace.members() {
            *counts.entry(graph.node(m).etype().clone()).or_insert(0) += 1;
        }
    }
    let etypes: OrderedSet<EventType> = counts.keys().cloned().collect();

    let mut result = TemporalInvariantSet::new();
    for a in &etypes {
        for b in &etypes {
            if b <= a {
                continue;
            }
            if !graph.witnesses_concurrency(a, b) {
                let invariant =
                    Invariant::new(a.clone(), InvariantKind::NeverConcurrent, b.clone());
                if support_counts {
                    result.add(invariant.with_support(counts[a]));
                } else {
                    result.add(invariant);
                }
            }
        }
    }
    result
}

/// Kahn's algorithm over the relation-restricted subgraph of one trace.
fn topological_order(
    graph: &TraceGraph,
    trace: &Trace,
    relation: &str,
) -> Result<Vec<NodeId>, ClosureMiningError> {
    let members: OrderedSet<NodeId> = trace.members().iter().copied().collect();
    let mut indegree: Map<NodeId, usize> = trace.members().iter().map(|&m| (m, 0)).collect();
    for &u in trace.members() {
        for t in graph.node(u).transitions_with(relation) {
            if members.contains(&t.target()) {
                *indegree.entry(t.target()).or_insert(0) += 1;
            }
        }
    }

    let mut ready: Vec<NodeId> = indegree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&n, _)| n)
        .collect();
    let mut order = Vec::with_capacity(trace.members().len());
    while let Some(u) = ready.pop() {
        order.push(u);
        for t in graph.node(u).transitions_with(relation) {
            if let Some(d) = indegree.get_mut(&t.target()) {
                *d -= 1;
                if *d == 0 {
                    ready.push(t.target());
                }
            }
        }
    }
    if order.len() != trace.members().len() {
        return Err(ClosureMiningError::CyclicTrace {
            trace: trace.id(),
            relation: relation.to_string(),
        });
    }
    Ok(order)
}

/// Computes, for every member node, the set of member nodes strictly
/// reachable from it, by folding successor closures in reverse topological
/// order.
fn forward_closure(
    graph: &TraceGraph,
    trace: &Trace,
    relation: &str,
    order: &[NodeId],
) -> Map<NodeId, BitSet> {
    let members: OrderedSet<NodeId> = trace.members().iter().copied().collect();
    let mut closure: Map<NodeId, BitSet> = Map::new();
    for &u in order.iter().rev() {
        let mut row = BitSet::new();
        for t in graph.node(u).transitions_with(relation) {
            let v = t.target();
            if members.contains(&v) {
                row.insert(v);
                if let Some(reach) = closure.get(&v) {
                    row.union_with(reach);
                }
            }
        }
        closure.insert(u, row);
    }
    closure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, TIME_RELATION};
    use crate::invariants::miner::{mine_invariants as chain_mine, MinerOptions};
    use crate::time::VectorTime;
    use crate::trace_graph::ChainsTraceGraph;

    fn label(l: &str) -> EventType {
        EventType::label(l)
    }

    #[test]
    fn matches_the_chain_walker_on_total_orders() {
        let graph = ChainsTraceGraph::from_label_traces([
            vec!["open", "read", "close"],
            vec!["open", "read", "read", "close"],
        ])
        .unwrap();
        let walked = chain_mine(&graph, TIME_RELATION, &MinerOptions::default()).unwrap();
        let closed = mine_invariants(graph.as_trace_graph(), TIME_RELATION, false).unwrap();

        for invariant in walked.iter() {
            if invariant.kind() == InvariantKind::InterruptedBy {
                continue;
            }
            assert!(closed.contains(invariant), "missing {invariant}");
        }
        for invariant in closed.iter() {
            assert!(walked.contains(invariant), "extra {invariant}");
        }
    }

    #[test]
    fn never_emits_interrupted_by() {
        let graph = ChainsTraceGraph::from_label_traces([["a", "x", "a", "x", "a"]]).unwrap();
        let closed = mine_invariants(graph.as_trace_graph(), TIME_RELATION, false).unwrap();
        assert!(!closed.iter().any(|i| i.kind() == InvariantKind::InterruptedBy));
    }

    fn diamond_traces() -> DagsTraceGraph {
        let clocked = |l: &str, c: [u32; 2]| (Event::with_label(l), VectorTime::new(c));
        DagsTraceGraph::from_traces([
            vec![
                clocked("a", [1, 0]),
                clocked("b", [2, 1]),
                clocked("c", [1, 2]),
                clocked("d", [2, 3]),
            ],
            vec![
                clocked("a", [1, 0]),
                clocked("c", [2, 1]),
                clocked("b", [1, 2]),
                clocked("d", [2, 3]),
            ],
        ])
        .unwrap()
    }

    #[test]
    fn dag_reachability_invariants() {
        let graph = diamond_traces();
        let set = mine_invariants(graph.as_trace_graph(), TIME_RELATION, false).unwrap();
        assert!(set.contains(&Invariant::new(
            label("a"),
            InvariantKind::AlwaysFollowedBy,
            label("d"),
        )));
        assert!(set.contains(&Invariant::new(
            label("a"),
            InvariantKind::AlwaysPrecedes,
            label("d"),
        )));
        // b and c are unordered, so neither always follows the other.
        assert!(!set.contains(&Invariant::new(
            label("b"),
            InvariantKind::AlwaysFollowedBy,
            label("c"),
        )));
    }

    #[test]
    fn never_concurrent_on_the_diamond() {
        let graph = diamond_traces();
        let set = mine_never_concurrent(&graph, false);
        assert!(set.contains(&Invariant::new(
            label("a"),
            InvariantKind::NeverConcurrent,
            label("d"),
        )));
        assert!(!set.contains(&Invariant::new(
            label("b"),
            InvariantKind::NeverConcurrent,
            label("c"),
        )));
    }

    #[test]
    fn cyclic_fixture_is_reported() {
        let mut g = TraceGraph::new();
        let n0 = g.add_event_node(Some(0), Event::with_label("a"));
        let n1 = g.add_event_node(Some(0), Event::with_label("a"));
        g.link(n0, n1, [TIME_RELATION.to_string()]);
        g.link(n1, n0, [TIME_RELATION.to_string()]);
        g.register_trace(vec![n0, n1]);
        let err = mine_invariants(&g, TIME_RELATION, false).unwrap_err();
        assert!(matches!(err, ClosureMiningError::CyclicTrace { .. }));
    }
}
