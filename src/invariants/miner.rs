//! The chain-walking invariant miner. Runs linear in the number of events:
//! every trace is walked once per mined relation and the per-path count
//! tables are aggregated into global counts, from which all invariants are
//! read off directly.

use tracing::debug;

use crate::event::{EventType, TIME_RELATION};
use crate::invariants::{Invariant, InvariantKind, TemporalInvariantSet};
use crate::math::{Map, Set};
use crate::trace_graph::relation_path::WellFormednessError;
use crate::trace_graph::ChainsTraceGraph;

/// Knobs recognized by the miner itself. Filtering (support thresholds, type
/// blacklists, kind toggles) happens on the resulting set, not here.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinerOptions {
    /// Mine each relation independently and use bi-relational paths for
    /// relations other than the ordering relation.
    pub multiple_relations: bool,
    /// Record support counts on emitted invariants.
    pub support_counts: bool,
}

/// Mines AFby, AP, NFby and IntrBy invariants over every relation of the
/// graph and unions the results.
pub fn mine_all_relations(
    graph: &ChainsTraceGraph,
    opts: &MinerOptions,
) -> Result<TemporalInvariantSet, WellFormednessError> {
    let mut result = TemporalInvariantSet::new();
    for relation in graph.as_trace_graph().relations().clone() {
        result.extend(mine_invariants(graph, &relation, opts)?);
    }
    Ok(result)
}

/// Mines AFby, AP, NFby and IntrBy invariants for a single relation.
///
/// Also mines the `INITIAL AFby x` ("eventually x") invariants from the
/// intersection of the types seen on every relation path.
pub fn mine_invariants(
    graph: &ChainsTraceGraph,
    relation: &str,
    opts: &MinerOptions,
) -> Result<TemporalInvariantSet, WellFormednessError> {
    let mut paths = Vec::new();
    for trace in graph.traces() {
        if opts.multiple_relations && relation != TIME_RELATION {
            paths.extend(graph.bi_relational_path(trace.id(), relation));
        } else {
            paths.extend(graph.single_relation_paths(trace.id(), relation));
        }
    }

    // Global tables across all relation paths.
    let mut event_counts: Map<EventType, u64> = Map::new();
    let mut followed_by: Map<EventType, Map<EventType, u64>> = Map::new();
    let mut precedes: Map<EventType, Map<EventType, u64>> = Map::new();
    let mut interrupts: Map<EventType, Set<EventType>> = Map::new();
    let mut always_follows_initial: Option<Set<EventType>> = None;
    let path_count = paths.len() as u64;

    for path in &paths {
        let counts = path.counts()?;
        for (etype, count) in &counts.event_counts {
            *event_counts.entry(etype.clone()).or_insert(0) += count;
        }
        add_counts(&counts.followed_by, &mut followed_by);
        add_counts(&counts.precedes, &mut precedes);
        intersect_interrupts(&counts.possible_interrupts, &mut interrupts);

        always_follows_initial = Some(match always_follows_initial.take() {
            None => counts.seen.clone(),
            Some(acc) => acc.intersection(&counts.seen).cloned().collect(),
        });
    }

    let etypes: Vec<EventType> = event_counts.keys().cloned().collect();
    let lookup = |table: &Map<EventType, Map<EventType, u64>>, a: &EventType, b: &EventType| {
        table.get(a).and_then(|row| row.get(b)).copied().unwrap_or(0)
    };

    let mut result = TemporalInvariantSet::new();
    let mut emit = |invariant: Invariant, support: u64| {
        if opts.support_counts {
            result.add(invariant.with_support(support));
        } else {
            result.add(invariant);
        }
    };

    for t in always_follows_initial.iter().flatten() {
        emit(
            Invariant::over_relation(
                EventType::Initial,
                InvariantKind::AlwaysFollowedBy,
                t.clone(),
                relation,
            ),
            path_count,
        );
    }

    for a in &etypes {
        for b in &etypes {
            let fb = lookup(&followed_by, a, b);
            if fb == event_counts[a] && event_counts[a] > 0 {
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
            if fb == 0 {
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
            if lookup(&precedes, a, b) == event_counts[b] && event_counts[b] > 0 {
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

    for (interrupted, interrupters) in &interrupts {
        for interrupter in interrupters {
            emit(
                Invariant::over_relation(
                    interrupted.clone(),
                    InvariantKind::InterruptedBy,
                    interrupter.clone(),
                    relation,
                ),
                event_counts[interrupted],
            );
        }
    }

    debug!(
        relation,
        invariants = result.len(),
        paths = paths.len(),
        "mined invariants"
    );
    Ok(result)
}

/// Adds the values from `src` into `dst`, where both have the shape
/// `counts[a][b]`.
fn add_counts(
    src: &Map<EventType, Map<EventType, u64>>,
    dst: &mut Map<EventType, Map<EventType, u64>>,
) {
    for (a, row) in src {
        let dst_row = dst.entry(a.clone()).or_default();
        for (b, count) in row {
            *dst_row.entry(b.clone()).or_insert(0) += count;
        }
    }
}

/// Narrows the global interrupt candidates to those valid in this path as
/// well. A type first observed re-occurring in this path contributes its
/// whole candidate set.
fn intersect_interrupts(
    src: &Map<EventType, Set<EventType>>,
    dst: &mut Map<EventType, Set<EventType>>,
) {
    for (etype, candidates) in src {
        match dst.entry(etype.clone()) {
            indexmap::map::Entry::Occupied(mut entry) => {
                let narrowed: Set<EventType> =
                    entry.get().intersection(candidates).cloned().collect();
                *entry.get_mut() = narrowed;
            }
            indexmap::map::Entry::Vacant(entry) => {
                entry.insert(candidates.clone());
            }
        }
    }
}
