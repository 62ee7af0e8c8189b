//! The explicit run configuration and the end-to-end driver: mine, build the
//! initial partition graph, refine, coarsen. The configuration is a plain
//! value threaded into the entry points; the crate holds no process-wide
//! state.

use thiserror::Error;
use tracing::info;

use crate::coarsening::coarsen;
use crate::event::{EventType, TIME_RELATION};
use crate::invariants::closure_miner::{self, ClosureMiningError};
use crate::invariants::miner::{self, MinerOptions};
use crate::invariants::{InvariantKind, TemporalInvariantSet};
use crate::math::OrderedSet;
use crate::partition_graph::{PartitionError, PartitionGraph};
use crate::refinement::{refine, RefinementError};
use crate::trace_graph::relation_path::WellFormednessError;
use crate::trace_graph::{ChainsTraceGraph, DagsTraceGraph, GraphBuildError};

/// Configuration for one inference run.
#[derive(Debug, Clone)]
pub struct Run {
    /// The k used by the k-tails quotient and the coarsening candidate
    /// filter.
    pub k: usize,
    /// Mine via the transitive-closure miner instead of the chain walker.
    /// The closure miner produces the same AFby/AP/NFby set but no IntrBy.
    pub use_transitive_closure_mining: bool,
    /// Mine every relation independently, with bi-relational paths for
    /// relations other than the ordering relation.
    pub multiple_relations: bool,
    /// Mine `NeverConcurrent` invariants for partially ordered inputs.
    pub mine_never_concurrent: bool,
    /// Drop invariants whose support count is at most this threshold.
    pub support_count_threshold: Option<u64>,
    /// Omit `InterruptedBy` invariants from the mined set.
    pub ignore_intr_by: bool,
    /// Drop invariants all of whose operand types lie in this set.
    pub ignore_invs_over_etype_set: OrderedSet<EventType>,
    /// Rescale per-trace event times into `[0, 1]` while building the trace
    /// graph. Honored by [`build_trace_graph`].
    pub trace_normalization: bool,
    /// Record support counts on mined invariants.
    pub support_counts: bool,
}

impl Default for Run {
    fn default() -> Self {
        Self {
            k: 1,
            use_transitive_closure_mining: false,
            multiple_relations: false,
            mine_never_concurrent: false,
            support_count_threshold: None,
            ignore_intr_by: false,
            ignore_invs_over_etype_set: OrderedSet::new(),
            trace_normalization: false,
            support_counts: false,
        }
    }
}

/// Failures of the end-to-end driver.
#[derive(Debug, Error)]
pub enum DriveError {
    /// The trace graph could not be assembled from the parsed events.
    #[error(transparent)]
    GraphBuild(#[from] GraphBuildError),
    /// The relation-path walker hit a malformed path.
    #[error(transparent)]
    WellFormedness(#[from] WellFormednessError),
    /// The closure miner hit a cyclic trace.
    #[error(transparent)]
    Closure(#[from] ClosureMiningError),
    /// A structural partition-graph failure.
    #[error(transparent)]
    Partition(#[from] PartitionError),
    /// Refinement could not satisfy an invariant.
    #[error(transparent)]
    Refinement(#[from] RefinementError),
}

/// Builds the chains trace graph for a run from parsed event traces,
/// honoring `trace_normalization`. Feed the result to [`drive`].
pub fn build_trace_graph(
    run: &Run,
    traces: impl IntoIterator<Item = Vec<crate::event::Event>>,
) -> Result<ChainsTraceGraph, DriveError> {
    let mut builder = ChainsTraceGraph::builder().normalize_times(run.trace_normalization);
    for trace in traces {
        builder = builder.trace(trace);
    }
    Ok(builder.build()?)
}

/// Runs the full pipeline on a totally ordered log: mine invariants, build
/// the type-clustered partition graph, refine until every invariant holds,
/// then coarsen under k-equivalence. Returns the final partition graph and
/// the full mined invariant set.
pub fn drive<'g>(
    run: &Run,
    graph: &'g ChainsTraceGraph,
) -> Result<(PartitionGraph<'g>, TemporalInvariantSet), DriveError> {
    let mined = if run.use_transitive_closure_mining {
        closure_miner::mine_invariants(
            graph.as_trace_graph(),
            TIME_RELATION,
            run.support_counts,
        )?
    } else {
        let opts = MinerOptions {
            multiple_relations: run.multiple_relations,
            support_counts: run.support_counts,
        };
        if run.multiple_relations {
            miner::mine_all_relations(graph, &opts)?
        } else {
            miner::mine_invariants(graph, TIME_RELATION, &opts)?
        }
    };
    let mined = apply_filters(run, mined);
    info!(invariants = mined.len(), "mining finished");

    let pg = build_model(run, graph.as_trace_graph(), &mined)?;
    Ok((pg, mined))
}

/// Runs the pipeline on a partially ordered log. Mining goes through the
/// reachability closure; `NeverConcurrent` invariants are added on demand.
pub fn drive_dags<'g>(
    run: &Run,
    graph: &'g DagsTraceGraph,
) -> Result<(PartitionGraph<'g>, TemporalInvariantSet), DriveError> {
    let mut mined = closure_miner::mine_invariants(
        graph.as_trace_graph(),
        TIME_RELATION,
        run.support_counts,
    )?;
    if run.mine_never_concurrent {
        mined.extend(closure_miner::mine_never_concurrent(graph, run.support_counts));
    }
    let mined = apply_filters(run, mined);
    info!(invariants = mined.len(), "mining finished");

    let pg = build_model(run, graph.as_trace_graph(), &mined)?;
    Ok((pg, mined))
}

fn apply_filters(run: &Run, mut mined: TemporalInvariantSet) -> TemporalInvariantSet {
    if run.ignore_intr_by {
        mined = mined.without_kind(InvariantKind::InterruptedBy);
    }
    if !run.ignore_invs_over_etype_set.is_empty() {
        mined = mined.without_types_in(&run.ignore_invs_over_etype_set);
    }
    if let Some(threshold) = run.support_count_threshold {
        mined = mined.filter_support(threshold);
    }
    mined
}

fn build_model<'g>(
    run: &Run,
    graph: &'g crate::trace_graph::TraceGraph,
    mined: &TemporalInvariantSet,
) -> Result<PartitionGraph<'g>, DriveError> {
    let mut pg = PartitionGraph::initialize_from(graph, mined.clone())?;
    let splits = refine(&mut pg)?;
    let merges = coarsen(&mut pg, run.k)?;
    info!(
        splits,
        merges,
        partitions = pg.size(),
        "model construction finished"
    );
    Ok(pg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariants::Invariant;

    fn label(l: &str) -> EventType {
        EventType::label(l)
    }

    #[test]
    fn drive_produces_a_counterexample_free_model() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let graph = ChainsTraceGraph::from_label_traces([
            vec!["x", "a", "b"],
            vec!["y", "a", "c"],
        ])
        .unwrap();
        let run = Run::default();
        let (mut pg, mined) = drive(&run, &graph).unwrap();
        assert!(!mined.is_empty());

        for invariant in mined.iter().cloned().collect::<Vec<_>>() {
            assert!(pg.counterexample(&invariant).unwrap().is_none());
        }
        // The shared a partition was split apart.
        assert_eq!(pg.partitions_of_type(&label("a")).len(), 2);
    }

    #[test]
    fn closure_mining_drops_intr_by_only() {
        let graph =
            ChainsTraceGraph::from_label_traces([["a", "x", "a", "x", "a"]]).unwrap();
        let walked = drive(&Run::default(), &graph).unwrap().1;
        let closed = drive(
            &Run {
                use_transitive_closure_mining: true,
                ..Run::default()
            },
            &graph,
        )
        .unwrap()
        .1;

        assert!(walked
            .iter()
            .any(|i| i.kind() == InvariantKind::InterruptedBy));
        assert!(!closed
            .iter()
            .any(|i| i.kind() == InvariantKind::InterruptedBy));
        for invariant in closed.iter() {
            assert!(walked.contains(invariant));
        }
    }

    #[test]
    fn ignore_intr_by_filters_the_mined_set() {
        let graph =
            ChainsTraceGraph::from_label_traces([["a", "x", "a", "x", "a"]]).unwrap();
        let run = Run {
            ignore_intr_by: true,
            ..Run::default()
        };
        let (_, mined) = drive(&run, &graph).unwrap();
        assert!(!mined.iter().any(|i| i.kind() == InvariantKind::InterruptedBy));
    }

    #[test]
    fn support_threshold_prunes_rare_invariants() {
        let graph = ChainsTraceGraph::from_label_traces([
            vec!["a", "b"],
            vec!["a", "b"],
            vec!["c", "b"],
        ])
        .unwrap();
        let run = Run {
            support_counts: true,
            support_count_threshold: Some(1),
            ..Run::default()
        };
        let (_, mined) = drive(&run, &graph).unwrap();
        // c occurs once; every invariant with c on the left is pruned.
        assert!(!mined.iter().any(|i| i.left() == &label("c")));
        assert!(mined.contains(&Invariant::new(
            label("a"),
            InvariantKind::AlwaysFollowedBy,
            label("b"),
        )));
    }

    #[test]
    fn dag_drive_mines_never_concurrent_on_request() {
        use crate::event::Event;
        use crate::time::VectorTime;
        let clocked = |l: &str, c: [u32; 2]| (Event::with_label(l), VectorTime::new(c));
        let graph = DagsTraceGraph::from_traces([
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
        .unwrap();

        let without = drive_dags(&Run::default(), &graph).unwrap().1;
        assert!(!without
            .iter()
            .any(|i| i.kind() == InvariantKind::NeverConcurrent));

        let run = Run {
            mine_never_concurrent: true,
            ..Run::default()
        };
        let (_, mined) = drive_dags(&run, &graph).unwrap();
        assert!(mined.contains(&Invariant::new(
            label("a"),
            InvariantKind::NeverConcurrent,
            label("d"),
        )));
        assert!(!mined.contains(&Invariant::new(
            label("b"),
            InvariantKind::NeverConcurrent,
            label("c"),
        )));
    }

    #[test]
    fn type_blacklist_drops_covered_invariants() {
        let graph = ChainsTraceGraph::from_label_traces([["a", "b", "c"]]).unwrap();
        let run = Run {
            ignore_invs_over_etype_set: OrderedSet::from([label("a"), label("b")]),
            ..Run::default()
        };
        let (_, mined) = drive(&run, &graph).unwrap();
        assert!(!mined.contains(&Invariant::new(
            label("a"),
            InvariantKind::AlwaysFollowedBy,
            label("b"),
        )));
        assert!(mined.contains(&Invariant::new(
            label("a"),
            InvariantKind::AlwaysFollowedBy,
            label("c"),
        )));
    }

    #[test]
    fn trace_normalization_rescales_event_times() {
        use crate::event::Event;
        use crate::time::Timestamp;
        let traces = || {
            vec![vec![
                Event::with_label("a").at(Timestamp::new(2.0)),
                Event::with_label("b").at(Timestamp::new(8.0)),
            ]]
        };
        let run = Run {
            trace_normalization: true,
            ..Run::default()
        };
        let graph = build_trace_graph(&run, traces()).unwrap();
        let times: Vec<f64> = graph.traces()[0]
            .members()
            .iter()
            .map(|&m| graph.node(m).event().time().unwrap().value())
            .collect();
        assert_eq!(times, vec![0.25, 1.0]);

        let raw = build_trace_graph(&Run::default(), traces()).unwrap();
        let first = raw.traces()[0].members()[0];
        assert_eq!(raw.node(first).event().time().unwrap().value(), 2.0);

        // The built graph feeds straight into the pipeline.
        drive(&run, &graph).unwrap();
    }

    #[test]
    fn identical_runs_yield_identical_models() {
        let build = || {
            let graph = ChainsTraceGraph::from_label_traces([
                vec!["open", "read", "close"],
                vec!["open", "read", "read", "close"],
                vec!["open", "close"],
            ])
            .unwrap();
            let (pg, mined) = drive(&Run::default(), &graph).unwrap();
            let mut shape: Vec<(String, usize)> = pg
                .partition_ids()
                .into_iter()
                .map(|p| {
                    let partition = pg.partition(p).unwrap();
                    (partition.etype().to_string(), partition.size())
                })
                .collect();
            shape.sort();
            (shape, mined.to_file_string())
        };
        assert_eq!(build(), build());
    }
}
