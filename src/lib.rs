//! Infers a concise finite-state model of a component's behavior from its
//! event logs.
//!
//! Given a set of totally or partially ordered event traces, the crate mines
//! temporal invariants over event types ([`invariants`]), builds a trace
//! graph ([`trace_graph`]), quotients it into a partition graph
//! ([`partition_graph`]), and then alternately refines ([`refinement`]) and
//! coarsens ([`coarsening`]) the partitions until the model accepts every
//! observed trace and satisfies every mined invariant. A generalized k-tails
//! quotient over event nodes is available separately ([`ktails`]).
//!
//! The [`run`] module ties the stages together behind a single explicit
//! configuration value; [`export`] renders the resulting graphs.
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The prelude makes using this crate easier: `use tracemine::prelude::*;`
/// brings every commonly needed type into scope.
pub mod prelude {
    pub use crate::coarsening::coarsen;
    pub use crate::event::{Event, EventType, TIME_RELATION};
    pub use crate::export::{ExportEdge, ExportNode, ExportView};
    pub use crate::graph::{Graph, NodeId};
    pub use crate::invariants::closure_miner;
    pub use crate::invariants::miner::{mine_all_relations, mine_invariants, MinerOptions};
    pub use crate::invariants::{Invariant, InvariantKind, TemporalInvariantSet};
    pub use crate::ktails::{k_equals, perform_ktails, KTails, PartitionKTails};
    pub use crate::math;
    pub use crate::partition_graph::operations::Operation;
    pub use crate::partition_graph::{Partition, PartitionError, PartitionGraph, PartitionId};
    pub use crate::refinement::{refine, RefinementError};
    pub use crate::run::{build_trace_graph, drive, drive_dags, DriveError, Run};
    pub use crate::time::{Timestamp, VectorTime};
    pub use crate::trace_graph::relation_path::{RelationPath, WellFormednessError};
    pub use crate::trace_graph::{
        ChainsBuilder, ChainsTraceGraph, DagsTraceGraph, EventNode, GraphBuildError, Trace,
        TraceGraph, TraceId, Transition,
    };
    pub use crate::Show;
}

/// Deterministic collection aliases used throughout the crate.
pub mod math;

/// Totally ordered timestamps and vector clocks.
pub mod time;

/// Events and their types, including the two reserved sentinels.
pub mod event;

/// The read-only capability traits shared by trace and partition graphs.
pub mod graph;

/// Trace graphs: arenas of event nodes wired per trace.
pub mod trace_graph;

/// Temporal invariants and the miners that produce them.
pub mod invariants;

/// The partition graph and its reversible operation protocol.
pub mod partition_graph;

/// Bounded-depth behavioral equivalence and the k-tails quotient.
pub mod ktails;

/// Counterexample-guided partition splitting.
pub mod refinement;

/// Invariant-preserving partition merging.
pub mod coarsening;

/// Read-only graph export and DOT rendering.
pub mod export;

/// Run configuration and the end-to-end driver.
pub mod run;

/// Helper trait for human-readable representations of states, types and
/// invariants, mainly used by the exporters and for debugging.
pub trait Show {
    /// Returns a human readable representation of `self`.
    fn show(&self) -> String;
}

impl Show for usize {
    fn show(&self) -> String {
        self.to_string()
    }
}

impl Show for String {
    fn show(&self) -> String {
        self.clone()
    }
}

impl<S: Show> Show for &S {
    fn show(&self) -> String {
        S::show(*self)
    }
}
