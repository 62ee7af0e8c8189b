//! The partition graph: a quotient of the trace graph whose nodes are sets
//! of event nodes of identical type. Transitions are induced from the
//! underlying event nodes and cached per partition; every mutation goes
//! through the reversible [`Operation`](operations::Operation) protocol.

pub mod operations;

use bit_set::BitSet;
use itertools::Itertools;
use thiserror::Error;
use tracing::trace;

use crate::event::{EventType, TIME_RELATION};
use crate::graph::{Graph, NodeId};
use crate::invariants::{Invariant, InvariantKind, TemporalInvariantSet};
use crate::math::{Map, OrderedSet};
use crate::trace_graph::TraceGraph;

/// Identifier of a partition. Identifiers are assigned from a counter and
/// never reused, so they double as deterministic tie-breaks.
pub type PartitionId = usize;

/// Structural errors raised by partition-graph construction and mutation.
/// Operations validate fully before mutating, so a surfaced error implies
/// the graph is unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PartitionError {
    /// The referenced partition does not exist.
    #[error("unknown partition {0}")]
    UnknownPartition(PartitionId),
    /// Sentinel partitions are never split or merged.
    #[error("partition {0} holds a sentinel and cannot be split or merged")]
    SentinelPartition(PartitionId),
    /// Merging partitions of different event types.
    #[error("cannot merge partitions {left} and {right} of different event types")]
    MergeTypeMismatch {
        /// First operand of the merge.
        left: PartitionId,
        /// Offending second operand.
        right: PartitionId,
    },
    /// A merge needs at least two distinct partitions.
    #[error("merge needs at least two distinct partitions")]
    DegenerateMerge,
    /// A split needs at least two non-empty groups.
    #[error("split of partition {partition} needs at least two non-empty groups")]
    DegenerateSplit {
        /// The partition being split.
        partition: PartitionId,
    },
    /// Split groups must partition the event nodes of the split partition.
    #[error("split groups do not partition the event nodes of partition {partition}")]
    SplitNotAPartition {
        /// The partition being split.
        partition: PartitionId,
    },
    /// An event node would end up in no or several partitions.
    #[error("event node {node} is covered by {found} clusters, expected exactly one")]
    NodeCoverage {
        /// The offending event node.
        node: NodeId,
        /// How many clusters claim it.
        found: usize,
    },
    /// A cluster passed to construction is empty.
    #[error("cluster {index} is empty")]
    EmptyCluster {
        /// Position of the offending cluster.
        index: usize,
    },
    /// A cluster passed to construction mixes event types.
    #[error("cluster {index} mixes event types")]
    MixedCluster {
        /// Position of the offending cluster.
        index: usize,
    },
}

/// A non-empty set of event nodes of identical event type. Owned by exactly
/// one [`PartitionGraph`]; identified by its id, not by its membership.
#[derive(Debug, Clone)]
pub struct Partition {
    id: PartitionId,
    etype: EventType,
    members: BitSet,
    /// Induced outgoing transitions, computed lazily and dropped whenever a
    /// mutation touches this partition or one of its targets.
    outgoing: Option<Map<String, OrderedSet<PartitionId>>>,
}

impl Partition {
    /// The identifier of this partition.
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// The event type shared by all member nodes.
    pub fn etype(&self) -> &EventType {
        &self.etype
    }

    /// The member event nodes, in ascending id order.
    pub fn members(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter()
    }

    /// Number of member event nodes.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Whether the given event node belongs to this partition.
    pub fn contains(&self, node: NodeId) -> bool {
        self.members.contains(node)
    }

    /// Whether this partition holds a sentinel node.
    pub fn is_sentinel(&self) -> bool {
        self.etype.is_sentinel()
    }
}

/// The quotient graph over a trace graph, together with the invariant set it
/// is being refined against.
#[derive(Debug, Clone)]
pub struct PartitionGraph<'g> {
    graph: &'g TraceGraph,
    invariants: TemporalInvariantSet,
    partitions: Map<PartitionId, Partition>,
    node_to_partition: Vec<PartitionId>,
    next_id: PartitionId,
    initial: PartitionId,
    terminal: PartitionId,
}

impl<'g> PartitionGraph<'g> {
    /// Creates the initial partition graph: one partition per event-type
    /// cluster plus singletons for the two sentinels.
    pub fn initialize_from(
        graph: &'g TraceGraph,
        invariants: TemporalInvariantSet,
    ) -> Result<Self, PartitionError> {
        let mut clusters: Map<EventType, Vec<NodeId>> = Map::new();
        for id in graph.event_node_ids() {
            clusters
                .entry(graph.node(id).etype().clone())
                .or_default()
                .push(id);
        }
        Self::from_clusters(graph, invariants, clusters.into_values().collect())
    }

    /// Creates a partition graph from explicit clusters over the non-sentinel
    /// event nodes. Each cluster must be non-empty, type-uniform, and the
    /// clusters must cover every non-sentinel node exactly once. Sentinel
    /// singletons are added automatically.
    pub fn from_clusters(
        graph: &'g TraceGraph,
        invariants: TemporalInvariantSet,
        clusters: Vec<Vec<NodeId>>,
    ) -> Result<Self, PartitionError> {
        for (index, cluster) in clusters.iter().enumerate() {
            if cluster.is_empty() {
                return Err(PartitionError::EmptyCluster { index });
            }
            if !cluster
                .iter()
                .map(|&n| graph.node(n).etype())
                .all_equal()
            {
                return Err(PartitionError::MixedCluster { index });
            }
        }
        let mut coverage: Map<NodeId, usize> = Map::new();
        for cluster in &clusters {
            for &node in cluster {
                *coverage.entry(node).or_insert(0) += 1;
            }
        }
        for id in graph.event_node_ids() {
            let found = coverage.get(&id).copied().unwrap_or(0);
            if found != 1 {
                return Err(PartitionError::NodeCoverage { node: id, found });
            }
        }

        let mut pg = Self {
            graph,
            invariants,
            partitions: Map::new(),
            node_to_partition: vec![usize::MAX; graph.node_count()],
            next_id: 0,
            initial: 0,
            terminal: 0,
        };
        pg.initial = pg.insert_partition(EventType::Initial, [graph.initial()]);
        pg.terminal = pg.insert_partition(EventType::Terminal, [graph.terminal()]);
        for cluster in clusters {
            let etype = graph.node(cluster[0]).etype().clone();
            pg.insert_partition(etype, cluster);
        }
        Ok(pg)
    }

    fn insert_partition(
        &mut self,
        etype: EventType,
        members: impl IntoIterator<Item = NodeId>,
    ) -> PartitionId {
        let id = self.next_id;
        self.next_id += 1;
        let mut set = BitSet::new();
        for node in members {
            set.insert(node);
            self.node_to_partition[node] = id;
        }
        self.partitions.insert(
            id,
            Partition {
                id,
                etype,
                members: set,
                outgoing: None,
            },
        );
        id
    }

    /// The trace graph this partition graph quotients.
    pub fn trace_graph(&self) -> &'g TraceGraph {
        self.graph
    }

    /// The invariants this graph is refined against.
    pub fn invariants(&self) -> &TemporalInvariantSet {
        &self.invariants
    }

    /// All partition identifiers, ascending.
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        self.partitions.keys().copied().sorted().collect()
    }

    /// Number of partitions.
    pub fn size(&self) -> usize {
        self.partitions.len()
    }

    /// The partition with the given identifier.
    pub fn partition(&self, id: PartitionId) -> Result<&Partition, PartitionError> {
        self.partitions
            .get(&id)
            .ok_or(PartitionError::UnknownPartition(id))
    }

    /// Whether the partition still exists.
    pub fn contains_partition(&self, id: PartitionId) -> bool {
        self.partitions.contains_key(&id)
    }

    /// The partition holding the given event node.
    pub fn partition_of(&self, node: NodeId) -> PartitionId {
        self.node_to_partition[node]
    }

    /// The sentinel partition holding INITIAL.
    pub fn initial_partition(&self) -> PartitionId {
        self.initial
    }

    /// The sentinel partition holding TERMINAL.
    pub fn terminal_partition(&self) -> PartitionId {
        self.terminal
    }

    /// Identifiers of partitions of the given event type, ascending.
    pub fn partitions_of_type(&self, etype: &EventType) -> Vec<PartitionId> {
        self.partitions
            .values()
            .filter(|p| &p.etype == etype)
            .map(|p| p.id)
            .sorted()
            .collect()
    }

    /// Applies a reversible operation to this graph and returns its inverse.
    pub fn apply(
        &mut self,
        operation: operations::Operation,
    ) -> Result<operations::Operation, PartitionError> {
        operation.apply(self)
    }

    /// The induced outgoing transitions of a partition, keyed by relation.
    /// Computed from the underlying event nodes on first access and cached
    /// until a mutation invalidates it.
    pub fn outgoing(&mut self, id: PartitionId) -> Result<&Map<String, OrderedSet<PartitionId>>, PartitionError> {
        if !self.partitions.contains_key(&id) {
            return Err(PartitionError::UnknownPartition(id));
        }
        if self.partitions[&id].outgoing.is_none() {
            let computed = self.compute_outgoing(id);
            self.partitions
                .get_mut(&id)
                .expect("presence checked above")
                .outgoing = Some(computed);
        }
        Ok(self.partitions[&id]
            .outgoing
            .as_ref()
            .expect("cache filled above"))
    }

    fn compute_outgoing(&self, id: PartitionId) -> Map<String, OrderedSet<PartitionId>> {
        let mut out: Map<String, OrderedSet<PartitionId>> = Map::new();
        for node in self.partitions[&id].members.iter() {
            for transition in self.graph.node(node).transitions() {
                let target = self.node_to_partition[transition.target()];
                for relation in transition.relations() {
                    out.entry(relation.clone()).or_default().insert(target);
                }
            }
        }
        out
    }

    /// Drops the cached induced transitions of every partition that points
    /// at one of `targets`.
    fn invalidate_caches_referencing(&mut self, targets: &OrderedSet<PartitionId>) {
        for partition in self.partitions.values_mut() {
            let stale = partition
                .outgoing
                .as_ref()
                .map(|out| {
                    out.values()
                        .any(|set| set.iter().any(|q| targets.contains(q)))
                })
                .unwrap_or(false);
            if stale {
                partition.outgoing = None;
            }
        }
    }

    /// Partitions with an induced transition into `id`, ascending.
    pub fn predecessors(&mut self, id: PartitionId) -> Result<OrderedSet<PartitionId>, PartitionError> {
        let mut preds = OrderedSet::new();
        for q in self.partition_ids() {
            let reaches = self
                .outgoing(q)?
                .values()
                .any(|targets| targets.contains(&id));
            if reaches {
                preds.insert(q);
            }
        }
        Ok(preds)
    }

    /// Successors of a partition as seen by the counterexample searches: the
    /// induced transitions on `relation`, widened so that the sentinel
    /// boundary edges (which only ever carry the ordering relation) stay
    /// traversable when searching a secondary relation.
    pub fn search_successors(
        &mut self,
        id: PartitionId,
        relation: &str,
    ) -> Result<OrderedSet<PartitionId>, PartitionError> {
        let terminal = self.terminal;
        let initial = self.initial;
        let out = self.outgoing(id)?;
        let mut successors: OrderedSet<PartitionId> =
            out.get(relation).cloned().unwrap_or_default();
        if let Some(ordering) = out.get(TIME_RELATION) {
            if id == initial {
                successors.extend(ordering.iter().copied());
            }
            if ordering.contains(&terminal) {
                successors.insert(terminal);
            }
        }
        Ok(successors)
    }

    /// Searches the current partition graph for a path witnessing a
    /// violation of the invariant. `None` means the invariant is satisfied.
    ///
    /// `NeverConcurrent` is a property of the underlying vector clocks and
    /// cannot be violated by re-partitioning, so it never yields a
    /// counterexample here.
    pub fn counterexample(
        &mut self,
        invariant: &Invariant,
    ) -> Result<Option<Vec<PartitionId>>, PartitionError> {
        let relation = invariant.relation().to_string();
        let left: Vec<PartitionId> = self.partitions_of_type(invariant.left());
        let right_set: OrderedSet<PartitionId> = self
            .partitions_of_type(invariant.right())
            .into_iter()
            .collect();

        let found = match invariant.kind() {
            InvariantKind::NeverConcurrent => None,
            InvariantKind::AlwaysFollowedBy => {
                self.afby_counterexample(&relation, &left, &right_set)?
            }
            InvariantKind::AlwaysPrecedes => {
                let left_set: OrderedSet<PartitionId> = left.iter().copied().collect();
                self.bfs_path(self.initial, &relation, &right_set, &left_set)?
            }
            InvariantKind::NeverFollowedBy => {
                self.nfby_counterexample(&relation, &left, &right_set)?
            }
            InvariantKind::InterruptedBy => {
                self.intrby_counterexample(&relation, &left, &right_set)?
            }
        };
        if let Some(path) = &found {
            trace!(%invariant, ?path, "found counterexample");
        }
        Ok(found)
    }

    fn afby_counterexample(
        &mut self,
        relation: &str,
        left: &[PartitionId],
        right: &OrderedSet<PartitionId>,
    ) -> Result<Option<Vec<PartitionId>>, PartitionError> {
        let reachable = self.reachable_from_initial(relation)?;
        let escapes = self.reaches_terminal_avoiding(relation, right)?;
        for &p in left {
            if !reachable.contains(&p) {
                continue;
            }
            let has_escape = self
                .search_successors(p, relation)?
                .iter()
                .any(|s| escapes.contains(s));
            if !has_escape {
                continue;
            }
            let prefix = if p == self.initial {
                vec![p]
            } else {
                let goal: OrderedSet<PartitionId> = OrderedSet::from([p]);
                self.bfs_path(self.initial, relation, &goal, &OrderedSet::new())?
                    .expect("partition is reachable from INITIAL")
            };
            let blocked: OrderedSet<PartitionId> = self
                .partition_ids()
                .into_iter()
                .filter(|q| !escapes.contains(q))
                .collect();
            let goal: OrderedSet<PartitionId> = OrderedSet::from([self.terminal]);
            let suffix = self
                .bfs_path(p, relation, &goal, &blocked)?
                .expect("an escape successor exists");
            let mut path = prefix;
            path.extend(suffix.into_iter().skip(1));
            return Ok(Some(path));
        }
        Ok(None)
    }

    fn nfby_counterexample(
        &mut self,
        relation: &str,
        left: &[PartitionId],
        right: &OrderedSet<PartitionId>,
    ) -> Result<Option<Vec<PartitionId>>, PartitionError> {
        let reachable = self.reachable_from_initial(relation)?;
        for &p in left {
            if !reachable.contains(&p) {
                continue;
            }
            if let Some(suffix) = self.bfs_path(p, relation, right, &OrderedSet::new())? {
                let goal: OrderedSet<PartitionId> = OrderedSet::from([p]);
                let mut path = self
                    .bfs_path(self.initial, relation, &goal, &OrderedSet::new())?
                    .expect("partition is reachable from INITIAL");
                path.extend(suffix.into_iter().skip(1));
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    fn intrby_counterexample(
        &mut self,
        relation: &str,
        left: &[PartitionId],
        right: &OrderedSet<PartitionId>,
    ) -> Result<Option<Vec<PartitionId>>, PartitionError> {
        let reachable = self.reachable_from_initial(relation)?;
        let left_set: OrderedSet<PartitionId> = left.iter().copied().collect();
        // A violation is a pair of consecutive left occurrences with neither
        // the interrupter nor another left occurrence strictly in between.
        let blocked: OrderedSet<PartitionId> =
            left_set.union(right).copied().collect();
        for &p in left {
            if !reachable.contains(&p) {
                continue;
            }
            if let Some(suffix) = self.bfs_path(p, relation, &left_set, &blocked)? {
                let goal: OrderedSet<PartitionId> = OrderedSet::from([p]);
                let mut path = self
                    .bfs_path(self.initial, relation, &goal, &OrderedSet::new())?
                    .expect("partition is reachable from INITIAL");
                path.extend(suffix.into_iter().skip(1));
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    /// Breadth-first search from `start` along `relation`. The start node is
    /// not tested against `goals`; goal detection takes precedence over
    /// `blocked`. Returns the partition sequence including both endpoints.
    fn bfs_path(
        &mut self,
        start: PartitionId,
        relation: &str,
        goals: &OrderedSet<PartitionId>,
        blocked: &OrderedSet<PartitionId>,
    ) -> Result<Option<Vec<PartitionId>>, PartitionError> {
        let mut parent: Map<PartitionId, PartitionId> = Map::new();
        let mut queue: std::collections::VecDeque<PartitionId> =
            std::collections::VecDeque::from([start]);
        let mut visited: OrderedSet<PartitionId> = OrderedSet::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in self.search_successors(current, relation)? {
                if goals.contains(&next) {
                    let mut path = vec![next, current];
                    let mut cursor = current;
                    while let Some(&prev) = parent.get(&cursor) {
                        path.push(prev);
                        cursor = prev;
                    }
                    path.reverse();
                    return Ok(Some(path));
                }
                if blocked.contains(&next) || !visited.insert(next) {
                    continue;
                }
                parent.insert(next, current);
                queue.push_back(next);
            }
        }
        Ok(None)
    }

    /// All partitions reachable from the INITIAL partition, itself included.
    fn reachable_from_initial(
        &mut self,
        relation: &str,
    ) -> Result<OrderedSet<PartitionId>, PartitionError> {
        let mut reachable: OrderedSet<PartitionId> = OrderedSet::from([self.initial]);
        let mut queue = vec![self.initial];
        while let Some(current) = queue.pop() {
            for next in self.search_successors(current, relation)? {
                if reachable.insert(next) {
                    queue.push(next);
                }
            }
        }
        Ok(reachable)
    }

    /// Partitions from which TERMINAL is reachable without stepping into any
    /// of `avoid`. TERMINAL itself is always included; partitions in `avoid`
    /// never are.
    fn reaches_terminal_avoiding(
        &mut self,
        relation: &str,
        avoid: &OrderedSet<PartitionId>,
    ) -> Result<OrderedSet<PartitionId>, PartitionError> {
        let mut reverse: Map<PartitionId, OrderedSet<PartitionId>> = Map::new();
        for q in self.partition_ids() {
            for s in self.search_successors(q, relation)? {
                reverse.entry(s).or_default().insert(q);
            }
        }
        let mut result: OrderedSet<PartitionId> = OrderedSet::from([self.terminal]);
        let mut queue = vec![self.terminal];
        while let Some(current) = queue.pop() {
            let Some(preds) = reverse.get(&current) else {
                continue;
            };
            for &q in preds {
                if !avoid.contains(&q) && result.insert(q) {
                    queue.push(q);
                }
            }
        }
        Ok(result)
    }
}

impl Graph for PartitionGraph<'_> {
    fn node_ids(&self) -> Vec<NodeId> {
        self.partition_ids()
    }

    fn etype_of(&self, id: NodeId) -> &EventType {
        &self.partitions[&id].etype
    }

    fn initial_id(&self) -> NodeId {
        self.initial
    }

    fn terminal_id(&self) -> NodeId {
        self.terminal
    }

    fn relations(&self) -> &OrderedSet<String> {
        self.graph.relations()
    }

    fn edge_tuples(&self) -> Vec<(NodeId, NodeId, String, u64)> {
        let mut counts: Map<(PartitionId, PartitionId, String), u64> = Map::new();
        for id in self.partition_ids() {
            for node in self.partitions[&id].members.iter() {
                for transition in self.graph.node(node).transitions() {
                    let target = self.node_to_partition[transition.target()];
                    for relation in transition.relations() {
                        *counts.entry((id, target, relation.clone())).or_insert(0) += 1;
                    }
                }
            }
        }
        counts
            .into_iter()
            .map(|((src, dst, relation), count)| (src, dst, relation, count))
            .collect()
    }

    fn node_size(&self, id: NodeId) -> usize {
        self.partitions[&id].members.len()
    }
}
