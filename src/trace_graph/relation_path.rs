//! A view of a single trace restricted to one primary relation, traversed
//! along the ordering relation. A single forward walk produces all the count
//! tables the invariant miner consumes; the tables are memoized per path.

use std::cell::OnceCell;

use thiserror::Error;

use crate::event::EventType;
use crate::graph::NodeId;
use crate::math::{Map, OrderedSet, Set};
use crate::trace_graph::{EventNode, TraceGraph, Transition};

/// Violations of the well-formedness rules a relation path relies on: every
/// node on the path must have exactly one outgoing ordering transition and at
/// most one outgoing primary-relation transition, and the walk must end at
/// the recorded final node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WellFormednessError {
    /// A node had zero or several outgoing ordering-relation transitions.
    #[error("node {node} has {found} transitions on the ordering relation, expected exactly one")]
    AmbiguousOrdering {
        /// The offending node.
        node: NodeId,
        /// How many ordering transitions it has.
        found: usize,
    },
    /// A node had more than one outgoing primary-relation transition.
    #[error("node {node} has more than one transition on relation {relation:?}")]
    MultipleRelationTransitions {
        /// The offending node.
        node: NodeId,
        /// The primary relation of the walk.
        relation: String,
    },
    /// The walk ran out of transitions before reaching the final node, or
    /// stepped onto a sentinel past it. The two termination conditions
    /// disagree, so the path is malformed.
    #[error("walk ended at node {node} without reaching the final node {expected}")]
    EndedEarly {
        /// Where the walk got stuck.
        node: NodeId,
        /// The final node it should have reached.
        expected: NodeId,
    },
}

/// The tables produced by one walk, keyed on event types.
#[derive(Debug, Clone, Default)]
pub struct WalkCounts {
    /// Event types encountered along the path.
    pub seen: Set<EventType>,
    /// Occurrences per event type.
    pub event_counts: Map<EventType, u64>,
    /// `followed_by[a][b]` holds the number of `a`s seen at the instant of
    /// the latest `b` occurrence.
    pub followed_by: Map<EventType, Map<EventType, u64>>,
    /// `precedes[a][b]` counts occurrences of `b` while `a` was already seen.
    pub precedes: Map<EventType, Map<EventType, u64>>,
    /// For each re-occurring type, the types observed between every
    /// consecutive pair of its occurrences.
    pub possible_interrupts: Map<EventType, Set<EventType>>,
}

/// A relation path through one trace. Holds the first and last non-sentinel
/// nodes, whether INITIAL is only transitively connected to the primary
/// relation's subgraph, and the lazily computed [`WalkCounts`].
pub struct RelationPath<'g> {
    graph: &'g TraceGraph,
    first: NodeId,
    last: NodeId,
    relation: String,
    ordering: String,
    initial_transitively_connected: bool,
    counts: OnceCell<Result<WalkCounts, WellFormednessError>>,
}

impl<'g> RelationPath<'g> {
    pub(crate) fn new(
        graph: &'g TraceGraph,
        first: NodeId,
        last: NodeId,
        relation: &str,
        ordering: &str,
        initial_transitively_connected: bool,
    ) -> Self {
        Self {
            graph,
            first,
            last,
            relation: relation.to_string(),
            ordering: ordering.to_string(),
            initial_transitively_connected,
            counts: OnceCell::new(),
        }
    }

    /// First non-sentinel node of the path.
    pub fn first_node(&self) -> NodeId {
        self.first
    }

    /// Last non-sentinel node of the path.
    pub fn last_node(&self) -> NodeId {
        self.last
    }

    /// The primary relation this path is over.
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// The memoized walk tables, computing them on first access.
    pub fn counts(&self) -> Result<&WalkCounts, WellFormednessError> {
        self.counts
            .get_or_init(|| self.walk())
            .as_ref()
            .map_err(|e| e.clone())
    }

    /// The candidate transitions to follow from `node`: the exact primary
    /// relation transition when there is one, the ordering transition
    /// otherwise.
    fn next_candidates<'n>(
        &self,
        node: &'n EventNode,
        relation_set: &OrderedSet<String>,
        ordering_set: &OrderedSet<String>,
    ) -> Vec<&'n Transition> {
        let exact = node.transitions_with_exact_relations(relation_set);
        if exact.is_empty() {
            node.transitions_with_intersecting_relations(ordering_set)
        } else {
            exact
        }
    }

    /// Walks the path once, counting occurrences, followed-by pairs, precedes
    /// pairs and interrupt candidates. Nodes outside the primary relation's
    /// subgraph are traversed along the ordering relation but not counted.
    fn walk(&self) -> Result<WalkCounts, WellFormednessError> {
        let mut counts = WalkCounts::default();
        // Most recent types first; the interrupt computation scans it up to
        // the previous occurrence of the current type.
        let mut history: Vec<EventType> = Vec::new();

        let relation_set: OrderedSet<String> = OrderedSet::from([self.relation.clone()]);
        let ordering_set: OrderedSet<String> = OrderedSet::from([self.ordering.clone()]);

        let mut cur = self.first;
        let mut has_immediate_incoming = !self.initial_transitively_connected;

        loop {
            let node = self.graph.node(cur);

            let ordering_out = node.transitions_with_intersecting_relations(&ordering_set);
            if ordering_out.len() != 1 {
                return Err(WellFormednessError::AmbiguousOrdering {
                    node: cur,
                    found: ordering_out.len(),
                });
            }
            if node.transitions_with_exact_relations(&relation_set).len() > 1 {
                return Err(WellFormednessError::MultipleRelationTransitions {
                    node: cur,
                    relation: self.relation.clone(),
                });
            }

            let has_immediate_outgoing =
                node.transitions_with_intersecting_relations(&relation_set).len() == 1;

            if !has_immediate_outgoing && !has_immediate_incoming {
                // Outside the relation subgraph; move along without counting.
                if cur == self.last {
                    break;
                }
                cur = self.advance(node, &relation_set, &ordering_set)?;
                has_immediate_incoming = false;
                continue;
            }
            has_immediate_incoming = has_immediate_outgoing;

            // The current event is `b`; every previously seen type is an `a`.
            let b = node.etype().clone();
            for a in counts.seen.iter() {
                *counts
                    .precedes
                    .entry(a.clone())
                    .or_default()
                    .entry(b.clone())
                    .or_insert(0) += 1;
            }
            for a in counts.seen.iter() {
                let seen_count = counts.event_counts[a];
                counts
                    .followed_by
                    .entry(a.clone())
                    .or_default()
                    .insert(b.clone(), seen_count);
            }

            // Interrupt candidates exist only from the second occurrence of a
            // type onwards: the types strictly between this occurrence and
            // the previous one, intersected across all such pairs.
            if counts.event_counts.contains_key(&b) {
                let mut between: Set<EventType> = Set::new();
                for a in history.iter().rev() {
                    if *a == b {
                        break;
                    }
                    between.insert(a.clone());
                }
                match counts.possible_interrupts.entry(b.clone()) {
                    indexmap::map::Entry::Occupied(mut entry) => {
                        let narrowed: Set<EventType> =
                            entry.get().intersection(&between).cloned().collect();
                        *entry.get_mut() = narrowed;
                    }
                    indexmap::map::Entry::Vacant(entry) => {
                        entry.insert(between);
                    }
                }
            }

            counts.seen.insert(b.clone());
            history.push(b.clone());
            *counts.event_counts.entry(b).or_insert(0) += 1;

            if cur == self.last {
                break;
            }
            cur = self.advance(node, &relation_set, &ordering_set)?;
        }

        Ok(counts)
    }

    /// Follows the primary relation when possible, the ordering relation
    /// otherwise. Stepping onto a sentinel means the walk ran past the final
    /// node, which the termination rule treats as malformed.
    fn advance(
        &self,
        node: &EventNode,
        relation_set: &OrderedSet<String>,
        ordering_set: &OrderedSet<String>,
    ) -> Result<NodeId, WellFormednessError> {
        let candidates = self.next_candidates(node, relation_set, ordering_set);
        let Some(next) = candidates.first() else {
            return Err(WellFormednessError::EndedEarly {
                node: node.id(),
                expected: self.last,
            });
        };
        let target = next.target();
        if self.graph.node(target).etype().is_sentinel() {
            return Err(WellFormednessError::EndedEarly {
                node: target,
                expected: self.last,
            });
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, TIME_RELATION};
    use crate::trace_graph::ChainsTraceGraph;

    fn label(l: &str) -> EventType {
        EventType::label(l)
    }

    fn time_path(g: &ChainsTraceGraph) -> RelationPath<'_> {
        g.single_relation_paths(0, TIME_RELATION).remove(0)
    }

    #[test]
    fn counts_occurrences_and_pairs() {
        let g = ChainsTraceGraph::from_label_traces([["open", "read", "read", "close"]]).unwrap();
        let path = time_path(&g);
        let counts = path.counts().unwrap();

        assert_eq!(counts.event_counts[&label("open")], 1);
        assert_eq!(counts.event_counts[&label("read")], 2);
        assert_eq!(counts.event_counts[&label("close")], 1);

        assert_eq!(counts.followed_by[&label("open")][&label("close")], 1);
        assert_eq!(counts.followed_by[&label("read")][&label("close")], 2);
        assert_eq!(counts.precedes[&label("open")][&label("read")], 2);
        assert_eq!(counts.precedes[&label("read")][&label("close")], 1);
    }

    #[test]
    fn followed_by_keeps_the_latest_count() {
        let g = ChainsTraceGraph::from_label_traces([["a", "b", "a", "b"]]).unwrap();
        let counts_owned;
        {
            let path = time_path(&g);
            counts_owned = path.counts().unwrap().clone();
        }
        // At the second b, one more a has been seen.
        assert_eq!(counts_owned.followed_by[&label("a")][&label("b")], 2);
        assert_eq!(counts_owned.precedes[&label("a")][&label("b")], 2);
    }

    #[test]
    fn interrupts_are_recorded_from_the_second_occurrence() {
        let g = ChainsTraceGraph::from_label_traces([["a", "x", "a", "x", "a"]]).unwrap();
        let path = time_path(&g);
        let counts = path.counts().unwrap();
        let interrupts = &counts.possible_interrupts[&label("a")];
        assert!(interrupts.contains(&label("x")));
        // x itself re-occurs with exactly one a in between.
        assert!(counts.possible_interrupts[&label("x")].contains(&label("a")));
    }

    #[test]
    fn interrupt_sets_intersect_across_reoccurrences() {
        let g = ChainsTraceGraph::from_label_traces([["a", "x", "a", "y", "a"]]).unwrap();
        let path = time_path(&g);
        let counts = path.counts().unwrap();
        // First pair contributes {x}, second {y}; the intersection is empty.
        assert!(counts.possible_interrupts[&label("a")].is_empty());
    }

    #[test]
    fn single_occurrence_types_never_acquire_interrupt_entries() {
        let g = ChainsTraceGraph::from_label_traces([["a", "b", "c"]]).unwrap();
        let path = time_path(&g);
        let counts = path.counts().unwrap();
        assert!(counts.possible_interrupts.is_empty());
    }

    #[test]
    fn secondary_relation_path_counts_only_its_stretch() {
        // b and c are connected by the "s" relation; a is outside its span.
        let g = ChainsTraceGraph::builder()
            .trace_with_relations([
                (Event::with_label("a"), vec![]),
                (Event::with_label("b"), vec![]),
                (Event::with_label("c"), vec!["s".to_string()]),
            ])
            .build()
            .unwrap();
        let path = g.bi_relational_path(0, "s").unwrap();
        let counts = path.counts().unwrap();
        assert!(!counts.seen.contains(&label("a")));
        assert_eq!(counts.event_counts[&label("b")], 1);
        assert_eq!(counts.event_counts[&label("c")], 1);
    }

    #[test]
    fn walk_is_memoized() {
        let g = ChainsTraceGraph::from_label_traces([["a", "b"]]).unwrap();
        let path = time_path(&g);
        let first = path.counts().unwrap() as *const WalkCounts;
        let second = path.counts().unwrap() as *const WalkCounts;
        assert_eq!(first, second);
    }
}
