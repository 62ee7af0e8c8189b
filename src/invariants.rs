//! Temporal invariants over event-type pairs and the set container the
//! miners produce.

pub mod closure_miner;
pub mod miner;

use std::hash::{Hash, Hasher};

use itertools::Itertools;

use crate::event::{EventType, TIME_RELATION};
use crate::math::OrderedSet;
use crate::Show;

/// The kinds of temporal invariants mined from trace graphs. The derive
/// order doubles as the output ordering of invariant files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InvariantKind {
    /// Every occurrence of the left type is eventually followed by the right
    /// type within the same trace.
    AlwaysFollowedBy,
    /// Every occurrence of the right type is preceded by the left type.
    AlwaysPrecedes,
    /// No occurrence of the left type is ever followed by the right type.
    NeverFollowedBy,
    /// The right type occurs between every consecutive pair of left-type
    /// occurrences.
    InterruptedBy,
    /// The two types are never vector-clock concurrent in any trace.
    NeverConcurrent,
}

impl Show for InvariantKind {
    fn show(&self) -> String {
        match self {
            InvariantKind::AlwaysFollowedBy => "AFby",
            InvariantKind::AlwaysPrecedes => "AP",
            InvariantKind::NeverFollowedBy => "NFby",
            InvariantKind::InterruptedBy => "IntrBy",
            InvariantKind::NeverConcurrent => "NeverConcurrent",
        }
        .to_string()
    }
}

/// A temporal invariant: a pair of event types, a kind, the relation it was
/// mined over and an optional support count. Equality and hashing ignore the
/// support count, so re-mining with support counting enabled produces the
/// same set.
#[derive(Debug, Clone, Eq)]
pub struct Invariant {
    left: EventType,
    right: EventType,
    kind: InvariantKind,
    relation: String,
    support: Option<u64>,
}

impl Invariant {
    /// Creates an invariant over the default time relation.
    pub fn new(left: EventType, kind: InvariantKind, right: EventType) -> Self {
        Self::over_relation(left, kind, right, TIME_RELATION)
    }

    /// Creates an invariant over the given relation.
    pub fn over_relation(
        left: EventType,
        kind: InvariantKind,
        right: EventType,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            left,
            right,
            kind,
            relation: relation.into(),
            support: None,
        }
    }

    /// Attaches a support count.
    pub fn with_support(mut self, support: u64) -> Self {
        self.support = Some(support);
        self
    }

    /// Left operand type.
    pub fn left(&self) -> &EventType {
        &self.left
    }

    /// Right operand type.
    pub fn right(&self) -> &EventType {
        &self.right
    }

    /// The invariant kind.
    pub fn kind(&self) -> InvariantKind {
        self.kind
    }

    /// The relation this invariant was mined over.
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// The support count, when mining recorded one.
    pub fn support(&self) -> Option<u64> {
        self.support
    }

    /// The sort key used for deterministic file output.
    fn sort_key(&self) -> (InvariantKind, &EventType, &EventType, &str) {
        (self.kind, &self.left, &self.right, &self.relation)
    }
}

impl PartialEq for Invariant {
    fn eq(&self, other: &Self) -> bool {
        self.left == other.left
            && self.right == other.right
            && self.kind == other.kind
            && self.relation == other.relation
    }
}

impl Hash for Invariant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.left.hash(state);
        self.right.hash(state);
        self.kind.hash(state);
        self.relation.hash(state);
    }
}

impl Show for Invariant {
    fn show(&self) -> String {
        format!(
            "{} {} {}",
            self.left.show(),
            self.kind.show(),
            self.right.show()
        )
    }
}

impl std::fmt::Display for Invariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.show())?;
        if let Some(support) = self.support {
            write!(f, " [support={support}]")?;
        }
        Ok(())
    }
}

/// A set of temporal invariants. Insertion order is preserved; file output
/// is sorted by kind, then left label, then right label.
#[derive(Debug, Clone, Default)]
pub struct TemporalInvariantSet {
    invariants: crate::math::Set<Invariant>,
}

impl TemporalInvariantSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one invariant. An invariant equal to a present one (up to
    /// support count) is ignored.
    pub fn add(&mut self, invariant: Invariant) {
        self.invariants.insert(invariant);
    }

    /// Merges another set into this one.
    pub fn extend(&mut self, other: TemporalInvariantSet) {
        self.invariants.extend(other.invariants);
    }

    /// Number of invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }

    /// Whether the given invariant is present (support count ignored).
    pub fn contains(&self, invariant: &Invariant) -> bool {
        self.invariants.contains(invariant)
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Invariant> {
        self.invariants.iter()
    }

    /// Drops invariants whose support count is at most `threshold`.
    /// Invariants without a support count are kept.
    pub fn filter_support(self, threshold: u64) -> Self {
        Self {
            invariants: self
                .invariants
                .into_iter()
                .filter(|i| i.support.map_or(true, |s| s > threshold))
                .collect(),
        }
    }

    /// Drops all invariants of the given kind.
    pub fn without_kind(self, kind: InvariantKind) -> Self {
        Self {
            invariants: self
                .invariants
                .into_iter()
                .filter(|i| i.kind != kind)
                .collect(),
        }
    }

    /// Drops invariants all of whose non-sentinel operand types lie in the
    /// given set.
    pub fn without_types_in(self, types: &OrderedSet<EventType>) -> Self {
        Self {
            invariants: self
                .invariants
                .into_iter()
                .filter(|i| {
                    let operands = [&i.left, &i.right];
                    !operands
                        .iter()
                        .filter(|t| !t.is_sentinel())
                        .all(|t| types.contains(*t))
                })
                .collect(),
        }
    }

    /// Renders the set in the invariant file format: one invariant per line,
    /// sorted by kind, then left label, then right label.
    pub fn to_file_string(&self) -> String {
        self.invariants
            .iter()
            .sorted_by(|a, b| a.sort_key().cmp(&b.sort_key()))
            .map(|i| i.to_string())
            .join("\n")
    }
}

impl FromIterator<Invariant> for TemporalInvariantSet {
    fn from_iter<T: IntoIterator<Item = Invariant>>(iter: T) -> Self {
        Self {
            invariants: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Display for TemporalInvariantSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_file_string())
    }
}
