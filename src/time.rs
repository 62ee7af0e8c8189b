use std::cmp::Ordering;

/// A point in a totally ordered time domain. Wraps a float and provides the
/// operations the rest of the crate needs: addition, difference and
/// normalization into the unit interval.
///
/// Comparison uses [`f64::total_cmp`], so timestamps are `Ord` and can be used
/// as sort keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamp(f64);

impl Timestamp {
    /// Creates a timestamp from the raw time value.
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    /// The raw time value.
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Computes the (signed) difference `self - earlier`.
    pub fn delta(&self, earlier: &Timestamp) -> f64 {
        self.0 - earlier.0
    }

    /// Rescales this timestamp relative to `last`, mapping the range
    /// `[0, last]` onto `[0, 1]`. A zero `last` maps everything to `0`.
    pub fn normalized(&self, last: &Timestamp) -> Timestamp {
        if last.0 == 0.0 {
            Timestamp(0.0)
        } else {
            Timestamp(self.0 / last.0)
        }
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::ops::Add<f64> for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: f64) -> Timestamp {
        Timestamp(self.0 + rhs)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A vector clock timestamp for partially ordered (distributed) traces.
///
/// Two clocks are comparable iff one is componentwise less-than-or-equal to
/// the other; otherwise the events they stamp are concurrent. Missing
/// components are treated as zero, so clocks of different lengths can still
/// be compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VectorTime(Vec<u32>);

impl VectorTime {
    /// Creates a vector clock from its components.
    pub fn new(components: impl Into<Vec<u32>>) -> Self {
        Self(components.into())
    }

    /// The clock components.
    pub fn components(&self) -> &[u32] {
        &self.0
    }

    fn component(&self, i: usize) -> u32 {
        self.0.get(i).copied().unwrap_or(0)
    }

    /// Compares two clocks under the componentwise partial order. Returns
    /// `None` when the clocks are incomparable, i.e. the events are concurrent.
    pub fn partial_cmp(&self, other: &VectorTime) -> Option<Ordering> {
        let len = self.0.len().max(other.0.len());
        let mut lt = false;
        let mut gt = false;
        for i in 0..len {
            match self.component(i).cmp(&other.component(i)) {
                Ordering::Less => lt = true,
                Ordering::Greater => gt = true,
                Ordering::Equal => {}
            }
        }
        match (lt, gt) {
            (true, true) => None,
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => Some(Ordering::Equal),
        }
    }

    /// Whether `self` happens strictly before `other`.
    pub fn happens_before(&self, other: &VectorTime) -> bool {
        matches!(self.partial_cmp(other), Some(Ordering::Less))
    }

    /// Whether the two clocks are incomparable.
    pub fn concurrent_with(&self, other: &VectorTime) -> bool {
        self.partial_cmp(other).is_none()
    }
}

impl std::fmt::Display for VectorTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_ordering_and_delta() {
        let a = Timestamp::new(1.0);
        let b = Timestamp::new(2.5);
        assert!(a < b);
        assert_eq!(b.delta(&a), 1.5);
        assert_eq!(a.normalized(&b), Timestamp::new(0.4));
    }

    #[test]
    fn vector_time_partial_order() {
        let a = VectorTime::new([1, 0]);
        let b = VectorTime::new([2, 1]);
        let c = VectorTime::new([1, 2]);
        assert!(a.happens_before(&b));
        assert!(a.happens_before(&c));
        assert!(b.concurrent_with(&c));
        assert_eq!(a.partial_cmp(&a), Some(Ordering::Equal));
    }

    #[test]
    fn vector_time_length_mismatch_pads_with_zero() {
        let short = VectorTime::new([1]);
        let long = VectorTime::new([1, 1]);
        assert!(short.happens_before(&long));
    }
}
