/// Inclusive `[start, end]` span of epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

/// A sub-range of requested time with no archived coverage.
pub type Gap = TimeRange;

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn contains(&self, timestamp_ms: i64) -> bool {
        self.start <= timestamp_ms && timestamp_ms <= self.end
    }

    /// Both ends inclusive; an empty range overlaps nothing.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.start <= other.end && other.start <= self.end
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_is_inclusive_at_both_ends() {
        let a = TimeRange::new(0, 999);
        assert!(a.overlaps(&TimeRange::new(999, 2000)));
        assert!(a.overlaps(&TimeRange::new(-5, 0)));
        assert!(!a.overlaps(&TimeRange::new(1000, 2000)));
        assert!(!a.overlaps(&TimeRange::new(500, 400)));
        assert!(TimeRange::new(5, 4).is_empty());
    }
}
