//! Retention policy for bounded stores
//!
//! This module provides the optional capacity cap applied by store
//! implementations: when a maximum retained-record count is configured,
//! appends evict the oldest records needed to stay within budget.

/// Capacity policy for a record store
///
/// The default policy is unbounded: records are only removed by an explicit
/// clear. With a cap configured, the store evicts oldest-first after each
/// append that pushes it over budget, so a new record is always durable
/// before anything is dropped to make room for it.
#[derive(Debug, Clone, Default)]
pub struct RetentionPolicy {
    /// Maximum number of retained records, or `None` for unbounded
    max_records: Option<usize>,
}

impl RetentionPolicy {
    /// Create an unbounded policy
    pub fn unbounded() -> Self {
        Self { max_records: None }
    }

    /// Create a policy that retains at most `max` records
    pub fn with_max_records(max: usize) -> Self {
        Self {
            max_records: Some(max),
        }
    }

    /// Get the configured cap, if any
    pub fn max_records(&self) -> Option<usize> {
        self.max_records
    }

    /// Check whether a store holding `count` records is over budget
    pub fn is_over_budget(&self, count: usize) -> bool {
        match self.max_records {
            Some(max) => count > max,
            None => false,
        }
    }

    /// Calculate how many oldest records must be evicted to fit the budget
    pub fn records_to_evict(&self, count: usize) -> usize {
        match self.max_records {
            Some(max) => count.saturating_sub(max),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unbounded() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.max_records(), None);
        assert!(!policy.is_over_budget(usize::MAX));
        assert_eq!(policy.records_to_evict(usize::MAX), 0);
    }

    #[test]
    fn test_capped_policy() {
        let policy = RetentionPolicy::with_max_records(100);
        assert_eq!(policy.max_records(), Some(100));

        assert!(!policy.is_over_budget(99));
        assert!(!policy.is_over_budget(100));
        assert!(policy.is_over_budget(101));
    }

    #[test]
    fn test_records_to_evict() {
        let policy = RetentionPolicy::with_max_records(10);

        // At or under budget: nothing to evict
        assert_eq!(policy.records_to_evict(5), 0);
        assert_eq!(policy.records_to_evict(10), 0);

        // One over: evict one
        assert_eq!(policy.records_to_evict(11), 1);

        // Far over (e.g. cap lowered between runs): evict the difference
        assert_eq!(policy.records_to_evict(25), 15);
    }

    #[test]
    fn test_zero_cap_evicts_everything() {
        let policy = RetentionPolicy::with_max_records(0);
        assert!(policy.is_over_budget(1));
        assert_eq!(policy.records_to_evict(3), 3);
    }
}
