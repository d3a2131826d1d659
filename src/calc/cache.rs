use super::aggregate::{student_averages, StudentAverage};
use super::risk::RiskThresholds;
use super::{ScopeFilters, Snapshot};
use std::collections::HashMap;
use std::rc::Rc;

/// Memoized StudentAverage collections keyed by scope. Any change to the
/// snapshot or to the thresholds must call [`AverageCache::clear`].
#[derive(Debug, Default)]
pub struct AverageCache {
    entries: HashMap<ScopeFilters, Rc<Vec<StudentAverage>>>,
    hits: u64,
    misses: u64,
}

impl AverageCache {
    pub fn student_averages(
        &mut self,
        snapshot: &Snapshot,
        filters: &ScopeFilters,
        thresholds: &RiskThresholds,
    ) -> Rc<Vec<StudentAverage>> {
        if let Some(rows) = self.entries.get(filters) {
            self.hits += 1;
            return Rc::clone(rows);
        }
        self.misses += 1;
        let rows = Rc::new(student_averages(snapshot, filters, thresholds));
        self.entries.insert(filters.clone(), Rc::clone(&rows));
        rows
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            tracing::debug!(entries = self.entries.len(), "dropping memoized averages");
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
