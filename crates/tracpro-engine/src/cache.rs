//! Optional read-through cache for answer category counts.
//!
//! Category breakdowns are the hottest read path and the only one worth
//! caching. The cache is a capability: the resolver consults it on reads and
//! ingestion invalidates on answer writes, but a [`NoopCache`] is always a
//! correct wiring.

use std::collections::HashMap;
use std::sync::Mutex;

/// Cached category counts, as returned by the category-count query.
pub type CategoryCounts = Vec<(Option<String>, i64)>;

/// Cache keyed by (pollrun, question, region filter).
pub trait CategoryCountCache: Send + Sync {
    fn get(&self, pollrun_id: i64, question_id: i64, region_id: Option<i64>)
        -> Option<CategoryCounts>;

    fn put(
        &self,
        pollrun_id: i64,
        question_id: i64,
        region_id: Option<i64>,
        counts: CategoryCounts,
    );

    /// Drops every entry for (pollrun, question) regardless of region. A new
    /// answer changes the counts for every region filter at once.
    fn invalidate(&self, pollrun_id: i64, question_id: i64);
}

/// A cache that stores nothing. Correct, just not fast.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl CategoryCountCache for NoopCache {
    fn get(&self, _: i64, _: i64, _: Option<i64>) -> Option<CategoryCounts> {
        None
    }

    fn put(&self, _: i64, _: i64, _: Option<i64>, _: CategoryCounts) {}

    fn invalidate(&self, _: i64, _: i64) {}
}

/// Unbounded in-process cache. Fine for a single daemon; entries only churn
/// when ingestion touches their pollrun.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<(i64, i64, Option<i64>), CategoryCounts>>,
}

impl CategoryCountCache for InMemoryCache {
    fn get(
        &self,
        pollrun_id: i64,
        question_id: i64,
        region_id: Option<i64>,
    ) -> Option<CategoryCounts> {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .get(&(pollrun_id, question_id, region_id))
            .cloned()
    }

    fn put(
        &self,
        pollrun_id: i64,
        question_id: i64,
        region_id: Option<i64>,
        counts: CategoryCounts,
    ) {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .insert((pollrun_id, question_id, region_id), counts);
    }

    fn invalidate(&self, pollrun_id: i64, question_id: i64) {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .retain(|(p, q, _), _| *p != pollrun_id || *q != question_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_round_trip() {
        let cache = InMemoryCache::default();
        let counts = vec![(Some("Yes".to_string()), 3), (None, 1)];
        cache.put(1, 2, None, counts.clone());
        assert_eq!(cache.get(1, 2, None), Some(counts));
        assert_eq!(cache.get(1, 2, Some(7)), None);
    }

    #[test]
    fn invalidation_drops_all_region_variants() {
        let cache = InMemoryCache::default();
        cache.put(1, 2, None, vec![]);
        cache.put(1, 2, Some(5), vec![]);
        cache.put(1, 3, None, vec![]);
        cache.invalidate(1, 2);
        assert_eq!(cache.get(1, 2, None), None);
        assert_eq!(cache.get(1, 2, Some(5)), None);
        assert!(cache.get(1, 3, None).is_some());
    }

    #[test]
    fn noop_cache_never_hits() {
        let cache = NoopCache;
        cache.put(1, 2, None, vec![(None, 1)]);
        assert_eq!(cache.get(1, 2, None), None);
    }
}
