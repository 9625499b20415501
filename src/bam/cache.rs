//! Block summaries keyed by reduced entry context.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use log::trace;

use crate::arg::PathElement;
use crate::domain::StateRef;
use crate::predicates::Precision;
use crate::region::Region;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub block: Rc<str>,
    /// Reduced entry region.
    pub region: Region,
    pub precision: Precision,
}

/// One way out of a block: an exit state or a target inside it.
#[derive(Debug, Clone)]
pub struct SummaryExit {
    pub state: StateRef,
    /// Path from the block entry to `state` inside the block analysis.
    pub path: Rc<Vec<PathElement>>,
    pub is_target: bool,
}

#[derive(Debug)]
pub struct CacheEntry {
    pub exits: Vec<SummaryExit>,
    /// Unset while the block is analyzed under this key.
    pub complete: bool,
    /// A recursive lookup consumed the partial exits.
    pub reiterate: bool,
    created: u64,
}

impl CacheEntry {
    pub fn exit_regions(&self) -> BTreeSet<Region> {
        self.exits
            .iter()
            .filter(|e| !e.is_target)
            .map(|e| e.state.abstraction_formula().region())
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct BlockCache {
    entries: HashMap<CacheKey, CacheEntry>,
    generation: u64,
}

impl BlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &CacheKey) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    /// Adds an incomplete entry for `key` and returns its generation.
    pub fn open(&mut self, key: CacheKey) -> u64 {
        self.generation += 1;
        let created = self.generation;
        self.entries.insert(
            key,
            CacheEntry {
                exits: Vec::new(),
                complete: false,
                reiterate: false,
                created,
            },
        );
        created
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    /// Drops the entries opened after `generation`.
    pub fn remove_newer_than(&mut self, generation: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.created <= generation);
        let removed = before - self.entries.len();
        trace!("Dropped {} block summaries newer than generation {}", removed, generation);
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicates::PredicateManager;

    fn key(pmgr: &PredicateManager, block: &str, positive: bool) -> CacheKey {
        let one = pmgr.bdd().one();
        CacheKey {
            block: Rc::from(block),
            region: if positive { one } else { -one },
            precision: Precision::default(),
        }
    }

    #[test]
    fn test_generations() {
        let pmgr = PredicateManager::new();
        let mut cache = BlockCache::new();
        let outer = cache.open(key(&pmgr, "f", true));
        cache.open(key(&pmgr, "g", true));
        cache.open(key(&pmgr, "g", false));
        assert_eq!(cache.len(), 3);
        assert!(!cache.get(&key(&pmgr, "f", true)).unwrap().complete);

        assert_eq!(cache.remove_newer_than(outer), 2);
        assert!(cache.get(&key(&pmgr, "f", true)).is_some());
        assert!(cache.get(&key(&pmgr, "g", true)).is_none());

        cache.clear();
        assert!(cache.is_empty());
    }
}
