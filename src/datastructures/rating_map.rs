//! Sparse accumulator for block-grouped edge weight sums.
//!
//! One pass over a node's neighborhood accumulates the connection weight per
//! adjacent block; the map is then drained and cleared in O(touched entries).
//! Each worker thread keeps its own instance.

use rustc_hash::FxHashMap;

use crate::EdgeWeight;

#[derive(Debug, Clone, Default)]
pub struct RatingMap {
    entries: FxHashMap<usize, EdgeWeight>,
}

impl RatingMap {
    pub fn new() -> Self {
        Self { entries: FxHashMap::default() }
    }

    pub fn add(&mut self, key: usize, weight: EdgeWeight) {
        *self.entries.entry(key).or_insert(0) += weight;
    }

    pub fn get(&self, key: usize) -> EdgeWeight {
        self.entries.get(&key).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, EdgeWeight)> + '_ {
        self.entries.iter().map(|(&k, &w)| (k, w))
    }

    /// Key with the maximum weight; ties broken towards the smaller key so
    /// that concurrent runs stay deterministic.
    pub fn max_entry(&self) -> Option<(usize, EdgeWeight)> {
        self.entries
            .iter()
            .map(|(&k, &w)| (k, w))
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
