//! Per-depth bounded store

use crate::aggregation::error::AggregationResult;
use crate::aggregation::item::Item;
use crate::aggregation::key::{GroupKey, KeyPart};
use crate::aggregation::plan::ItemSorter;
use std::cmp::Ordering;
use std::collections::hash_map::Entry as MapEntry;
use std::collections::{HashMap, HashSet};

/// An item held by a bounded store, tagged with its insertion sequence.
///
/// The sequence breaks ties in the sort so that unsorted stores keep the
/// earliest rows.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub item: Item,
    pub sequence: u64,
}

impl StoredItem {
    /// Rank by `sorter`, then by insertion order.
    pub fn compare(&self, other: &StoredItem, sorter: &ItemSorter) -> Ordering {
        sorter
            .compare(&self.item, &other.item)
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// Key-mergeable, capacity-limited collection of the items at one depth.
#[derive(Debug)]
pub struct BoundedStore {
    depth: usize,
    limit: usize,
    entries: HashMap<GroupKey, StoredItem>,
    next_sequence: u64,
}

impl BoundedStore {
    pub fn new(depth: usize, limit: usize) -> Self {
        Self {
            depth,
            limit,
            entries: HashMap::new(),
            next_sequence: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&Item> {
        self.entries.get(key).map(|stored| &stored.item)
    }

    /// Insert `item`, or merge it into the item already held under its key.
    ///
    /// Detail items never merge: each one is given its own sequence number
    /// as the last part of its key.
    pub fn merge(&mut self, mut item: Item) -> AggregationResult<()> {
        let sequence = self.next_sequence;
        if item.key.is_detail() {
            item.key.assign_sequence(sequence);
        }

        match self.entries.entry(item.key.clone()) {
            MapEntry::Occupied(mut occupied) => occupied.get_mut().item.merge(&item),
            MapEntry::Vacant(vacant) => {
                vacant.insert(StoredItem { item, sequence });
                self.next_sequence += 1;
                Ok(())
            }
        }
    }

    /// Evict the lowest ranked items until the store is within its limit.
    ///
    /// Returns the keys of evicted items.
    pub fn trim(&mut self, sorter: &ItemSorter) -> Vec<GroupKey> {
        if self.entries.len() <= self.limit {
            return Vec::new();
        }

        let mut ranked: Vec<&StoredItem> = self.entries.values().collect();
        ranked.select_nth_unstable_by(self.limit, |a, b| a.compare(b, sorter));
        let evicted: Vec<GroupKey> = ranked[self.limit..]
            .iter()
            .map(|stored| stored.item.key.clone())
            .collect();

        for key in &evicted {
            self.entries.remove(key);
        }
        evicted
    }

    /// Remove every item lying beneath one of `ancestors`, which must all
    /// have `prefix_len` key parts.
    pub fn remove_descendants(&mut self, prefix_len: usize, ancestors: &HashSet<Vec<KeyPart>>) -> usize {
        if ancestors.is_empty() || prefix_len > self.depth {
            return 0;
        }
        let before = self.entries.len();
        self.entries
            .retain(|key, _| !ancestors.contains(&key.parts()[..prefix_len]));
        before - self.entries.len()
    }

    /// Copy of every held item, in no particular order.
    pub fn snapshot(&self) -> Vec<StoredItem> {
        self.entries.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
