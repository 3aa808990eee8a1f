//! Bounded payload aggregator
//!
//! Producers merge payloads concurrently: each holds the merge gate shared
//! and locks one depth at a time. A snapshot takes the gate exclusively just
//! long enough to copy every depth, so it always reflects a whole number of
//! payloads.

use crate::aggregation::bounded::{BoundedStore, StoredItem};
use crate::aggregation::item::{Item, Payload};
use crate::aggregation::key::KeyPart;
use crate::aggregation::mapper::RowMapper;
use crate::aggregation::plan::ExtractionPlan;
use crate::aggregation::sizes::Sizes;
use crate::metrics::{ITEMS_DROPPED_TOTAL, ITEMS_EVICTED_TOTAL, ITEMS_MERGED_TOTAL, PAYLOADS_TOTAL};
use crate::models::{ErrorMessage, Val};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Point-in-time copy of every depth of an aggregator.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    /// Number of payloads merged when the copy was taken
    pub generation: u64,
    pub depths: Vec<Vec<StoredItem>>,
}

impl TableSnapshot {
    pub fn depth(&self, depth: usize) -> &[StoredItem] {
        self.depths.get(depth).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.depths.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of merging one payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub merged: usize,
    pub dropped: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatorStats {
    pub generation: u64,
    pub top_level_received: u64,
    pub items_merged: u64,
    pub items_dropped: u64,
    pub items_evicted: u64,
    /// Items currently held at each depth
    pub depth_sizes: Vec<usize>,
}

/// Accepts payloads for one component and keeps the best rows per depth.
#[derive(Debug)]
pub struct PayloadAggregator {
    component_id: String,
    plan: Arc<ExtractionPlan>,
    mapper: RowMapper,
    sizes: Sizes,
    gate: RwLock<()>,
    depths: Vec<Mutex<BoundedStore>>,
    truncated: Mutex<BTreeSet<usize>>,
    generation: AtomicU64,
    top_level_received: AtomicU64,
    items_merged: AtomicU64,
    items_dropped: AtomicU64,
    items_evicted: AtomicU64,
}

impl PayloadAggregator {
    pub fn new(component_id: impl Into<String>, plan: Arc<ExtractionPlan>, sizes: Sizes) -> Self {
        let depths = (0..plan.depth_count())
            .map(|depth| Mutex::new(BoundedStore::new(depth, sizes.size(depth))))
            .collect();
        Self {
            component_id: component_id.into(),
            mapper: RowMapper::new(plan.clone()),
            plan,
            sizes,
            gate: RwLock::new(()),
            depths,
            truncated: Mutex::new(BTreeSet::new()),
            generation: AtomicU64::new(0),
            top_level_received: AtomicU64::new(0),
            items_merged: AtomicU64::new(0),
            items_dropped: AtomicU64::new(0),
            items_evicted: AtomicU64::new(0),
        }
    }

    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    pub fn plan(&self) -> &Arc<ExtractionPlan> {
        &self.plan
    }

    pub fn mapper(&self) -> &RowMapper {
        &self.mapper
    }

    pub fn sizes(&self) -> &Sizes {
        &self.sizes
    }

    /// Map raw rows and merge them as one payload.
    pub fn add_rows<R: AsRef<[Val]>>(&self, rows: &[R]) -> MergeOutcome {
        self.add_payload(self.mapper.map_rows(rows))
    }

    /// Merge a payload, then bound every depth it touched.
    ///
    /// Malformed items are dropped and logged; the rest of the payload is
    /// still merged.
    pub fn add_payload(&self, payload: Payload) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let field_count = self.plan.fields().len();
        let max_depth = self.plan.max_depth();

        let mut by_depth: Vec<Vec<Item>> = vec![Vec::new(); self.depths.len()];
        for item in payload {
            match item.validate(field_count, max_depth) {
                Ok(()) => by_depth[item.depth].push(item),
                Err(e) => {
                    warn!(component_id = %self.component_id, error = %e, "Dropping malformed item");
                    outcome.dropped += 1;
                }
            }
        }
        self.top_level_received
            .fetch_add(by_depth[0].len() as u64, Ordering::Relaxed);

        let gate = self.gate.read();

        // Ancestors evicted at shallower depths, keyed by their key length.
        let mut evicted_ancestors: HashMap<usize, HashSet<Vec<KeyPart>>> = HashMap::new();

        for (depth, items) in by_depth.into_iter().enumerate() {
            if items.is_empty() && evicted_ancestors.is_empty() {
                continue;
            }

            let mut store = self.depths[depth].lock();
            for item in items {
                match store.merge(item) {
                    Ok(()) => outcome.merged += 1,
                    Err(e) => {
                        warn!(
                            component_id = %self.component_id,
                            depth,
                            error = %e,
                            "Dropping item that cannot be merged"
                        );
                        outcome.dropped += 1;
                    }
                }
            }

            let mut cascaded = 0;
            for (prefix_len, ancestors) in &evicted_ancestors {
                cascaded += store.remove_descendants(*prefix_len, ancestors);
            }

            let evicted = store.trim(self.plan.sorter());
            drop(store);

            if !evicted.is_empty() {
                self.record_truncation(depth);
                if depth < self.depths.len() - 1 {
                    evicted_ancestors.insert(
                        depth + 1,
                        evicted.iter().map(|key| key.parts().to_vec()).collect(),
                    );
                }
            }

            let removed = evicted.len() + cascaded;
            if removed > 0 {
                ITEMS_EVICTED_TOTAL
                    .with_label_values(&[&depth.to_string()])
                    .inc_by(removed as u64);
                outcome.evicted += removed;
            }
        }

        self.generation.fetch_add(1, Ordering::AcqRel);
        drop(gate);

        self.items_merged.fetch_add(outcome.merged as u64, Ordering::Relaxed);
        self.items_dropped.fetch_add(outcome.dropped as u64, Ordering::Relaxed);
        self.items_evicted.fetch_add(outcome.evicted as u64, Ordering::Relaxed);
        PAYLOADS_TOTAL.inc();
        ITEMS_MERGED_TOTAL.inc_by(outcome.merged as u64);
        ITEMS_DROPPED_TOTAL.inc_by(outcome.dropped as u64);

        debug!(
            component_id = %self.component_id,
            merged = outcome.merged,
            dropped = outcome.dropped,
            evicted = outcome.evicted,
            "Merged payload"
        );
        outcome
    }

    fn record_truncation(&self, depth: usize) {
        if self.truncated.lock().insert(depth) {
            warn!(
                component_id = %self.component_id,
                depth,
                limit = self.sizes.size(depth),
                "Truncating result rows"
            );
        }
    }

    /// Copy every depth as of a single merge generation.
    pub fn snapshot(&self) -> TableSnapshot {
        let _gate = self.gate.write();
        TableSnapshot {
            generation: self.generation.load(Ordering::Acquire),
            depths: self.depths.iter().map(|store| store.lock().snapshot()).collect(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether more data cannot change the result: the component neither
    /// sorts nor groups and already holds a full first page of rows.
    pub fn has_enough_data(&self) -> bool {
        !self.plan.has_sort()
            && !self.plan.has_group()
            && self.top_level_received.load(Ordering::Relaxed) >= self.sizes.size(0) as u64
    }

    /// One warning per depth that has had rows evicted.
    pub fn warnings(&self) -> Vec<ErrorMessage> {
        self.truncated
            .lock()
            .iter()
            .map(|depth| {
                ErrorMessage::warning(format!(
                    "Truncating data for component '{}' to {} rows at depth {}",
                    self.component_id,
                    self.sizes.size(*depth),
                    depth
                ))
            })
            .collect()
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            generation: self.generation(),
            top_level_received: self.top_level_received.load(Ordering::Relaxed),
            items_merged: self.items_merged.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            items_evicted: self.items_evicted.load(Ordering::Relaxed),
            depth_sizes: self.depths.iter().map(|store| store.lock().len()).collect(),
        }
    }

    /// Release all held items.
    pub fn clear(&self) {
        let _gate = self.gate.write();
        for store in &self.depths {
            store.lock().clear();
        }
    }
}
