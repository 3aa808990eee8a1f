//! Seam between result stores and the searches that feed them

use crate::aggregation::{FieldIndex, Payload};
use crate::models::{SearchRequest, Val};
use crate::search::error::SearchResult;
use crate::search::store::ResultStore;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::warn;

/// Runs the search for a request and delivers its matches.
///
/// Returning `Ok` marks the store complete; returning `Err` records the
/// failure on the store. A provider should stop early once the sink reports
/// that no more data is wanted.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: SearchRequest, sink: PayloadSink) -> SearchResult<()>;
}

/// Search providers by data source type.
#[derive(Default)]
pub struct SearchProviderRegistry {
    providers: DashMap<String, Arc<dyn SearchProvider>>,
}

impl SearchProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source_type: impl Into<String>, provider: Arc<dyn SearchProvider>) {
        self.providers.insert(source_type.into(), provider);
    }

    pub fn get(&self, source_type: &str) -> Option<Arc<dyn SearchProvider>> {
        self.providers.get(source_type).map(|p| p.value().clone())
    }

    pub fn unregister(&self, source_type: &str) -> bool {
        self.providers.remove(source_type).is_some()
    }

    pub fn source_types(&self) -> Vec<String> {
        self.providers.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl std::fmt::Debug for SearchProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchProviderRegistry")
            .field("source_types", &self.source_types())
            .finish()
    }
}

/// Delivery handle given to a provider.
///
/// Holds only a weak reference, so tearing a store down releases its memory
/// even while the provider is still running.
#[derive(Debug, Clone)]
pub struct PayloadSink {
    store: Weak<ResultStore>,
}

impl PayloadSink {
    pub fn new(store: &Arc<ResultStore>) -> Self {
        Self {
            store: Arc::downgrade(store),
        }
    }

    /// Layout raw rows must be extracted in; `None` once the store is gone.
    pub fn field_index(&self) -> Option<FieldIndex> {
        self.store.upgrade().map(|store| store.field_index().clone())
    }

    /// Deliver raw rows laid out per [`field_index`](Self::field_index).
    ///
    /// Returns `false` once the store wants no more data.
    pub fn deliver_rows(&self, rows: &[Vec<Val>]) -> bool {
        match self.store.upgrade() {
            Some(store) => store.add_rows(rows),
            None => false,
        }
    }

    /// Deliver items already mapped for one component.
    pub fn deliver_payload(&self, component_id: &str, payload: Payload) -> bool {
        let Some(store) = self.store.upgrade() else {
            return false;
        };
        match store.add_payload(component_id, payload) {
            Ok(_) => !store.is_complete(),
            Err(e) => {
                warn!(search_key = %store.key(), error = %e, "Rejected payload");
                !store.is_complete()
            }
        }
    }

    /// Whether the store still accepts data.
    pub fn is_active(&self) -> bool {
        self.store
            .upgrade()
            .map(|store| !store.is_complete())
            .unwrap_or(false)
    }
}
