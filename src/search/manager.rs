//! Result store registry and response creator

use crate::aggregation::{Payload, Sizes};
use crate::metrics::{POLL_DURATION_SECONDS, RESULT_STORES_ACTIVE, RESULT_STORES_REMOVED_TOTAL};
use crate::models::{ErrorMessage, Fetch, SearchKey, SearchRequest, SearchResponse, Val};
use crate::search::config::{LifespanSettings, ResultStoreConfig};
use crate::search::error::{SearchError, SearchResult};
use crate::search::provider::{PayloadSink, SearchProviderRegistry};
use crate::search::renderer::ResultRenderer;
use crate::search::store::{ResultStore, ResultStoreInfo};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use strum::{Display, EnumString};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Why a caller is tearing a search down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DestroyReason {
    NoLongerNeeded,
    Manual,
    TabClose,
    WindowClose,
}

/// Maps search keys to live result stores and answers polls against them.
#[derive(Debug)]
pub struct ResultStoreManager {
    config: ResultStoreConfig,
    default_sizes: Sizes,
    renderer: ResultRenderer,
    providers: Arc<SearchProviderRegistry>,
    stores: DashMap<SearchKey, Arc<ResultStore>>,
    /// Keys torn down by a caller, with when; polls on them start nothing.
    retired: DashMap<SearchKey, Instant>,
}

impl ResultStoreManager {
    pub fn new(config: ResultStoreConfig) -> Self {
        Self::with_providers(config, Arc::new(SearchProviderRegistry::new()))
    }

    pub fn with_providers(config: ResultStoreConfig, providers: Arc<SearchProviderRegistry>) -> Self {
        Self {
            default_sizes: config.max_results(),
            renderer: ResultRenderer::new(config.parallel_sort_threshold),
            config,
            providers,
            stores: DashMap::new(),
            retired: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ResultStoreConfig {
        &self.config
    }

    pub fn providers(&self) -> &Arc<SearchProviderRegistry> {
        &self.providers
    }

    /// Answer one poll.
    ///
    /// Never fails: problems with the request or the search come back in
    /// the response's error list.
    pub fn poll(&self, request: &SearchRequest) -> SearchResponse {
        let timer = Instant::now();
        let key = request.key();

        let response = match self.get_or_create(request) {
            Ok(store) => self.respond(&store, request),
            Err(SearchError::UnknownKey(_)) => {
                debug!(search_key = %key, "Poll on torn-down search");
                SearchResponse {
                    key: key.clone(),
                    results: Vec::new(),
                    complete: true,
                    errors: vec![ErrorMessage::info(format!("Search {} has been torn down", key))],
                }
            }
            Err(e) => {
                warn!(search_key = %key, error = %e, "Cannot create result store");
                SearchResponse {
                    key,
                    results: Vec::new(),
                    complete: true,
                    errors: vec![ErrorMessage::error(e.to_string())],
                }
            }
        };

        POLL_DURATION_SECONDS.observe(timer.elapsed().as_secs_f64());
        response
    }

    fn respond(&self, store: &ResultStore, request: &SearchRequest) -> SearchResponse {
        store.touch();
        // Read completion first: a store seen complete here has had its last
        // payload merged before the snapshots below are taken.
        let complete = store.is_complete();

        let mut results = Vec::with_capacity(request.result_requests.len());
        for result_request in &request.result_requests {
            if result_request.fetch == Fetch::None {
                continue;
            }
            let Some(component) = store.component(&result_request.component_id) else {
                continue;
            };
            let result = self.renderer.render(component, result_request);
            let changed = store.record_result(&result);
            if result_request.fetch == Fetch::All || changed {
                results.push(result);
            }
        }

        debug!(
            search_key = %store.key(),
            complete,
            components = results.len(),
            "Answered poll"
        );

        SearchResponse {
            key: store.key().clone(),
            results,
            complete,
            errors: store.errors(),
        }
    }

    /// Existing store for the request's key, or a new one registered
    /// atomically and started.
    ///
    /// Fails with [`SearchError::UnknownKey`] for a key a caller tore down
    /// within the retention period.
    pub fn get_or_create(&self, request: &SearchRequest) -> SearchResult<Arc<ResultStore>> {
        let key = request.key();
        let store = match self.stores.entry(key.clone()) {
            Entry::Occupied(occupied) => return Ok(occupied.get().clone()),
            Entry::Vacant(_) if self.retired.contains_key(&key) => {
                return Err(SearchError::UnknownKey(key.to_string()));
            }
            Entry::Vacant(vacant) => {
                let store = Arc::new(ResultStore::new(
                    key.clone(),
                    request.clone(),
                    &self.default_sizes,
                    self.config.lifespans(),
                )?);
                vacant.insert(store.clone());
                store
            }
        };

        RESULT_STORES_ACTIVE.inc();
        info!(
            search_key = %key,
            components = store.components().len(),
            "Created result store"
        );
        self.start_search(&store);
        Ok(store)
    }

    fn start_search(&self, store: &Arc<ResultStore>) {
        let source_type = &store.request().data_source.source_type;
        let Some(provider) = self.providers.get(source_type) else {
            debug!(
                search_key = %store.key(),
                source_type = %source_type,
                "No search provider registered, expecting external delivery"
            );
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(search_key = %store.key(), "No async runtime, search not started");
            return;
        };

        let sink = PayloadSink::new(store);
        let request = store.request().clone();
        let weak = Arc::downgrade(store);
        let task = runtime.spawn(async move {
            let result = provider.search(request, sink).await;
            if let Some(store) = weak.upgrade() {
                match result {
                    Ok(()) => store.signal_complete(),
                    Err(e) => store.signal_error(e.to_string()),
                }
            }
        });
        store.set_task(task);
    }

    pub fn get(&self, key: &SearchKey) -> Option<Arc<ResultStore>> {
        self.stores.get(key).map(|entry| entry.value().clone())
    }

    pub fn exists(&self, key: &SearchKey) -> bool {
        self.stores.contains_key(key)
    }

    /// Deliver raw rows; `false` if the key is unknown or the store wants no
    /// more data.
    pub fn deliver_rows(&self, key: &SearchKey, rows: &[Vec<Val>]) -> bool {
        match self.get(key) {
            Some(store) => store.add_rows(rows),
            None => {
                debug!(search_key = %key, "Dropping rows for unknown key");
                false
            }
        }
    }

    /// Deliver mapped items for one component.
    pub fn deliver_payload(&self, key: &SearchKey, component_id: &str, payload: Payload) -> bool {
        match self.get(key) {
            Some(store) => PayloadSink::new(&store).deliver_payload(component_id, payload),
            None => {
                debug!(search_key = %key, "Dropping payload for unknown key");
                false
            }
        }
    }

    pub fn signal_complete(&self, key: &SearchKey) -> bool {
        self.get(key).map(|store| store.signal_complete()).is_some()
    }

    pub fn signal_error(&self, key: &SearchKey, message: impl Into<String>) -> bool {
        self.get(key).map(|store| store.signal_error(message)).is_some()
    }

    /// Stop the search process, keeping its results.
    pub fn terminate(&self, key: &SearchKey) -> bool {
        self.get(key).map(|store| store.terminate()).is_some()
    }

    /// Destroy the store under `key`. Removing an unknown key is a no-op.
    ///
    /// Later polls on the key report a finished, empty search until the
    /// retention period passes.
    pub fn remove(&self, key: &SearchKey) -> bool {
        self.retire(key, "removed")
    }

    fn retire(&self, key: &SearchKey, reason: &str) -> bool {
        // Retired before removal so a racing poll cannot recreate the store.
        if self.stores.contains_key(key) {
            self.retired.insert(key.clone(), Instant::now());
        }
        self.remove_with_reason(key, reason)
    }

    /// Whether `key` was torn down and still refuses new searches.
    pub fn is_retired(&self, key: &SearchKey) -> bool {
        self.retired.contains_key(key)
    }

    fn remove_with_reason(&self, key: &SearchKey, reason: &str) -> bool {
        match self.stores.remove(key) {
            Some((_, store)) => {
                store.destroy();
                RESULT_STORES_ACTIVE.dec();
                RESULT_STORES_REMOVED_TOTAL.with_label_values(&[reason]).inc();
                info!(search_key = %key, reason, "Destroyed result store");
                true
            }
            None => false,
        }
    }

    /// Tear a search down as the caller's lifespan settings dictate.
    ///
    /// Tab and window closes destroy the store only when its lifespan says
    /// so; otherwise they may still stop the search process.
    pub fn destroy(&self, key: &SearchKey, reason: DestroyReason) -> bool {
        let Some(store) = self.get(key) else {
            return false;
        };
        let lifespans = store.lifespans();
        let (destroy_store, stop_process) = match reason {
            DestroyReason::NoLongerNeeded | DestroyReason::Manual => (true, true),
            DestroyReason::TabClose => (
                lifespans.store.destroy_on_tab_close,
                lifespans.search_process.destroy_on_tab_close,
            ),
            DestroyReason::WindowClose => (
                lifespans.store.destroy_on_window_close,
                lifespans.search_process.destroy_on_window_close,
            ),
        };

        if destroy_store {
            self.retire(key, &reason.to_string())
        } else if stop_process {
            store.terminate();
            true
        } else {
            false
        }
    }

    pub fn update_lifespans(&self, key: &SearchKey, lifespans: LifespanSettings) -> bool {
        self.get(key).map(|store| store.set_lifespans(lifespans)).is_some()
    }

    pub fn list(&self) -> Vec<ResultStoreInfo> {
        self.stores.iter().map(|entry| entry.value().info()).collect()
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Destroy stores past their lifespan and stop searches past theirs.
    /// Torn-down keys older than the retention period are forgotten.
    ///
    /// Returns the number of stores destroyed.
    pub fn evict_expired(&self) -> usize {
        let retention = self.config.retired_key_retention();
        self.retired.retain(|_, retired_at| retired_at.elapsed() < retention);

        let candidates: Vec<Arc<ResultStore>> =
            self.stores.iter().map(|entry| entry.value().clone()).collect();

        let mut destroyed = 0;
        for store in candidates {
            let lifespans = store.lifespans();
            let (age, idle) = (store.age(), store.idle());
            if lifespans.store.is_expired(age, idle) {
                if self.remove_with_reason(store.key(), "expired") {
                    destroyed += 1;
                }
            } else if !store.is_complete() && lifespans.search_process.is_expired(age, idle) {
                info!(search_key = %store.key(), "Search process expired");
                store.terminate();
            }
        }
        destroyed
    }

    /// Run [`evict_expired`](Self::evict_expired) periodically until the
    /// manager is dropped.
    pub fn start_eviction_task(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let interval = self.config.eviction_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let destroyed = manager.evict_expired();
                if destroyed > 0 {
                    info!(destroyed, remaining = manager.len(), "Evicted expired result stores");
                }
            }
        })
    }

    /// Destroy every store.
    pub fn clear(&self) {
        let keys: Vec<SearchKey> = self.stores.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            self.remove_with_reason(&key, "cleared");
        }
    }
}

impl Drop for ResultStoreManager {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataSourceRef, FieldSpec, ResultRequest};
    use std::time::Duration;

    fn request() -> SearchRequest {
        SearchRequest::new(DataSourceRef::new("External", "ds-1")).with_result_request(
            ResultRequest::new(
                "counts",
                vec![
                    FieldSpec::new("Text", "").with_group(0),
                    FieldSpec::new("Count", "count()"),
                ],
            ),
        )
    }

    #[test]
    fn test_same_request_same_store() {
        let manager = ResultStoreManager::new(ResultStoreConfig::default());
        let a = manager.get_or_create(&request()).unwrap();
        let b = manager.get_or_create(&request()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_invalid_request_yields_error_response() {
        let manager = ResultStoreManager::new(ResultStoreConfig::default());
        let request = SearchRequest::new(DataSourceRef::new("External", "ds-1"))
            .with_result_request(ResultRequest::new("bad", vec![]));
        let response = manager.poll(&request);
        assert!(response.complete);
        assert!(response.has_errors());
        assert!(response.results.is_empty());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_fetch_modes() {
        let manager = ResultStoreManager::new(ResultStoreConfig::default());
        let mut request = request();
        request.result_requests[0].fetch = Fetch::Changes;
        let key = request.key();

        assert_eq!(manager.poll(&request).results.len(), 1);
        assert_eq!(manager.poll(&request).results.len(), 0);
        manager.deliver_rows(&key, &[vec![Val::text("a")]]);
        assert_eq!(manager.poll(&request).results.len(), 1);

        request.result_requests[0].fetch = Fetch::None;
        assert_eq!(manager.poll(&request).results.len(), 0);
    }

    #[test]
    fn test_destroy_honours_lifespans() {
        let config = crate::search::config::ResultStoreConfigBuilder::new()
            .destroy_on_tab_close(false, true)
            .build();
        let manager = ResultStoreManager::new(config);
        let key = manager.get_or_create(&request()).unwrap().key().clone();

        assert!(manager.destroy(&key, DestroyReason::TabClose));
        assert!(manager.exists(&key));
        assert!(manager.get(&key).unwrap().is_terminated());

        assert!(manager.destroy(&key, DestroyReason::Manual));
        assert!(!manager.exists(&key));
        assert!(!manager.destroy(&key, DestroyReason::Manual));
    }

    #[test]
    fn test_evict_expired() {
        let config = crate::search::config::ResultStoreConfigBuilder::new()
            .store_time_to_idle_secs(Some(3600))
            .build();
        let manager = ResultStoreManager::new(config);
        let store = manager.get_or_create(&request()).unwrap();
        assert_eq!(manager.evict_expired(), 0);

        let mut lifespans = store.lifespans();
        lifespans.store.time_to_idle = Some(Duration::ZERO);
        manager.update_lifespans(store.key(), lifespans);
        assert_eq!(manager.evict_expired(), 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_process_expiry_terminates_without_destroying() {
        let manager = ResultStoreManager::new(ResultStoreConfig::default());
        let store = manager.get_or_create(&request()).unwrap();
        let mut lifespans = store.lifespans();
        lifespans.search_process.time_to_live = Some(Duration::ZERO);
        manager.update_lifespans(store.key(), lifespans);

        assert_eq!(manager.evict_expired(), 0);
        assert!(store.is_terminated());
        assert!(manager.exists(store.key()));
    }

    #[test]
    fn test_retired_key_is_not_recreated() {
        let manager = ResultStoreManager::new(ResultStoreConfig::default());
        let key = manager.get_or_create(&request()).unwrap().key().clone();
        assert!(!manager.is_retired(&key));

        assert!(manager.destroy(&key, DestroyReason::NoLongerNeeded));
        assert!(manager.is_retired(&key));
        assert!(matches!(
            manager.get_or_create(&request()),
            Err(SearchError::UnknownKey(_))
        ));

        let response = manager.poll(&request());
        assert!(response.complete);
        assert!(!response.has_errors());
        assert!(response.results.is_empty());
        assert!(manager.is_empty());

        // Unknown keys are not retired by a no-op removal.
        let other = SearchRequest::new(DataSourceRef::new("External", "ds-2"));
        assert!(!manager.remove(&other.key()));
        assert!(!manager.is_retired(&other.key()));
    }

    #[test]
    fn test_retired_keys_are_forgotten_after_retention() {
        let config = crate::search::config::ResultStoreConfigBuilder::new()
            .retired_key_retention_secs(0)
            .build();
        let manager = ResultStoreManager::new(config);
        let key = manager.get_or_create(&request()).unwrap().key().clone();
        assert!(manager.remove(&key));
        assert!(manager.is_retired(&key));

        manager.evict_expired();
        assert!(!manager.is_retired(&key));
        assert!(manager.get_or_create(&request()).is_ok());
    }

    #[test]
    fn test_list_and_clear() {
        let manager = ResultStoreManager::new(ResultStoreConfig::default());
        let store = manager.get_or_create(&request()).unwrap();
        manager.deliver_rows(store.key(), &[vec![Val::text("a")], vec![Val::text("b")]]);

        let infos = manager.list();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].component_items["counts"], 2);

        manager.clear();
        assert!(manager.is_empty());
        assert!(store.is_complete());
    }
}
