//! Result store: the aggregated state of one search

use crate::aggregation::{
    AggregationError, ExtractionPlan, FieldIndex, MergeOutcome, Payload, PayloadAggregator, Sizes,
};
use crate::models::{ComponentResult, ErrorMessage, SearchKey, SearchRequest, Val};
use crate::search::config::LifespanSettings;
use crate::search::error::{SearchError, SearchResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Summary of a registered store.
#[derive(Debug, Clone, Serialize)]
pub struct ResultStoreInfo {
    pub key: SearchKey,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
    pub complete: bool,
    pub terminated: bool,
    /// Items held per component, summed over depths
    pub component_items: BTreeMap<String, usize>,
    pub lifespans: LifespanSettings,
}

/// Aggregated state of one search: one aggregator per result request plus
/// the completion state of the search feeding them.
#[derive(Debug)]
pub struct ResultStore {
    key: SearchKey,
    request: SearchRequest,
    field_index: FieldIndex,
    components: Vec<Arc<PayloadAggregator>>,
    created_at: DateTime<Utc>,
    created: Instant,
    last_access: Mutex<Instant>,
    completion: watch::Sender<bool>,
    terminated: AtomicBool,
    errors: Mutex<Vec<ErrorMessage>>,
    lifespans: RwLock<LifespanSettings>,
    task: Mutex<Option<JoinHandle<()>>>,
    last_results: Mutex<HashMap<String, ComponentResult>>,
}

impl ResultStore {
    /// Compile a plan for every result request and create the aggregators.
    ///
    /// Each component keeps at most the tighter of `default_sizes` and its own
    /// requested sizes at every depth.
    pub fn new(
        key: SearchKey,
        request: SearchRequest,
        default_sizes: &Sizes,
        lifespans: LifespanSettings,
    ) -> SearchResult<Self> {
        let mut field_index = FieldIndex::new();
        let mut components = Vec::with_capacity(request.result_requests.len());

        for result_request in &request.result_requests {
            if components
                .iter()
                .any(|c: &Arc<PayloadAggregator>| c.component_id() == result_request.component_id)
            {
                return Err(SearchError::InvalidRequest(format!(
                    "Duplicate component id '{}'",
                    result_request.component_id
                )));
            }

            let plan = ExtractionPlan::compile(
                &result_request.fields,
                result_request.show_detail,
                &mut field_index,
            )
            .map_err(|e| match e {
                AggregationError::InvalidFieldSpec(msg) => AggregationError::InvalidFieldSpec(
                    format!("Component '{}': {}", result_request.component_id, msg),
                ),
                other => other,
            })?;

            let sizes = default_sizes.min(&Sizes::new(result_request.max_results.clone()));
            components.push(Arc::new(PayloadAggregator::new(
                result_request.component_id.clone(),
                Arc::new(plan),
                sizes,
            )));
        }

        let (completion, _) = watch::channel(false);
        let now = Instant::now();
        Ok(Self {
            key,
            request,
            field_index,
            components,
            created_at: Utc::now(),
            created: now,
            last_access: Mutex::new(now),
            completion,
            terminated: AtomicBool::new(false),
            errors: Mutex::new(Vec::new()),
            lifespans: RwLock::new(lifespans),
            task: Mutex::new(None),
            last_results: Mutex::new(HashMap::new()),
        })
    }

    pub fn key(&self) -> &SearchKey {
        &self.key
    }

    /// The request that created the store.
    pub fn request(&self) -> &SearchRequest {
        &self.request
    }

    /// Layout producers must extract raw rows in.
    pub fn field_index(&self) -> &FieldIndex {
        &self.field_index
    }

    pub fn components(&self) -> &[Arc<PayloadAggregator>] {
        &self.components
    }

    pub fn component(&self, component_id: &str) -> Option<&Arc<PayloadAggregator>> {
        self.components
            .iter()
            .find(|c| c.component_id() == component_id)
    }

    /// Merge raw rows into every component that extracts values.
    ///
    /// Returns `false` once the store no longer wants data.
    pub fn add_rows(&self, rows: &[Vec<Val>]) -> bool {
        if self.is_complete() {
            return false;
        }
        for (component, result_request) in self.components.iter().zip(&self.request.result_requests) {
            if result_request.extract_values {
                component.add_rows(rows);
            }
        }
        self.check_enough_data()
    }

    /// Merge a payload of already mapped items into one component.
    pub fn add_payload(&self, component_id: &str, payload: Payload) -> SearchResult<MergeOutcome> {
        let component = self.component(component_id).ok_or_else(|| {
            SearchError::InvalidRequest(format!("Unknown component '{}'", component_id))
        })?;
        if self.is_complete() {
            return Ok(MergeOutcome::default());
        }
        let outcome = component.add_payload(payload);
        self.check_enough_data();
        Ok(outcome)
    }

    fn check_enough_data(&self) -> bool {
        if self.components.iter().all(|c| c.has_enough_data()) {
            debug!(search_key = %self.key, "All components have enough data");
            self.signal_complete();
            return false;
        }
        true
    }

    /// Mark the search finished; later deliveries are ignored.
    pub fn signal_complete(&self) {
        let was_complete = self.completion.send_replace(true);
        if !was_complete {
            info!(search_key = %self.key, "Search complete");
        }
    }

    /// Record a whole-search failure and mark the search finished.
    pub fn signal_error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(search_key = %self.key, error = %message, "Search failed");
        self.errors.lock().push(ErrorMessage::error(message));
        self.signal_complete();
    }

    /// Stop the search process but keep the data gathered so far.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.abort_task();
        if !self.is_complete() {
            self.errors
                .lock()
                .push(ErrorMessage::info(SearchError::Terminated.to_string()));
        }
        self.signal_complete();
        info!(search_key = %self.key, "Search terminated");
    }

    /// Stop the search process and release all held items.
    pub fn destroy(&self) {
        self.terminated.store(true, Ordering::Release);
        self.abort_task();
        self.signal_complete();
        for component in &self.components {
            component.clear();
        }
        self.last_results.lock().clear();
    }

    pub fn is_complete(&self) -> bool {
        *self.completion.borrow()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn errors(&self) -> Vec<ErrorMessage> {
        self.errors.lock().clone()
    }

    /// Wait until the search completes; `false` on timeout.
    pub async fn await_completion(&self, timeout: Duration) -> bool {
        let mut receiver = self.completion.subscribe();
        let wait = async move {
            loop {
                let complete = *receiver.borrow_and_update();
                if complete {
                    return true;
                }
                if receiver.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    pub(crate) fn set_task(&self, task: JoinHandle<()>) {
        if self.is_terminated() {
            task.abort();
            return;
        }
        *self.task.lock() = Some(task);
    }

    fn abort_task(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Record a poll.
    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn idle(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    pub fn lifespans(&self) -> LifespanSettings {
        *self.lifespans.read()
    }

    pub fn set_lifespans(&self, lifespans: LifespanSettings) {
        *self.lifespans.write() = lifespans;
    }

    /// Keep `result` as the last one delivered for its component, returning
    /// whether it differs from the previous one.
    pub(crate) fn record_result(&self, result: &ComponentResult) -> bool {
        let mut last_results = self.last_results.lock();
        match last_results.get(result.component_id()) {
            Some(previous) if previous == result => false,
            _ => {
                last_results.insert(result.component_id().to_string(), result.clone());
                true
            }
        }
    }

    pub fn info(&self) -> ResultStoreInfo {
        ResultStoreInfo {
            key: self.key.clone(),
            created_at: self.created_at,
            idle_secs: self.idle().as_secs(),
            complete: self.is_complete(),
            terminated: self.is_terminated(),
            component_items: self
                .components
                .iter()
                .map(|c| (c.component_id().to_string(), c.stats().depth_sizes.iter().sum()))
                .collect(),
            lifespans: self.lifespans(),
        }
    }
}

impl Drop for ResultStore {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataSourceRef, FieldSpec, ResultRequest};

    fn request() -> SearchRequest {
        SearchRequest::new(DataSourceRef::new("Test", "ds-1"))
            .with_result_request(ResultRequest::new(
                "counts",
                vec![
                    FieldSpec::new("Text", "").with_group(0),
                    FieldSpec::new("Count", "count()"),
                ],
            ))
            .with_result_request(
                ResultRequest::new("raw", vec![FieldSpec::new("Text", ""), FieldSpec::new("Bytes", "")])
                    .with_max_results(vec![5]),
            )
    }

    fn store() -> ResultStore {
        let request = request();
        ResultStore::new(
            request.key(),
            request,
            &"100,10".parse().unwrap(),
            LifespanSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_components_share_field_index() {
        let store = store();
        assert_eq!(store.field_index().names(), &["Text".to_string(), "Bytes".to_string()]);
        assert_eq!(store.component("raw").unwrap().sizes().as_slice(), &[5, 5]);
        assert_eq!(store.component("counts").unwrap().sizes().as_slice(), &[100, 10]);
    }

    #[test]
    fn test_rows_reach_every_component() {
        let store = store();
        assert!(store.add_rows(&[vec![Val::text("a"), Val::Integer(1)]]));
        assert_eq!(store.component("counts").unwrap().snapshot().len(), 1);
        assert_eq!(store.component("raw").unwrap().snapshot().len(), 1);
    }

    #[test]
    fn test_complete_store_rejects_rows() {
        let store = store();
        store.signal_complete();
        assert!(!store.add_rows(&[vec![Val::text("a"), Val::Integer(1)]]));
        assert!(store.component("counts").unwrap().snapshot().is_empty());
    }

    #[test]
    fn test_enough_data_completes_store() {
        let request = SearchRequest::new(DataSourceRef::new("Test", "ds-1")).with_result_request(
            ResultRequest::new("raw", vec![FieldSpec::new("Text", "")]).with_max_results(vec![2]),
        );
        let store = ResultStore::new(
            request.key(),
            request,
            &Sizes::unlimited(),
            LifespanSettings::default(),
        )
        .unwrap();
        assert!(store.add_rows(&[vec![Val::text("a")]]));
        assert!(!store.add_rows(&[vec![Val::text("b")]]));
        assert!(store.is_complete());
    }

    #[test]
    fn test_invalid_fields_are_rejected() {
        let request = SearchRequest::new(DataSourceRef::new("Test", "ds-1")).with_result_request(
            ResultRequest::new("bad", vec![FieldSpec::new("X", "median(${x})")]),
        );
        let err = ResultStore::new(
            request.key(),
            request,
            &Sizes::unlimited(),
            LifespanSettings::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Component 'bad'"));
    }

    #[test]
    fn test_terminate_keeps_data() {
        let store = store();
        store.add_rows(&[vec![Val::text("a"), Val::Integer(1)]]);
        store.terminate();
        assert!(store.is_complete());
        assert!(store.is_terminated());
        assert_eq!(store.errors().len(), 1);
        assert_eq!(store.component("counts").unwrap().snapshot().len(), 1);

        store.destroy();
        assert!(store.component("counts").unwrap().snapshot().is_empty());
    }

    #[test]
    fn test_record_result_detects_changes() {
        use crate::models::{FlatResult, ComponentResult};
        let store = store();
        let result = ComponentResult::Flat(FlatResult {
            component_id: "counts".to_string(),
            structure: vec![],
            values: vec![],
            total_results: 0,
            error_messages: vec![],
        });
        assert!(store.record_result(&result));
        assert!(!store.record_result(&result));
    }

    #[tokio::test]
    async fn test_await_completion() {
        let store = Arc::new(store());
        assert!(!store.await_completion(Duration::from_millis(10)).await);

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.await_completion(Duration::from_secs(5)).await })
        };
        store.signal_complete();
        assert!(waiter.await.unwrap());
    }
}
