//! Live result stores for running searches
//!
//! This module keeps the aggregated results of searches whose matches are
//! still arriving, and answers polls against them:
//!
//! - **Result Stores**: one per search key, holding an aggregator per
//!   requested component plus the search's completion state
//! - **Registry**: creates a store on the first poll for a key, hands the
//!   same store to every later poll, and tears it down on request or expiry
//! - **Search Providers**: pluggable producers, started when a store is
//!   created, delivering rows through a [`PayloadSink`]
//! - **Rendering**: paged, sorted table rows with expandable groups, or
//!   flat results with every group expanded
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   poll()    ┌─────────────────────────┐
//! │   Callers    │ ──────────▶ │   ResultStoreManager     │
//! └──────────────┘ ◀────────── ├─────────────────────────┤
//!                  SearchResponse  DashMap<SearchKey,      │
//!                              │      Arc<ResultStore>>   │
//!                              └─────────────────────────┘
//!                                   │ spawn          │ render
//!                                   ▼                ▼
//!                          ┌────────────────┐  ┌──────────────┐
//!                          │ SearchProvider │  │ResultRenderer│
//!                          └────────────────┘  └──────────────┘
//!                                   │ PayloadSink
//!                                   ▼
//!                          ResultStore (one aggregator per component)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use search_result_aggregator::models::{DataSourceRef, FieldSpec, ResultRequest, SearchRequest, Val};
//! use search_result_aggregator::search::{ResultStoreConfig, ResultStoreManager};
//!
//! let manager = ResultStoreManager::new(ResultStoreConfig::default());
//! let request = SearchRequest::new(DataSourceRef::new("External", "events"))
//!     .with_result_request(ResultRequest::new(
//!         "table-1",
//!         vec![
//!             FieldSpec::new("UserId", "${UserId}").with_group(0),
//!             FieldSpec::new("Count", "count()"),
//!         ],
//!     ));
//!
//! // First poll creates the store.
//! let response = manager.poll(&request);
//! assert!(!response.complete);
//!
//! // Producers deliver rows and finally signal completion.
//! let key = request.key();
//! manager.deliver_rows(&key, &[vec![Val::text("user1")], vec![Val::text("user2")]]);
//! manager.signal_complete(&key);
//!
//! let response = manager.poll(&request);
//! assert!(response.complete);
//! manager.remove(&key);
//! ```

mod config;
mod error;
mod format;
mod manager;
mod provider;
mod renderer;
mod replay;
mod store;

pub use config::{Lifespan, LifespanSettings, ResultStoreConfig, ResultStoreConfigBuilder};
pub use error::{SearchError, SearchResult};
pub use format::{format_value, json_value};
pub use manager::{DestroyReason, ResultStoreManager};
pub use provider::{PayloadSink, SearchProvider, SearchProviderRegistry};
pub use renderer::ResultRenderer;
pub use replay::ReplayProvider;
pub use store::{ResultStore, ResultStoreInfo};
