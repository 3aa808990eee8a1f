//! Grouping, merging and bounding of extracted rows
//!
//! This module turns raw extracted rows into a bounded, grouped, sorted table
//! that many producers can feed at once:
//!
//! - **Plan Compilation**: field specs become value expressions, filters, a
//!   depth layout and a build-time sort
//! - **Row Mapping**: each raw row becomes one item per depth, keyed by the
//!   grouped values at every level
//! - **Bounded Merging**: items with equal keys merge their aggregate state;
//!   each depth keeps only its best `maxResults[depth]` rows
//! - **Snapshots**: a consistent copy of every depth for rendering
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   rows    ┌──────────────┐  payload  ┌──────────────────────┐
//! │  Producers   │ ────────▶ │  RowMapper   │ ────────▶ │  PayloadAggregator   │
//! └──────────────┘           └──────────────┘           ├──────────────────────┤
//!                                   ▲                   │ depth 0: BoundedStore│
//!                                   │                   │ depth 1: BoundedStore│
//!                            ┌──────────────┐           │ ...                  │
//!                            │ExtractionPlan│           └──────────────────────┘
//!                            └──────────────┘                      │ snapshot()
//!                                                                  ▼
//!                                                          TableSnapshot
//! ```
//!
//! Depth 0 is the first group level (or the detail rows when nothing is
//! grouped); each further depth holds the children of the one above it.
//! Eviction is approximate while a search runs: a row evicted by one payload
//! may come back with a later one if its rank improves.
//!
//! # Example
//!
//! ```no_run
//! use search_result_aggregator::aggregation::{ExtractionPlan, FieldIndex, PayloadAggregator, Sizes};
//! use search_result_aggregator::models::{FieldSpec, Val};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let fields = vec![
//!     FieldSpec::new("Text", "${Text}").with_group(0),
//!     FieldSpec::new("Count", "count()"),
//! ];
//! let mut index = FieldIndex::new();
//! let plan = ExtractionPlan::compile(&fields, false, &mut index)?;
//! let aggregator = PayloadAggregator::new("table-1", Arc::new(plan), "1000,10".parse()?);
//!
//! aggregator.add_rows(&[vec![Val::text("a")], vec![Val::text("a")]]);
//! let snapshot = aggregator.snapshot();
//! assert_eq!(snapshot.depth(0).len(), 1);
//! # Ok(())
//! # }
//! ```

mod aggregator;
mod bounded;
mod error;
mod expression;
mod field_index;
mod item;
mod key;
mod mapper;
mod plan;
mod sizes;

pub use aggregator::{AggregatorStats, MergeOutcome, PayloadAggregator, TableSnapshot};
pub use bounded::{BoundedStore, StoredItem};
pub use error::{AggregationError, AggregationResult};
pub use expression::{AggregateFn, ValueExpr};
pub use field_index::FieldIndex;
pub use item::{Aggregate, Item, Payload};
pub use key::{GroupKey, KeyPart};
pub use mapper::RowMapper;
pub use plan::{CompiledField, ExtractionPlan, ItemSorter, MAX_DECIMAL_PLACES};
pub use sizes::Sizes;
