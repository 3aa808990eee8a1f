//! Search Result Aggregator
//!
//! Aggregates search matches that arrive concurrently from many producers
//! into bounded, grouped and sorted result tables, and serves paged views
//! of them while the search is still running.
//!
//! - [`aggregation`]: extraction plans, row mapping and bounded per-depth
//!   aggregation
//! - [`search`]: result stores, the store registry, search providers and
//!   result rendering
//! - [`models`]: request and response types shared by callers
//! - [`metrics`]: Prometheus instrumentation
//! - [`config`]: layered configuration (defaults, file, environment)

pub mod aggregation;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod search;

pub use error::{AppError, Result};
