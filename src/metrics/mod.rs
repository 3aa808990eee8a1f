//! Prometheus metrics for payload aggregation and result store lifecycle.
//!
//! All metrics live in one global registry under the
//! `search_result_aggregator` namespace:
//! - Payload and item throughput of the aggregators
//! - Items evicted by per-depth bounding
//! - Live and removed result stores
//! - Poll latency
//!
//! # Example
//! ```no_run
//! use search_result_aggregator::metrics::{init_metrics, gather_metrics, PAYLOADS_TOTAL};
//!
//! init_metrics().expect("metrics registration");
//! PAYLOADS_TOTAL.inc();
//! println!("{}", gather_metrics());
//! ```

use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

const NAMESPACE: &str = "search_result_aggregator";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Aggregation Metrics
    // ============================================================================

    /// Total number of payloads merged into aggregators
    pub static ref PAYLOADS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("payloads_total", "Total number of payloads merged")
            .namespace(NAMESPACE)
    ).expect("Failed to create PAYLOADS_TOTAL metric");

    /// Total number of items inserted or merged into bounded stores
    pub static ref ITEMS_MERGED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("items_merged_total", "Total number of items merged into bounded stores")
            .namespace(NAMESPACE)
    ).expect("Failed to create ITEMS_MERGED_TOTAL metric");

    /// Total number of malformed items dropped
    pub static ref ITEMS_DROPPED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("items_dropped_total", "Total number of malformed items dropped")
            .namespace(NAMESPACE)
    ).expect("Failed to create ITEMS_DROPPED_TOTAL metric");

    /// Total number of items evicted by bounding
    ///
    /// Labels: depth
    pub static ref ITEMS_EVICTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("items_evicted_total", "Total number of items evicted by per-depth limits")
            .namespace(NAMESPACE),
        &["depth"]
    ).expect("Failed to create ITEMS_EVICTED_TOTAL metric");

    // ============================================================================
    // Result Store Metrics
    // ============================================================================

    /// Number of registered result stores
    pub static ref RESULT_STORES_ACTIVE: IntGauge = IntGauge::with_opts(
        Opts::new("result_stores_active", "Number of registered result stores")
            .namespace(NAMESPACE)
    ).expect("Failed to create RESULT_STORES_ACTIVE metric");

    /// Total number of result stores removed
    ///
    /// Labels: reason
    pub static ref RESULT_STORES_REMOVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("result_stores_removed_total", "Total number of result stores removed")
            .namespace(NAMESPACE),
        &["reason"]
    ).expect("Failed to create RESULT_STORES_REMOVED_TOTAL metric");

    /// Time taken to answer one poll
    pub static ref POLL_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("poll_duration_seconds", "Time taken to answer one poll in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5])
    ).expect("Failed to create POLL_DURATION_SECONDS metric");
}

fn register<C>(collector: &C) -> Result<(), prometheus::Error>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    match PROMETHEUS_REGISTRY.register(Box::new(collector.clone())) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; metrics that are already registered are
/// left as they are.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    // Aggregation metrics
    register(&*PAYLOADS_TOTAL)?;
    register(&*ITEMS_MERGED_TOTAL)?;
    register(&*ITEMS_DROPPED_TOTAL)?;
    register(&*ITEMS_EVICTED_TOTAL)?;

    // Result store metrics
    register(&*RESULT_STORES_ACTIVE)?;
    register(&*RESULT_STORES_REMOVED_TOTAL)?;
    register(&*POLL_DURATION_SECONDS)?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Encode every registered metric in the Prometheus text format.
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_repeatable() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().unwrap();
        PAYLOADS_TOTAL.inc();
        ITEMS_EVICTED_TOTAL.with_label_values(&["0"]).inc_by(3);

        let output = gather_metrics();
        assert!(output.contains("search_result_aggregator_payloads_total"));
        assert!(output.contains("search_result_aggregator_items_evicted_total"));
    }
}
