//! Integration tests for payload aggregation
//!
//! Covers merge commutativity, per-depth bounding, duplicate delivery and
//! snapshot consistency under concurrent producers.

mod common;

use common::*;
use search_result_aggregator::aggregation::{
    Aggregate, GroupKey, Item, KeyPart, Payload, Sizes,
};
use search_result_aggregator::models::{OpenGroups, ResultRequest, Severity, Val};
use search_result_aggregator::search::ResultRenderer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn counts_at_depth_zero(
    aggregator: &search_result_aggregator::aggregation::PayloadAggregator,
) -> HashMap<String, i64> {
    aggregator
        .snapshot()
        .depth(0)
        .iter()
        .map(|stored| {
            let text = stored.item.value(0).to_string();
            let count = stored.item.value(1).as_i64().unwrap();
            (text, count)
        })
        .collect()
}

#[test]
fn test_grouped_counts_from_concurrent_producers() {
    let aggregator = aggregator(&count_by_text_fields(), false, Sizes::unlimited());
    let rows = Arc::new(text_rows(3000));

    let handles: Vec<_> = (0..6)
        .map(|producer| {
            let aggregator = aggregator.clone();
            let rows = rows.clone();
            thread::spawn(move || {
                for batch in rows[producer * 500..(producer + 1) * 500].chunks(50) {
                    aggregator.add_rows(batch);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let counts = counts_at_depth_zero(&aggregator);
    assert!(counts.len() <= DISTINCT_TEXTS);
    assert_eq!(counts.len(), DISTINCT_TEXTS);
    assert_eq!(counts.values().sum::<i64>(), 3000);

    let mut expected: HashMap<String, i64> = HashMap::new();
    for i in 0..3000 {
        *expected.entry(text_for(i)).or_default() += 1;
    }
    assert_eq!(counts, expected);
}

#[test]
fn test_max_results_keeps_lowest_sorted_rows() {
    let aggregator = aggregator(&sorted_value_fields(), false, Sizes::new(vec![50]));
    for batch in scrambled_values(3000).chunks(100) {
        aggregator.add_rows(batch);
    }

    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.depth(0).len(), 50);

    let request = ResultRequest::new("table-1", sorted_value_fields()).with_range(0, 100);
    let result = ResultRenderer::default().render(&aggregator, &request);
    let table = as_table(&result);

    assert_eq!(table.total_results, 50);
    let values: Vec<String> = table
        .rows
        .iter()
        .map(|row| row.values[0].clone().unwrap())
        .collect();
    let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
    assert_eq!(values, expected);

    assert_eq!(table.error_messages.len(), 1);
    assert_eq!(table.error_messages[0].severity, Severity::Warning);
    assert!(table.error_messages[0].message.contains("to 50 rows at depth 0"));
}

#[test]
fn test_payload_order_does_not_change_result() {
    let rows = host_rows();
    let forward = aggregator(&host_status_fields(), false, Sizes::unlimited());
    let backward = aggregator(&host_status_fields(), false, Sizes::unlimited());

    let batches: Vec<&[Vec<Val>]> = rows.chunks(7).collect();
    for batch in &batches {
        forward.add_rows(batch);
    }
    for batch in batches.iter().rev() {
        backward.add_rows(batch);
    }

    let request = ResultRequest::new("table-1", host_status_fields())
        .with_open_groups(OpenGroups::All)
        .with_range(0, 1000);
    let renderer = ResultRenderer::default();
    let a = renderer.render(&forward, &request);
    let b = renderer.render(&backward, &request);
    assert_eq!(a, b);

    let table = as_table(&a);
    // 4 hosts, each with 3 statuses beneath it
    assert_eq!(table.total_results, 16);
    assert_eq!(table.rows[0].depth, 0);
    assert_eq!(table.rows[0].values[0], Some("alpha".to_string()));
    assert_eq!(table.rows[0].values[3], Some("30".to_string()));
    assert_eq!(table.rows[1].depth, 1);
    assert_eq!(table.rows[1].values[3], Some("10".to_string()));

    let level_zero_total: i64 = table
        .rows
        .iter()
        .filter(|row| row.depth == 0)
        .map(|row| row.values[2].as_deref().unwrap().parse::<i64>().unwrap())
        .sum();
    let expected_total: i64 = (0..120).map(|i| i * 10).sum();
    assert_eq!(level_zero_total, expected_total);
}

#[test]
fn test_duplicate_delivery_doubles_counts() {
    let aggregator = aggregator(&count_by_text_fields(), false, Sizes::unlimited());
    let rows = text_rows(300);

    aggregator.add_rows(&rows);
    aggregator.add_rows(&rows);

    let counts = counts_at_depth_zero(&aggregator);
    assert_eq!(counts.len(), DISTINCT_TEXTS);
    assert!(counts.values().all(|count| *count == 6));
}

#[test]
fn test_every_depth_stays_within_its_limit() {
    let aggregator = aggregator(&host_status_fields(), true, Sizes::new(vec![3, 5, 8]));
    for batch in host_rows().chunks(11) {
        aggregator.add_rows(batch);
        let stats = aggregator.stats();
        assert!(stats.depth_sizes[0] <= 3);
        assert!(stats.depth_sizes[1] <= 5);
        assert!(stats.depth_sizes[2] <= 8);
    }

    let stats = aggregator.stats();
    assert_eq!(stats.depth_sizes, vec![3, 5, 8]);
    assert!(stats.items_evicted > 0);

    // One truncation warning per depth, however often it was trimmed.
    let warnings = aggregator.warnings();
    assert_eq!(warnings.len(), 3);
    assert!(warnings.iter().all(|w| w.severity == Severity::Warning));
}

#[test]
fn test_evicted_group_takes_its_children_along() {
    let aggregator = aggregator(&host_status_fields(), false, Sizes::new(vec![1, 100]));
    aggregator.add_rows(&[
        vec![Val::text("b"), Val::Integer(200), Val::Integer(1)],
        vec![Val::text("b"), Val::Integer(500), Val::Integer(1)],
    ]);
    // "a" sorts first, so "b" and both of its statuses are evicted.
    let outcome = aggregator.add_rows(&[vec![Val::text("a"), Val::Integer(200), Val::Integer(1)]]);
    assert_eq!(outcome.evicted, 3);

    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.depth(0).len(), 1);
    assert_eq!(snapshot.depth(0)[0].item.value(0), Val::text("a"));
    assert_eq!(snapshot.depth(1).len(), 1);
    assert_eq!(snapshot.depth(1)[0].item.key.parent(), snapshot.depth(0)[0].item.key);
}

#[test]
fn test_malformed_items_are_dropped_not_merged() {
    let aggregator = aggregator(&count_by_text_fields(), false, Sizes::unlimited());
    let good = Item::new(
        GroupKey::root().child(KeyPart::Group(vec![Val::text("x")])),
        0,
        vec![Aggregate::Value(Val::text("x")), Aggregate::Count(2)],
    );
    let wrong_width = Item::new(
        GroupKey::root().child(KeyPart::Group(vec![Val::text("y")])),
        0,
        vec![Aggregate::Count(1)],
    );
    let too_deep = Item::new(
        GroupKey::root().child(KeyPart::Group(vec![Val::text("z")])),
        4,
        vec![Aggregate::Value(Val::text("z")), Aggregate::Count(1)],
    );

    let outcome = aggregator.add_payload(Payload::new(vec![good, wrong_width, too_deep]));
    assert_eq!(outcome.merged, 1);
    assert_eq!(outcome.dropped, 2);

    let counts = counts_at_depth_zero(&aggregator);
    assert_eq!(counts.len(), 1);
    assert_eq!(counts["x"], 2);
}

#[test]
fn test_snapshots_only_see_whole_payloads() {
    const BATCH: usize = 10;
    let aggregator = aggregator(&count_by_text_fields(), false, Sizes::unlimited());
    let rows = Arc::new(text_rows(4000));
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let aggregator = aggregator.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut last_generation = 0;
            let mut snapshots = 0;
            while !done.load(Ordering::Acquire) || snapshots == 0 {
                let snapshot = aggregator.snapshot();
                assert!(snapshot.generation >= last_generation);
                last_generation = snapshot.generation;

                let total: i64 = snapshot
                    .depth(0)
                    .iter()
                    .map(|stored| stored.item.value(1).as_i64().unwrap())
                    .sum();
                assert_eq!(total as usize % BATCH, 0, "snapshot saw a partial payload");
                assert_eq!(total as u64, snapshot.generation * BATCH as u64);
                snapshots += 1;
            }
            snapshots
        })
    };

    let writers: Vec<_> = (0..4)
        .map(|producer| {
            let aggregator = aggregator.clone();
            let rows = rows.clone();
            thread::spawn(move || {
                for batch in rows[producer * 1000..(producer + 1) * 1000].chunks(BATCH) {
                    aggregator.add_rows(batch);
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);

    assert!(reader.join().unwrap() > 0);
    assert_eq!(counts_at_depth_zero(&aggregator).values().sum::<i64>(), 4000);
}
