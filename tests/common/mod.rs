//! Shared fixtures for the aggregation and result store tests

#![allow(dead_code)]

use search_result_aggregator::aggregation::{ExtractionPlan, FieldIndex, PayloadAggregator, Sizes};
use search_result_aggregator::models::{
    ComponentResult, DataSourceRef, FieldSpec, ResultRequest, SearchRequest, SortDirection,
    TableResult, Val,
};
use std::sync::Arc;

pub const DISTINCT_TEXTS: usize = 100;

/// `Text` grouped at level 0 with a row count per group.
pub fn count_by_text_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("Text", "").with_group(0),
        FieldSpec::new("Count", "count()"),
    ]
}

/// Single ungrouped column sorted ascending.
pub fn sorted_value_fields() -> Vec<FieldSpec> {
    vec![FieldSpec::new("Value", "").with_sort(0, SortDirection::Ascending)]
}

/// `Host` then `Status` grouped, with summed bytes and a row count.
pub fn host_status_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("Host", "")
            .with_group(0)
            .with_sort(0, SortDirection::Ascending),
        FieldSpec::new("Status", "")
            .with_group(1)
            .with_sort(1, SortDirection::Ascending),
        FieldSpec::new("Total", "sum(${Bytes})"),
        FieldSpec::new("Count", "count()"),
    ]
}

pub fn aggregator(fields: &[FieldSpec], show_detail: bool, sizes: Sizes) -> Arc<PayloadAggregator> {
    let mut index = FieldIndex::new();
    let plan = ExtractionPlan::compile(fields, show_detail, &mut index).unwrap();
    Arc::new(PayloadAggregator::new("table-1", Arc::new(plan), sizes))
}

/// Text value of row `i`, scattered over `DISTINCT_TEXTS` strings.
pub fn text_for(i: usize) -> String {
    format!("text-{:03}", (i * 7919 + 13) % DISTINCT_TEXTS)
}

pub fn text_rows(count: usize) -> Vec<Vec<Val>> {
    (0..count).map(|i| vec![Val::text(text_for(i))]).collect()
}

/// `count` distinct integers in a scrambled order.
pub fn scrambled_values(count: usize) -> Vec<Vec<Val>> {
    // 7919 is prime, so this permutes 0..count for any count it does not divide.
    (0..count)
        .map(|i| vec![Val::Integer(((i * 7919) % count) as i64)])
        .collect()
}

pub fn host_rows() -> Vec<Vec<Val>> {
    let hosts = ["alpha", "beta", "gamma", "delta"];
    let statuses = [200, 404, 500];
    (0..120)
        .map(|i| {
            vec![
                Val::text(hosts[i % hosts.len()]),
                Val::Integer(statuses[(i / 4) % statuses.len()]),
                Val::Integer((i * 10) as i64),
            ]
        })
        .collect()
}

pub fn search_request(source_type: &str, result_request: ResultRequest) -> SearchRequest {
    SearchRequest::new(DataSourceRef::new(source_type, "ds-test")).with_result_request(result_request)
}

pub fn as_table(result: &ComponentResult) -> &TableResult {
    match result {
        ComponentResult::Table(table) => table,
        ComponentResult::Flat(_) => panic!("expected a table result"),
    }
}

/// Sum of one column's rendered integer values.
pub fn column_total(table: &TableResult, column: usize) -> i64 {
    table
        .rows
        .iter()
        .map(|row| {
            row.values[column]
                .as_deref()
                .unwrap_or("0")
                .parse::<i64>()
                .unwrap()
        })
        .sum()
}

/// CSV text with a `Text` header and one line per row of [`text_rows`].
pub fn text_csv(count: usize) -> String {
    let mut csv = String::from("Text\n");
    for i in 0..count {
        csv.push_str(&text_for(i));
        csv.push('\n');
    }
    csv
}
