//! Table and flat result rendering
//!
//! Rendering works from one snapshot per component and never touches the
//! live stores, so producers keep merging while a response is built.

use crate::aggregation::{GroupKey, ItemSorter, PayloadAggregator, StoredItem, TableSnapshot};
use crate::models::{
    ComponentResult, ErrorMessage, FlatResult, OffsetRange, OpenGroups, ResultRequest, ResultStyle,
    Row, TableResult,
};
use crate::search::format::{format_value, json_value};
use rayon::slice::ParallelSliceMut;
use std::collections::HashMap;

const PARENT_KEY_COLUMN: &str = ":ParentKey";
const KEY_COLUMN: &str = ":Key";
const DEPTH_COLUMN: &str = ":Depth";

/// Renders aggregator snapshots into client-facing results.
#[derive(Debug, Clone, Copy)]
pub struct ResultRenderer {
    parallel_sort_threshold: usize,
}

impl Default for ResultRenderer {
    fn default() -> Self {
        Self::new(10_000)
    }
}

/// Snapshot rows in display order: each depth sorted, children grouped
/// under their parent key.
struct RowTree<'a> {
    top: Vec<&'a StoredItem>,
    children: HashMap<GroupKey, Vec<&'a StoredItem>>,
    max_depth: usize,
}

impl ResultRenderer {
    pub fn new(parallel_sort_threshold: usize) -> Self {
        Self {
            parallel_sort_threshold: parallel_sort_threshold.max(1),
        }
    }

    /// Render one component as requested.
    pub fn render(&self, aggregator: &PayloadAggregator, request: &ResultRequest) -> ComponentResult {
        let snapshot = aggregator.snapshot();
        let mut error_messages = aggregator.warnings();
        let sorter = self.resolve_sorter(aggregator, request, &mut error_messages);

        match request.style {
            ResultStyle::Table => ComponentResult::Table(self.render_table(
                aggregator,
                &snapshot,
                &sorter,
                request,
                error_messages,
            )),
            ResultStyle::Flat => ComponentResult::Flat(self.render_flat(
                aggregator,
                &snapshot,
                &sorter,
                request.requested_range,
                error_messages,
            )),
        }
    }

    fn resolve_sorter(
        &self,
        aggregator: &PayloadAggregator,
        request: &ResultRequest,
        errors: &mut Vec<ErrorMessage>,
    ) -> ItemSorter {
        let plan = aggregator.plan();
        if request.sort.is_empty() {
            return plan.sorter().clone();
        }
        let (sorter, unknown) = plan.sorter_for(&request.sort);
        for field_id in unknown {
            errors.push(ErrorMessage::error(format!(
                "Cannot sort component '{}' by unknown field '{}'",
                aggregator.component_id(),
                field_id
            )));
        }
        if sorter.is_empty() {
            plan.sorter().clone()
        } else {
            sorter
        }
    }

    fn sort(&self, items: &mut [&StoredItem], sorter: &ItemSorter) {
        if items.len() > self.parallel_sort_threshold {
            items.par_sort_by(|a, b| a.compare(b, sorter));
        } else {
            items.sort_by(|a, b| a.compare(b, sorter));
        }
    }

    fn build_tree<'a>(&self, snapshot: &'a TableSnapshot, sorter: &ItemSorter) -> RowTree<'a> {
        let mut top: Vec<&StoredItem> = snapshot.depth(0).iter().collect();
        self.sort(&mut top, sorter);

        let mut children: HashMap<GroupKey, Vec<&StoredItem>> = HashMap::new();
        for depth in 1..snapshot.depths.len() {
            for stored in snapshot.depth(depth) {
                children
                    .entry(stored.item.key.parent())
                    .or_default()
                    .push(stored);
            }
        }
        for list in children.values_mut() {
            self.sort(list, sorter);
        }

        RowTree {
            top,
            children,
            max_depth: snapshot.depths.len().saturating_sub(1),
        }
    }

    /// Walk the tree in display order, descending into open groups, calling
    /// `visit` with each row's position. Returns the number of rows visited.
    fn walk<'a, F>(&self, tree: &RowTree<'a>, open: &OpenGroups, mut visit: F) -> usize
    where
        F: FnMut(usize, &'a StoredItem),
    {
        let mut position = 0;
        let mut stack: Vec<std::slice::Iter<'_, &'a StoredItem>> = vec![tree.top.iter()];

        while let Some(level) = stack.last_mut() {
            let Some(stored) = level.next() else {
                stack.pop();
                continue;
            };
            let stored: &'a StoredItem = *stored;
            visit(position, stored);
            position += 1;

            let item = &stored.item;
            if item.depth < tree.max_depth && !item.key.is_detail() && is_open(open, &item.key) {
                if let Some(children) = tree.children.get(&item.key) {
                    stack.push(children.iter());
                }
            }
        }
        position
    }

    fn render_table(
        &self,
        aggregator: &PayloadAggregator,
        snapshot: &TableSnapshot,
        sorter: &ItemSorter,
        request: &ResultRequest,
        error_messages: Vec<ErrorMessage>,
    ) -> TableResult {
        let fields = aggregator.plan().fields();
        let tree = self.build_tree(snapshot, sorter);
        let range = request.requested_range;
        let end = range.offset.saturating_add(range.length);

        let mut rows = Vec::new();
        let total_results = self.walk(&tree, &request.open_groups, |position, stored| {
            if position >= range.offset && position < end {
                let item = &stored.item;
                rows.push(Row {
                    group_key: item.key.encode(),
                    depth: item.depth,
                    values: fields
                        .iter()
                        .enumerate()
                        .map(|(i, field)| format_value(&item.value(i), &field.format))
                        .collect(),
                });
            }
        });

        TableResult {
            component_id: aggregator.component_id().to_string(),
            fields: fields.iter().map(|f| f.id.clone()).collect(),
            result_range: OffsetRange::new(range.offset, rows.len()),
            rows,
            total_results,
            error_messages,
        }
    }

    fn render_flat(
        &self,
        aggregator: &PayloadAggregator,
        snapshot: &TableSnapshot,
        sorter: &ItemSorter,
        range: OffsetRange,
        error_messages: Vec<ErrorMessage>,
    ) -> FlatResult {
        let fields = aggregator.plan().fields();
        let tree = self.build_tree(snapshot, sorter);
        let end = range.offset.saturating_add(range.length);

        let mut structure = vec![
            PARENT_KEY_COLUMN.to_string(),
            KEY_COLUMN.to_string(),
            DEPTH_COLUMN.to_string(),
        ];
        structure.extend(fields.iter().map(|f| f.name.clone()));

        let mut values = Vec::new();
        let total_results = self.walk(&tree, &OpenGroups::All, |position, stored| {
            if position >= range.offset && position < end {
                let item = &stored.item;
                let parent = if item.depth == 0 {
                    serde_json::Value::Null
                } else {
                    serde_json::Value::String(item.key.parent().encode())
                };
                let mut row = Vec::with_capacity(structure.len());
                row.push(parent);
                row.push(serde_json::Value::String(item.key.encode()));
                row.push(serde_json::Value::from(item.depth));
                row.extend(
                    fields
                        .iter()
                        .enumerate()
                        .map(|(i, field)| json_value(&item.value(i), &field.format)),
                );
                values.push(row);
            }
        });

        FlatResult {
            component_id: aggregator.component_id().to_string(),
            structure,
            values,
            total_results,
            error_messages,
        }
    }
}

fn is_open(open: &OpenGroups, key: &GroupKey) -> bool {
    match open {
        OpenGroups::None => false,
        OpenGroups::All => true,
        OpenGroups::Keys(_) => open.is_open(&key.encode()),
    }
}
