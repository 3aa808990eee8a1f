//! Row grouping mapper

use crate::aggregation::item::{Item, Payload};
use crate::aggregation::key::{GroupKey, KeyPart};
use crate::aggregation::plan::ExtractionPlan;
use crate::models::Val;
use std::sync::Arc;

/// Maps raw extracted rows onto items, one per depth of the plan.
///
/// Holds nothing but the immutable plan, so one mapper can be shared by every
/// producer of a search.
#[derive(Debug, Clone)]
pub struct RowMapper {
    plan: Arc<ExtractionPlan>,
}

impl RowMapper {
    pub fn new(plan: Arc<ExtractionPlan>) -> Self {
        Self { plan }
    }

    pub fn plan(&self) -> &ExtractionPlan {
        &self.plan
    }

    /// Map one raw row.
    ///
    /// Items come back deepest first. A row rejected by a field filter
    /// yields nothing.
    pub fn map(&self, row: &[Val]) -> Vec<Item> {
        let fields = self.plan.fields();
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            let state = field.expr.evaluate(row);
            if !field.accepts(&state.value()) {
                return Vec::new();
            }
            values.push(state);
        }

        let levels = self.plan.max_group_depth();
        let mut parts: Vec<KeyPart> = (0..levels)
            .map(|level| {
                KeyPart::Group(
                    fields
                        .iter()
                        .zip(&values)
                        .filter(|(field, _)| field.group == Some(level))
                        .map(|(_, state)| state.value())
                        .collect(),
                )
            })
            .collect();
        if self.plan.has_detail() {
            parts.push(KeyPart::Detail(0));
        }

        let max_depth = self.plan.max_depth();
        let mut items = Vec::with_capacity(max_depth + 1);
        for depth in (0..=max_depth).rev() {
            let key = GroupKey::from_parts(parts[..=depth].to_vec());
            items.push(Item::new(key, depth, values.clone()));
        }
        items
    }

    /// Map a batch of rows into one payload.
    pub fn map_rows<R: AsRef<[Val]>>(&self, rows: &[R]) -> Payload {
        Payload::new(rows.iter().flat_map(|row| self.map(row.as_ref())).collect())
    }
}
