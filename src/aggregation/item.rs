//! Items, their per-field aggregate state, and payloads

use crate::aggregation::error::{AggregationError, AggregationResult};
use crate::aggregation::key::GroupKey;
use crate::models::Val;
use serde::{Deserialize, Serialize};

/// Running state of one field of an item.
///
/// Merging two states of the same kind is associative, and commutative for
/// everything except `Value` and `First`, whose result depends on which
/// state was seen first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum Aggregate {
    /// Non-aggregated value; the first non-null value wins
    Value(Val),
    Count(i64),
    Sum(Val),
    Min(Val),
    Max(Val),
    Average { sum: f64, count: u64 },
    First(Val),
}

impl Aggregate {
    /// Fold `other` into `self`.
    pub fn merge(&mut self, other: &Aggregate) -> AggregationResult<()> {
        match (self, other) {
            (Aggregate::Value(a), Aggregate::Value(b)) | (Aggregate::First(a), Aggregate::First(b)) => {
                if a.is_null() {
                    *a = b.clone();
                }
            }
            (Aggregate::Count(a), Aggregate::Count(b)) => *a = a.saturating_add(*b),
            (Aggregate::Sum(a), Aggregate::Sum(b)) => *a = a.add(b),
            (Aggregate::Min(a), Aggregate::Min(b)) => {
                if a.is_null() || (!b.is_null() && b.compare(a).is_lt()) {
                    *a = b.clone();
                }
            }
            (Aggregate::Max(a), Aggregate::Max(b)) => {
                if a.is_null() || (!b.is_null() && b.compare(a).is_gt()) {
                    *a = b.clone();
                }
            }
            (
                Aggregate::Average { sum, count },
                Aggregate::Average {
                    sum: other_sum,
                    count: other_count,
                },
            ) => {
                *sum += other_sum;
                *count += other_count;
            }
            (current, other) => {
                return Err(AggregationError::MalformedItem(format!(
                    "Cannot merge {} state into {} state",
                    other.kind(),
                    current.kind()
                )));
            }
        }
        Ok(())
    }

    /// Current value of the state.
    pub fn value(&self) -> Val {
        match self {
            Aggregate::Value(v)
            | Aggregate::Sum(v)
            | Aggregate::Min(v)
            | Aggregate::Max(v)
            | Aggregate::First(v) => v.clone(),
            Aggregate::Count(n) => Val::Integer(*n),
            Aggregate::Average { count: 0, .. } => Val::Null,
            Aggregate::Average { sum, count } => Val::Float(sum / *count as f64),
        }
    }

    /// Whether `other` holds the same kind of state and can be merged in.
    pub fn same_kind(&self, other: &Aggregate) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn is_aggregate(&self) -> bool {
        !matches!(self, Aggregate::Value(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            Aggregate::Value(_) => "value",
            Aggregate::Count(_) => "count",
            Aggregate::Sum(_) => "sum",
            Aggregate::Min(_) => "min",
            Aggregate::Max(_) => "max",
            Aggregate::Average { .. } => "average",
            Aggregate::First(_) => "first",
        }
    }
}

/// One aggregated row at a given depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: GroupKey,
    pub depth: usize,
    /// One state per field spec, in field order
    pub values: Vec<Aggregate>,
}

impl Item {
    pub fn new(key: GroupKey, depth: usize, values: Vec<Aggregate>) -> Self {
        Self { key, depth, values }
    }

    /// Check the item fits a plan with `field_count` fields and depths
    /// `0..=max_depth`.
    pub fn validate(&self, field_count: usize, max_depth: usize) -> AggregationResult<()> {
        if self.depth > max_depth {
            return Err(AggregationError::MalformedItem(format!(
                "depth {} exceeds maximum depth {}",
                self.depth, max_depth
            )));
        }
        if self.key.len() != self.depth + 1 {
            return Err(AggregationError::MalformedItem(format!(
                "group key has {} parts for depth {}",
                self.key.len(),
                self.depth
            )));
        }
        if self.values.len() != field_count {
            return Err(AggregationError::MalformedItem(format!(
                "{} values supplied for {} fields",
                self.values.len(),
                field_count
            )));
        }
        Ok(())
    }

    /// Merge another item with the same key into this one.
    ///
    /// Either every field is merged or, when the states disagree in kind,
    /// none is.
    pub fn merge(&mut self, other: &Item) -> AggregationResult<()> {
        if self.values.len() != other.values.len()
            || !self.values.iter().zip(&other.values).all(|(a, b)| a.same_kind(b))
        {
            return Err(AggregationError::MalformedItem(format!(
                "field states do not match existing row {}",
                self.key.encode()
            )));
        }
        for (state, incoming) in self.values.iter_mut().zip(&other.values) {
            state.merge(incoming)?;
        }
        Ok(())
    }

    pub fn value(&self, field: usize) -> Val {
        self.values.get(field).map(Aggregate::value).unwrap_or_default()
    }
}

/// A batch of items delivered by one producer in one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub items: Vec<Item>,
}

impl Payload {
    pub fn new(items: Vec<Item>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<Vec<Item>> for Payload {
    fn from(items: Vec<Item>) -> Self {
        Self::new(items)
    }
}

impl IntoIterator for Payload {
    type Item = Item;
    type IntoIter = std::vec::IntoIter<Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
