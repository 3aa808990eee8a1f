//! Mapping between extracted field names and raw row positions

use crate::aggregation::error::{AggregationError, AggregationResult};
use std::collections::HashMap;

/// Positions of named fields within raw extracted rows.
///
/// Every component of a search shares one index so producers only need to
/// extract each field once. A sealed index describes a fixed row layout and
/// rejects references to fields it does not contain.
#[derive(Debug, Clone, Default)]
pub struct FieldIndex {
    names: Vec<String>,
    positions: HashMap<String, usize>,
    sealed: bool,
}

impl FieldIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sealed index from a known column layout.
    pub fn fixed<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = Self::new();
        for name in names {
            let name = name.into();
            if !index.positions.contains_key(&name) {
                index.positions.insert(name.clone(), index.names.len());
                index.names.push(name);
            }
        }
        index.sealed = true;
        index
    }

    /// Position of `name`, registering it if the index is still open.
    pub fn create(&mut self, name: &str) -> AggregationResult<usize> {
        if let Some(pos) = self.positions.get(name) {
            return Ok(*pos);
        }
        if self.sealed {
            return Err(AggregationError::InvalidFieldSpec(format!(
                "Field '{}' is not available from this data source",
                name
            )));
        }
        let pos = self.names.len();
        self.names.push(name.to_string());
        self.positions.insert(name.to_string(), pos);
        Ok(pos)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn name(&self, position: usize) -> Option<&str> {
        self.names.get(position).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
