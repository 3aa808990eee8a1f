//! Poll responses returned to callers

use crate::models::request::{OffsetRange, SearchKey};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub severity: Severity,
    pub message: String,
}

impl ErrorMessage {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }
}

/// Response to one poll: always structurally valid, with data or errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub key: SearchKey,

    /// One result per requested component (omitted for `Fetch::None` and
    /// unchanged `Fetch::Changes` components)
    pub results: Vec<ComponentResult>,

    /// True once no producer will deliver more data
    pub complete: bool,

    /// Whole-search failures
    pub errors: Vec<ErrorMessage>,
}

impl SearchResponse {
    pub fn result(&self, component_id: &str) -> Option<&ComponentResult> {
        self.results.iter().find(|r| r.component_id() == component_id)
    }

    pub fn table(&self, component_id: &str) -> Option<&TableResult> {
        match self.result(component_id) {
            Some(ComponentResult::Table(table)) => Some(table),
            _ => None,
        }
    }

    pub fn flat(&self, component_id: &str) -> Option<&FlatResult> {
        match self.result(component_id) {
            Some(ComponentResult::Flat(flat)) => Some(flat),
            _ => None,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(|e| e.severity == Severity::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComponentResult {
    Table(TableResult),
    Flat(FlatResult),
}

impl ComponentResult {
    pub fn component_id(&self) -> &str {
        match self {
            ComponentResult::Table(t) => &t.component_id,
            ComponentResult::Flat(f) => &f.component_id,
        }
    }
}

/// One rendered table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Rendered group key; pass back in `OpenGroups` to expand this row
    pub group_key: String,
    pub depth: usize,
    pub values: Vec<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableResult {
    pub component_id: String,
    /// Field ids in value order
    pub fields: Vec<String>,
    pub rows: Vec<Row>,
    pub result_range: OffsetRange,
    /// Rows reachable with the requested open groups, ignoring the page window
    pub total_results: usize,
    pub error_messages: Vec<ErrorMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatResult {
    pub component_id: String,
    /// `:ParentKey`, `:Key`, `:Depth`, then one entry per field
    pub structure: Vec<String>,
    pub values: Vec<Vec<serde_json::Value>>,
    pub total_results: usize,
    pub error_messages: Vec<ErrorMessage>,
}

impl FlatResult {
    pub fn size(&self) -> usize {
        self.values.len()
    }
}
