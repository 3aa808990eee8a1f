//! Polling requests and the search identity derived from them

use crate::models::field::{FieldSpec, SortDirection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use strum::{Display, EnumString};

/// Opaque identity correlating a search's producers and its pollers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchKey(String);

impl SearchKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the identity of a request.
    ///
    /// Only the query and the store-shaping parts of each result request take
    /// part; page windows, sort overrides, open groups and fetch modes are
    /// render-time choices that must keep resolving to the same store.
    pub fn derive(request: &SearchRequest) -> Self {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        if let Some(ref query_key) = request.query_key {
            hasher.update(b"key:");
            hasher.update(query_key.as_bytes());
        }
        hasher.update(b"\0source:");
        hasher.update(request.data_source.source_type.as_bytes());
        hasher.update(b"\0");
        hasher.update(request.data_source.uuid.as_bytes());
        hasher.update(b"\0query:");
        hasher.update(request.expression.to_string().as_bytes());

        for result_request in &request.result_requests {
            let shape = StoreShape {
                component_id: &result_request.component_id,
                fields: &result_request.fields,
                show_detail: result_request.show_detail,
                max_results: &result_request.max_results,
                extract_values: result_request.extract_values,
            };
            hasher.update(b"\0component:");
            hasher.update(format!("{:?}", shape).as_bytes());
        }

        Self(format!("{:x}", hasher.finalize()))
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct StoreShape<'a> {
    component_id: &'a str,
    fields: &'a [FieldSpec],
    show_detail: bool,
    max_results: &'a [usize],
    extract_values: bool,
}

/// Reference to the data source a search runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceRef {
    /// Provider type, used to look up the search provider
    pub source_type: String,
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl DataSourceRef {
    pub fn new(source_type: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            uuid: uuid.into(),
            name: None,
        }
    }
}

/// A poll for the current state of a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Caller-supplied query key
    #[serde(default)]
    pub query_key: Option<String>,

    pub data_source: DataSourceRef,

    /// Query expression tree, compiled to predicates by the search provider
    #[serde(default)]
    pub expression: serde_json::Value,

    /// One entry per client-visible table or visualisation
    #[serde(default)]
    pub result_requests: Vec<ResultRequest>,
}

impl SearchRequest {
    pub fn new(data_source: DataSourceRef) -> Self {
        Self {
            query_key: None,
            data_source,
            expression: serde_json::Value::Null,
            result_requests: Vec::new(),
        }
    }

    pub fn with_query_key(mut self, key: impl Into<String>) -> Self {
        self.query_key = Some(key.into());
        self
    }

    pub fn with_expression(mut self, expression: serde_json::Value) -> Self {
        self.expression = expression;
        self
    }

    pub fn with_result_request(mut self, result_request: ResultRequest) -> Self {
        self.result_requests.push(result_request);
        self
    }

    pub fn key(&self) -> SearchKey {
        SearchKey::derive(self)
    }

    /// Whether any component needs values extracted from raw events.
    pub fn requires_extraction(&self) -> bool {
        self.result_requests.iter().any(|r| r.extract_values)
    }
}

/// Result shaping for one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRequest {
    pub component_id: String,

    pub fields: Vec<FieldSpec>,

    /// Keep ungrouped detail rows beneath the grouped summaries
    #[serde(default)]
    pub show_detail: bool,

    /// Per-depth row limits; empty uses the store defaults
    #[serde(default)]
    pub max_results: Vec<usize>,

    #[serde(default)]
    pub requested_range: OffsetRange,

    /// Render-time sort override
    #[serde(default)]
    pub sort: Vec<SortOverride>,

    #[serde(default)]
    pub open_groups: OpenGroups,

    #[serde(default)]
    pub style: ResultStyle,

    #[serde(default)]
    pub fetch: Fetch,

    #[serde(default = "default_extract_values")]
    pub extract_values: bool,
}

fn default_extract_values() -> bool {
    true
}

impl ResultRequest {
    pub fn new(component_id: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            component_id: component_id.into(),
            fields,
            show_detail: false,
            max_results: Vec::new(),
            requested_range: OffsetRange::default(),
            sort: Vec::new(),
            open_groups: OpenGroups::default(),
            style: ResultStyle::default(),
            fetch: Fetch::default(),
            extract_values: true,
        }
    }

    pub fn with_show_detail(mut self, show_detail: bool) -> Self {
        self.show_detail = show_detail;
        self
    }

    pub fn with_max_results(mut self, max_results: Vec<usize>) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_range(mut self, offset: usize, length: usize) -> Self {
        self.requested_range = OffsetRange::new(offset, length);
        self
    }

    pub fn with_sort(mut self, field_id: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortOverride {
            field_id: field_id.into(),
            direction,
        });
        self
    }

    pub fn with_open_groups(mut self, open_groups: OpenGroups) -> Self {
        self.open_groups = open_groups;
        self
    }

    pub fn with_style(mut self, style: ResultStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_fetch(mut self, fetch: Fetch) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_extract_values(mut self, extract_values: bool) -> Self {
        self.extract_values = extract_values;
        self
    }
}

/// Page window over rendered rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRange {
    pub offset: usize,
    pub length: usize,
}

impl OffsetRange {
    pub const UNBOUNDED: OffsetRange = OffsetRange {
        offset: 0,
        length: usize::MAX,
    };

    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }
}

impl Default for OffsetRange {
    fn default() -> Self {
        Self {
            offset: 0,
            length: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOverride {
    pub field_id: String,
    pub direction: SortDirection,
}

/// Which groups the client has expanded, by rendered group key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "keys", rename_all = "snake_case")]
pub enum OpenGroups {
    #[default]
    None,
    All,
    Keys(HashSet<String>),
}

impl OpenGroups {
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OpenGroups::Keys(keys.into_iter().map(Into::into).collect())
    }

    pub fn is_open(&self, group_key: &str) -> bool {
        match self {
            OpenGroups::None => false,
            OpenGroups::All => true,
            OpenGroups::Keys(keys) => keys.contains(group_key),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResultStyle {
    #[default]
    Table,
    Flat,
}

/// How much of a component's result a poll wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Fetch {
    #[default]
    All,
    /// Only when different from the last result delivered for the component
    Changes,
    None,
}
