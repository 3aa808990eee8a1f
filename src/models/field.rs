//! Table field definitions supplied with each result request

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Definition of one client-visible table column.
///
/// Immutable once a query has been issued; the plan compiler turns a list of
/// these into an [`ExtractionPlan`](crate::aggregation::ExtractionPlan).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Stable column identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Value expression, e.g. `${UserId}` or `count()`
    #[serde(default)]
    pub expression: String,

    /// Grouping level; `None` means the column is not grouped
    #[serde(default)]
    pub group: Option<usize>,

    /// Build-time sort
    #[serde(default)]
    pub sort: Option<Sort>,

    /// Output format
    #[serde(default)]
    pub format: Option<Format>,

    /// Include/exclude filter applied to extracted values
    #[serde(default)]
    pub filter: Option<Filter>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            expression: expression.into(),
            group: None,
            sort: None,
            format: None,
            filter: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_group(mut self, level: usize) -> Self {
        self.group = Some(level);
        self
    }

    pub fn with_sort(mut self, order: usize, direction: SortDirection) -> Self {
        self.sort = Some(Sort { order, direction });
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    /// Position of this column among all sorted columns (0 sorts first)
    pub order: usize,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// How a column's values are turned into client-facing output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Format {
    #[default]
    General,
    Number {
        #[serde(default)]
        decimal_places: Option<usize>,
        #[serde(default)]
        use_separator: bool,
    },
    /// Epoch milliseconds rendered as a date; `pattern` uses chrono syntax
    DateTime {
        #[serde(default)]
        pattern: Option<String>,
    },
    Text,
}

/// Regular-expression filter on a column's extracted value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Filter {
    #[serde(default)]
    pub include: Option<String>,
    #[serde(default)]
    pub exclude: Option<String>,
}

impl Filter {
    pub fn include(pattern: impl Into<String>) -> Self {
        Self {
            include: Some(pattern.into()),
            exclude: None,
        }
    }

    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self {
            include: None,
            exclude: Some(pattern.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_field_spec_deserializes_with_defaults() {
        let spec: FieldSpec = serde_json::from_str(
            r#"{"id":"c1","name":"Count","expression":"count()","sort":{"order":0,"direction":"descending"}}"#,
        )
        .unwrap();
        assert_eq!(spec.group, None);
        assert_eq!(spec.sort.unwrap().direction, SortDirection::Descending);
        assert!(spec.format.is_none());
    }

    #[test]
    fn test_sort_direction_from_str() {
        assert_eq!(SortDirection::from_str("ASCENDING").unwrap(), SortDirection::Ascending);
        assert_eq!(SortDirection::Descending.to_string(), "descending");
    }

    #[test]
    fn test_format_tagging() {
        let format: Format =
            serde_json::from_str(r#"{"type":"number","decimal_places":2}"#).unwrap();
        assert_eq!(
            format,
            Format::Number {
                decimal_places: Some(2),
                use_separator: false
            }
        );
    }
}
