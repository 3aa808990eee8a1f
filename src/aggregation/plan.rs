//! Extraction plan compiler
//!
//! Turns the field specs of one result request into an immutable plan: a
//! compiled value expression and filter per field, the depth layout, and the
//! build-time sort used for bounding.

use crate::aggregation::error::{AggregationError, AggregationResult};
use crate::aggregation::expression::ValueExpr;
use crate::aggregation::field_index::FieldIndex;
use crate::aggregation::item::Item;
use crate::models::{FieldSpec, Filter, Format, Sort, SortDirection, SortOverride, Val};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

/// Most decimal places a number format may ask for.
pub const MAX_DECIMAL_PLACES: usize = 20;

/// A field spec compiled against a field index.
#[derive(Debug, Clone)]
pub struct CompiledField {
    pub id: String,
    pub name: String,
    pub expr: ValueExpr,
    pub group: Option<usize>,
    pub sort: Option<Sort>,
    pub format: Format,
    filter: Option<CompiledFilter>,
}

impl CompiledField {
    /// Whether a row's value for this field passes the field's filter.
    pub fn accepts(&self, value: &Val) -> bool {
        match &self.filter {
            Some(filter) => filter.accepts(value),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl CompiledFilter {
    fn compile(field: &str, filter: &Filter) -> AggregationResult<Option<Self>> {
        let compile = |pattern: &Option<String>| -> AggregationResult<Option<Regex>> {
            match pattern.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some(pattern) => Regex::new(pattern).map(Some).map_err(|e| {
                    AggregationError::InvalidFieldSpec(format!(
                        "Invalid filter on field '{}': {}",
                        field, e
                    ))
                }),
            }
        };
        let include = compile(&filter.include)?;
        let exclude = compile(&filter.exclude)?;
        if include.is_none() && exclude.is_none() {
            return Ok(None);
        }
        Ok(Some(Self { include, exclude }))
    }

    fn accepts(&self, value: &Val) -> bool {
        let text = value.to_string();
        if let Some(ref include) = self.include {
            if !include.is_match(&text) {
                return false;
            }
        }
        match self.exclude {
            Some(ref exclude) => !exclude.is_match(&text),
            None => true,
        }
    }
}

/// Ordering of items within one depth.
///
/// An empty sorter ranks everything equal, leaving the caller's tiebreak
/// (insertion order) in charge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemSorter {
    keys: Vec<(usize, SortDirection)>,
}

impl ItemSorter {
    pub fn new(keys: Vec<(usize, SortDirection)>) -> Self {
        Self { keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[(usize, SortDirection)] {
        &self.keys
    }

    pub fn compare(&self, a: &Item, b: &Item) -> Ordering {
        for &(field, direction) in &self.keys {
            let ordering = a.value(field).compare(&b.value(field));
            let ordering = match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Executable form of one component's field specs.
#[derive(Debug, Clone)]
pub struct ExtractionPlan {
    fields: Vec<CompiledField>,
    group_levels: usize,
    show_detail: bool,
    sorter: ItemSorter,
}

impl ExtractionPlan {
    /// Compile `specs`, registering every referenced field in `index`.
    pub fn compile(
        specs: &[FieldSpec],
        show_detail: bool,
        index: &mut FieldIndex,
    ) -> AggregationResult<Self> {
        if specs.is_empty() {
            return Err(AggregationError::InvalidFieldSpec(
                "At least one field is required".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        let mut levels = BTreeSet::new();
        let mut fields = Vec::with_capacity(specs.len());

        for spec in specs {
            if !ids.insert(spec.id.as_str()) {
                return Err(AggregationError::InvalidFieldSpec(format!(
                    "Duplicate field id '{}'",
                    spec.id
                )));
            }

            let expr = ValueExpr::compile(&spec.expression, &spec.name, index)?;

            if let Some(level) = spec.group {
                if expr.is_aggregate() {
                    return Err(AggregationError::InvalidFieldSpec(format!(
                        "Field '{}' cannot be grouped on an aggregate expression",
                        spec.name
                    )));
                }
                levels.insert(level);
            }

            if let Some(sort) = spec.sort {
                if sort.order >= specs.len() {
                    return Err(AggregationError::InvalidFieldSpec(format!(
                        "Sort order {} on field '{}' is out of range",
                        sort.order, spec.name
                    )));
                }
            }

            if let Some(ref format) = spec.format {
                check_format(&spec.name, format)?;
            }

            let filter = match spec.filter {
                Some(ref filter) => CompiledFilter::compile(&spec.name, filter)?,
                None => None,
            };

            fields.push(CompiledField {
                id: spec.id.clone(),
                name: spec.name.clone(),
                expr,
                group: spec.group,
                sort: spec.sort,
                format: spec.format.clone().unwrap_or_default(),
                filter,
            });
        }

        // Group levels must run 0, 1, 2, ... without gaps.
        for (expected, level) in levels.iter().enumerate() {
            if *level != expected {
                return Err(AggregationError::InvalidFieldSpec(format!(
                    "Group levels must be contiguous from 0, found level {} where {} was expected",
                    level, expected
                )));
            }
        }

        let mut sorted: Vec<(usize, Sort)> = fields
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.sort.map(|s| (i, s)))
            .collect();
        sorted.sort_by_key(|(i, s)| (s.order, *i));
        let sorter = ItemSorter::new(sorted.into_iter().map(|(i, s)| (i, s.direction)).collect());

        Ok(Self {
            fields,
            group_levels: levels.len(),
            show_detail,
            sorter,
        })
    }

    pub fn fields(&self) -> &[CompiledField] {
        &self.fields
    }

    pub fn field_position(&self, id: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.id == id)
    }

    /// Number of grouping levels.
    pub fn max_group_depth(&self) -> usize {
        self.group_levels
    }

    /// Whether ungrouped detail rows are kept below the last group level.
    pub fn has_detail(&self) -> bool {
        self.show_detail || self.group_levels == 0
    }

    /// Index of the deepest depth.
    pub fn max_depth(&self) -> usize {
        if self.has_detail() {
            self.group_levels
        } else {
            self.group_levels - 1
        }
    }

    pub fn depth_count(&self) -> usize {
        self.max_depth() + 1
    }

    pub fn is_detail_depth(&self, depth: usize) -> bool {
        depth >= self.group_levels
    }

    pub fn has_group(&self) -> bool {
        self.group_levels > 0
    }

    pub fn has_sort(&self) -> bool {
        !self.sorter.is_empty()
    }

    /// Build-time sort.
    pub fn sorter(&self) -> &ItemSorter {
        &self.sorter
    }

    /// Sort described by render-time overrides.
    ///
    /// Unknown field ids are skipped and returned so the caller can report
    /// them.
    pub fn sorter_for(&self, overrides: &[SortOverride]) -> (ItemSorter, Vec<String>) {
        let mut keys = Vec::with_capacity(overrides.len());
        let mut unknown = Vec::new();
        for o in overrides {
            match self.field_position(&o.field_id) {
                Some(pos) => keys.push((pos, o.direction)),
                None => unknown.push(o.field_id.clone()),
            }
        }
        (ItemSorter::new(keys), unknown)
    }
}

fn check_format(field: &str, format: &Format) -> AggregationResult<()> {
    match format {
        Format::Number {
            decimal_places: Some(places),
            ..
        } if *places > MAX_DECIMAL_PLACES => Err(AggregationError::InvalidFieldSpec(format!(
            "Field '{}' asks for {} decimal places, at most {} are supported",
            field, places, MAX_DECIMAL_PLACES
        ))),
        Format::DateTime {
            pattern: Some(pattern),
        } if chrono::format::StrftimeItems::new(pattern)
            .any(|item| matches!(item, chrono::format::Item::Error)) =>
        {
            Err(AggregationError::InvalidFieldSpec(format!(
                "Invalid date pattern '{}' on field '{}'",
                pattern, field
            )))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::item::Aggregate;
    use crate::aggregation::key::GroupKey;

    fn specs() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("Text", "${Text}").with_group(0),
            FieldSpec::new("Count", "count()").with_sort(0, SortDirection::Descending),
        ]
    }

    #[test]
    fn test_depth_layout() {
        let mut index = FieldIndex::new();
        let plan = ExtractionPlan::compile(&specs(), false, &mut index).unwrap();
        assert_eq!(plan.max_group_depth(), 1);
        assert_eq!(plan.max_depth(), 0);
        assert!(plan.has_group());
        assert!(plan.has_sort());

        let detailed = ExtractionPlan::compile(&specs(), true, &mut index).unwrap();
        assert_eq!(detailed.max_depth(), 1);
        assert!(detailed.is_detail_depth(1));

        let flat = ExtractionPlan::compile(&[FieldSpec::new("Text", "")], false, &mut index).unwrap();
        assert_eq!(flat.max_group_depth(), 0);
        assert_eq!(flat.max_depth(), 0);
        assert!(flat.is_detail_depth(0));
    }

    #[test]
    fn test_rejects_non_contiguous_groups() {
        let mut index = FieldIndex::new();
        let specs = vec![
            FieldSpec::new("A", "").with_group(0),
            FieldSpec::new("B", "").with_group(2),
        ];
        assert!(matches!(
            ExtractionPlan::compile(&specs, false, &mut index),
            Err(AggregationError::InvalidFieldSpec(_))
        ));
    }

    #[test]
    fn test_rejects_bad_specs() {
        let mut index = FieldIndex::new();
        assert!(ExtractionPlan::compile(&[], false, &mut index).is_err());
        assert!(ExtractionPlan::compile(
            &[FieldSpec::new("A", "").with_sort(3, SortDirection::Ascending)],
            false,
            &mut index
        )
        .is_err());
        assert!(ExtractionPlan::compile(
            &[FieldSpec::new("C", "count()").with_group(0)],
            false,
            &mut index
        )
        .is_err());
        assert!(ExtractionPlan::compile(
            &[FieldSpec::new("A", "").with_filter(Filter::include("(unclosed"))],
            false,
            &mut index
        )
        .is_err());
    }

    #[test]
    fn test_sorter_orders_by_sort_order_then_field() {
        let mut index = FieldIndex::new();
        let specs = vec![
            FieldSpec::new("A", "").with_sort(1, SortDirection::Ascending),
            FieldSpec::new("B", "").with_sort(0, SortDirection::Descending),
        ];
        let plan = ExtractionPlan::compile(&specs, false, &mut index).unwrap();
        assert_eq!(
            plan.sorter().keys(),
            &[(1, SortDirection::Descending), (0, SortDirection::Ascending)]
        );

        let a = Item::new(
            GroupKey::root(),
            0,
            vec![Aggregate::Value(Val::Integer(1)), Aggregate::Value(Val::Integer(5))],
        );
        let b = Item::new(
            GroupKey::root(),
            0,
            vec![Aggregate::Value(Val::Integer(0)), Aggregate::Value(Val::Integer(5))],
        );
        assert_eq!(plan.sorter().compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_sorter_for_reports_unknown_fields() {
        let mut index = FieldIndex::new();
        let plan = ExtractionPlan::compile(&specs(), false, &mut index).unwrap();
        let overrides = vec![
            SortOverride {
                field_id: "Text".to_string(),
                direction: SortDirection::Ascending,
            },
            SortOverride {
                field_id: "Missing".to_string(),
                direction: SortDirection::Ascending,
            },
        ];
        let (sorter, unknown) = plan.sorter_for(&overrides);
        assert_eq!(sorter.keys(), &[(0, SortDirection::Ascending)]);
        assert_eq!(unknown, vec!["Missing".to_string()]);
    }

    #[test]
    fn test_rejects_unusable_formats() {
        let mut index = FieldIndex::new();
        let bad_pattern = FieldSpec::new("Time", "").with_format(Format::DateTime {
            pattern: Some("%Y-%Q".to_string()),
        });
        assert!(matches!(
            ExtractionPlan::compile(&[bad_pattern], false, &mut index),
            Err(AggregationError::InvalidFieldSpec(_))
        ));

        let too_precise = FieldSpec::new("Bytes", "").with_format(Format::Number {
            decimal_places: Some(MAX_DECIMAL_PLACES + 1),
            use_separator: false,
        });
        assert!(matches!(
            ExtractionPlan::compile(&[too_precise], false, &mut index),
            Err(AggregationError::InvalidFieldSpec(_))
        ));

        let fine = vec![
            FieldSpec::new("Time", "").with_format(Format::DateTime {
                pattern: Some("%d/%m/%Y %H:%M".to_string()),
            }),
            FieldSpec::new("Bytes", "").with_format(Format::Number {
                decimal_places: Some(MAX_DECIMAL_PLACES),
                use_separator: true,
            }),
        ];
        assert!(ExtractionPlan::compile(&fine, false, &mut index).is_ok());
    }

    #[test]
    fn test_filters() {
        let mut index = FieldIndex::new();
        let specs = vec![FieldSpec::new("User", "").with_filter(Filter {
            include: Some("^user".to_string()),
            exclude: Some("admin".to_string()),
        })];
        let plan = ExtractionPlan::compile(&specs, false, &mut index).unwrap();
        let field = &plan.fields()[0];
        assert!(field.accepts(&Val::text("user1")));
        assert!(!field.accepts(&Val::text("useradmin")));
        assert!(!field.accepts(&Val::text("guest")));
    }
}
