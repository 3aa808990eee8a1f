//! Field value expressions compiled once per plan

use crate::aggregation::error::{AggregationError, AggregationResult};
use crate::aggregation::field_index::FieldIndex;
use crate::aggregation::item::Aggregate;
use crate::models::Val;
use once_cell::sync::Lazy;
use regex::Regex;
use strum::{Display, EnumString};

static FUNCTION_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)$").unwrap());

static FIELD_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$\{([^{}]+)\}$").unwrap());

/// Aggregate functions understood by the plan compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AggregateFn {
    Count,
    Sum,
    Min,
    Max,
    #[strum(serialize = "average", serialize = "avg")]
    Average,
    /// First value delivered; depends on delivery order
    First,
}

/// A compiled field value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    /// Value of an extracted field; grouped rows keep the first value seen
    Field(usize),
    Literal(Val),
    Aggregate {
        function: AggregateFn,
        argument: Option<usize>,
    },
}

impl ValueExpr {
    /// Compile `expression`, registering referenced fields in `index`.
    ///
    /// An empty expression refers to the field called `default_field`.
    pub fn compile(
        expression: &str,
        default_field: &str,
        index: &mut FieldIndex,
    ) -> AggregationResult<Self> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Ok(ValueExpr::Field(index.create(default_field)?));
        }

        if let Some(captures) = FUNCTION_CALL.captures(expression) {
            let name = &captures[1];
            let argument = captures[2].trim();
            let function: AggregateFn = name.parse().map_err(|_| {
                AggregationError::InvalidFieldSpec(format!("Unknown function '{}'", name))
            })?;

            let argument = if argument.is_empty() {
                if function != AggregateFn::Count {
                    return Err(AggregationError::InvalidFieldSpec(format!(
                        "Function '{}' requires a field argument",
                        function
                    )));
                }
                None
            } else {
                Some(index.create(&parse_field_ref(argument)?)?)
            };

            return Ok(ValueExpr::Aggregate { function, argument });
        }

        if let Some(literal) = parse_literal(expression) {
            return Ok(ValueExpr::Literal(literal));
        }

        Ok(ValueExpr::Field(index.create(&parse_field_ref(expression)?)?))
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, ValueExpr::Aggregate { .. })
    }

    /// Referenced row position, if any.
    pub fn field(&self) -> Option<usize> {
        match self {
            ValueExpr::Field(pos) => Some(*pos),
            ValueExpr::Aggregate { argument, .. } => *argument,
            ValueExpr::Literal(_) => None,
        }
    }

    /// Aggregate state contributed by a single raw row.
    pub fn evaluate(&self, row: &[Val]) -> Aggregate {
        let value_at = |pos: usize| row.get(pos).cloned().unwrap_or_default();
        match self {
            ValueExpr::Field(pos) => Aggregate::Value(value_at(*pos)),
            ValueExpr::Literal(val) => Aggregate::Value(val.clone()),
            ValueExpr::Aggregate { function, argument } => {
                let val = argument.map(value_at).unwrap_or_default();
                match function {
                    AggregateFn::Count => match argument {
                        // count(x) only counts rows where x is present
                        Some(_) if val.is_null() => Aggregate::Count(0),
                        _ => Aggregate::Count(1),
                    },
                    AggregateFn::Sum => Aggregate::Sum(numeric(val)),
                    AggregateFn::Min => Aggregate::Min(val),
                    AggregateFn::Max => Aggregate::Max(val),
                    AggregateFn::Average => match val.as_f64() {
                        Some(x) => Aggregate::Average { sum: x, count: 1 },
                        None => Aggregate::Average { sum: 0.0, count: 0 },
                    },
                    AggregateFn::First => Aggregate::First(val),
                }
            }
        }
    }
}

fn numeric(val: Val) -> Val {
    match val {
        Val::Text(_) => val.as_i64().map(Val::Integer).or_else(|| val.as_f64().map(Val::Float)).unwrap_or_default(),
        other => other,
    }
}

fn parse_field_ref(text: &str) -> AggregationResult<String> {
    if let Some(captures) = FIELD_REF.captures(text) {
        return Ok(captures[1].trim().to_string());
    }
    if text.is_empty() || text.contains(['(', ')', '{', '}', '$', ',']) {
        return Err(AggregationError::InvalidFieldSpec(format!(
            "Cannot parse field reference '{}'",
            text
        )));
    }
    Ok(text.to_string())
}

fn parse_literal(text: &str) -> Option<Val> {
    let quoted = (text.starts_with('\'') && text.ends_with('\''))
        || (text.starts_with('"') && text.ends_with('"'));
    if quoted && text.len() >= 2 {
        return Some(Val::Text(text[1..text.len() - 1].to_string()));
    }
    match Val::parse(text) {
        Val::Text(_) | Val::Null => None,
        number => Some(number),
    }
}
