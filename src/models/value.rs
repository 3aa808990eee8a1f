//! Scalar values flowing from extraction through aggregation to rendering

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single extracted or computed value.
///
/// Values are totally ordered: `Null` sorts before every number, numbers sort
/// before text, and integers and floats compare numerically with each other.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Val {
    #[default]
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Val {
    /// Parse raw extracted text, preferring the narrowest numeric type.
    ///
    /// Empty input is treated as a missing value.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Val::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Val::Integer(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return Val::Float(f);
            }
        }
        Val::Text(raw.to_string())
    }

    pub fn text(value: impl Into<String>) -> Self {
        Val::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Val::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Val::Integer(_) | Val::Float(_))
    }

    /// Numeric view of the value; text is parsed when it looks numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Null => None,
            Val::Integer(i) => Some(*i as f64),
            Val::Float(f) => Some(*f),
            Val::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Val::Integer(i) => Some(*i),
            Val::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Val::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Val::Null => 0,
            Val::Integer(_) | Val::Float(_) => 1,
            Val::Text(_) => 2,
        }
    }

    /// Total ordering used by sorting and min/max aggregation.
    pub fn compare(&self, other: &Val) -> Ordering {
        match (self, other) {
            (Val::Integer(a), Val::Integer(b)) => a.cmp(b),
            (Val::Text(a), Val::Text(b)) => a.cmp(b),
            (a, b) if a.is_number() && b.is_number() => {
                let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
                x.total_cmp(&y)
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    /// Add two values for `sum()`; integers stay integers until they overflow.
    pub fn add(&self, other: &Val) -> Val {
        match (self, other) {
            (Val::Null, v) | (v, Val::Null) => v.clone(),
            (Val::Integer(a), Val::Integer(b)) => match a.checked_add(*b) {
                Some(sum) => Val::Integer(sum),
                None => Val::Float(*a as f64 + *b as f64),
            },
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Val::Float(x + y),
                (Some(x), None) | (None, Some(x)) => Val::Float(x),
                (None, None) => Val::Null,
            },
        }
    }
}

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Val::Null, Val::Null) => true,
            (Val::Integer(a), Val::Integer(b)) => a == b,
            (Val::Float(a), Val::Float(b)) => a.to_bits() == b.to_bits(),
            (Val::Text(a), Val::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Val {}

impl Hash for Val {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Val::Null => {}
            Val::Integer(i) => i.hash(state),
            Val::Float(f) => f.to_bits().hash(state),
            Val::Text(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Null => Ok(()),
            Val::Integer(i) => write!(f, "{}", i),
            Val::Float(x) => write!(f, "{}", x),
            Val::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Val {
    fn from(value: i64) -> Self {
        Val::Integer(value)
    }
}

impl From<f64> for Val {
    fn from(value: f64) -> Self {
        Val::Float(value)
    }
}

impl From<&str> for Val {
    fn from(value: &str) -> Self {
        Val::Text(value.to_string())
    }
}

impl From<String> for Val {
    fn from(value: String) -> Self {
        Val::Text(value)
    }
}

impl<T: Into<Val>> From<Option<T>> for Val {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Val::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefers_integers() {
        assert_eq!(Val::parse("42"), Val::Integer(42));
        assert_eq!(Val::parse("4.5"), Val::Float(4.5));
        assert_eq!(Val::parse("user3"), Val::text("user3"));
        assert_eq!(Val::parse("  "), Val::Null);
    }

    #[test]
    fn test_ordering_across_types() {
        assert_eq!(Val::Null.compare(&Val::Integer(-5)), Ordering::Less);
        assert_eq!(Val::Integer(2).compare(&Val::Float(1.5)), Ordering::Greater);
        assert_eq!(Val::Float(10.0).compare(&Val::text("a")), Ordering::Less);
        assert_eq!(Val::text("b").compare(&Val::text("a")), Ordering::Greater);
    }

    #[test]
    fn test_add_promotes_on_overflow() {
        assert_eq!(Val::Integer(2).add(&Val::Integer(3)), Val::Integer(5));
        assert_eq!(Val::Null.add(&Val::Integer(3)), Val::Integer(3));
        assert!(matches!(
            Val::Integer(i64::MAX).add(&Val::Integer(1)),
            Val::Float(_)
        ));
        assert_eq!(Val::Integer(1).add(&Val::Float(0.5)), Val::Float(1.5));
    }

    #[test]
    fn test_serde_untagged() {
        let json = serde_json::to_string(&vec![Val::Null, Val::Integer(1), Val::text("x")]).unwrap();
        assert_eq!(json, r#"[null,1,"x"]"#);
        let back: Vec<Val> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![Val::Null, Val::Integer(1), Val::text("x")]);
    }
}
