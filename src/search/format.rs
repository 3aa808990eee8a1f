//! Conversion of aggregated values into client-facing output

use crate::aggregation::MAX_DECIMAL_PLACES;
use crate::models::{Format, Val};
use chrono::{TimeZone, Utc};
use std::fmt::Write;

const DEFAULT_DATE_PATTERN: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Render a value as table text; `None` for missing values.
pub fn format_value(value: &Val, format: &Format) -> Option<String> {
    if value.is_null() {
        return None;
    }
    let text = match format {
        Format::General | Format::Text => value.to_string(),
        Format::Number {
            decimal_places,
            use_separator,
        } => match value.as_f64() {
            Some(number) => format_number(value, number, *decimal_places, *use_separator),
            None => value.to_string(),
        },
        Format::DateTime { pattern } => match value.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()) {
            Some(date) => {
                let pattern = pattern.as_deref().unwrap_or(DEFAULT_DATE_PATTERN);
                let mut text = String::new();
                match write!(text, "{}", date.format(pattern)) {
                    Ok(()) => text,
                    Err(_) => value.to_string(),
                }
            }
            None => value.to_string(),
        },
    };
    Some(text)
}

/// Render a value for flat results, keeping numbers numeric where the
/// format allows it.
pub fn json_value(value: &Val, format: &Format) -> serde_json::Value {
    use serde_json::Value;

    match (value, format) {
        (Val::Null, _) => Value::Null,
        (_, Format::Text) => Value::String(value.to_string()),
        (Val::Integer(i), _) => Value::from(*i),
        (Val::Float(f), _) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        (Val::Text(text), Format::Number { .. } | Format::DateTime { .. }) => {
            match value.as_i64() {
                Some(i) => Value::from(i),
                None => value
                    .as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(text.clone())),
            }
        }
        (Val::Text(text), _) => Value::String(text.clone()),
    }
}

fn format_number(value: &Val, number: f64, decimal_places: Option<usize>, use_separator: bool) -> String {
    let text = match (decimal_places, value) {
        (Some(places), _) => format!("{:.*}", places.min(MAX_DECIMAL_PLACES), number),
        (None, Val::Integer(i)) => i.to_string(),
        (None, _) => number.to_string(),
    };
    if use_separator {
        group_thousands(&text)
    } else {
        text
    }
}

fn group_thousands(text: &str) -> String {
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text),
    };
    let (whole, fraction) = match unsigned.find('.') {
        Some(pos) => unsigned.split_at(pos),
        None => (unsigned, ""),
    };

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{}{}{}", sign, grouped, fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_general_format() {
        assert_eq!(format_value(&Val::Integer(42), &Format::General), Some("42".to_string()));
        assert_eq!(format_value(&Val::Null, &Format::General), None);
    }

    #[test]
    fn test_number_format() {
        let format = Format::Number {
            decimal_places: Some(2),
            use_separator: true,
        };
        assert_eq!(
            format_value(&Val::Float(1234567.891), &format),
            Some("1,234,567.89".to_string())
        );
        assert_eq!(
            format_value(&Val::Integer(-1000), &Format::Number { decimal_places: None, use_separator: true }),
            Some("-1,000".to_string())
        );
        assert_eq!(
            format_value(&Val::text("n/a"), &format),
            Some("n/a".to_string())
        );
    }

    #[test]
    fn test_date_format() {
        let format = Format::DateTime { pattern: None };
        assert_eq!(
            format_value(&Val::Integer(0), &format),
            Some("1970-01-01T00:00:00.000Z".to_string())
        );
        let format = Format::DateTime {
            pattern: Some("%Y-%m-%d".to_string()),
        };
        assert_eq!(
            format_value(&Val::Integer(86_400_000), &format),
            Some("1970-01-02".to_string())
        );
    }

    #[test]
    fn test_unusable_formats_fall_back() {
        let format = Format::DateTime {
            pattern: Some("%Q".to_string()),
        };
        assert_eq!(format_value(&Val::Integer(0), &format), Some("0".to_string()));

        let format = Format::Number {
            decimal_places: Some(usize::MAX),
            use_separator: false,
        };
        let text = format_value(&Val::Float(1.5), &format).unwrap();
        assert_eq!(text.len(), 2 + MAX_DECIMAL_PLACES);
        assert!(text.starts_with("1.5"));
    }

    #[test]
    fn test_json_values() {
        assert_eq!(json_value(&Val::Integer(3), &Format::General), serde_json::json!(3));
        assert_eq!(json_value(&Val::Integer(3), &Format::Text), serde_json::json!("3"));
        assert_eq!(
            json_value(&Val::text("12"), &Format::Number { decimal_places: None, use_separator: false }),
            serde_json::json!(12)
        );
        assert_eq!(json_value(&Val::Null, &Format::Text), serde_json::Value::Null);
    }
}
