use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

use crate::error::QueryBuildError;
use crate::filter::is_null_literal;
use crate::schema::{FieldDescriptor, ScalarType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoercionOptions {
    /// Reject boolean strings other than true/yes/1/false/no/0 instead of reading them as false.
    pub strict_booleans: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Json(Value),
    String(String),
}

impl FilterValue {
    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::Null => Value::Null,
            FilterValue::Int(i) => Value::from(*i),
            FilterValue::Float(f) => Value::from(*f),
            FilterValue::Bool(b) => Value::Bool(*b),
            FilterValue::DateTime(dt) => {
                Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            FilterValue::Json(v) => v.clone(),
            FilterValue::String(s) => Value::String(s.clone()),
        }
    }
}

fn coercion_error(field: &FieldDescriptor, raw: &str, expected: &'static str) -> QueryBuildError {
    QueryBuildError::TypeCoercion {
        field: field.name.clone(),
        value: raw.to_string(),
        expected,
    }
}

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Accepts RFC 3339, naive date-times (read as UTC), plain dates and bare years.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
    }
    if raw.len() == 4 && raw.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = raw.parse().ok()?;
        return Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single();
    }
    None
}

fn parse_bool(
    field: &FieldDescriptor,
    raw: &str,
    options: &CoercionOptions,
) -> Result<bool, QueryBuildError> {
    let lower = raw.to_ascii_lowercase();
    match lower.as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ if options.strict_booleans => Err(coercion_error(field, raw, "boolean")),
        _ => Ok(false),
    }
}

/// Converts a raw filter value into the field's declared type.
///
/// `null`/`undefined` always yield `FilterValue::Null`. Json falls back to the
/// raw string when it does not parse; enums and Strings pass through.
pub fn parse_value(
    field: &FieldDescriptor,
    raw: &str,
    options: &CoercionOptions,
) -> Result<FilterValue, QueryBuildError> {
    if is_null_literal(raw) {
        return Ok(FilterValue::Null);
    }

    let Some(scalar) = field.scalar_type() else {
        return Ok(FilterValue::String(raw.to_string()));
    };

    match scalar {
        ScalarType::String => Ok(FilterValue::String(raw.to_string())),
        ScalarType::Int | ScalarType::BigInt => raw
            .parse::<i64>()
            .map(FilterValue::Int)
            .map_err(|_| coercion_error(field, raw, "integer")),
        ScalarType::Float | ScalarType::Decimal => match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(FilterValue::Float(f)),
            _ => Err(coercion_error(field, raw, "float")),
        },
        ScalarType::Boolean => parse_bool(field, raw, options).map(FilterValue::Bool),
        ScalarType::DateTime => parse_datetime(raw)
            .map(FilterValue::DateTime)
            .ok_or_else(|| coercion_error(field, raw, "date")),
        ScalarType::Json => Ok(serde_json::from_str(raw)
            .map(FilterValue::Json)
            .unwrap_or_else(|_| FilterValue::String(raw.to_string()))),
    }
}
