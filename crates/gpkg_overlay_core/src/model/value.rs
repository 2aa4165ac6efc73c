//! Scalar cell values and feature identity.
//!
//! # Responsibility
//! - Define the dynamically typed cell value shared by base rows, overlay
//!   records, working rows and expression results.
//! - Own coercion between the declared column types.
//!
//! # Invariants
//! - `FeatureId` is stable and never reused for another feature.
//! - Base features carry the dataset primary key (positive); overlay-added
//!   features are allocated negative ids by the overlay store.
//! - `Value::Null` is a real value ("edited to blank"), distinct from the
//!   absence of an override.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Stable identifier of one feature row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(pub i64);

impl FeatureId {
    /// Returns the raw integer key.
    pub fn get(self) -> i64 {
        self.0
    }

    /// Returns whether this id lies in the overlay-allocated range.
    pub fn is_overlay_allocated(self) -> bool {
        self.0 < 0
    }
}

impl Display for FeatureId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for FeatureId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Declared scalar type of a column. Every type is null-capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Number,
    Text,
    Boolean,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Text => "text",
            Self::Boolean => "boolean",
        }
    }
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Number(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Short runtime type name used in error messages and persistence.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Boolean(_) => "boolean",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Truthiness used by `if` and `count(expr)`: non-zero, non-empty,
    /// non-null.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Number(value) => *value != 0.0 && !value.is_nan(),
            Self::Text(value) => !value.is_empty(),
            Self::Boolean(value) => *value,
        }
    }

    /// Renders the value the way cells and status rows display it.
    ///
    /// Null renders as an empty string and integral numbers drop the
    /// fractional part (`20`, not `20.0`).
    pub fn display_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Number(value) => format_number(*value),
            Self::Text(value) => value.clone(),
            Self::Boolean(value) => value.to_string(),
        }
    }

    /// Coerces this value to the declared column type.
    ///
    /// Returns `None` when no lossless coercion exists. Null is accepted by
    /// every column type.
    pub fn coerce_to(&self, column_type: ColumnType) -> Option<Value> {
        match (self, column_type) {
            (Self::Null, _) => Some(Self::Null),
            (Self::Number(_), ColumnType::Number)
            | (Self::Text(_), ColumnType::Text)
            | (Self::Boolean(_), ColumnType::Boolean) => Some(self.clone()),
            (Self::Number(value), ColumnType::Text) => Some(Self::Text(format_number(*value))),
            (Self::Text(value), ColumnType::Number) => parse_number(value).map(Self::Number),
            (Self::Text(value), ColumnType::Boolean) => parse_bool(value).map(Self::Boolean),
            (Self::Number(value), ColumnType::Boolean) => {
                if *value == 0.0 {
                    Some(Self::Boolean(false))
                } else if *value == 1.0 {
                    Some(Self::Boolean(true))
                } else {
                    None
                }
            }
            (Self::Boolean(value), ColumnType::Number) => {
                Some(Self::Number(if *value { 1.0 } else { 0.0 }))
            }
            (Self::Boolean(value), ColumnType::Text) => Some(Self::Text(value.to_string())),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_text())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Formats a number without a trailing `.0` for integral values.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Parses trimmed text as a finite number.
pub fn parse_number(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{format_number, ColumnType, Value};

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(format_number(20.0), "20");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(Value::Null.display_text(), "");
    }

    #[test]
    fn number_and_text_coerce_both_ways() {
        assert_eq!(
            Value::text(" 12.5 ").coerce_to(ColumnType::Number),
            Some(Value::Number(12.5))
        );
        assert_eq!(
            Value::Number(7.0).coerce_to(ColumnType::Text),
            Some(Value::text("7"))
        );
        assert_eq!(Value::text("abc").coerce_to(ColumnType::Number), None);
    }

    #[test]
    fn null_is_accepted_by_every_type() {
        for column_type in [ColumnType::Number, ColumnType::Text, ColumnType::Boolean] {
            assert_eq!(Value::Null.coerce_to(column_type), Some(Value::Null));
        }
    }

    #[test]
    fn boolean_coercion_is_strict() {
        assert_eq!(
            Value::Number(1.0).coerce_to(ColumnType::Boolean),
            Some(Value::Boolean(true))
        );
        assert_eq!(Value::Number(2.0).coerce_to(ColumnType::Boolean), None);
        assert_eq!(
            Value::text("FALSE").coerce_to(ColumnType::Boolean),
            Some(Value::Boolean(false))
        );
    }

    #[test]
    fn truthiness_matches_status_semantics() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::text("").is_truthy());
        assert!(Value::text("x").is_truthy());
        assert!(Value::Number(-1.0).is_truthy());
    }
}
