//! FILENAME: core/pivot-matrix/src/value.rs
//! Scalar values and source records.
//!
//! Every field a record exposes is a `Value`. Values are hashable so they can
//! serve as keys in the matrix key map and in per-dimension value sets.

use std::cmp::Ordering;
use std::fmt;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

// ============================================================================
// ORDERED FLOAT
// ============================================================================

/// Wrapper around f64 that implements Eq and Hash for use as HashMap keys.
/// NaN values are treated as equal to each other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        if self.0.is_nan() && other.0.is_nan() {
            true
        } else {
            self.0 == other.0
        }
    }
}

impl Eq for OrderedFloat {}

impl std::hash::Hash for OrderedFloat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        if self.0.is_nan() {
            u64::MAX.hash(state);
        } else if self.0 == 0.0 {
            // 0.0 and -0.0 compare equal, so they must hash equal
            0u64.hash(state);
        } else {
            self.0.to_bits().hash(state);
        }
    }
}

impl OrderedFloat {
    pub fn as_f64(&self) -> f64 {
        self.0
    }
}

// ============================================================================
// VALUE
// ============================================================================

/// A single field value read from a record, or a computed aggregate.
/// Serializes as a plain JSON scalar (`null`, bool, number or string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Empty,
    Boolean(bool),
    Number(OrderedFloat),
    Text(String),
}

static EMPTY: Value = Value::Empty;

impl Value {
    pub fn number(n: f64) -> Self {
        Value::Number(OrderedFloat(n))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// True for a missing value or an empty string.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Empty => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Plain numeric reading: numbers as-is, text parsed without any
    /// locale handling. Booleans and blanks are not numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n.0),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    /// Numeric reading with a fallback of 0 for anything non-numeric.
    pub fn number_or_zero(&self) -> f64 {
        self.as_f64().unwrap_or(0.0)
    }

    /// Total order used where raw values are compared without a locale:
    /// blanks first, then numbers, text and booleans.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Empty, Value::Empty) => Ordering::Equal,
            (Value::Empty, _) => Ordering::Less,
            (_, Value::Empty) => Ordering::Greater,

            (Value::Number(na), Value::Number(nb)) => {
                na.0.partial_cmp(&nb.0).unwrap_or(Ordering::Equal)
            }
            (Value::Number(_), _) => Ordering::Less,
            (_, Value::Number(_)) => Ordering::Greater,

            (Value::Text(ta), Value::Text(tb)) => ta.cmp(tb),
            (Value::Text(_), _) => Ordering::Less,
            (_, Value::Text(_)) => Ordering::Greater,

            (Value::Boolean(ba), Value::Boolean(bb)) => ba.cmp(bb),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => {
                let n = n.0;
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(OrderedFloat(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(OrderedFloat(n as f64))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(OrderedFloat(n as f64))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Empty, Into::into)
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// A source record: named fields with scalar values.
/// Reading a field that does not exist yields `Value::Empty`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: FxHashMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&EMPTY)
    }

    /// Sets a field, returning true when the stored value changed.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> bool {
        let value = value.into();
        let field = field.into();
        match self.fields.get(&field) {
            Some(existing) if *existing == value => false,
            _ => {
                self.fields.insert(field, value);
                true
            }
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Names of the fields whose values differ between the two records,
    /// sorted for stable output.
    pub fn diff(&self, other: &Record) -> Vec<String> {
        let mut changed: Vec<String> = self
            .fields
            .keys()
            .chain(other.fields.keys())
            .filter(|k| self.get(k) != other.get(k))
            .cloned()
            .collect();
        changed.sort();
        changed.dedup();
        changed
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Record {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_reads_empty() {
        let record = Record::new().with("person", "John");
        assert_eq!(record.get("person"), &Value::text("John"));
        assert!(record.get("country").is_empty());
    }

    #[test]
    fn test_value_json_shape() {
        let record = Record::new()
            .with("name", "Mary")
            .with("value", 7.0)
            .with("active", true);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["name"], "Mary");
        assert_eq!(json["value"], 7.0);
        assert_eq!(json["active"], true);

        let back: Value = serde_json::from_str("null").unwrap();
        assert_eq!(back, Value::Empty);
        let back: Value = serde_json::from_str("10").unwrap();
        assert_eq!(back, Value::number(10.0));
    }

    #[test]
    fn test_number_display_drops_integral_fraction() {
        assert_eq!(Value::number(42.0).to_string(), "42");
        assert_eq!(Value::number(2.5).to_string(), "2.5");
        assert_eq!(Value::Empty.to_string(), "");
    }

    #[test]
    fn test_total_cmp_orders_blank_number_text() {
        let mut values = vec![Value::text("b"), Value::number(3.0), Value::Empty, Value::number(1.0)];
        values.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(
            values,
            vec![Value::Empty, Value::number(1.0), Value::number(3.0), Value::text("b")]
        );
    }

    #[test]
    fn test_record_diff() {
        let a = Record::new().with("x", 1.0).with("y", "a");
        let b = Record::new().with("x", 2.0).with("y", "a").with("z", true);
        assert_eq!(a.diff(&b), vec!["x".to_string(), "z".to_string()]);
    }
}
