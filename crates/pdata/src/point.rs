// SPDX-License-Identifier: Apache-2.0

//! Individual metric points and their attributes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An attribute value attached to a point or a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A UTF-8 string value.
    Str(String),
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer value.
    Int(i64),
    /// A 64-bit floating point value.
    Double(f64),
}

impl AttributeValue {
    /// Returns the string content when this value is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Str(s) => write!(f, "{s}"),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Int(i) => write!(f, "{i}"),
            AttributeValue::Double(d) => write!(f, "{d}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Str(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Str(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Double(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// A single key/value attribute pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Attribute key.
    pub key: String,
    /// Attribute value.
    pub value: AttributeValue,
}

impl KeyValue {
    /// Creates a new key/value pair.
    pub fn new(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An ordered attribute collection.
///
/// Insertion order is preserved and round-trips serialization unchanged.
/// Lookups are linear; attribute sets in this domain are small (single-digit
/// entries for host/process metrics).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSet(Vec<KeyValue>);

impl AttributeSet {
    /// Creates an empty attribute set.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns the value for `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.iter().find(|kv| kv.key == key).map(|kv| &kv.value)
    }

    /// Sets `key` to `value`, replacing an existing entry in place or
    /// appending a new one. Existing entries keep their position so the
    /// upstream ordering survives re-tagging.
    pub fn upsert(&mut self, key: &str, value: impl Into<AttributeValue>) {
        let value = value.into();
        match self.0.iter_mut().find(|kv| kv.key == key) {
            Some(kv) => kv.value = value,
            None => self.0.push(KeyValue {
                key: key.to_owned(),
                value,
            }),
        }
    }

    /// Removes `key` and returns its value, if present.
    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        let idx = self.0.iter().position(|kv| kv.key == key)?;
        Some(self.0.remove(idx).value)
    }

    /// Returns the number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the set holds no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the pairs in upstream order.
    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.0.iter()
    }
}

impl FromIterator<KeyValue> for AttributeSet {
    fn from_iter<T: IntoIterator<Item = KeyValue>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<KeyValue>> for AttributeSet {
    fn from(value: Vec<KeyValue>) -> Self {
        Self(value)
    }
}

/// The aggregation temporality family of a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Last-value semantics.
    Gauge,
    /// Monotonic cumulative sum semantics.
    Sum,
}

/// The numeric value carried by a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// A 64-bit signed integer sample.
    Int(i64),
    /// A 64-bit floating point sample.
    Double(f64),
}

impl MetricValue {
    /// Returns the value widened to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Int(i) => *i as f64,
            MetricValue::Double(d) => *d,
        }
    }
}

/// A single metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Metric name.
    pub name: String,
    /// Point-level attributes, in upstream order.
    #[serde(default)]
    pub attributes: AttributeSet,
    /// Sample timestamp, nanoseconds since the Unix epoch.
    pub timestamp_unix_nanos: u64,
    /// Sample value.
    pub value: MetricValue,
    /// Aggregation kind.
    pub kind: MetricKind,
}

impl MetricPoint {
    /// Creates a gauge point with the given name, value and timestamp.
    #[must_use]
    pub fn gauge(name: impl Into<String>, value: f64, timestamp_unix_nanos: u64) -> Self {
        Self {
            name: name.into(),
            attributes: AttributeSet::new(),
            timestamp_unix_nanos,
            value: MetricValue::Double(value),
            kind: MetricKind::Gauge,
        }
    }

    /// Creates a cumulative sum point with the given name, value and timestamp.
    #[must_use]
    pub fn sum(name: impl Into<String>, value: f64, timestamp_unix_nanos: u64) -> Self {
        Self {
            name: name.into(),
            attributes: AttributeSet::new(),
            timestamp_unix_nanos,
            value: MetricValue::Double(value),
            kind: MetricKind::Sum,
        }
    }

    /// Adds an attribute and returns the point, for fluent construction.
    #[must_use]
    pub fn with_attr(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.attributes.upsert(key, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_preserves_position() {
        let mut attrs = AttributeSet::new();
        attrs.upsert("a", 1i64);
        attrs.upsert("b", 2i64);
        attrs.upsert("a", 3i64);

        let keys: Vec<&str> = attrs.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(attrs.get("a"), Some(&AttributeValue::Int(3)));
    }

    #[test]
    fn attribute_order_round_trips() {
        let attrs: AttributeSet = vec![
            KeyValue::new("zeta", "z"),
            KeyValue::new("alpha", "a"),
            KeyValue::new("mid", 1i64),
        ]
        .into();

        let json = serde_json::to_string(&attrs).expect("serialize");
        let back: AttributeSet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(attrs, back);
        let keys: Vec<&str> = back.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn metric_value_widens() {
        assert_eq!(MetricValue::Int(3).as_f64(), 3.0);
        assert_eq!(MetricValue::Double(0.5).as_f64(), 0.5);
    }
}
