// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event model handed over by the upstream pipeline.
//!
//! An [`Event`] is a nested, string-keyed field map plus the timestamp chosen
//! by the pipeline. Every extraction performed by the output goes through the
//! dotted-path accessor on [`Fields`], e.g. `fields.get_str("terminus.source")`.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::errors::FieldError;

/// Classification tag of the originating source (`"container"` or a job tag).
pub const SOURCE_FIELD: &str = "terminus.source";
/// Stable identifier of the originating source, e.g. a content hash.
pub const ID_FIELD: &str = "terminus.id";
/// Position of the line within its source.
pub const OFFSET_FIELD: &str = "log.offset";
/// Sub-channel tag, `stdout` when absent.
pub const STREAM_FIELD: &str = "stream";
/// The log line itself.
pub const MESSAGE_FIELD: &str = "message";
pub const TAGS_FIELD: &str = "terminus.tags";
pub const LABELS_FIELD: &str = "terminus.labels";
/// Destination address of the secondary fan-out.
pub const OUTPUT_COLLECTOR_FIELD: &str = "terminus.output.collector";

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Map(Fields),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Name of the variant, used in type mismatch errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Map(_) => "map",
            Value::Timestamp(_) => "timestamp",
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Fields> for Value {
    fn from(value: Fields) -> Self {
        Value::Map(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

/// Nested key-value content of an event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(BTreeMap<String, Value>);

impl Fields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a dotted path, descending into nested maps one segment at a time.
    pub fn get_value(&self, path: &str) -> Result<&Value, FieldError> {
        let mut current = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let value = current
                .0
                .get(segment)
                .ok_or_else(|| FieldError::Missing(path.to_string()))?;
            if segments.peek().is_none() {
                return Ok(value);
            }
            match value {
                Value::Map(inner) => current = inner,
                other => {
                    return Err(FieldError::NotAMap {
                        path: path.to_string(),
                        segment: segment.to_string(),
                        found: other.kind(),
                    })
                }
            }
        }
        Err(FieldError::Missing(path.to_string()))
    }

    pub fn get_str(&self, path: &str) -> Result<&str, FieldError> {
        match self.get_value(path)? {
            Value::String(s) => Ok(s),
            other => Err(FieldError::type_mismatch(path, "string", other)),
        }
    }

    pub fn get_i64(&self, path: &str) -> Result<i64, FieldError> {
        match self.get_value(path)? {
            Value::Integer(i) => Ok(*i),
            other => Err(FieldError::type_mismatch(path, "integer", other)),
        }
    }

    pub fn get_map(&self, path: &str) -> Result<&Fields, FieldError> {
        match self.get_value(path)? {
            Value::Map(m) => Ok(m),
            other => Err(FieldError::type_mismatch(path, "map", other)),
        }
    }

    /// Stores `value` at a dotted path. Missing or non-map intermediate
    /// segments are replaced by empty maps. Returns the previous value.
    pub fn put_value(&mut self, path: &str, value: impl Into<Value>) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        self.put_segments(&segments, value.into())
    }

    fn put_segments(&mut self, segments: &[&str], value: Value) -> Option<Value> {
        match segments {
            [] => None,
            [leaf] => self.0.insert((*leaf).to_string(), value),
            [head, rest @ ..] => {
                let entry = self
                    .0
                    .entry((*head).to_string())
                    .or_insert_with(|| Value::Map(Fields::new()));
                if let Value::Map(inner) = entry {
                    return inner.put_segments(rest, value);
                }
                let mut inner = Fields::new();
                inner.put_segments(rest, value);
                *entry = Value::Map(inner);
                None
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Fields {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Fields(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Converts a decoded JSON object. `null` and arrays have no field
/// representation and are skipped; integers that do not fit an `i64`
/// become floats.
impl From<serde_json::Map<String, serde_json::Value>> for Fields {
    fn from(object: serde_json::Map<String, serde_json::Value>) -> Self {
        let mut fields = BTreeMap::new();
        for (key, value) in object {
            let converted = match value {
                serde_json::Value::String(s) => Value::String(s),
                serde_json::Value::Bool(b) => Value::Boolean(b),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => Value::Integer(i),
                    None => match n.as_f64() {
                        Some(f) => Value::Float(f),
                        None => continue,
                    },
                },
                serde_json::Value::Object(inner) => Value::Map(Fields::from(inner)),
                serde_json::Value::Null | serde_json::Value::Array(_) => continue,
            };
            fields.insert(key, converted);
        }
        Fields(fields)
    }
}

/// One log record as received from the upstream pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub fields: Fields,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    #[must_use]
    pub fn new(fields: Fields, timestamp: DateTime<Utc>) -> Self {
        Self { fields, timestamp }
    }
}
