// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire-ready projection of events.
//!
//! A [`Record`] is the flattened, validated view of an [`Event`] that both
//! encoders serialize. The same struct carries the protobuf schema (via
//! `prost`) and the JSON shape (via `serde`), so the two encodings cannot
//! drift apart.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::error;

use crate::errors::{ConvertError, FieldError};
use crate::event::{
    Event, Value, ID_FIELD, LABELS_FIELD, MESSAGE_FIELD, OFFSET_FIELD, SOURCE_FIELD,
    STREAM_FIELD, TAGS_FIELD,
};

pub const DEFAULT_SOURCE: &str = "container";
pub const DEFAULT_STREAM: &str = "stdout";

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Record {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub source: String,
    #[prost(string, tag = "3")]
    pub stream: String,
    #[prost(int64, tag = "4")]
    pub offset: i64,
    /// Unix nanoseconds.
    #[prost(int64, tag = "5")]
    pub timestamp: i64,
    #[prost(string, tag = "6")]
    pub content: String,
    #[prost(btree_map = "string, string", tag = "7")]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[prost(btree_map = "string, string", tag = "8")]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct LogBatch {
    #[prost(message, repeated, tag = "1")]
    #[serde(rename = "Logs")]
    pub logs: Vec<Record>,
}

impl TryFrom<&Event> for Record {
    type Error = ConvertError;

    fn try_from(event: &Event) -> Result<Self, Self::Error> {
        let fields = &event.fields;

        let source = optional_str(fields.get_str(SOURCE_FIELD), DEFAULT_SOURCE)?;
        let id = fields.get_str(ID_FIELD)?.to_string();
        let offset = fields.get_i64(OFFSET_FIELD)?;
        let stream = optional_str(fields.get_str(STREAM_FIELD), DEFAULT_STREAM)?;
        let content = fields.get_str(MESSAGE_FIELD)?.to_string();

        let tags = fields
            .get_value(TAGS_FIELD)
            .map(string_map)
            .unwrap_or_default();
        let labels = fields
            .get_value(LABELS_FIELD)
            .map(string_map)
            .unwrap_or_default();

        let timestamp = event
            .timestamp
            .timestamp_nanos_opt()
            .ok_or(ConvertError::Timestamp(event.timestamp))?;

        Ok(Record {
            id,
            source,
            stream,
            offset,
            timestamp,
            content,
            tags,
            labels,
        })
    }
}

/// Absent fields fall back to `default`; present fields of the wrong type fail.
fn optional_str(lookup: Result<&str, FieldError>, default: &str) -> Result<String, FieldError> {
    match lookup {
        Ok(value) => Ok(value.to_string()),
        Err(FieldError::Missing(_)) => Ok(default.to_string()),
        Err(e) => Err(e),
    }
}

/// Flattens a tags/labels value into lower-cased string pairs.
///
/// Integers are rendered in decimal and floats truncated to integers; other
/// value types are skipped, as is every entry holding the zero value of its
/// type. A value that is not a map yields an empty result.
#[allow(clippy::cast_possible_truncation)]
fn string_map(value: &Value) -> BTreeMap<String, String> {
    let Value::Map(fields) = value else {
        return BTreeMap::new();
    };
    fields
        .iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                Value::String(s) if !s.is_empty() => s.clone(),
                Value::Integer(i) if *i != 0 => i.to_string(),
                Value::Float(f) if *f != 0.0 => (f.trunc() as i64).to_string(),
                _ => return None,
            };
            Some((key.to_lowercase(), rendered))
        })
        .collect()
}

/// Projects events to records, dropping (and logging) the ones that fail.
#[must_use]
pub fn convert_events(events: &[&Event]) -> LogBatch {
    let mut logs = Vec::with_capacity(events.len());
    for event in events {
        match Record::try_from(*event) {
            Ok(record) => logs.push(record),
            Err(e) => error!("OUTPUT | Dropping event: {e}"),
        }
    }
    LogBatch { logs }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event::Fields;
    use chrono::{TimeZone, Utc};
    use tracing_test::traced_test;

    pub(crate) fn container_event(id: &str, message: &str) -> Event {
        let mut fields = Fields::new();
        fields.put_value(SOURCE_FIELD, "container");
        fields.put_value(ID_FIELD, id);
        fields.put_value(OFFSET_FIELD, 10);
        fields.put_value(STREAM_FIELD, "stdout");
        fields.put_value(MESSAGE_FIELD, message);
        let mut tags = Fields::new();
        tags.put_value("A", "b");
        fields.put_value(TAGS_FIELD, tags);
        Event::new(fields, Utc.timestamp_nanos(1_415_792_726_371_000_000))
    }

    #[test]
    fn test_convert_full_event() {
        let record = Record::try_from(&container_event("abc", "hello")).unwrap();
        assert_eq!(record.id, "abc");
        assert_eq!(record.source, "container");
        assert_eq!(record.stream, "stdout");
        assert_eq!(record.offset, 10);
        assert_eq!(record.content, "hello");
        assert_eq!(record.timestamp, 1_415_792_726_371_000_000);
        assert_eq!(record.tags.get("a").map(String::as_str), Some("b"));
        assert!(record.labels.is_empty());
    }

    #[test]
    fn test_convert_defaults_source_and_stream() {
        let mut fields = Fields::new();
        fields.put_value(ID_FIELD, "id");
        fields.put_value(OFFSET_FIELD, 1);
        fields.put_value(MESSAGE_FIELD, "m");
        let record = Record::try_from(&Event::new(fields, Utc::now())).unwrap();
        assert_eq!(record.source, DEFAULT_SOURCE);
        assert_eq!(record.stream, DEFAULT_STREAM);
    }

    #[test]
    fn test_convert_requires_id_offset_message() {
        for missing in [ID_FIELD, OFFSET_FIELD, MESSAGE_FIELD] {
            let mut fields = Fields::new();
            for (path, value) in [
                (ID_FIELD, Value::from("id")),
                (OFFSET_FIELD, Value::from(3)),
                (MESSAGE_FIELD, Value::from("m")),
            ] {
                if path != missing {
                    fields.put_value(path, value);
                }
            }
            let err = Record::try_from(&Event::new(fields, Utc::now())).unwrap_err();
            assert_eq!(
                err,
                ConvertError::Field(FieldError::Missing(missing.to_string()))
            );
        }
    }

    #[test]
    fn test_convert_rejects_unrepresentable_timestamp() {
        let mut event = container_event("abc", "hello");
        event.timestamp = Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap();
        let err = Record::try_from(&event).unwrap_err();
        assert_eq!(err, ConvertError::Timestamp(event.timestamp));
        assert!(err.to_string().contains("nanosecond range"));
    }

    #[test]
    fn test_convert_rejects_wrong_types() {
        let mut event = container_event("abc", "hello");
        event.fields.put_value(OFFSET_FIELD, "10");
        assert!(Record::try_from(&event).is_err());

        let mut event = container_event("abc", "hello");
        event.fields.put_value(STREAM_FIELD, 1);
        assert!(Record::try_from(&event).is_err());

        let mut event = container_event("abc", "hello");
        event.fields.put_value(SOURCE_FIELD, 1.5);
        assert!(Record::try_from(&event).is_err());
    }

    #[test]
    fn test_tags_drop_zero_values_and_lowercase_keys() {
        let mut event = container_event("abc", "hello");
        let mut labels = Fields::new();
        labels.put_value("Pod_Name", "qa-0");
        labels.put_value("EMPTY", "");
        labels.put_value("Restarts", 3);
        labels.put_value("Zero", 0);
        labels.put_value("Cpu", 1.9);
        labels.put_value("NoCpu", 0.0);
        labels.put_value("Ready", true);
        event.fields.put_value(LABELS_FIELD, labels);

        let record = Record::try_from(&event).unwrap();
        let expected: BTreeMap<String, String> = [
            ("pod_name", "qa-0"),
            ("restarts", "3"),
            ("cpu", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(record.labels, expected);
    }

    #[test]
    fn test_non_map_tags_are_ignored() {
        let mut event = container_event("abc", "hello");
        event.fields.put_value(TAGS_FIELD, "a=b");
        let record = Record::try_from(&event).unwrap();
        assert!(record.tags.is_empty());
    }

    #[test]
    #[traced_test]
    fn test_convert_events_drops_invalid() {
        let good = container_event("abc", "hello");
        let mut bad = container_event("def", "world");
        bad.fields.put_value(ID_FIELD, 7);
        let batch = convert_events(&[&good, &bad, &good]);
        assert_eq!(batch.logs.len(), 2);
        assert!(batch.logs.iter().all(|r| r.id == "abc"));
        assert!(logs_contain("Dropping event: fail to convert event: field terminus.id"));
    }
}
