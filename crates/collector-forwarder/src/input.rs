// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Newline-delimited JSON input.

use chrono::{DateTime, Utc};
use collector_output::{Event, Fields};
use tracing::warn;

/// Field holding the RFC 3339 event time. Removed from the event fields.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// Parses one input line. Blank lines and lines that are not JSON objects
/// yield `None`; a missing or unparsable `@timestamp` falls back to now.
pub fn parse_line(line: &str) -> Option<Event> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut object = match serde_json::from_str::<serde_json::Value>(line) {
        Ok(serde_json::Value::Object(object)) => object,
        Ok(other) => {
            warn!("FORWARDER | Skipping line, expected a json object, got: {other}");
            return None;
        }
        Err(e) => {
            warn!("FORWARDER | Skipping line, invalid json: {e}");
            return None;
        }
    };

    let timestamp = match object.remove(TIMESTAMP_FIELD) {
        Some(serde_json::Value::String(raw)) => match DateTime::parse_from_rfc3339(&raw) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                warn!("FORWARDER | Invalid {TIMESTAMP_FIELD} {raw}: {e}");
                Utc::now()
            }
        },
        _ => Utc::now(),
    };
    Some(Event::new(Fields::from(object), timestamp))
}
