// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Common test utilities for integration tests

#![allow(dead_code)]

pub mod mock_server;

use chrono::{TimeZone, Utc};
use collector_output::event::{
    ID_FIELD, MESSAGE_FIELD, OFFSET_FIELD, OUTPUT_COLLECTOR_FIELD, SOURCE_FIELD, STREAM_FIELD,
    TAGS_FIELD,
};
use collector_output::{Batch, Config, Event, Fields};
use std::sync::{Arc, Mutex};

pub fn event(source: &str, id: &str, offset: i64, message: &str) -> Event {
    let mut fields = Fields::new();
    fields.put_value(SOURCE_FIELD, source);
    fields.put_value(ID_FIELD, id);
    fields.put_value(OFFSET_FIELD, offset);
    fields.put_value(STREAM_FIELD, "stdout");
    fields.put_value(MESSAGE_FIELD, message);
    let mut tags = Fields::new();
    tags.put_value("Pod", "web-0");
    fields.put_value(TAGS_FIELD, tags);
    Event::new(fields, Utc.timestamp_nanos(1_700_000_000_000_000_000 + offset))
}

pub fn with_output(mut event: Event, address: &str) -> Event {
    event.fields.put_value(OUTPUT_COLLECTOR_FIELD, address);
    event
}

/// Config pointing at `host` with compression and fan-out off.
pub fn config(host: &str) -> Config {
    let mut config = Config {
        host: host.to_string(),
        compress_level: 0,
        ..Default::default()
    };
    config.output.enabled = false;
    config
}

#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    Acked,
    Retried(Vec<Event>),
}

/// Batch that records how it was settled.
pub struct RecordingBatch {
    events: Vec<Event>,
    settled: Arc<Mutex<Vec<Settled>>>,
}

impl RecordingBatch {
    pub fn new(events: Vec<Event>) -> (Self, Arc<Mutex<Vec<Settled>>>) {
        let settled = Arc::new(Mutex::new(Vec::new()));
        (
            RecordingBatch {
                events,
                settled: settled.clone(),
            },
            settled,
        )
    }
}

impl Batch for RecordingBatch {
    fn events(&self) -> &[Event] {
        &self.events
    }

    fn ack(self) {
        self.settled.lock().unwrap().push(Settled::Acked);
    }

    fn retry_events(self, events: Vec<Event>) {
        self.settled.lock().unwrap().push(Settled::Retried(events));
    }
}

pub fn settled_once(settled: &Arc<Mutex<Vec<Settled>>>) -> Settled {
    let settled = settled.lock().unwrap();
    assert_eq!(settled.len(), 1, "batch must be settled exactly once");
    settled[0].clone()
}
