// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::event::{Event, Value, SOURCE_FIELD};

/// Source tag of container logs. Every other tag is a job.
pub const CONTAINER_SOURCE: &str = "container";

/// Splits events into `(jobs, containers)`, keeping input order within each.
///
/// An event is a container event when its source is `"container"` or cannot
/// be read at all; everything else is a job event.
#[must_use]
pub fn split_events(events: &[Event]) -> (Vec<&Event>, Vec<&Event>) {
    events.iter().partition(|event| !is_container(event))
}

fn is_container(event: &Event) -> bool {
    match event.fields.get_value(SOURCE_FIELD) {
        Ok(Value::String(source)) => source == CONTAINER_SOURCE,
        Ok(_) => false,
        Err(_) => true,
    }
}
