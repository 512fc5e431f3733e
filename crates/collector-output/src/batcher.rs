// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Size-bounded chunking of events.
//!
//! The size of a chunk is estimated from the UTF-8 length of the `message`
//! field only; it is a heuristic for the request size, not an exact bound.

use crate::errors::BatchError;
use crate::event::{Event, MESSAGE_FIELD};

/// Returns how many leading events form the next chunk.
///
/// Message lengths are summed in order; the event whose message makes the sum
/// exceed `max_bytes` starts the next chunk. A first event that exceeds the
/// limit on its own is sent alone, so the pivot is at least 1 for any
/// non-empty input.
pub fn size_limit(events: &[&Event], max_bytes: usize) -> Result<usize, BatchError> {
    let mut sum = 0usize;
    for (i, event) in events.iter().enumerate() {
        let message = event.fields.get_str(MESSAGE_FIELD)?;
        sum = sum.saturating_add(message.len());
        if sum > max_bytes && i > 0 {
            return Ok(i);
        }
    }
    Ok(events.len())
}

/// Iterator over successive chunks of `events`. Stops after the first error.
pub struct Chunks<'a, 'e> {
    events: &'a [&'e Event],
    max_bytes: usize,
}

impl<'a, 'e> Chunks<'a, 'e> {
    #[must_use]
    pub fn new(events: &'a [&'e Event], max_bytes: usize) -> Self {
        Self { events, max_bytes }
    }
}

impl<'a, 'e> Iterator for Chunks<'a, 'e> {
    type Item = Result<&'a [&'e Event], BatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.events.is_empty() {
            return None;
        }
        match size_limit(self.events, self.max_bytes) {
            Ok(pivot) => {
                let (chunk, rest) = self.events.split_at(pivot);
                self.events = rest;
                Some(Ok(chunk))
            }
            Err(e) => {
                self.events = &[];
                Some(Err(e))
            }
        }
    }
}
