// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Gzip compression of request bodies.
//!
//! [`Gzipper`] keeps one writer and its output buffer alive across calls so
//! that every request does not allocate a fresh compression buffer. The pair
//! is a single-writer resource guarded by a mutex; concurrent senders
//! serialize on it.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use tracing::error;

use crate::errors::CompressError;

/// Bytes of the offending payload included in the log line of a panic.
const PANIC_PAYLOAD_PREVIEW: usize = 4096;

pub struct Gzipper {
    level: Compression,
    writer: Mutex<Option<GzEncoder<Vec<u8>>>>,
}

impl std::fmt::Debug for Gzipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gzipper")
            .field("level", &self.level.level())
            .finish_non_exhaustive()
    }
}

impl Gzipper {
    pub fn new(level: u32) -> Result<Self, CompressError> {
        if !(1..=9).contains(&level) {
            return Err(CompressError::InvalidLevel(level));
        }
        let level = Compression::new(level);
        Ok(Gzipper {
            level,
            writer: Mutex::new(Some(GzEncoder::new(Vec::with_capacity(1_024), level))),
        })
    }

    /// Builds the compressor for a configured level; `0` disables compression.
    pub fn from_level(level: u32) -> Result<Option<Self>, CompressError> {
        if level == 0 {
            return Ok(None);
        }
        Self::new(level).map(Some)
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.level.level()
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressError> {
        self.guarded(data, write_all_and_finish)
    }

    /// Runs `write` against the pooled writer. Whatever happens, the writer is
    /// reset for the next call; a panic is logged and reported as an error.
    fn guarded<F>(&self, data: &[u8], write: F) -> Result<Vec<u8>, CompressError>
    where
        F: FnOnce(GzEncoder<Vec<u8>>, &[u8]) -> io::Result<Vec<u8>>,
    {
        let mut slot = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = slot
            .take()
            .unwrap_or_else(|| GzEncoder::new(Vec::with_capacity(1_024), self.level));

        let result = panic::catch_unwind(AssertUnwindSafe(|| write(writer, data)));
        match result {
            Ok(Ok(mut buf)) => {
                let out = buf.clone();
                buf.clear();
                *slot = Some(GzEncoder::new(buf, self.level));
                Ok(out)
            }
            Ok(Err(e)) => {
                *slot = Some(GzEncoder::new(Vec::with_capacity(1_024), self.level));
                Err(CompressError::Io(e))
            }
            Err(cause) => {
                *slot = Some(GzEncoder::new(Vec::with_capacity(1_024), self.level));
                let message = panic_message(cause.as_ref());
                let preview = &data[..data.len().min(PANIC_PAYLOAD_PREVIEW)];
                error!(
                    "OUTPUT | Panic while compressing {} bytes: {message}: payload: {}",
                    data.len(),
                    String::from_utf8_lossy(preview)
                );
                Err(CompressError::Panicked(message))
            }
        }
    }
}

fn write_all_and_finish(mut writer: GzEncoder<Vec<u8>>, data: &[u8]) -> io::Result<Vec<u8>> {
    writer.write_all(data)?;
    writer.flush()?;
    writer.finish()
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One-shot gzip at `level` (0 stores without compressing).
pub fn gzip(data: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(data.len() / 2 + 64),
        Compression::new(level.min(9)),
    );
    encoder.write_all(data)?;
    encoder.finish()
}
