// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dispatch core of the collector log output.
//!
//! Events handed over by the upstream pipeline are split by source type,
//! chunked by message size, encoded, compressed, signed and shipped to two
//! collector endpoints (job and container logs). Whatever could not be
//! delivered is handed back to the pipeline for redelivery.
//!
//! ```text
//!   Batch ──> classify ──> jobs ──────> batcher ─> encoder ─> gzip ─> auth ─> POST /job
//!                 │                                                       │
//!                 └──────> containers ─> (same path, only if jobs ok) ─> POST /container
//!                                                                         │
//!                                                     fan-out (best effort, per address)
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod auth;
pub mod batcher;
pub mod classify;
pub mod client;
pub mod compress;
pub mod config;
pub mod encoder;
pub mod errors;
pub mod event;
pub mod fanout;
pub mod http;
pub mod observer;
pub mod record;

pub use client::{Batch, Client};
pub use config::Config;
pub use event::{Event, Fields, Value};

/// Header carrying a unique id for every request sent to a collector.
pub const REQUEST_ID_HEADER: &str = "terminus-request-id";
