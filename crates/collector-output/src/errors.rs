// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use std::fmt;

use crate::event::Value;

/// Failure to read a field of an event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("field {0} not found")]
    Missing(String),

    #[error("field {path}: segment {segment} is a {found}, not a map")]
    NotAMap {
        path: String,
        segment: String,
        found: &'static str,
    },

    #[error("field {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl FieldError {
    pub(crate) fn type_mismatch(path: &str, expected: &'static str, found: &Value) -> Self {
        FieldError::TypeMismatch {
            path: path.to_string(),
            expected,
            found: found.kind(),
        }
    }
}

/// An event could not be projected to a wire record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConvertError {
    #[error("fail to convert event: {0}")]
    Field(#[from] FieldError),

    #[error("fail to convert event: timestamp {0} is outside the nanosecond range")]
    Timestamp(DateTime<Utc>),
}

/// The batcher met an event without a string message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("event must have a string message: {0}")]
pub struct BatchError(#[from] pub FieldError);

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("fail to encode json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("fail to encode protobuf: {0}")]
    Protobuf(#[from] prost::EncodeError),

    #[error("fail to decode protobuf: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),
}

#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("invalid gzip level {0}, must be within 1..=9")]
    InvalidLevel(u32),

    #[error("gzip failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("gzip panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid http method {0}")]
    InvalidMethod(String),

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid {auth_type} auth: {reason}")]
    InvalidAuth {
        auth_type: &'static str,
        reason: String,
    },

    #[error("fail to load tls: {0}")]
    Tls(String),

    #[error("fail to create http client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("invalid compression: {0}")]
    Compression(#[from] CompressError),

    #[error("fail to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// The two primary record kinds, each delivered to its own endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Job,
    Container,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Job => write!(f, "job"),
            RecordKind::Container => write!(f, "container"),
        }
    }
}

/// Stage of a primary send that failed. The size of the remainder handed
/// back to the pipeline, not this error, tells how much was delivered.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("fail to batch {kind} events: {source}")]
    Batching {
        kind: RecordKind,
        #[source]
        source: BatchError,
    },

    #[error("fail to encode {kind} events: {source}")]
    Encode {
        kind: RecordKind,
        #[source]
        source: EncodeError,
    },

    #[error("fail to compress {kind} events: {source}")]
    Compress {
        kind: RecordKind,
        #[source]
        source: CompressError,
    },

    #[error("fail to send {kind} request: {source}")]
    Transport {
        kind: RecordKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("{kind} response status code {status} is not success")]
    Status {
        kind: RecordKind,
        status: reqwest::StatusCode,
    },
}

impl PublishError {
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            PublishError::Batching { kind, .. }
            | PublishError::Encode { kind, .. }
            | PublishError::Compress { kind, .. }
            | PublishError::Transport { kind, .. }
            | PublishError::Status { kind, .. } => *kind,
        }
    }
}

/// Failure of one best-effort fan-out delivery. Never surfaces to the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum FanOutError {
    #[error("fail to encode output events: {0}")]
    Json(#[from] serde_json::Error),

    #[error("fail to compress output events: {0}")]
    Compress(#[from] std::io::Error),

    #[error("invalid output address: {0}")]
    Address(#[from] ConfigError),

    #[error("fail to send output request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("output response status code {0} is not success")]
    Status(reqwest::StatusCode),
}
