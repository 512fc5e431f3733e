// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Payload encoders for the primary endpoints.

use prost::Message;
use tracing::warn;

use crate::errors::EncodeError;
use crate::record::LogBatch;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoder {
    #[default]
    Json,
    Protobuf,
}

impl Encoder {
    /// Resolves the configured encoder name. Unknown names fall back to JSON.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "protobuf" => Encoder::Protobuf,
            "json" | "" => Encoder::Json,
            other => {
                warn!("OUTPUT | Unknown encoder {other}, falling back to json");
                Encoder::Json
            }
        }
    }

    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            Encoder::Json => JSON_CONTENT_TYPE,
            Encoder::Protobuf => PROTOBUF_CONTENT_TYPE,
        }
    }

    pub fn encode(&self, batch: &LogBatch) -> Result<Vec<u8>, EncodeError> {
        match self {
            Encoder::Json => Ok(serde_json::to_vec(batch)?),
            Encoder::Protobuf => {
                let mut buf = Vec::with_capacity(batch.encoded_len());
                batch.encode(&mut buf)?;
                Ok(buf)
            }
        }
    }

    pub fn decode(&self, payload: &[u8]) -> Result<LogBatch, EncodeError> {
        match self {
            Encoder::Json => Ok(serde_json::from_slice(payload)?),
            Encoder::Protobuf => Ok(LogBatch::decode(payload)?),
        }
    }
}
