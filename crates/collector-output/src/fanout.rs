// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Best-effort secondary delivery.
//!
//! Events that carry a `terminus.output.collector` address are copied, once
//! the primary delivery of their batch succeeded, to that address. Delivery is
//! fire-and-forget: nothing here ever feeds back into the publish outcome.
//!
//! The [`FanOutHandle`] groups events by address and queues the groups; the
//! [`FanOutService`] drains the queue with a bounded number of concurrent
//! requests until it is cancelled.

use base64::Engine;
use reqwest::header::HeaderValue;
use reqwest::Client;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::compress::gzip;
use crate::config::OutputConfig;
use crate::errors::{ConfigError, FanOutError};
use crate::event::{Event, OUTPUT_COLLECTOR_FIELD};
use crate::http::{build_client, request_id, Endpoint};
use crate::record::Record;

pub const FANOUT_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
pub const CUSTOM_CONTENT_ENCODING_HEADER: &str = "custom-content-encoding";

/// Events bound for one address.
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutGroup {
    pub address: String,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone)]
pub struct FanOutHandle {
    tx: mpsc::Sender<FanOutGroup>,
    cancel: CancellationToken,
}

impl FanOutHandle {
    /// Groups `events` by address and queues one delivery per group.
    ///
    /// Never blocks: a group that does not fit in the queue is dropped.
    /// Returns the number of groups queued.
    pub fn submit(&self, events: &[&Event]) -> usize {
        if self.cancel.is_cancelled() {
            return 0;
        }
        let mut queued = 0;
        for (address, events) in group_by_address(events) {
            let count = events.len();
            match self.tx.try_send(FanOutGroup { address, events }) {
                Ok(()) => queued += 1,
                Err(mpsc::error::TrySendError::Full(group)) => {
                    warn!(
                        "FANOUT | Queue is full, dropping {count} events for {}",
                        group.address
                    );
                }
                Err(mpsc::error::TrySendError::Closed(group)) => {
                    debug!(
                        "FANOUT | Service stopped, dropping {count} events for {}",
                        group.address
                    );
                }
            }
        }
        queued
    }

    /// Stops the service; queued groups are dropped, in-flight ones complete.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Splits events by their fan-out address. Events without a non-blank string
/// address are left out.
#[must_use]
pub fn group_by_address(events: &[&Event]) -> BTreeMap<String, Vec<Event>> {
    let mut groups: BTreeMap<String, Vec<Event>> = BTreeMap::new();
    for event in events {
        let Ok(address) = event.fields.get_str(OUTPUT_COLLECTOR_FIELD) else {
            continue;
        };
        if address.trim().is_empty() {
            continue;
        }
        groups
            .entry(address.to_string())
            .or_default()
            .push((*event).clone());
    }
    groups
}

/// Record layout of fan-out bodies: keys sorted, tags and labels always present.
#[derive(Serialize)]
struct OutputRecord<'a> {
    content: &'a str,
    id: &'a str,
    labels: &'a BTreeMap<String, String>,
    offset: i64,
    source: &'a str,
    stream: &'a str,
    tags: &'a BTreeMap<String, String>,
    timestamp: i64,
}

impl<'a> From<&'a Record> for OutputRecord<'a> {
    fn from(record: &'a Record) -> Self {
        OutputRecord {
            content: &record.content,
            id: &record.id,
            labels: &record.labels,
            offset: record.offset,
            source: &record.source,
            stream: &record.stream,
            tags: &record.tags,
            timestamp: record.timestamp,
        }
    }
}

/// Builds a fan-out body: JSON array of records, base64, then gzip.
///
/// Returns `None` when no event could be converted.
pub fn encode_group(events: &[Event], level: u32) -> Result<Option<Vec<u8>>, FanOutError> {
    let records: Vec<Record> = events
        .iter()
        .filter_map(|event| match Record::try_from(event) {
            Ok(record) => Some(record),
            Err(e) => {
                error!("FANOUT | Dropping event: {e}");
                None
            }
        })
        .collect();
    if records.is_empty() {
        return Ok(None);
    }
    let output: Vec<OutputRecord<'_>> = records.iter().map(OutputRecord::from).collect();
    let json = serde_json::to_vec(&output)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(json);
    Ok(Some(gzip(encoded.as_bytes(), level)?))
}

/// Shared state of fan-out requests.
#[derive(Debug)]
struct Sender {
    client: Client,
    method: String,
    params: HashMap<String, String>,
    headers: HashMap<String, String>,
    compress_level: u32,
}

impl Sender {
    async fn send(&self, group: FanOutGroup) -> Result<(), FanOutError> {
        let start = Instant::now();
        let Some(body) = encode_group(&group.events, self.compress_level)? else {
            debug!("FANOUT | No valid events for {}", group.address);
            return Ok(());
        };
        let endpoint = Endpoint::new(
            &group.address,
            "",
            &self.method,
            &self.params,
            &self.headers,
        )?;
        let mut request = endpoint.request(body, FANOUT_CONTENT_TYPE, true);
        request.headers_mut().insert(
            CUSTOM_CONTENT_ENCODING_HEADER,
            HeaderValue::from_static("base64"),
        );
        let id = request_id(&request).to_string();

        let response = self.client.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FanOutError::Status(status));
        }
        info!(
            "FANOUT | Sent request {id} to {}, count: {}, cost: {:.3}s",
            group.address,
            group.events.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

pub struct FanOutService {
    rx: mpsc::Receiver<FanOutGroup>,
    sender: Arc<Sender>,
    workers: usize,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl FanOutService {
    pub fn new(config: &OutputConfig) -> Result<(Self, FanOutHandle), ConfigError> {
        if config.compress_level > 9 {
            return Err(ConfigError::Invalid(format!(
                "output.compress_level {} is out of range 0..=9",
                config.compress_level
            )));
        }
        let client = build_client(config.timeout, config.keep_alive, &config.tls)?;
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let cancel = CancellationToken::new();

        let service = FanOutService {
            rx,
            sender: Arc::new(Sender {
                client,
                method: config.method.clone(),
                params: config.params.clone(),
                headers: config.headers.clone(),
                compress_level: config.compress_level,
            }),
            workers: config.workers.max(1),
            cancel: cancel.clone(),
            tasks: JoinSet::new(),
        };
        let handle = FanOutHandle { tx, cancel };
        Ok((service, handle))
    }

    pub async fn run(mut self) {
        debug!("FANOUT | Service started");
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("FANOUT | Delivery task failed: {e}");
                    }
                }
                group = self.rx.recv(), if self.tasks.len() < self.workers => {
                    let Some(group) = group else { break };
                    let sender = Arc::clone(&self.sender);
                    self.tasks.spawn(
                        async move {
                            let address = group.address.clone();
                            if let Err(e) = sender.send(group).await {
                                error!("FANOUT | Fail to deliver to {address}: {e}");
                            }
                        }
                        .in_current_span(),
                    );
                }
            }
        }

        self.rx.close();
        let mut dropped = 0;
        while let Ok(group) = self.rx.try_recv() {
            dropped += group.events.len();
        }
        if dropped > 0 {
            warn!("FANOUT | Dropping {dropped} queued events on shutdown");
        }
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!("FANOUT | Delivery task failed: {e}");
            }
        }
        debug!("FANOUT | Service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::container_event;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn addressed(id: &str, address: Option<&str>) -> Event {
        let mut event = container_event(id, "hello");
        if let Some(address) = address {
            event.fields.put_value(OUTPUT_COLLECTOR_FIELD, address);
        }
        event
    }

    fn decode(body: &[u8]) -> serde_json::Value {
        let mut encoded = String::new();
        GzDecoder::new(body).read_to_string(&mut encoded).unwrap();
        let json = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        serde_json::from_slice(&json).unwrap()
    }

    #[test]
    fn test_group_by_address() {
        let a1 = addressed("1", Some("http://a"));
        let b = addressed("2", Some("http://b"));
        let none = addressed("3", None);
        let blank = addressed("4", Some("  "));
        let mut wrong_type = addressed("5", None);
        wrong_type.fields.put_value(OUTPUT_COLLECTOR_FIELD, 42);
        let a2 = addressed("6", Some("http://a"));

        let groups = group_by_address(&[&a1, &b, &none, &blank, &wrong_type, &a2]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["http://a"], vec![a1.clone(), a2.clone()]);
        assert_eq!(groups["http://b"], vec![b.clone()]);
    }

    #[test]
    fn test_encode_group_layout() {
        let body = encode_group(&[container_event("abc", "hello")], 6)
            .unwrap()
            .unwrap();
        let value = decode(&body);
        let expected = serde_json::json!([{
            "content": "hello",
            "id": "abc",
            "labels": {},
            "offset": 10,
            "source": "container",
            "stream": "stdout",
            "tags": {"a": "b"},
            "timestamp": 1_415_792_726_371_000_000_i64
        }]);
        assert_eq!(value, expected);

        let raw = base64::engine::general_purpose::STANDARD.decode({
            let mut s = String::new();
            GzDecoder::new(&body[..]).read_to_string(&mut s).unwrap();
            s
        });
        let text = String::from_utf8(raw.unwrap()).unwrap();
        assert!(text.starts_with(r#"[{"content":"hello","id":"abc","labels":{},"offset":10"#));
    }

    #[test]
    fn test_encode_group_level_zero_is_still_gzip() {
        let body = encode_group(&[container_event("abc", "hello")], 0)
            .unwrap()
            .unwrap();
        assert_eq!(&body[..2], &[0x1f, 0x8b]);
        assert_eq!(decode(&body)[0]["id"], "abc");
    }

    #[test]
    fn test_encode_group_skips_unconvertible() {
        let mut bad = container_event("bad", "x");
        bad.fields.put_value("log.offset", "ten");
        assert!(encode_group(&[bad.clone()], 6).unwrap().is_none());

        let body = encode_group(&[bad, container_event("ok", "y")], 6)
            .unwrap()
            .unwrap();
        let value = decode(&body);
        assert_eq!(value.as_array().unwrap().len(), 1);
        assert_eq!(value[0]["id"], "ok");
    }

    #[tokio::test]
    async fn test_submit_drops_when_queue_full() {
        let config = OutputConfig {
            queue_size: 1,
            ..Default::default()
        };
        let (_service, handle) = FanOutService::new(&config).unwrap();
        let a = addressed("1", Some("http://a"));
        let b = addressed("2", Some("http://b"));
        assert_eq!(handle.submit(&[&a, &b]), 1);
        assert_eq!(handle.submit(&[&a]), 0);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_ignored() {
        let (service, handle) = FanOutService::new(&OutputConfig::default()).unwrap();
        handle.shutdown();
        service.run().await;
        let a = addressed("1", Some("http://a"));
        assert_eq!(handle.submit(&[&a]), 0);
    }

    #[test]
    fn test_new_rejects_invalid_level() {
        let config = OutputConfig {
            compress_level: 10,
            ..Default::default()
        };
        assert!(FanOutService::new(&config).is_err());
    }
}
