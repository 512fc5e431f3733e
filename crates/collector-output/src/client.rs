// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Publish state machine.
//!
//! A batch is split into job and container events. Job events are sent first,
//! chunk by chunk; container events are only attempted once every job chunk
//! was accepted. The first failure stops delivery and everything from the
//! failed chunk onward is handed back to the pipeline with
//! [`Batch::retry_events`]. A batch that was fully delivered is acknowledged
//! with [`Batch::ack`] and its container events are copied to the fan-out.

use reqwest::Client as HttpClient;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, warn, Instrument, Span};

use crate::auth::Authenticator;
use crate::batcher::Chunks;
use crate::classify::split_events;
use crate::compress::Gzipper;
use crate::config::Config;
use crate::encoder::Encoder;
use crate::errors::{ConfigError, PublishError, RecordKind};
use crate::event::Event;
use crate::fanout::{FanOutHandle, FanOutService};
use crate::http::{build_client, request_id, Endpoint};
use crate::observer::Observer;
use crate::record::convert_events;

/// A unit of work handed over by the pipeline.
///
/// Exactly one of [`ack`](Batch::ack) or [`retry_events`](Batch::retry_events)
/// is called per publish.
pub trait Batch: Send {
    fn events(&self) -> &[Event];

    /// Every event was delivered.
    fn ack(self);

    /// `events` were not delivered and should be offered again.
    fn retry_events(self, events: Vec<Event>);
}

struct FanOut {
    handle: FanOutHandle,
    task: Mutex<Option<JoinHandle<()>>>,
}

pub struct Client {
    job: Endpoint,
    container: Endpoint,
    http: HttpClient,
    encoder: Encoder,
    gzipper: Option<Gzipper>,
    auth: Authenticator,
    bulk_max_size_bytes: usize,
    observer: Arc<dyn Observer>,
    fanout: Option<FanOut>,
    span: Span,
}

impl Client {
    /// Builds the client and, when the fan-out is enabled, spawns its service
    /// on the current Tokio runtime.
    pub fn new(config: &Config, observer: Arc<dyn Observer>) -> Result<Self, ConfigError> {
        config.validate()?;
        let span = info_span!("collector_output", host = %config.host);

        let job = Endpoint::new(
            &config.host,
            &config.job_path,
            &config.method,
            &config.params,
            &config.headers,
        )?;
        let container = Endpoint::new(
            &config.host,
            &config.container_path,
            &config.method,
            &config.params,
            &config.headers,
        )?;
        let http = build_client(config.timeout, config.keep_alive, &config.tls)?;
        let gzipper = Gzipper::from_level(config.compress_level)?;
        let auth = Authenticator::new(&config.auth)?;
        let encoder = Encoder::from_name(&config.encoder);

        let fanout = if config.output.enabled {
            let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
                ConfigError::Invalid(format!("fan-out needs a tokio runtime: {e}"))
            })?;
            let (service, handle) = FanOutService::new(&config.output)?;
            let fanout_span = info_span!(parent: &span, "fanout");
            let task = runtime.spawn(service.run().instrument(fanout_span));
            Some(FanOut {
                handle,
                task: Mutex::new(Some(task)),
            })
        } else {
            None
        };

        span.in_scope(|| {
            debug!(
                "OUTPUT | Client ready, job: {}, container: {}, encoder: {encoder:?}, gzip: {}",
                job.url(),
                container.url(),
                config.compress_level
            );
        });

        Ok(Client {
            job,
            container,
            http,
            encoder,
            gzipper,
            auth,
            bulk_max_size_bytes: config.bulk_max_size_bytes,
            observer,
            fanout,
            span,
        })
    }

    /// Delivers `batch` and settles it.
    ///
    /// The returned error describes the first failure; the events handed to
    /// [`Batch::retry_events`] are what was not delivered.
    pub async fn publish<B: Batch>(&self, batch: B) -> Result<(), PublishError> {
        self.publish_batch(batch)
            .instrument(self.span.clone())
            .await
    }

    async fn publish_batch<B: Batch>(&self, batch: B) -> Result<(), PublishError> {
        let total = batch.events().len();
        self.observer.new_batch(total);
        if total == 0 {
            self.observer.acked(0);
            batch.ack();
            return Ok(());
        }

        let (rest, failure) = {
            let (jobs, containers) = split_events(batch.events());
            let (sent, failure) = self.send_events(RecordKind::Job, &jobs).await;
            match failure {
                Some(e) => {
                    let rest: Vec<Event> = jobs[sent..]
                        .iter()
                        .chain(containers.iter())
                        .map(|event| (*event).clone())
                        .collect();
                    (rest, Some(e))
                }
                None => {
                    let (sent, failure) =
                        self.send_events(RecordKind::Container, &containers).await;
                    match failure {
                        Some(e) => {
                            let rest: Vec<Event> = containers[sent..]
                                .iter()
                                .map(|event| (*event).clone())
                                .collect();
                            (rest, Some(e))
                        }
                        None => {
                            if let Some(fanout) = &self.fanout {
                                if !containers.is_empty() {
                                    fanout.handle.submit(&containers);
                                }
                            }
                            (Vec::new(), None)
                        }
                    }
                }
            }
        };

        match failure {
            None => {
                self.observer.acked(total);
                batch.ack();
                Ok(())
            }
            Some(e) => {
                error!(
                    "OUTPUT | {e}, retrying {} of {total} events",
                    rest.len()
                );
                self.observer.failed(rest.len());
                batch.retry_events(rest);
                Err(e)
            }
        }
    }

    /// Sends `events` of one kind chunk by chunk.
    ///
    /// Returns how many leading events were delivered and the failure that
    /// stopped delivery, if any.
    pub async fn send_events(
        &self,
        kind: RecordKind,
        events: &[&Event],
    ) -> (usize, Option<PublishError>) {
        let endpoint = match kind {
            RecordKind::Job => &self.job,
            RecordKind::Container => &self.container,
        };
        let mut sent = 0;
        for chunk in Chunks::new(events, self.bulk_max_size_bytes) {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(source) => return (sent, Some(PublishError::Batching { kind, source })),
            };
            if let Err(e) = self.send_chunk(kind, endpoint, chunk).await {
                return (sent, Some(e));
            }
            sent += chunk.len();
        }
        (sent, None)
    }

    async fn send_chunk(
        &self,
        kind: RecordKind,
        endpoint: &Endpoint,
        chunk: &[&Event],
    ) -> Result<(), PublishError> {
        let start = Instant::now();
        let batch = convert_events(chunk);
        if batch.logs.is_empty() {
            warn!(
                "OUTPUT | No valid {kind} events in chunk of {}, skipping",
                chunk.len()
            );
            return Ok(());
        }

        let body = self
            .encoder
            .encode(&batch)
            .map_err(|source| PublishError::Encode { kind, source })?;
        let (body, compressed) = match &self.gzipper {
            Some(gzipper) => (
                gzipper
                    .compress(&body)
                    .map_err(|source| PublishError::Compress { kind, source })?,
                true,
            ),
            None => (body, false),
        };

        let mut request = endpoint.request(body, self.encoder.content_type(), compressed);
        self.auth.secure(&mut request);
        let id = request_id(&request).to_string();

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|source| PublishError::Transport { kind, source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Status { kind, status });
        }
        debug!(
            "OUTPUT | Sent {kind} request {id}, count: {}, cost: {:.3}s",
            batch.logs.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Stops the fan-out and waits for its in-flight deliveries.
    pub async fn shutdown(&self) {
        let Some(fanout) = &self.fanout else {
            return;
        };
        fanout.handle.shutdown();
        let task = fanout
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(parent: &self.span, "FANOUT | Service task failed: {e}");
            }
        }
    }
}
