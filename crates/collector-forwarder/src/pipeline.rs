// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Redelivery loop around the collector client.

use collector_output::{Batch, Client, Event};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, PartialEq)]
pub enum Settled {
    Acked,
    Retry(Vec<Event>),
}

/// Batch whose settlement is reported back over a channel.
pub struct PipelineBatch {
    events: Vec<Event>,
    settled: oneshot::Sender<Settled>,
}

impl PipelineBatch {
    #[must_use]
    pub fn new(events: Vec<Event>) -> (Self, oneshot::Receiver<Settled>) {
        let (settled, rx) = oneshot::channel();
        (PipelineBatch { events, settled }, rx)
    }
}

impl Batch for PipelineBatch {
    fn events(&self) -> &[Event] {
        &self.events
    }

    fn ack(self) {
        let _ = self.settled.send(Settled::Acked);
    }

    fn retry_events(self, events: Vec<Event>) {
        let _ = self.settled.send(Settled::Retry(events));
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub init: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling up to `max`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.init.saturating_mul(factor).min(self.max)
    }
}

/// Publishes `events`, republishing remainders until they are acked, the
/// retry budget is spent or `cancel` fires. Returns the number of events dropped.
pub async fn forward(
    client: &Client,
    events: Vec<Event>,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> usize {
    let mut pending = events;
    let mut attempt = 0;
    loop {
        let (batch, settled) = PipelineBatch::new(pending);
        if let Err(e) = client.publish(batch).await {
            debug!(
                "FORWARDER | Publish attempt {attempt} failed sending {} records: {e}",
                e.kind()
            );
        }
        let rest = match settled.await {
            Ok(Settled::Acked) => return 0,
            Ok(Settled::Retry(rest)) => rest,
            Err(_) => {
                error!("FORWARDER | Batch was never settled");
                return 0;
            }
        };

        attempt += 1;
        if attempt > policy.max_retries {
            error!(
                "FORWARDER | Dropping {} events after {} retries",
                rest.len(),
                policy.max_retries
            );
            return rest.len();
        }
        let delay = policy.backoff(attempt);
        warn!(
            "FORWARDER | Retrying {} events in {:.1}s (attempt {attempt}/{})",
            rest.len(),
            delay.as_secs_f64(),
            policy.max_retries
        );
        tokio::select! {
            () = cancel.cancelled() => {
                warn!("FORWARDER | Shutting down, dropping {} events", rest.len());
                return rest.len();
            }
            () = tokio::time::sleep(delay) => {}
        }
        pending = rest;
    }
}
