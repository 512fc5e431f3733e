// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod input;
mod pipeline;

use std::{env, mem, path::PathBuf, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use collector_output::{observer::PublishStats, Client, Config};
use pipeline::{forward, RetryPolicy};

const DEFAULT_BATCH_SIZE: usize = 512;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("COLLECTOR_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config_path = env::var("COLLECTOR_CONFIG").ok().map(PathBuf::from);
    let config = match Config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Error loading collector output configuration: {e}");
            return;
        }
    };
    let batch_size = env::var("COLLECTOR_BATCH_SIZE")
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_BATCH_SIZE);
    let policy = RetryPolicy {
        max_retries: config.max_retries,
        init: config.backoff.init,
        max: config.backoff.max,
    };

    let stats = Arc::new(PublishStats::default());
    let client = match Client::new(&config, stats.clone()) {
        Ok(client) => client,
        Err(e) => {
            error!("Error creating collector output client: {e}");
            return;
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for shutdown signal: {e}");
                return;
            }
            info!("Received shutdown signal");
            cancel.cancel();
        }
    });

    info!(
        "FORWARDER | Forwarding stdin to {} in batches of {batch_size}",
        config.host
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = Vec::with_capacity(batch_size);
    let mut dropped = 0;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(event) = input::parse_line(&line) {
                        pending.push(event);
                    }
                    if pending.len() >= batch_size {
                        let batch = mem::replace(&mut pending, Vec::with_capacity(batch_size));
                        dropped += forward(&client, batch, policy, &cancel).await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("FORWARDER | Fail to read stdin: {e}");
                    break;
                }
            }
        }
    }
    if cancel.is_cancelled() {
        dropped += pending.len();
    } else if !pending.is_empty() {
        dropped += forward(&client, pending, policy, &cancel).await;
    }

    client.shutdown().await;
    info!(
        "FORWARDER | Done, {} events in {} batches, {} acked, {dropped} dropped",
        stats.events(),
        stats.batches(),
        stats.acked_events()
    );
}
