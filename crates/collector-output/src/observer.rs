// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives per-batch delivery counts from the client.
pub trait Observer: Send + Sync {
    fn new_batch(&self, events: usize);
    fn acked(&self, events: usize);
    fn failed(&self, events: usize);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn new_batch(&self, _events: usize) {}
    fn acked(&self, _events: usize) {}
    fn failed(&self, _events: usize) {}
}

/// Running totals of published events.
#[derive(Debug, Default)]
pub struct PublishStats {
    batches: AtomicU64,
    events: AtomicU64,
    acked: AtomicU64,
    failed: AtomicU64,
}

impl PublishStats {
    #[must_use]
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn acked_events(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed_events(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl Observer for PublishStats {
    fn new_batch(&self, events: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.events.fetch_add(events as u64, Ordering::Relaxed);
    }

    fn acked(&self, events: usize) {
        self.acked.fetch_add(events as u64, Ordering::Relaxed);
    }

    fn failed(&self, events: usize) {
        self.failed.fetch_add(events as u64, Ordering::Relaxed);
    }
}
