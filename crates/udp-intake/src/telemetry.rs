// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counters and gauges describing the intake pipeline.
//!
//! Values use relaxed atomics; they are observability signals, never used for
//! control flow. Hosts can expose a [`IntakeSnapshot`] through whatever
//! metrics backend they run.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct IntakeCounters {
    packets_received: AtomicU64,
    events_emitted: AtomicU64,
    listener_errors: AtomicU64,
    worker_errors: AtomicU64,
    sink_errors: AtomicU64,
    queue_size: AtomicU64,
    workers: AtomicU64,
}

impl IntakeCounters {
    pub(crate) fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn event_emitted(&self) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn listener_error(&self) {
        self.listener_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn worker_error(&self) {
        self.worker_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn sink_error(&self) {
        self.sink_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_pool_shape(&self, queue_size: usize, workers: usize) {
        self.queue_size.store(queue_size as u64, Ordering::Relaxed);
        self.workers.store(workers as u64, Ordering::Relaxed);
    }

    /// Captures a point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> IntakeSnapshot {
        IntakeSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            listener_errors: self.listener_errors.load(Ordering::Relaxed),
            worker_errors: self.worker_errors.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            queue_size: self.queue_size.load(Ordering::Relaxed),
            workers: self.workers.load(Ordering::Relaxed),
        }
    }
}

/// Plain data representation of [`IntakeCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeSnapshot {
    /// Datagrams read from the socket and enqueued.
    pub packets_received: u64,
    /// Events handed to the sink.
    pub events_emitted: u64,
    /// Listener failures that triggered a restart.
    pub listener_errors: u64,
    /// Packets whose decode or flush failed.
    pub worker_errors: u64,
    /// Events the sink refused.
    pub sink_errors: u64,
    /// Configured hand-off queue capacity.
    pub queue_size: u64,
    /// Configured decode worker count.
    pub workers: u64,
}

impl fmt::Display for IntakeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packets_received={}, events_emitted={}, listener_errors={}, worker_errors={}, sink_errors={}, queue_size={}, workers={}",
            self.packets_received,
            self.events_emitted,
            self.listener_errors,
            self.worker_errors,
            self.sink_errors,
            self.queue_size,
            self.workers
        )
    }
}
