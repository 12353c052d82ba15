// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-size pool of decode workers.
//!
//! Each worker owns a private codec, pops packets from the shared hand-off
//! queue, and forwards enriched events to the sink. A failing packet is logged
//! and skipped; it never ends the worker. Workers exit once the queue is closed
//! and empty.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, Instrument};

use crate::codec::{Codec, CodecError, CodecFactory};
use crate::enrich::Enricher;
use crate::event::Event;
use crate::queue::{Packet, PacketReceiver};
use crate::sink::EventSink;
use crate::telemetry::IntakeCounters;

/// Shared collaborators handed to every worker.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub enricher: Arc<Enricher>,
    pub sink: Arc<dyn EventSink>,
    pub counters: Arc<IntakeCounters>,
}

pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers, each with a codec built from `codec`.
    pub(crate) fn spawn(
        count: usize,
        codec: &dyn CodecFactory,
        queue: &PacketReceiver,
        context: &WorkerContext,
    ) -> Self {
        let handles = (0..count)
            .map(|id| {
                debug!(worker = id, "Starting UDP worker");
                let worker = DecodeWorker {
                    id,
                    codec: codec.build(),
                    queue: queue.clone(),
                    context: context.clone(),
                };
                tokio::spawn(worker.run().instrument(info_span!("udp_worker", worker = id)))
            })
            .collect();
        Self { handles }
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Waits for every worker to drain the closed queue and exit.
    pub(crate) async fn drain(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("UDP worker task failed: {}", e);
            }
        }
    }
}

struct DecodeWorker {
    id: usize,
    codec: Box<dyn Codec>,
    queue: PacketReceiver,
    context: WorkerContext,
}

impl DecodeWorker {
    async fn run(mut self) {
        while let Some(packet) = self.queue.pop().await {
            self.process(&packet);
        }
        debug!(worker = self.id, "UDP worker stopped");
    }

    /// Decodes one packet, then flushes whatever the codec buffered.
    ///
    /// A decode failure drops the packet. The codec is still flushed, and the
    /// flushed events discarded, so no partial state leaks into the next one.
    fn process(&mut self, packet: &Packet) {
        let codec = &mut self.codec;
        match guarded(|| codec.decode(packet.payload())) {
            Ok(events) => self.emit(events, packet),
            Err(e) => {
                self.context.counters.worker_error();
                error!(
                    source = %packet.source(),
                    bytes = packet.payload().len(),
                    "Failed to decode UDP packet: {}",
                    e
                );
                let codec = &mut self.codec;
                if let Err(e) = guarded(|| codec.flush()) {
                    debug!("Discarding codec state after decode failure: {}", e);
                }
                return;
            }
        }

        let codec = &mut self.codec;
        match guarded(|| codec.flush()) {
            Ok(events) => self.emit(events, packet),
            Err(e) => {
                self.context.counters.worker_error();
                error!(source = %packet.source(), "Failed to flush codec: {}", e);
            }
        }
    }

    fn emit(&self, events: Vec<Event>, packet: &Packet) {
        for mut event in events {
            self.context.enricher.enrich(&mut event, packet.source());
            match self.context.sink.accept(event) {
                Ok(()) => self.context.counters.event_emitted(),
                Err(e) => {
                    self.context.counters.sink_error();
                    error!("Failed to send event to sink: {}", e);
                }
            }
        }
    }
}

/// Turns a codec panic into a per-packet error.
fn guarded<T>(f: impl FnOnce() -> Result<T, CodecError>) -> Result<T, CodecError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(CodecError::Other(format!("codec panicked: {}", reason)))
    })
}
