// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle controller tying the receiver, queue and worker pool together.
//!
//! ```text
//!   register ──► Idle ──run──► Running ──stop/close──► Stopping ──► Stopped
//!                 ▲                                                   │
//!                 └──────────────────── register ─────────────────────┘
//! ```
//!
//! `run` executes the receiver inline and only returns after the stop signal
//! was observed, the socket torn down, and the workers drained the queue.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::CodecFactory;
use crate::config::UdpInputConfig;
use crate::enrich::Enricher;
use crate::error::LifecycleError;
use crate::queue::handoff_queue;
use crate::receiver::{Receiver, ReceiverSettings};
use crate::sink::EventSink;
use crate::telemetry::{IntakeCounters, IntakeSnapshot};
use crate::worker::{WorkerContext, WorkerPool};

/// Status of the UDP input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    /// Registered, not yet running.
    Idle,
    /// Receiver loop and workers are active.
    Running,
    /// Stop requested, tearing down.
    Stopping,
    /// Socket closed and workers drained.
    Stopped,
}

/// Host-facing contract for an input plugin.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Resets owned resources to the unbound `Idle` state.
    fn register(&self) -> Result<(), LifecycleError>;

    /// Runs until stopped. Listener failures are retried, not returned.
    async fn run(&self) -> Result<(), LifecycleError>;

    /// Signals the run loop to stop. Idempotent.
    fn stop(&self);

    /// Same as [`Lifecycle::stop`]; safe to call at any point, any number of times.
    fn close(&self);
}

/// UDP datagram input.
pub struct UdpInput {
    config: Arc<UdpInputConfig>,
    codec: Arc<dyn CodecFactory>,
    sink: Arc<dyn EventSink>,
    enricher: Arc<Enricher>,
    counters: Arc<IntakeCounters>,
    cancel_token: Mutex<CancellationToken>,
    status: watch::Sender<ListenerStatus>,
    bound_addr: watch::Sender<Option<SocketAddr>>,
}

impl UdpInput {
    /// Builds an input decoding with the codec named in `config`.
    pub fn new(config: UdpInputConfig, sink: Arc<dyn EventSink>) -> Result<Self, LifecycleError> {
        let codec = config.codec.factory();
        Self::with_codec(config, codec, sink)
    }

    /// Builds an input decoding with a custom codec factory.
    pub fn with_codec(
        config: UdpInputConfig,
        codec: Arc<dyn CodecFactory>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, LifecycleError> {
        config.validate()?;
        let enricher = Enricher::from_config(&config)?;
        debug!(
            source_ip_field = %enricher.source_field(),
            ecs_compatibility = %config.ecs_compatibility,
            "Resolved sender address field"
        );

        Ok(Self {
            config: Arc::new(config),
            codec,
            sink,
            enricher: Arc::new(enricher),
            counters: Arc::new(IntakeCounters::default()),
            cancel_token: Mutex::new(CancellationToken::new()),
            status: watch::Sender::new(ListenerStatus::Idle),
            bound_addr: watch::Sender::new(None),
        })
    }

    pub fn config(&self) -> &UdpInputConfig {
        &self.config
    }

    pub fn status(&self) -> ListenerStatus {
        *self.status.borrow()
    }

    pub fn status_receiver(&self) -> watch::Receiver<ListenerStatus> {
        self.status.subscribe()
    }

    /// Address the socket is currently bound to, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.borrow()
    }

    /// Waits until the socket is bound and returns its address.
    ///
    /// Returns `None` if the input stops before binding.
    pub async fn wait_bound(&self) -> Option<SocketAddr> {
        let mut bound = self.bound_addr.subscribe();
        let mut status = self.status.subscribe();
        loop {
            if let Some(addr) = *bound.borrow_and_update() {
                return Some(addr);
            }
            if *status.borrow_and_update() == ListenerStatus::Stopped {
                return None;
            }
            tokio::select! {
                changed = bound.changed() => changed.ok()?,
                changed = status.changed() => changed.ok()?,
            }
        }
    }

    pub fn counters(&self) -> IntakeSnapshot {
        self.counters.snapshot()
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel_token
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn receiver_settings(&self) -> Result<ReceiverSettings, LifecycleError> {
        Ok(ReceiverSettings {
            addr: self.config.bind_addr()?,
            buffer_size: self.config.buffer_size,
            receive_buffer_bytes: self.config.receive_buffer_bytes,
            batch: self.config.queue_size,
            retry_delay: self.config.retry_delay,
        })
    }

    fn request_stop(&self) {
        self.current_token().cancel();
        self.status.send_if_modified(|status| match status {
            ListenerStatus::Running => {
                *status = ListenerStatus::Stopping;
                true
            }
            ListenerStatus::Idle => {
                *status = ListenerStatus::Stopped;
                true
            }
            ListenerStatus::Stopping | ListenerStatus::Stopped => false,
        });
    }
}

#[async_trait]
impl Lifecycle for UdpInput {
    fn register(&self) -> Result<(), LifecycleError> {
        match self.status() {
            ListenerStatus::Running | ListenerStatus::Stopping => {
                return Err(LifecycleError::AlreadyRunning)
            }
            ListenerStatus::Idle | ListenerStatus::Stopped => {}
        }
        *self
            .cancel_token
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = CancellationToken::new();
        self.bound_addr.send_replace(None);
        self.status.send_replace(ListenerStatus::Idle);
        Ok(())
    }

    async fn run(&self) -> Result<(), LifecycleError> {
        let settings = self.receiver_settings()?;

        let mut transition = Ok(());
        self.status.send_if_modified(|status| match status {
            ListenerStatus::Idle => {
                *status = ListenerStatus::Running;
                true
            }
            ListenerStatus::Stopped => {
                transition = Err(LifecycleError::NotRegistered);
                false
            }
            ListenerStatus::Running | ListenerStatus::Stopping => {
                transition = Err(LifecycleError::AlreadyRunning);
                false
            }
        });
        transition?;

        let cancel = self.current_token();
        let (queue_tx, queue_rx) = handoff_queue(self.config.queue_size);
        let pool = WorkerPool::spawn(
            self.config.workers,
            &*self.codec,
            &queue_rx,
            &WorkerContext {
                enricher: Arc::clone(&self.enricher),
                sink: Arc::clone(&self.sink),
                counters: Arc::clone(&self.counters),
            },
        );
        drop(queue_rx);
        self.counters.set_pool_shape(self.config.queue_size, pool.len());

        let receiver = Receiver::new(
            settings,
            Arc::clone(&self.counters),
            self.bound_addr.clone(),
        );
        receiver.run(&queue_tx, &cancel).await;

        self.status.send_if_modified(|status| {
            let running = *status == ListenerStatus::Running;
            if running {
                *status = ListenerStatus::Stopping;
            }
            running
        });
        debug!(pending = queue_tx.len(), "UDP listener closed, draining workers");
        drop(queue_tx);
        pool.drain().await;

        self.status.send_replace(ListenerStatus::Stopped);
        info!(counters = %self.counters.snapshot(), "UDP input stopped");
        Ok(())
    }

    fn stop(&self) {
        self.request_stop();
    }

    fn close(&self) {
        self.request_stop();
    }
}
