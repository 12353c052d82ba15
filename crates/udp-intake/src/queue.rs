// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded hand-off queue between the socket receiver and the decode workers.
//!
//! This is the only backpressure point of the pipeline: when the workers fall
//! behind, [`PacketSender::push`] suspends the receiver, the kernel socket
//! buffer fills up, and further datagrams are dropped by the OS instead of
//! growing memory.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// One datagram as read from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Vec<u8>,
    source: SocketAddr,
}

impl Packet {
    #[must_use]
    pub fn new(payload: Vec<u8>, source: SocketAddr) -> Self {
        Self { payload, source }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn source(&self) -> SocketAddr {
        self.source
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("push cancelled by shutdown")]
    Cancelled,

    #[error("all queue consumers are gone")]
    Closed,
}

/// Creates a queue holding at most `capacity` packets.
///
/// # Panics
///
/// Panics if `capacity` is zero or above
/// [`crate::config::MAX_QUEUE_SIZE`]; configuration validation rejects both.
#[must_use]
pub fn handoff_queue(capacity: usize) -> (PacketSender, PacketReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        PacketSender { tx },
        PacketReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producer half. The queue closes once every sender is dropped.
#[derive(Debug, Clone)]
pub struct PacketSender {
    tx: mpsc::Sender<Packet>,
}

impl PacketSender {
    /// Enqueues `packet`, waiting while the queue is full.
    ///
    /// The wait ends early with [`PushError::Cancelled`] once `cancel` fires.
    pub async fn push(&self, packet: Packet, cancel: &CancellationToken) -> Result<(), PushError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(PushError::Cancelled),
            sent = self.tx.send(packet) => sent.map_err(|_| PushError::Closed),
        }
    }

    /// Packets currently waiting (plus in-flight reservations).
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer half, shared by all decode workers.
#[derive(Debug, Clone)]
pub struct PacketReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Packet>>>,
}

impl PacketReceiver {
    /// Takes the next packet, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn pop(&self) -> Option<Packet> {
        self.rx.lock().await.recv().await
    }
}
