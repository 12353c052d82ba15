// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Socket receiver: binds the UDP socket, drains datagrams into the hand-off
//! queue, and rebuilds the socket from scratch whenever it fails.

use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ListenerError;
use crate::queue::{Packet, PacketSender, PushError};
use crate::telemetry::IntakeCounters;

/// Settings the receiver needs, resolved once from the input configuration.
#[derive(Debug, Clone)]
pub(crate) struct ReceiverSettings {
    pub addr: SocketAddr,
    pub buffer_size: usize,
    pub receive_buffer_bytes: Option<usize>,
    /// Upper bound of datagrams drained per readiness notification.
    pub batch: usize,
    pub retry_delay: Duration,
}

pub(crate) struct Receiver {
    settings: ReceiverSettings,
    counters: Arc<IntakeCounters>,
    bound_addr: watch::Sender<Option<SocketAddr>>,
}

impl Receiver {
    pub(crate) fn new(
        settings: ReceiverSettings,
        counters: Arc<IntakeCounters>,
        bound_addr: watch::Sender<Option<SocketAddr>>,
    ) -> Self {
        Self {
            settings,
            counters,
            bound_addr,
        }
    }

    /// Listens until `cancel` fires, restarting after every failure.
    ///
    /// Never returns an error: failures are logged, counted and retried after
    /// `retry_delay`, and the delay itself ends early on cancellation.
    pub(crate) async fn run(&self, queue: &PacketSender, cancel: &CancellationToken) {
        while !cancel.is_cancelled() {
            if let Err(e) = self.listen(queue, cancel).await {
                self.counters.listener_error();
                warn!(
                    address = %self.settings.addr,
                    error = %e,
                    "UDP listener died, restarting in {:?}",
                    self.settings.retry_delay
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = sleep(self.settings.retry_delay) => {}
                }
            }
        }
    }

    /// One socket lifetime: bind, read until cancelled or failed, tear down.
    async fn listen(
        &self,
        queue: &PacketSender,
        cancel: &CancellationToken,
    ) -> Result<(), ListenerError> {
        info!(address = %self.settings.addr, "Starting UDP listener");
        let socket = bind(&self.settings)?;
        let local_addr = socket.local_addr().unwrap_or(self.settings.addr);
        info!(
            address = %local_addr,
            queue_size = queue.capacity(),
            "UDP listener started"
        );
        self.bound_addr.send_replace(Some(local_addr));

        let result = self.read_loop(&socket, queue, cancel).await;

        self.bound_addr.send_replace(None);
        close(&socket);
        result
    }

    async fn read_loop(
        &self,
        socket: &UdpSocket,
        queue: &PacketSender,
        cancel: &CancellationToken,
    ) -> Result<(), ListenerError> {
        let receive_error = |source| ListenerError::Receive {
            addr: self.settings.addr,
            source,
        };
        let mut buf = vec![0u8; self.settings.buffer_size];

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                ready = socket.readable() => ready.map_err(receive_error)?,
            }

            for _ in 0..self.settings.batch {
                let (len, source) = match socket.try_recv_from(&mut buf) {
                    Ok((0, _)) => break,
                    Ok(received) => received,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(receive_error(e)),
                };

                match queue.push(Packet::new(buf[..len].to_vec(), source), cancel).await {
                    Ok(()) => self.counters.packet_received(),
                    Err(PushError::Cancelled) => return Ok(()),
                    Err(PushError::Closed) => {
                        return Err(receive_error(std::io::Error::other(
                            "decode queue closed",
                        )))
                    }
                }
            }
        }
    }
}

/// Creates the socket, applies `SO_RCVBUF`, and binds it.
fn bind(settings: &ReceiverSettings) -> Result<UdpSocket, ListenerError> {
    let addr = settings.addr;
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|source| ListenerError::Socket { addr, source })?;

    let option_error = |source| ListenerError::SocketOption {
        addr,
        option: "SO_RCVBUF",
        source,
    };
    if let Some(requested) = settings.receive_buffer_bytes {
        socket.set_recv_buffer_size(requested).map_err(option_error)?;
    }
    let achieved = socket.recv_buffer_size().map_err(option_error)?;
    match settings.receive_buffer_bytes {
        Some(requested) if requested != achieved => warn!(
            requested,
            achieved,
            "Unable to set receive_buffer_bytes to desired size. Requested {} but obtained {} bytes.",
            requested,
            achieved
        ),
        _ => debug!(receive_buffer_bytes = achieved, "UDP socket receive buffer"),
    }

    socket
        .set_nonblocking(true)
        .map_err(|source| ListenerError::Socket { addr, source })?;
    socket
        .bind(&addr.into())
        .map_err(|source| ListenerError::Bind { addr, source })?;

    UdpSocket::from_std(socket.into()).map_err(|source| ListenerError::Socket { addr, source })
}

/// Shuts down both directions; errors here are expected and never surfaced.
fn close(socket: &UdpSocket) {
    if let Err(e) = SockRef::from(socket).shutdown(Shutdown::Both) {
        debug!("ignoring close exception: {}", e);
    }
}
