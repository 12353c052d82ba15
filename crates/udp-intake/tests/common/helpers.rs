// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use udp_intake::{
    ChannelSink, CodecFactory, Event, Lifecycle, LifecycleError, UdpInput, UdpInputConfig,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// A running input wired to a channel sink.
pub struct RunningInput {
    pub input: Arc<UdpInput>,
    pub events: UnboundedReceiver<Event>,
    pub addr: SocketAddr,
    runner: JoinHandle<Result<(), LifecycleError>>,
}

impl RunningInput {
    /// Stops the input and waits for `run` to return.
    pub async fn shutdown(self) -> (Arc<UdpInput>, Result<(), LifecycleError>) {
        self.input.stop();
        let result = timeout(WAIT, self.runner)
            .await
            .expect("run did not return after stop")
            .expect("run task panicked");
        (self.input, result)
    }
}

/// Config listening on an ephemeral loopback port.
pub fn loopback_config() -> UdpInputConfig {
    UdpInputConfig {
        host: "127.0.0.1".to_string(),
        retry_delay: Duration::from_millis(50),
        ..UdpInputConfig::new(0)
    }
}

pub async fn start(config: UdpInputConfig) -> RunningInput {
    let (sink, events) = ChannelSink::channel();
    let input = UdpInput::new(config, Arc::new(sink)).expect("valid config");
    launch(input, events).await
}

pub async fn start_with_codec(
    config: UdpInputConfig,
    codec: Arc<dyn CodecFactory>,
) -> RunningInput {
    let (sink, events) = ChannelSink::channel();
    let input = UdpInput::with_codec(config, codec, Arc::new(sink)).expect("valid config");
    launch(input, events).await
}

async fn launch(input: UdpInput, events: UnboundedReceiver<Event>) -> RunningInput {
    let input = Arc::new(input);
    input.register().expect("register");
    let runner = {
        let input = Arc::clone(&input);
        tokio::spawn(async move { input.run().await })
    };
    let addr = timeout(WAIT, input.wait_bound())
        .await
        .expect("listener never bound")
        .expect("input stopped before binding");
    RunningInput {
        input,
        events,
        addr,
        runner,
    }
}

/// Sends each payload as its own datagram from a fresh client socket.
pub async fn send(addr: SocketAddr, payloads: &[&str]) -> SocketAddr {
    let local = if addr.is_ipv4() { "127.0.0.1:0" } else { "[::1]:0" };
    let client = UdpSocket::bind(local).await.expect("bind client");
    for payload in payloads {
        client
            .send_to(payload.as_bytes(), addr)
            .await
            .expect("send datagram");
    }
    client.local_addr().expect("client address")
}

/// Receives exactly `count` events or panics after [`WAIT`].
pub async fn collect(events: &mut UnboundedReceiver<Event>, count: usize) -> Vec<Event> {
    let mut collected = Vec::with_capacity(count);
    while collected.len() < count {
        let event = timeout(WAIT, events.recv())
            .await
            .unwrap_or_else(|_| panic!("only {} of {} events arrived", collected.len(), count))
            .expect("sink channel closed");
        collected.push(event);
    }
    collected
}

pub fn messages(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .map(|e| e.message().unwrap_or_default().to_string())
        .collect()
}

/// Polls `check` until it holds or [`WAIT`] elapses.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
