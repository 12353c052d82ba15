// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! UDP datagram intake.
//!
//! A single receiver task reads datagrams from a UDP socket into a bounded
//! hand-off queue. A fixed pool of decode workers pops packets, runs them
//! through a per-worker codec, stamps each event with the sender address and
//! hands it to an [`EventSink`]. [`UdpInput`] drives the whole pipeline
//! through the [`Lifecycle`] contract.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod codec;
pub mod config;
pub mod enrich;
pub mod error;
pub mod event;
pub mod input;
pub mod queue;
mod receiver;
pub mod sink;
pub mod telemetry;
mod worker;

pub use codec::{Codec, CodecConfig, CodecError, CodecFactory, JsonCodec, LineCodec, PlainCodec};
pub use config::{EcsCompatibility, UdpInputConfig};
pub use enrich::{source_ip_field, Enricher};
pub use error::{ConfigError, LifecycleError, ListenerError};
pub use event::{Event, FieldError, FieldRef};
pub use input::{Lifecycle, ListenerStatus, UdpInput};
pub use queue::{handoff_queue, Packet, PacketReceiver, PacketSender, PushError};
pub use sink::{ChannelSink, EventSink, SinkError, WriterSink};
pub use telemetry::{IntakeCounters, IntakeSnapshot};
