// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;

/// Errors raised while validating or loading a [`crate::config::UdpInputConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

/// Errors that kill the current socket instance and trigger a listener restart.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Failed to create UDP socket for {addr}: {source}")]
    Socket {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind UDP socket to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set socket option {option} on {addr}: {source}")]
    SocketOption {
        addr: SocketAddr,
        option: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to receive on {addr}: {source}")]
    Receive {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Misuse of the register/run/stop/close contract.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Listener must be registered before it can run")]
    NotRegistered,

    #[error("Listener already running")]
    AlreadyRunning,
}
