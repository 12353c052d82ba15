// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process::ExitCode, sync::Arc};

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use udp_intake::{Lifecycle, UdpInput, UdpInputConfig, WriterSink};

const DEFAULT_LOG_LEVEL: &str = "info";

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("UDP_INTAKE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or(DEFAULT_LOG_LEVEL.to_string());

    let env_filter = match EnvFilter::try_new(&log_level) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Invalid UDP_INTAKE_LOG_LEVEL '{log_level}': {e}");
            return ExitCode::FAILURE;
        }
    };

    // Events go to stdout; logs stay on stderr.
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    let config = match UdpInputConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating config on UDP intake startup: {e}");
            return ExitCode::FAILURE;
        }
    };

    let input = match UdpInput::new(config, Arc::new(WriterSink::stdout())) {
        Ok(input) => Arc::new(input),
        Err(e) => {
            error!("Error creating UDP input: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = input.register() {
        error!("Error registering UDP input: {e}");
        return ExitCode::FAILURE;
    }

    let shutdown = {
        let input = Arc::clone(&input);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for shutdown signal: {e}");
                return;
            }
            info!("Received shutdown signal, stopping UDP input");
            input.stop();
        })
    };

    let result = input.run().await;
    shutdown.abort();

    match result {
        Ok(()) => {
            info!(counters = %input.counters(), "UDP intake shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("UDP intake stopped with error: {e}");
            ExitCode::FAILURE
        }
    }
}
