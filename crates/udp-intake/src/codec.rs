// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Payload codecs turning raw datagram bytes into events.
//!
//! Codecs may keep partial state between calls (the line codec buffers an
//! unterminated trailing record), so every decode worker builds its own
//! instance through a [`CodecFactory`] and never shares it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::event::Event;

pub const DEFAULT_LINE_DELIMITER: &str = "\n";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Decodes payloads into events.
pub trait Codec: Send {
    /// Decodes one payload. May return no events, or several.
    fn decode(&mut self, data: &[u8]) -> Result<Vec<Event>, CodecError>;

    /// Releases events buffered across `decode` calls.
    fn flush(&mut self) -> Result<Vec<Event>, CodecError> {
        Ok(Vec::new())
    }
}

/// Builds one independent [`Codec`] per decode worker.
pub trait CodecFactory: Send + Sync {
    fn build(&self) -> Box<dyn Codec>;
}

impl<F, C> CodecFactory for F
where
    F: Fn() -> C + Send + Sync,
    C: Codec + 'static,
{
    fn build(&self) -> Box<dyn Codec> {
        Box::new(self())
    }
}

/// Whole payload into a single event's `message`.
#[derive(Debug, Default, Clone)]
pub struct PlainCodec;

impl Codec for PlainCodec {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<Event>, CodecError> {
        Ok(vec![Event::with_message(String::from_utf8_lossy(data))])
    }
}

/// One event per delimited record. An unterminated tail is held until the
/// next payload completes it or until [`Codec::flush`].
#[derive(Debug, Clone)]
pub struct LineCodec {
    delimiter: Vec<u8>,
    pending: Vec<u8>,
}

impl LineCodec {
    #[must_use]
    pub fn new(delimiter: &str) -> Self {
        Self {
            delimiter: delimiter.as_bytes().to_vec(),
            pending: Vec::new(),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_DELIMITER)
    }
}

impl Codec for LineCodec {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<Event>, CodecError> {
        if self.delimiter.is_empty() {
            return Err(CodecError::Other("line delimiter is empty".to_string()));
        }
        self.pending.extend_from_slice(data);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = find(&self.pending[start..], &self.delimiter) {
            let end = start + offset;
            events.push(Event::with_message(String::from_utf8_lossy(
                &self.pending[start..end],
            )));
            start = end + self.delimiter.len();
        }
        self.pending.drain(..start);

        Ok(events)
    }

    fn flush(&mut self) -> Result<Vec<Event>, CodecError> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let rest = std::mem::take(&mut self.pending);
        Ok(vec![Event::with_message(String::from_utf8_lossy(&rest))])
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// One JSON document per payload. Objects become events as-is, arrays yield
/// one event per element, and scalars are wrapped in `message`.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    fn to_event(value: Value) -> Event {
        match value {
            Value::Object(map) => Event::from_map(map),
            Value::String(s) => Event::with_message(s),
            other => Event::with_message(other.to_string()),
        }
    }
}

impl Codec for JsonCodec {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<Event>, CodecError> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let events = match serde_json::from_slice::<Value>(data)? {
            Value::Array(values) => values.into_iter().map(Self::to_event).collect(),
            value => vec![Self::to_event(value)],
        };
        Ok(events)
    }
}

/// Built-in codec selection, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecConfig {
    #[default]
    Plain,
    Line {
        #[serde(default = "default_delimiter")]
        delimiter: String,
    },
    Json,
}

fn default_delimiter() -> String {
    DEFAULT_LINE_DELIMITER.to_string()
}

impl CodecConfig {
    pub fn line() -> Self {
        Self::Line {
            delimiter: default_delimiter(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Line { delimiter } if delimiter.is_empty() => Err(ConfigError::Invalid(
                "line codec delimiter cannot be empty".to_string(),
            )),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn factory(&self) -> Arc<dyn CodecFactory> {
        match self.clone() {
            Self::Plain => Arc::new(|| PlainCodec),
            Self::Line { delimiter } => Arc::new(move || LineCodec::new(&delimiter)),
            Self::Json => Arc::new(|| JsonCodec),
        }
    }
}

impl FromStr for CodecConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "line" => Ok(Self::line()),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::InvalidValue {
                name: "codec",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for CodecConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Line { .. } => write!(f, "line"),
            Self::Json => write!(f, "json"),
        }
    }
}
