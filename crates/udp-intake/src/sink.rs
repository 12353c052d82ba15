// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destinations for decoded events.

use std::io::Write;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::event::Event;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("event receiver dropped")]
    Disconnected,

    #[error("failed to write event: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Accepts fully decorated events. Expected to return quickly.
pub trait EventSink: Send + Sync {
    fn accept(&self, event: Event) -> Result<(), SinkError>;
}

/// Forwards events over an unbounded channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn accept(&self, event: Event) -> Result<(), SinkError> {
        self.tx.send(event).map_err(|_| SinkError::Disconnected)
    }
}

/// Writes each event as one JSON line.
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl WriterSink<std::io::Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> EventSink for WriterSink<W> {
    fn accept(&self, event: Event) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.accept(Event::with_message("hello")).unwrap();
        assert_eq!(rx.recv().await.unwrap().message(), Some("hello"));
    }

    #[test]
    fn test_channel_sink_reports_disconnect() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        assert!(matches!(
            sink.accept(Event::new()),
            Err(SinkError::Disconnected)
        ));
    }

    #[test]
    fn test_writer_sink_writes_json_lines() {
        let sink = WriterSink::new(Vec::new());
        sink.accept(Event::with_message("a")).unwrap();
        sink.accept(Event::with_message("b")).unwrap();

        let written = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(written, "{\"message\":\"a\"}\n{\"message\":\"b\"}\n");
    }
}
