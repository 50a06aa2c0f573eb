//! Seams to the embedding application.
//!
//! The engine never renders anything, commits anything, or opens windows
//! itself. It talks to the host through these three traits.

use std::sync::Arc;

use async_trait::async_trait;
use tether_protocol::UiEvent;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Receiver of outbound UI events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: UiEvent);
}

/// Sink backed by an unbounded channel; the host drains the receiver.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver the host reads events from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: UiEvent) {
        trace!(kind = event.kind(), "Emitting UI event");
        if self.sender.send(event).is_err() {
            debug!("UI event dropped: receiver closed");
        }
    }
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: UiEvent) {
        (**self).emit(event);
    }
}

/// Workspace snapshot collaborator invoked before each turn.
#[async_trait]
pub trait BackupHook: Send + Sync {
    /// Records a restore point tagged with the user's message.
    async fn create_backup(&self, message: &str) -> anyhow::Result<()>;

    /// Rolls the workspace back to a restore point.
    async fn restore(&self, commit: &str) -> anyhow::Result<()>;
}

/// Backup hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackup;

#[async_trait]
impl BackupHook for NoBackup {
    async fn create_backup(&self, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn restore(&self, commit: &str) -> anyhow::Result<()> {
        anyhow::bail!("no backup provider configured; cannot restore {commit}")
    }
}

/// Opens an interactive terminal (used for the CLI's login flow).
pub trait TerminalOpener: Send + Sync {
    fn open(&self, name: &str, program: &str, args: &[String]) -> anyhow::Result<()>;
}

/// Terminal opener for hosts without terminals.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTerminal;

impl TerminalOpener for NoTerminal {
    fn open(&self, name: &str, program: &str, _args: &[String]) -> anyhow::Result<()> {
        debug!(name, program, "Terminal requested but host has none");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(UiEvent::processing(true));
        sink.emit(UiEvent::processing(false));

        assert_eq!(rx.recv().await, Some(UiEvent::processing(true)));
        assert_eq!(rx.recv().await, Some(UiEvent::processing(false)));
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(UiEvent::error("nobody listening"));
    }

    #[tokio::test]
    async fn test_no_backup_restore_fails() {
        assert!(NoBackup.create_backup("msg").await.is_ok());
        assert!(NoBackup.restore("abc123").await.is_err());
    }
}
