//! Client interface for the session actor.

use tether_core::SessionView;
use tokio::sync::{mpsc, oneshot};

use super::commands::{Dispatch, SessionCommand, SessionError, TurnRequest};
use crate::config::EngineConfig;

/// Cheap-to-clone handle to a session actor.
///
/// Every method fails with `SessionError::ChannelClosed` once the actor
/// has shut down.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(sender: mpsc::Sender<SessionCommand>) -> Self {
        Self { sender }
    }

    /// Sends a message to Claude.
    ///
    /// Returns once the turn is dispatched, not when it finishes; use
    /// [`wait_idle`](Self::wait_idle) for that.
    pub async fn send_turn(&self, request: TurnRequest) -> Result<Dispatch, SessionError> {
        self.request(|respond_to| SessionCommand::SendTurn {
            request,
            respond_to,
        })
        .await
    }

    /// Stops the running turn. Safe to call when nothing is running.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionCommand::Stop { respond_to })
            .await
    }

    /// Drops the session id and resets all totals.
    pub async fn new_session(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionCommand::NewSession { respond_to })
            .await
    }

    /// Applies a new configuration; model or permission changes start a
    /// new session.
    pub async fn reconfigure(&self, config: EngineConfig) -> Result<(), SessionError> {
        self.request(|respond_to| SessionCommand::Reconfigure {
            config: Box::new(config),
            respond_to,
        })
        .await
    }

    /// Stores the unsent input so it survives a UI reload.
    pub async fn save_draft(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::SaveDraft { text: text.into() })
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }

    pub async fn snapshot(&self) -> Result<SessionView, SessionError> {
        self.request(|respond_to| SessionCommand::Snapshot { respond_to })
            .await
    }

    /// Restores a backup commit; the outcome is reported as an event.
    pub async fn restore_backup(&self, commit: impl Into<String>) -> Result<(), SessionError> {
        let commit = commit.into();
        self.request(|respond_to| SessionCommand::RestoreBackup { commit, respond_to })
            .await
    }

    /// Resolves once no turn process is running.
    pub async fn wait_idle(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionCommand::WaitIdle { respond_to })
            .await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(command(tx))
            .await
            .map_err(|_| SessionError::ChannelClosed)?;

        rx.await.map_err(|_| SessionError::ChannelClosed)
    }
}
