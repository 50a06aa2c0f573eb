//! Broker actor commands and errors.

use std::path::PathBuf;

use tether_core::PermissionDecision;
use thiserror::Error;
use tokio::sync::oneshot;

/// Commands sent to the broker actor.
#[derive(Debug)]
pub enum BrokerCommand {
    /// Answer a pending request.
    ///
    /// Responds with false when `id` is not pending.
    Decide {
        id: String,
        decision: PermissionDecision,
        respond_to: oneshot::Sender<bool>,
    },

    /// Ids of the requests waiting for a decision, oldest first.
    PendingIds {
        respond_to: oneshot::Sender<Vec<String>>,
    },
}

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The request directory or integration file could not be set up.
    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to watch request directory: {0}")]
    Watch(#[from] notify::Error),

    #[error("failed to encode integration config: {0}")]
    Encode(#[from] serde_json::Error),

    /// The actor has shut down.
    #[error("broker channel closed")]
    ChannelClosed,
}
