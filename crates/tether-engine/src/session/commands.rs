//! Session actor commands and errors.
//!
//! - `SessionCommand`: requests from the host, answered over oneshot channels
//! - `ProcessEvent`: what a running CLI process reports back to the actor
//! - `SessionError`: failures surfaced to handle callers

use serde_json::Value;
use tether_core::SessionView;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::EngineConfig;

// ============================================================================
// Session Commands
// ============================================================================

/// One user message and the directives to send with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnRequest {
    /// Text as the user typed it
    pub text: String,
    /// Ask for a plan and wait for approval before changing anything
    pub plan: bool,
    /// Prefix the configured thinking directive
    pub think: bool,
}

impl TurnRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_plan(mut self, plan: bool) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_thinking(mut self, think: bool) -> Self {
        self.think = think;
        self
    }
}

/// What happened to a `send_turn` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A process was spawned for the turn
    Started,
    /// A turn was already running; the text was surfaced but not sent
    Queued,
    /// The CLI could not be started; an error event was emitted
    Failed,
}

/// Commands sent to the session actor.
#[derive(Debug)]
pub enum SessionCommand {
    /// Start a turn.
    SendTurn {
        request: TurnRequest,
        respond_to: oneshot::Sender<Dispatch>,
    },

    /// Stop the running turn, if any.
    Stop { respond_to: oneshot::Sender<()> },

    /// Forget the conversation and its totals.
    NewSession { respond_to: oneshot::Sender<()> },

    /// Replace the configuration.
    ///
    /// Boxed to keep the enum small.
    Reconfigure {
        config: Box<EngineConfig>,
        respond_to: oneshot::Sender<()>,
    },

    /// Store the unsent input text. Fire-and-forget.
    SaveDraft { text: String },

    /// Read the current totals and flags.
    Snapshot {
        respond_to: oneshot::Sender<SessionView>,
    },

    /// Roll the workspace back through the backup hook.
    RestoreBackup {
        commit: String,
        respond_to: oneshot::Sender<()>,
    },

    /// Resolves once no process is running.
    WaitIdle { respond_to: oneshot::Sender<()> },
}

/// Reports from a turn's process tasks.
///
/// Every record of a turn is sent before its `Exited`.
#[derive(Debug)]
pub enum ProcessEvent {
    /// One decoded stdout line
    Record { turn: u64, value: Value },

    /// The process is gone and its pipes are drained
    Exited {
        turn: u64,
        /// `None` when killed by a signal
        code: Option<i32>,
        stderr: String,
    },
}

// ============================================================================
// Session Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum SessionError {
    /// The CLI executable could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The child came up without one of its pipes.
    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),

    /// The actor has shut down.
    #[error("session channel closed")]
    ChannelClosed,
}
