//! Session controller using the actor pattern.
//!
//! One actor per conversation. It spawns one CLI process per turn, feeds
//! the process's stdout through the stream decoder and the interpreter,
//! and keeps the running totals.
//!
//! ```text
//! SessionHandle ──SessionCommand──▶ SessionActor ──spawn──▶ claude -p
//!                                      ▲   │                  │
//!                                      │   └── UiEvent ──▶ EventSink
//!                                      └──── ProcessEvent ────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::hooks::{BackupHook, EventSink, NoBackup, NoTerminal, TerminalOpener};

mod actor;
mod commands;
mod handle;
pub mod process;

pub use actor::SessionActor;
pub use commands::{Dispatch, ProcessEvent, SessionCommand, SessionError, TurnRequest};
pub use handle::SessionHandle;

const COMMAND_BUFFER: usize = 32;

/// The host-side collaborators a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub sink: Arc<dyn EventSink>,
    pub backup: Arc<dyn BackupHook>,
    pub terminal: Arc<dyn TerminalOpener>,
}

impl Collaborators {
    /// Collaborators with no backups and no terminal.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            backup: Arc::new(NoBackup),
            terminal: Arc::new(NoTerminal),
        }
    }

    pub fn with_backup(mut self, backup: Arc<dyn BackupHook>) -> Self {
        self.backup = backup;
        self
    }

    pub fn with_terminal(mut self, terminal: Arc<dyn TerminalOpener>) -> Self {
        self.terminal = terminal;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Spawns a session actor and returns its handle.
///
/// `permission_config` is the MCP config file of a running permission
/// broker; without one (and without `skip_permissions`) the CLI is
/// started with no approval hookup.
pub fn spawn_session(
    config: EngineConfig,
    permission_config: Option<PathBuf>,
    collaborators: Collaborators,
) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = SessionActor::new(cmd_rx, config, permission_config, collaborators);
    tokio::spawn(actor.run());

    SessionHandle::new(cmd_tx)
}
