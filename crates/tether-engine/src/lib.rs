//! tether engine - Drives the Claude Code CLI for an editor
//!
//! This crate provides the long-lived provider behind a chat panel:
//! - `session` - Session controller actor: one CLI process per turn
//! - `interpreter` - Maps stream records to UI events and session totals
//! - `permissions` - Permission broker and always-allow store
//! - `config` - Engine configuration
//! - `hooks` - Seams to the host (event sink, backups, terminals)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         host (UI)                           │
//! └───────┬──────────────────────▲──────────────────────┬───────┘
//!         │ SessionHandle        │ UiEvent              │ BrokerHandle
//!         ▼                      │ (EventSink)          ▼
//! ┌─────────────────┐            │            ┌─────────────────┐
//! │  SessionActor   │────────────┴────────────│   BrokerActor   │
//! │ SessionState    │                         │ pending id map  │
//! │ EventInterpreter│                         │ PermissionStore │
//! └────────┬────────┘                         └────────▲────────┘
//!          │ spawn per turn                            │ <id>.request
//!          ▼                                           │
//! ┌─────────────────┐   launches (MCP)    ┌────────────┴────────┐
//! │   claude -p     │────────────────────▶│   approval hook     │
//! │  stream-json    │                     │ (external server)   │
//! └─────────────────┘                     └─────────────────────┘
//! ```
//!
//! Nothing in here panics on bad input: malformed output lines are
//! dropped, I/O failures degrade to defaults or become `Error` events.

pub mod config;
pub mod hooks;
pub mod interpreter;
pub mod permissions;
pub mod session;

pub use config::{ConfigError, EngineConfig, ThinkingIntensity};
pub use hooks::{BackupHook, ChannelSink, EventSink, NoBackup, NoTerminal, TerminalOpener};
pub use interpreter::{EventInterpreter, Outcome};
pub use permissions::{spawn_broker, BrokerError, BrokerHandle, PermissionStore, StoreError};
pub use session::{spawn_session, Collaborators, Dispatch, SessionError, SessionHandle, TurnRequest};
