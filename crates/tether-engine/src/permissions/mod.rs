//! Permission broker.
//!
//! The CLI's approval hook (an MCP server the CLI launches) writes
//! `<id>.request` files into a per-session directory and polls for
//! `<id>.response`. The broker watches that directory, asks the host for
//! a decision through a `PermissionRequest` event, and writes the answer.
//!
//! ```text
//! approval hook ──<id>.request──▶ RequestWatcher ──▶ BrokerActor ──UiEvent──▶ host
//!       ▲                                               │   ▲
//!       └────────────<id>.response──── responder ◀──────┘   └── BrokerHandle::decide
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tether_core::PermissionDecision;
use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use uuid::Uuid;

use crate::config::{ApprovalServer, EngineConfig};
use crate::hooks::EventSink;

mod actor;
mod commands;
pub mod store;
pub mod watcher;

pub use actor::{BrokerActor, RESPONSE_EXTENSION};
pub use commands::{BrokerCommand, BrokerError};
pub use store::{PermissionStore, StoreError};
pub use watcher::{ManualWatcher, NotifyWatcher, RequestWatcher, REQUEST_EXTENSION};

/// Name the approval server is registered under in the MCP config.
pub const PERMISSION_SERVER: &str = "tether-permissions";

/// Fully qualified name of the approval tool.
pub const APPROVAL_TOOL: &str = "mcp__tether-permissions__approval_prompt";

/// Integration config file written into the request directory.
pub const MCP_CONFIG_FILE: &str = "mcp-servers.json";

/// Variable telling the approval server where to exchange files.
pub const ENV_PERMISSIONS_PATH: &str = "TETHER_PERMISSIONS_PATH";

const COMMAND_BUFFER: usize = 32;

/// Handle to a running broker.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    sender: mpsc::Sender<BrokerCommand>,
    request_dir: PathBuf,
    mcp_config: PathBuf,
}

impl BrokerHandle {
    /// Directory the approval hook exchanges files in.
    pub fn request_dir(&self) -> &Path {
        &self.request_dir
    }

    /// Integration config to pass with `--mcp-config`.
    pub fn mcp_config(&self) -> &Path {
        &self.mcp_config
    }

    /// Answers request `id`. Returns false if it wasn't pending.
    pub async fn decide(
        &self,
        id: impl Into<String>,
        decision: PermissionDecision,
    ) -> Result<bool, BrokerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(BrokerCommand::Decide {
                id: id.into(),
                decision,
                respond_to: tx,
            })
            .await
            .map_err(|_| BrokerError::ChannelClosed)?;

        rx.await.map_err(|_| BrokerError::ChannelClosed)
    }

    /// Requests waiting for a decision, oldest first.
    pub async fn pending_ids(&self) -> Result<Vec<String>, BrokerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(BrokerCommand::PendingIds { respond_to: tx })
            .await
            .map_err(|_| BrokerError::ChannelClosed)?;

        rx.await.map_err(|_| BrokerError::ChannelClosed)
    }
}

/// MCP config registering the approval server for one request directory.
pub fn integration_config(server: &ApprovalServer, request_dir: &Path) -> serde_json::Value {
    json!({
        "mcpServers": {
            PERMISSION_SERVER: {
                "command": server.command,
                "args": server.args,
                "env": { ENV_PERMISSIONS_PATH: request_dir.display().to_string() }
            }
        }
    })
}

/// Creates a fresh request directory, writes the integration config
/// into it, arms `watcher` on it and spawns the broker actor.
pub async fn spawn_broker(
    config: &EngineConfig,
    store: Arc<PermissionStore>,
    sink: Arc<dyn EventSink>,
    mut watcher: impl RequestWatcher,
) -> Result<BrokerHandle, BrokerError> {
    let request_dir = config
        .state_dir
        .join("permissions")
        .join(Uuid::new_v4().to_string());
    fs::create_dir_all(&request_dir)
        .await
        .map_err(|source| BrokerError::Io {
            path: request_dir.clone(),
            source,
        })?;

    let mcp_config = request_dir.join(MCP_CONFIG_FILE);
    let body = serde_json::to_string_pretty(&integration_config(
        &config.approval_server,
        &request_dir,
    ))?;
    fs::write(&mcp_config, body)
        .await
        .map_err(|source| BrokerError::Io {
            path: mcp_config.clone(),
            source,
        })?;

    let (request_tx, request_rx) = mpsc::unbounded_channel();
    watcher.watch(&request_dir, request_tx)?;

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let actor = BrokerActor::new(
        cmd_rx,
        request_rx,
        request_dir.clone(),
        store,
        sink,
        Box::new(watcher),
    );
    tokio::spawn(actor.run());

    info!(dir = %request_dir.display(), "Permission broker ready");
    Ok(BrokerHandle {
        sender: cmd_tx,
        request_dir,
        mcp_config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integration_config_shape() {
        let server = ApprovalServer {
            command: "node".to_string(),
            args: vec!["/opt/approval.js".to_string()],
        };
        let value = integration_config(&server, Path::new("/state/permissions/abc"));

        let entry = &value["mcpServers"]["tether-permissions"];
        assert_eq!(entry["command"], "node");
        assert_eq!(entry["args"][0], "/opt/approval.js");
        assert_eq!(entry["env"]["TETHER_PERMISSIONS_PATH"], "/state/permissions/abc");
    }
}
