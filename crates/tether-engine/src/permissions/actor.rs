//! Broker actor - owns the pending permission requests.
//!
//! Each detected request gets a oneshot resolver and a responder task
//! waiting on it. Deciding resolves exactly that request; the responder
//! writes `<id>.response` and deletes `<id>.request`.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tether_core::{PermissionDecision, PermissionRequest, PermissionResponse};
use tether_protocol::UiEvent;
use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::commands::BrokerCommand;
use super::store::PermissionStore;
use super::watcher::RequestWatcher;
use crate::hooks::EventSink;

/// File extension of response files read by the approval hook.
pub const RESPONSE_EXTENSION: &str = "response";

struct Pending {
    request: PermissionRequest,
    /// Arrival order, for listing
    seq: u64,
    resolve: oneshot::Sender<bool>,
}

pub struct BrokerActor {
    receiver: mpsc::Receiver<BrokerCommand>,
    requests: mpsc::UnboundedReceiver<PathBuf>,
    dir: PathBuf,
    pending: HashMap<String, Pending>,
    /// Ids answered but whose request file may still be on disk; later
    /// events for those files are ignored
    answered: HashSet<String>,
    /// Responders report ids here once the request file is gone
    finished_tx: mpsc::UnboundedSender<String>,
    finished_rx: mpsc::UnboundedReceiver<String>,
    next_seq: u64,
    store: Arc<PermissionStore>,
    sink: Arc<dyn EventSink>,
    /// Kept alive for as long as the actor runs
    _watcher: Box<dyn RequestWatcher>,
}

impl BrokerActor {
    pub fn new(
        receiver: mpsc::Receiver<BrokerCommand>,
        requests: mpsc::UnboundedReceiver<PathBuf>,
        dir: PathBuf,
        store: Arc<PermissionStore>,
        sink: Arc<dyn EventSink>,
        watcher: Box<dyn RequestWatcher>,
    ) -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        Self {
            receiver,
            requests,
            dir,
            pending: HashMap::new(),
            answered: HashSet::new(),
            finished_tx,
            finished_rx,
            next_seq: 0,
            store,
            sink,
            _watcher: watcher,
        }
    }

    pub async fn run(mut self) {
        info!(dir = %self.dir.display(), "Permission broker starting");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(path) = self.requests.recv() => self.handle_request_file(path).await,
                Some(id) = self.finished_rx.recv() => self.handle_finished(&id),
            }
        }

        info!(
            unanswered = self.pending.len(),
            "Permission broker stopped"
        );
    }

    async fn handle_command(&mut self, cmd: BrokerCommand) {
        match cmd {
            BrokerCommand::Decide {
                id,
                decision,
                respond_to,
            } => {
                let result = self.handle_decide(&id, decision).await;
                let _ = respond_to.send(result);
            }
            BrokerCommand::PendingIds { respond_to } => {
                let mut pending: Vec<_> = self.pending.iter().map(|(id, p)| (p.seq, id)).collect();
                pending.sort();
                let ids = pending.into_iter().map(|(_, id)| id.clone()).collect();
                let _ = respond_to.send(ids);
            }
        }
    }

    async fn handle_request_file(&mut self, path: PathBuf) {
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Request file unreadable");
                return;
            }
        };
        let request = match PermissionRequest::from_json(&text) {
            Ok(request) => request,
            Err(e) => {
                // Usually a file caught mid-write; its Modify event follows
                debug!(path = %path.display(), error = %e, "Request file not parseable yet");
                return;
            }
        };

        if !is_plain_id(&request.id) {
            warn!(id = %request.id, "Ignoring request with unsafe id");
            return;
        }
        if self.pending.contains_key(&request.id) || self.answered.contains(&request.id) {
            debug!(id = %request.id, "Duplicate request ignored");
            return;
        }

        let (resolve, decision) = oneshot::channel();
        tokio::spawn(respond_when_decided(
            self.dir.clone(),
            path,
            request.id.clone(),
            decision,
            self.finished_tx.clone(),
        ));

        if self.store.is_allowed(&request).await {
            info!(id = %request.id, tool = %request.tool, "Request auto-approved by always-allow rule");
            self.answered.insert(request.id);
            let _ = resolve.send(true);
            return;
        }

        info!(id = %request.id, tool = %request.tool, "Permission requested");
        self.sink.emit(UiEvent::PermissionRequest {
            id: request.id.clone(),
            tool: request.tool.clone(),
            input: request.input.clone(),
            pattern: request.display_pattern(),
        });

        self.next_seq += 1;
        self.pending.insert(
            request.id.clone(),
            Pending {
                request,
                seq: self.next_seq,
                resolve,
            },
        );
    }

    async fn handle_decide(&mut self, id: &str, decision: PermissionDecision) -> bool {
        let Some(pending) = self.pending.remove(id) else {
            debug!(id, "Decision for unknown request ignored");
            return false;
        };

        if decision.remember() {
            if let Err(e) = self.store.remember(&pending.request).await {
                warn!(id, error = %e, "Failed to persist always-allow decision");
            }
        }

        info!(id, %decision, "Permission decided");
        self.answered.insert(id.to_string());
        if pending.resolve.send(decision.approved()).is_err() {
            warn!(id, "Responder for request is gone");
        }
        true
    }

    /// The request file is deleted, so its id no longer needs remembering.
    fn handle_finished(&mut self, id: &str) {
        if self.answered.remove(id) {
            debug!(id, "Request fully answered");
        }
    }
}

/// Ids become file names; anything that could escape the directory is
/// rejected.
fn is_plain_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\'])
}

/// Waits for the decision, then answers the approval hook.
///
/// A broker that shuts down with the request unanswered denies it.
async fn respond_when_decided(
    dir: PathBuf,
    request_path: PathBuf,
    id: String,
    decision: oneshot::Receiver<bool>,
    finished: mpsc::UnboundedSender<String>,
) {
    let approved = decision.await.unwrap_or_else(|_| {
        debug!(id = %id, "Broker dropped request, denying");
        false
    });

    if let Err(e) = write_response(&dir, &id, approved).await {
        warn!(id = %id, error = %e, "Failed to write permission response");
        return;
    }

    match fs::remove_file(&request_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %request_path.display(), error = %e, "Failed to delete request file");
            return;
        }
    }
    let _ = finished.send(id);
}

async fn write_response(dir: &Path, id: &str, approved: bool) -> std::io::Result<()> {
    let response = PermissionResponse::new(id, approved, Utc::now());
    let json = serde_json::to_string(&response)?;

    // Rename so the hook never reads a half-written file
    let path = dir.join(format!("{id}.{RESPONSE_EXTENSION}"));
    let tmp = dir.join(format!("{id}.{RESPONSE_EXTENSION}.tmp"));
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, &path).await?;
    debug!(path = %path.display(), approved, "Permission response written");
    Ok(())
}

impl std::fmt::Debug for BrokerActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerActor")
            .field("dir", &self.dir)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::ChannelSink;
    use crate::permissions::watcher::ManualWatcher;
    use serde_json::json;

    #[test]
    fn test_plain_ids() {
        assert!(is_plain_id("3f2a-request-id"));
        assert!(!is_plain_id(""));
        assert!(!is_plain_id(".."));
        assert!(!is_plain_id("../escape"));
        assert!(!is_plain_id("a\\b"));
    }

    #[tokio::test]
    async fn test_response_file_shape() {
        let dir = tempfile::tempdir().unwrap();
        write_response(dir.path(), "abc", true).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("abc.response")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["id"], "abc");
        assert_eq!(value["approved"], true);
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(!dir.path().join("abc.response.tmp").exists());
    }

    #[tokio::test]
    async fn test_dropped_resolver_denies() {
        let dir = tempfile::tempdir().unwrap();
        let request = dir.path().join("r1.request");
        std::fs::write(&request, "{}").unwrap();

        let (resolve, decision) = oneshot::channel();
        drop(resolve);
        let (finished, mut done) = mpsc::unbounded_channel();
        respond_when_decided(
            dir.path().to_path_buf(),
            request.clone(),
            "r1".to_string(),
            decision,
            finished,
        )
        .await;

        let text = std::fs::read_to_string(dir.path().join("r1.response")).unwrap();
        assert!(text.contains("\"approved\":false"));
        assert!(!request.exists());
        assert_eq!(done.recv().await.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_answered_ids_are_forgotten_once_file_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);
        let (_request_tx, request_rx) = mpsc::unbounded_channel();
        let (sink, mut events) = ChannelSink::new();
        let store = Arc::new(PermissionStore::new(dir.path().join("permissions.json")));
        let mut actor = BrokerActor::new(
            cmd_rx,
            request_rx,
            dir.path().to_path_buf(),
            store,
            Arc::new(sink),
            Box::new(ManualWatcher::new()),
        );

        let path = dir.path().join("r7.request");
        let body = json!({"id": "r7", "tool": "Bash", "input": {"command": "ls"}});
        std::fs::write(&path, body.to_string()).unwrap();
        actor.handle_request_file(path.clone()).await;
        assert!(matches!(events.try_recv(), Ok(UiEvent::PermissionRequest { .. })));

        assert!(actor.handle_decide("r7", PermissionDecision::Approve).await);
        assert!(actor.answered.contains("r7"));

        // A repeat event before the responder finishes is still ignored
        actor.handle_request_file(path.clone()).await;
        assert!(events.try_recv().is_err());

        let id = actor.finished_rx.recv().await.unwrap();
        actor.handle_finished(&id);
        assert!(actor.answered.is_empty());
        assert!(!path.exists());
        assert!(dir.path().join("r7.response").exists());
    }
}
