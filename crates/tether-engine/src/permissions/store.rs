//! Always-allow store.
//!
//! A single JSON document, `{"alwaysAllow": {tool: true | [patterns]}}`.
//! Every operation reads the file fresh and every change is a full
//! rewrite, so all of them run under one async mutex.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tether_core::{AllowRules, PermissionRequest};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialise permissions: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct PermissionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PermissionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current rules. Unreadable files read as empty.
    pub async fn list(&self) -> AllowRules {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    /// Allows every use of `tool`.
    pub async fn allow_tool(&self, tool: &str) -> Result<(), StoreError> {
        self.update(|rules| {
            rules.allow_tool(tool);
            true
        })
        .await?;
        info!(tool, "Tool always allowed");
        Ok(())
    }

    /// Allows commands of `tool` matching `pattern`.
    pub async fn allow_pattern(&self, tool: &str, pattern: &str) -> Result<(), StoreError> {
        self.update(|rules| {
            rules.allow_pattern(tool, pattern);
            true
        })
        .await?;
        info!(tool, pattern, "Pattern always allowed");
        Ok(())
    }

    /// Removes a pattern, or the whole tool when `pattern` is `None`.
    ///
    /// Returns false if there was nothing to remove.
    pub async fn remove(&self, tool: &str, pattern: Option<&str>) -> Result<bool, StoreError> {
        let removed = self.update(|rules| rules.remove(tool, pattern)).await?;
        if removed {
            info!(tool, pattern = ?pattern, "Always-allow rule removed");
        }
        Ok(removed)
    }

    /// Records an "always allow" decision for `request`.
    pub async fn remember(&self, request: &PermissionRequest) -> Result<(), StoreError> {
        self.update(|rules| {
            rules.remember(request);
            true
        })
        .await?;
        info!(tool = %request.tool, pattern = ?request.display_pattern(), "Decision remembered");
        Ok(())
    }

    pub async fn is_allowed(&self, request: &PermissionRequest) -> bool {
        self.list().await.is_allowed(request)
    }

    /// Read-modify-write under the lock. `mutate` returns whether it
    /// changed anything; unchanged rules are not written back.
    async fn update(
        &self,
        mutate: impl FnOnce(&mut AllowRules) -> bool,
    ) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let mut rules = self.read().await;
        if !mutate(&mut rules) {
            return Ok(false);
        }
        self.write(&rules).await?;
        Ok(true)
    }

    async fn read(&self) -> AllowRules {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No permissions file yet");
                return AllowRules::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read permissions file");
                return AllowRules::new();
            }
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Ignoring malformed permissions file");
            AllowRules::new()
        })
    }

    async fn write(&self, rules: &AllowRules) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(rules)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await.map_err(io_err)?;
        fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tether_core::AllowRule;

    fn bash(command: &str) -> PermissionRequest {
        PermissionRequest {
            id: "r".to_string(),
            tool: "Bash".to_string(),
            input: json!({"command": command}),
        }
    }

    #[tokio::test]
    async fn test_pattern_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PermissionStore::new(dir.path().join("permissions.json"));

        store.allow_pattern("Bash", "npm i *").await.unwrap();
        let rules = store.list().await;
        assert_eq!(
            rules.get("Bash"),
            Some(&AllowRule::Patterns(vec!["npm i *".to_string()]))
        );

        assert!(store.remove("Bash", Some("npm i *")).await.unwrap());
        assert!(store.list().await.get("Bash").is_none());
        assert!(!store.remove("Bash", Some("npm i *")).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/permissions.json");
        let store = PermissionStore::new(&path);

        store.allow_tool("Write").await.unwrap();
        store.remember(&bash("git commit -m \"x\"")).await.unwrap();

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            on_disk,
            json!({"alwaysAllow": {"Bash": ["git commit *"], "Write": true}})
        );
    }

    #[tokio::test]
    async fn test_malformed_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = PermissionStore::new(&path);

        assert!(store.list().await.is_empty());
        // And is repaired by the next write
        store.allow_tool("Read").await.unwrap();
        assert!(store.is_allowed(&PermissionRequest {
            id: "x".to_string(),
            tool: "Read".to_string(),
            input: json!({}),
        })
        .await);
    }

    #[tokio::test]
    async fn test_concurrent_writers_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PermissionStore::new(dir.path().join("permissions.json")));

        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .allow_pattern("Bash", &format!("tool{n} *"))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        match store.list().await.get("Bash") {
            Some(AllowRule::Patterns(patterns)) => assert_eq!(patterns.len(), 16),
            other => panic!("unexpected rule {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_is_allowed_by_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let store = PermissionStore::new(dir.path().join("permissions.json"));
        store.allow_pattern("Bash", "npm i *").await.unwrap();

        assert!(store.is_allowed(&bash("npm i lodash")).await);
        assert!(!store.is_allowed(&bash("rm -rf /")).await);
    }
}
