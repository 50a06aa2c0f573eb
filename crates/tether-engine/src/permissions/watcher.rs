//! Request directory watching.
//!
//! The broker only needs a stream of candidate `.request` paths. Where
//! they come from is behind [`RequestWatcher`]: `notify` in production,
//! a hand-fed channel in tests or hosts with their own file events.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// File extension of request files written by the approval hook.
pub const REQUEST_EXTENSION: &str = "request";

/// Returns true for `<id>.request` paths.
pub fn is_request_path(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(REQUEST_EXTENSION)
}

/// Source of request file paths for one directory.
pub trait RequestWatcher: Send + 'static {
    /// Starts forwarding request paths under `dir` to `requests`.
    ///
    /// The same path may be delivered more than once.
    fn watch(
        &mut self,
        dir: &Path,
        requests: mpsc::UnboundedSender<PathBuf>,
    ) -> Result<(), notify::Error>;
}

/// Filesystem watcher backed by `notify`.
#[derive(Default)]
pub struct NotifyWatcher {
    /// Dropping the watcher ends the watch
    inner: Option<RecommendedWatcher>,
}

impl NotifyWatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestWatcher for NotifyWatcher {
    fn watch(
        &mut self,
        dir: &Path,
        requests: mpsc::UnboundedSender<PathBuf>,
    ) -> Result<(), notify::Error> {
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    // Create may land before the content; Modify follows it
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        return;
                    }
                    for path in event.paths.into_iter().filter(|p| is_request_path(p)) {
                        if requests.send(path).is_err() {
                            debug!("Request dropped: broker gone");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Request watcher error"),
            })?;

        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "Watching for permission requests");
        self.inner = Some(watcher);
        Ok(())
    }
}

impl std::fmt::Debug for NotifyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWatcher")
            .field("active", &self.inner.is_some())
            .finish()
    }
}

/// Watcher fed by hand through [`ManualWatcher::notify`].
///
/// Clones share the same target, so a test can keep one clone while the
/// broker owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualWatcher {
    target: Arc<Mutex<Option<mpsc::UnboundedSender<PathBuf>>>>,
}

impl ManualWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a path as if the filesystem reported it. Returns false
    /// if nothing is watching.
    pub fn notify(&self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        let Ok(target) = self.target.lock() else {
            return false;
        };
        match target.as_ref() {
            Some(sender) if is_request_path(&path) => sender.send(path).is_ok(),
            _ => false,
        }
    }
}

impl RequestWatcher for ManualWatcher {
    fn watch(
        &mut self,
        _dir: &Path,
        requests: mpsc::UnboundedSender<PathBuf>,
    ) -> Result<(), notify::Error> {
        if let Ok(mut target) = self.target.lock() {
            *target = Some(requests);
        }
        Ok(())
    }
}
