//! Recursive project watcher feeding the orchestrator.
//!
//! Raw notify events are turned into project-relative [`FileEvent`]s;
//! denied paths never reach a strategy. When the watcher reports an error
//! or says it dropped events, a reconcile pass covers the gap.

use std::path::Path;
use std::sync::Arc;

use localdex_core::error::{Error, Result};
use localdex_core::policy::relativize;
use notify::event::{ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::{FileEvent, FileEventKind};
use crate::orchestrator::Orchestrator;

const IGNORE_FILES: &[&str] = &[".gitignore", ".ignore"];

/// What one raw notify event asks of the watcher loop.
#[derive(Debug, PartialEq, Eq)]
enum Action {
    Dispatch(Vec<FileEvent>),
    Recover,
}

pub struct ProjectWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ProjectWatcher {
    pub fn spawn(orchestrator: Arc<Orchestrator>, root: &Path) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .map_err(|e| Error::Store(e.into()))?;
        watcher.watch(root, RecursiveMode::Recursive).map_err(|e| Error::Store(e.into()))?;

        info!(root = %root.display(), "watching project");
        let root = root.to_path_buf();
        let task = tokio::spawn(async move {
            while let Some(res) = rx.recv().await {
                let action = match res {
                    Ok(event) => classify(&orchestrator, &root, event),
                    Err(e) => {
                        error!(error = %e, "file watcher error");
                        Action::Recover
                    }
                };
                match action {
                    Action::Dispatch(events) => {
                        for event in events {
                            if let Err(e) = orchestrator.dispatch(event).await {
                                error!(error = %e, "dispatching file event failed");
                            }
                        }
                    }
                    Action::Recover => {
                        if let Err(e) = orchestrator.recover().await {
                            error!(error = %e, "recovery pass failed");
                        }
                    }
                }
            }
            debug!("file watcher channel closed");
        });
        Ok(Self { _watcher: watcher, task })
    }
}

impl Drop for ProjectWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn classify(orchestrator: &Orchestrator, root: &Path, event: Event) -> Action {
    if event.need_rescan() || matches!(event.kind, EventKind::Remove(RemoveKind::Folder)) {
        return Action::Recover;
    }
    let policy = orchestrator.engine().policy();
    let mut out = Vec::new();
    for abs in &event.paths {
        let Some(kind) = event_kind(&event.kind, abs) else { continue };
        let rel = match relativize(root, abs) {
            Ok(rel) => rel,
            Err(_) => {
                debug!(path = %abs.display(), "event outside project root");
                continue;
            }
        };
        if policy.is_denied(&rel) {
            continue;
        }
        if abs.file_name().and_then(|n| n.to_str()).is_some_and(|n| IGNORE_FILES.contains(&n)) {
            // Rules changed for a whole subtree.
            warn!(path = %rel, "ignore file changed; reconciling");
            policy.invalidate_ignore_cache();
            return Action::Recover;
        }
        if abs.is_dir() {
            continue;
        }
        out.push(FileEvent::new(rel, kind));
    }
    Action::Dispatch(out)
}

fn event_kind(kind: &EventKind, abs: &Path) -> Option<FileEventKind> {
    match kind {
        EventKind::Create(_) => Some(FileEventKind::Created),
        // Either side of a rename; whether the path still exists decides.
        EventKind::Modify(ModifyKind::Name(_)) => {
            Some(if abs.exists() { FileEventKind::Modified } else { FileEventKind::Deleted })
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(FileEventKind::Modified),
        EventKind::Remove(_) => Some(FileEventKind::Deleted),
        _ => None,
    }
}
