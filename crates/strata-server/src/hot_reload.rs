// File: src/hot_reload.rs
// Purpose: Watch page sources and static assets in dev mode

use anyhow::Result;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_livereload::Reloader;
use tracing::{error, info, warn};

/// What a changed file means for the running server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Page, layout or endpoint source. Routes are compiled in, so the
    /// server has to be rebuilt before the change is visible.
    Source,
    /// Served as-is; browsers only need to reload.
    Asset,
}

impl ChangeKind {
    pub fn classify(path: &Path) -> Option<Self> {
        let ext = path.extension().and_then(|s| s.to_str())?;
        match ext {
            "rs" => Some(ChangeKind::Source),
            "css" | "js" | "html" | "svg" | "png" | "jpg" | "jpeg" | "ico" | "woff2" => {
                Some(ChangeKind::Asset)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// File watcher over the configured `watch_paths`
pub struct DevWatcher {
    tx: broadcast::Sender<FileChange>,
    _watcher: notify::RecommendedWatcher,
}

impl DevWatcher {
    pub fn new(watch_paths: &[String]) -> Result<Self> {
        let (tx, _) = broadcast::channel(100);
        let sender = tx.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("Watch error: {:?}", e);
                    return;
                }
            };
            if !matches!(
                event.kind,
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
            ) {
                return;
            }
            for path in event.paths {
                let Some(kind) = ChangeKind::classify(&path) else {
                    continue;
                };
                // No receivers yet is fine
                let _ = sender.send(FileChange { path, kind });
            }
        })?;

        for path in watch_paths.iter().map(PathBuf::from) {
            if path.exists() {
                watcher.watch(&path, RecursiveMode::Recursive)?;
                info!("Watching: {:?}", path);
            } else {
                warn!("Watch path does not exist: {:?}", path);
            }
        }

        Ok(Self {
            tx,
            _watcher: watcher,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FileChange> {
        self.tx.subscribe()
    }
}

/// Forward changes to connected browsers until the watcher goes away.
///
/// The watcher moves into the task so it lives as long as the loop.
pub fn spawn_reload_loop(watcher: DevWatcher, reloader: Reloader) -> JoinHandle<()> {
    let mut rx = watcher.subscribe();
    tokio::spawn(async move {
        let _watcher = watcher;
        loop {
            match rx.recv().await {
                Ok(change) => match change.kind {
                    ChangeKind::Source => {
                        warn!("{:?} changed, rebuild the server to pick it up", change.path);
                    }
                    ChangeKind::Asset => {
                        info!("{:?} changed, reloading browsers", change.path);
                        reloader.reload();
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} file change events", skipped);
                    reloader.reload();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
