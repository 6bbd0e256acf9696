// SPDX-License-Identifier: GPL-3.0-only

//! Ancestor-watch strategy
//!
//! For `/a/b/c` the chain holds three entries: `c` observed through a
//! non-recursive watch on `/a/b`, `b` through `/a`, and `a` through `/`.
//! All of them share a single notify watcher, so a chain costs one inotify
//! instance however deep the path is. The first entry seen removed or
//! renamed away resolves the shared [`CompleteOnce`]. Dropping the chain
//! closes every watch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::CompleteOnce;
use crate::error::{Result, SysError};
use crate::probe;

/// Watches on every ancestor of one path, owned by one deletion watcher.
struct WatchChain {
    /// The path itself, then each ancestor below the root.
    entries: Vec<PathBuf>,
    _watcher: RecommendedWatcher,
}

impl WatchChain {
    fn new(
        path: &Path,
        signal: Arc<CompleteOnce<PathBuf>>,
        errors: mpsc::UnboundedSender<notify::Error>,
    ) -> Result<Self> {
        let entries: Vec<PathBuf> = path
            .ancestors()
            .filter(|entry| entry.file_name().is_some())
            .filter(|entry| entry.parent().is_some_and(|p| !p.as_os_str().is_empty()))
            .map(Path::to_path_buf)
            .collect();

        let watched = entries.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    if let Some(entry) = watched.iter().find(|e| entry_vanished(&event, e)) {
                        signal.complete(entry.clone());
                    }
                }
                Err(e) => {
                    // Receiver gone means the chain is being torn down.
                    let _ = errors.send(e);
                }
            }
        })?;

        for entry in &entries {
            if let Some(parent) = entry.parent() {
                watcher.watch(parent, RecursiveMode::NonRecursive)?;
                trace!("Watching {:?} for removal of {:?}", parent, entry);
            }
        }

        Ok(Self {
            entries,
            _watcher: watcher,
        })
    }
}

impl Drop for WatchChain {
    fn drop(&mut self) {
        trace!("Closing {} watches for {:?}", self.entries.len(), self.entries.first());
    }
}

/// Wait until `path` or one of its ancestors disappears.
///
/// Returns the path whose removal was observed, `None` when `cancel` fired
/// first, or the first error reported by the watcher. `path` is probed again
/// once every watch is in place, so a removal racing the setup still counts.
pub(crate) async fn wait_for_deletion(
    path: &Path,
    cancel: &CancellationToken,
) -> Result<Option<PathBuf>> {
    let (signal, mut fired) = CompleteOnce::new();
    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();

    let chain = match WatchChain::new(path, Arc::clone(&signal), errors_tx) {
        Ok(chain) => chain,
        Err(e) => {
            if !is_gone(path).await {
                return Err(e);
            }
            debug!("{:?} vanished while its watches were set up: {e}", path);
            return Ok(Some(path.to_path_buf()));
        }
    };
    debug!(
        "Ancestor chain for {:?} covers {} levels",
        path,
        chain.entries.len()
    );

    if is_gone(path).await {
        signal.complete(path.to_path_buf());
    }

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        Some(e) = errors_rx.recv() => Err(SysError::Watch(e)),
        vanished = &mut fired => Ok(vanished.ok()),
    };

    drop(chain);
    outcome
}

/// Whether `path` is confirmed to no longer be a directory.
async fn is_gone(path: &Path) -> bool {
    matches!(probe::is_directory(path).await, Ok(false))
}

/// Whether `event` reports `entry` being removed or renamed away.
fn entry_vanished(event: &Event, entry: &Path) -> bool {
    match event.kind {
        EventKind::Remove(_) => event.paths.iter().any(|p| p == entry),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => false,
        // paths = [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.first().is_some_and(|p| p == entry)
        }
        EventKind::Modify(ModifyKind::Name(_)) => event.paths.iter().any(|p| p == entry),
        _ => false,
    }
}
