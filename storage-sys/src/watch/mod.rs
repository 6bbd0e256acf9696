// SPDX-License-Identifier: GPL-3.0-only

//! Deletion watchers
//!
//! A [`DeletionWatcher`] observes one directory and invokes its callback
//! exactly once, the first time that directory can no longer be confirmed to
//! exist. Two strategies are available:
//!
//! - [`WatchStrategy::Ancestors`]: directory notifications on every ancestor,
//!   so removing the directory *or any parent* is reported immediately
//! - [`WatchStrategy::Polling`]: a stat on a fixed interval

mod ancestors;
mod completion;
mod polling;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use completion::CompleteOnce;

use crate::probe::{self, PathKind};

const ACTIVE: u8 = 0;
const FIRED: u8 = 1;
const STOPPED: u8 = 2;

/// How a [`DeletionWatcher`] detects that its path is gone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchStrategy {
    #[default]
    Ancestors,
    Polling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub strategy: WatchStrategy,

    /// Probe interval for [`WatchStrategy::Polling`]
    pub poll_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            strategy: WatchStrategy::Ancestors,
            poll_interval_ms: 5000,
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl Shared {
    /// Move to `STOPPED` unless already fired, and tear down observation.
    fn stop(&self) {
        let _ = self
            .state
            .compare_exchange(ACTIVE, STOPPED, Ordering::AcqRel, Ordering::Acquire);
        self.cancel.cancel();
    }

    /// Claim the right to run the callback. Fails once stopped or fired.
    fn claim_fire(&self) -> bool {
        let claimed = self
            .state
            .compare_exchange(ACTIVE, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.cancel.cancel();
        claimed
    }
}

/// Watches one directory and fires a callback once when it disappears.
///
/// Must be created inside a tokio runtime. Dropping the watcher stops it.
#[derive(Debug)]
pub struct DeletionWatcher {
    shared: Arc<Shared>,
}

impl DeletionWatcher {
    /// Start watching `path`.
    ///
    /// Whether `path` is a directory is decided before this returns. If it
    /// is not, the watcher is created stopped and `on_deleted` never runs;
    /// otherwise a removal at any later point fires the callback.
    pub fn new<F>(path: impl Into<PathBuf>, config: &WatcherConfig, on_deleted: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let path = path.into();
        let path = std::path::absolute(&path).unwrap_or(path);

        let shared = Arc::new(Shared {
            path,
            state: AtomicU8::new(ACTIVE),
            cancel: CancellationToken::new(),
        });

        match probe::probe_now(&shared.path) {
            Ok(PathKind::Directory) => {
                tokio::spawn(run(Arc::clone(&shared), config.clone(), on_deleted));
            }
            Ok(_) => {
                debug!("{:?} is not a directory, deletion watcher stopped", shared.path);
                shared.stop();
            }
            Err(e) => {
                warn!("Failed to probe {:?}, deletion watcher stopped: {e}", shared.path);
                shared.stop();
            }
        }

        Self { shared }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Stop watching. Idempotent, and safe to call from inside the callback.
    ///
    /// A deletion detected after this call is ignored. A callback that was
    /// already dispatched on another thread may still be running when this
    /// returns.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Whether the watcher has stopped or already fired.
    pub fn is_stopped(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) != ACTIVE
    }
}

impl Drop for DeletionWatcher {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

async fn run<F>(shared: Arc<Shared>, config: WatcherConfig, on_deleted: F)
where
    F: FnOnce() + Send + 'static,
{
    let path = shared.path.as_path();

    let detected = match config.strategy {
        WatchStrategy::Ancestors => ancestors::wait_for_deletion(path, &shared.cancel).await,
        WatchStrategy::Polling => {
            polling::wait_for_deletion(path, config.poll_interval(), &shared.cancel).await
        }
    };

    match detected {
        Ok(Some(vanished)) => {
            if shared.claim_fire() {
                if vanished == path {
                    info!("{:?} was deleted", path);
                } else {
                    info!("{:?} is gone: ancestor {:?} was deleted", path, vanished);
                }
                on_deleted();
            }
        }
        Ok(None) => debug!("Deletion watcher for {:?} stopped", path),
        Err(e) => {
            warn!("Deletion watcher for {:?} failed, stopping: {e}", path);
            shared.stop();
        }
    }
}
