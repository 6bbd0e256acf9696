// SPDX-License-Identifier: GPL-3.0-only

//! Polling strategy: stat the path on a fixed interval.
//!
//! Slower than the ancestor chain but keeps working on forcibly unmounted
//! filesystems, where no directory notifications are delivered.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::probe;

/// The first probe runs at once, so a removal between creating the watcher
/// and starting this loop is not held back a full interval.
pub(crate) async fn wait_for_deletion(
    path: &Path,
    period: Duration,
    cancel: &CancellationToken,
) -> Result<Option<PathBuf>> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            _ = ticker.tick() => {}
        }

        match probe::is_directory(path).await {
            Ok(true) => continue,
            Ok(false) => return Ok(Some(path.to_path_buf())),
            Err(e) => {
                debug!("Probe of {:?} failed, treating as gone: {e}", path);
                return Ok(Some(path.to_path_buf()));
            }
        }
    }
}
