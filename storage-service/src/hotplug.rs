// SPDX-License-Identifier: GPL-3.0-only

use anyhow::Result;
use futures_util::{FutureExt, StreamExt};
use storage_monitor::VolumeMonitor;
use storage_udisks::DiskManager;

/// Run a monitor pass whenever UDisks2 reports block devices or
/// filesystems appearing or going away.
///
/// Events that arrive while a pass is running are folded into a single
/// follow-up pass.
pub(crate) async fn refresh_on_hotplug(
    manager: &DiskManager,
    monitor: VolumeMonitor,
) -> Result<()> {
    tracing::info!("Starting hotplug-triggered refreshes");

    let mut device_events = manager.device_event_stream_signals().await?;

    tokio::spawn(async move {
        while let Some(event) = device_events.next().await {
            let mut coalesced = 0_usize;
            while let Some(Some(_)) = device_events.next().now_or_never() {
                coalesced += 1;
            }
            tracing::debug!("Device event {event:?} (+{coalesced} coalesced), refreshing volumes");

            if let Err(e) = monitor.refresh().await {
                tracing::warn!("Hotplug refresh skipped: {e}");
            }
        }
        tracing::debug!("Device event stream ended");
    });

    Ok(())
}
