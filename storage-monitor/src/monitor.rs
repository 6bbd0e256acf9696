// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use storage_sys::DeletionWatcher;
use storage_types::{Volume, VolumeEvent};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{IgnoreList, MonitorConfig, SortPolicy};
use crate::error::{MonitorError, Result};
use crate::events::{EventFilter, EventSubscription, MonitorEvent};
use crate::reconcile;
use crate::source::VolumeSource;
use crate::state::{MonitorState, WatchEntry};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Keeps a mirror of mounted volumes and broadcasts changes to it.
///
/// Cheap to clone; every clone drives the same state. Passes are
/// single-flight: a scheduled pass, a hotplug-triggered [`refresh`] and any
/// number of concurrent callers run one after another, never interleaved.
/// Deletion watchers may remove a volume at any time between passes.
///
/// Dropping the last handle stops the schedule and every watcher.
///
/// [`refresh`]: VolumeMonitor::refresh
#[derive(Clone)]
pub struct VolumeMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    config: MonitorConfig,
    sort: SortPolicy,
    ignore: IgnoreList,
    source: Arc<dyn VolumeSource>,
    state: Mutex<MonitorState>,
    pass_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<MonitorEvent>,
    schedule: Mutex<Option<CancellationToken>>,
}

impl VolumeMonitor {
    pub fn new(config: MonitorConfig, source: Arc<dyn VolumeSource>) -> Result<Self> {
        config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Inner {
            sort: config.sort.resolve(),
            ignore: config.ignore_list(),
            config,
            source,
            state: Mutex::new(MonitorState::default()),
            pass_lock: tokio::sync::Mutex::new(()),
            events,
            schedule: Mutex::new(None),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Run a pass now, then one every configured interval.
    ///
    /// Idempotent while running. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut schedule = lock(&self.inner.schedule);
        if schedule.is_some() {
            debug!("Volume monitor already running");
            return;
        }

        let token = CancellationToken::new();
        *schedule = Some(token.clone());

        let interval = self.inner.config.interval();
        info!("Volume monitor started, refreshing every {:?}", interval);
        tokio::spawn(run_schedule(Arc::downgrade(&self.inner), interval, token));
    }

    /// Cancel the schedule. A pass already in flight still completes, and
    /// deletion watchers keep running.
    pub fn stop(&self) {
        if let Some(token) = lock(&self.inner.schedule).take() {
            token.cancel();
            info!("Volume monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.schedule).is_some()
    }

    /// Run one pass and return the events it produced.
    ///
    /// Waits for a pass already in flight to finish first. An enumeration
    /// failure leaves the state untouched and emits nothing.
    pub async fn refresh(&self) -> Result<Vec<VolumeEvent>> {
        self.inner.run_pass().await
    }

    /// Known volumes in sort order.
    pub fn current_state(&self) -> Vec<Volume> {
        self.inner.lock_state().sorted(self.inner.sort)
    }

    /// The volume containing `path`, preferring the most nested mount.
    pub fn lookup(&self, path: &Path) -> Option<Volume> {
        self.inner.lock_state().lookup(path).cloned()
    }

    /// Whether `path` is exactly the mount path of a known volume.
    pub fn is_mounted(&self, path: &Path) -> bool {
        self.inner.lock_state().contains(path)
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        EventSubscription::new(self.inner.events.subscribe(), filter)
    }

    /// Wait until the next pass completes.
    ///
    /// Passes skipped after an enumeration failure do not count.
    ///
    /// Subscribes immediately, so a pass that completes before the returned
    /// future is first polled is not missed.
    pub fn next_refresh(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut completed = self.subscribe(EventFilter::RefreshCompleted);
        async move {
            completed.recv().await;
        }
    }

    /// Stop the schedule and every deletion watcher, and forget all volumes.
    ///
    /// Emits nothing. The monitor can be started again afterwards.
    pub fn dispose(&self) {
        self.stop();
        self.inner.lock_state().clear();
        debug!("Volume monitor disposed");
    }
}

async fn run_schedule(inner: Weak<Inner>, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Err(e) = inner.run_pass().await {
            error!("Volume refresh skipped: {e}");
        }
    }

    debug!("Volume monitor schedule ended");
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        lock(&self.state)
    }

    async fn run_pass(self: &Arc<Self>) -> Result<Vec<VolumeEvent>> {
        let _pass = self.pass_lock.lock().await;

        let (devices, filesystems) =
            futures::try_join!(self.source.devices(), self.source.filesystems())
                .map_err(MonitorError::Enumeration)?;
        debug!(
            "Enumerated {} devices and {} filesystems",
            devices.len(),
            filesystems.len()
        );

        let mut candidates =
            reconcile::build_candidates(devices, filesystems, &self.ignore, self.sort);

        let (unknown, unwatched) = {
            let state = self.lock_state();
            let (known, unknown): (Vec<&Volume>, Vec<&Volume>) = candidates
                .iter()
                .partition(|candidate| reconcile::is_known(state.volumes(), candidate));
            let unwatched: Vec<PathBuf> = known
                .into_iter()
                .filter(|volume| state.is_unwatched(&volume.mount_path))
                .map(|volume| volume.mount_path.clone())
                .collect();
            let unknown: Vec<PathBuf> = unknown
                .into_iter()
                .map(|volume| volume.mount_path.clone())
                .collect();
            (unknown, unwatched)
        };

        let mut confirmed = HashSet::new();
        for path in unknown {
            match storage_sys::is_directory(&path).await {
                Ok(true) => {
                    confirmed.insert(path);
                }
                Ok(false) => debug!("{:?} is not a directory yet, not mounting", path),
                Err(e) => warn!("Failed to probe {:?}: {e}", path),
            }
        }

        // Known volumes whose watcher stopped get the probe a new candidate
        // would: gone ones are dropped, the rest are watched again.
        let mut rewatch = Vec::new();
        for path in unwatched {
            match storage_sys::is_directory(&path).await {
                Ok(false) => {
                    debug!("{:?} vanished while unwatched", path);
                    candidates.retain(|candidate| candidate.mount_path != path);
                }
                Ok(true) => rewatch.push(path),
                Err(e) => {
                    warn!("Failed to probe {:?}: {e}", path);
                    rewatch.push(path);
                }
            }
        }

        // Diff against the state as it is now: deletion watchers may have
        // removed volumes while this pass was enumerating.
        let events = {
            let mut state = self.lock_state();
            let events = reconcile::diff(state.volumes(), &candidates, &confirmed, self.sort);
            for event in &events {
                self.apply(&mut state, event);
            }
            for path in rewatch {
                if !state.is_unwatched(&path) {
                    continue;
                }
                if let Some(volume) = state.get(&path).cloned() {
                    debug!("Watching {:?} again", path);
                    self.mount(&mut state, volume);
                }
            }
            debug!("Tracking {} volumes", state.len());
            events
        };

        self.publish(&events);
        let _ = self.events.send(MonitorEvent::RefreshCompleted);
        Ok(events)
    }

    fn apply(self: &Arc<Self>, state: &mut MonitorState, event: &VolumeEvent) {
        match event {
            VolumeEvent::Mounted { volume } => {
                self.mount(state, volume.clone());
            }
            VolumeEvent::Unmounted { volume } => {
                state.remove(&volume.mount_path);
            }
            VolumeEvent::Renamed { volume, .. } => {
                state.remove(&volume.mount_path);
                self.mount(state, volume.clone());
            }
        }
    }

    fn mount(self: &Arc<Self>, state: &mut MonitorState, volume: Volume) {
        let generation = state.next_generation();
        let path = volume.mount_path.clone();
        let monitor = Arc::downgrade(self);

        let watcher = DeletionWatcher::new(path.clone(), &self.config.watcher, move || {
            if let Some(inner) = monitor.upgrade() {
                inner.handle_deleted(&path, generation);
            }
        });

        state.insert(volume, WatchEntry { generation, watcher });
    }

    /// Deletion watcher callback: drop the volume without waiting for a pass.
    fn handle_deleted(&self, path: &Path, generation: u64) {
        let removed = {
            let mut state = self.lock_state();
            if !state.is_current(path, generation) {
                debug!("Ignoring stale deletion of {:?}", path);
                return;
            }
            state.remove(path)
        };

        if let Some(volume) = removed {
            self.publish(&[VolumeEvent::Unmounted { volume }]);
        }
    }

    fn publish(&self, events: &[VolumeEvent]) {
        for event in events {
            let volume = event.volume();
            match event {
                VolumeEvent::Renamed { previous, .. } => info!(
                    "Volume renamed at {:?}: {:?} -> {:?}",
                    volume.mount_path,
                    previous.display_label(),
                    volume.display_label()
                ),
                _ => info!(
                    "Volume {}: {:?} at {:?}",
                    event.kind(),
                    volume.display_label(),
                    volume.mount_path
                ),
            }
            // Sending only fails without subscribers.
            let _ = self.events.send(MonitorEvent::Volume(event.clone()));
        }

        if !events.is_empty() {
            let _ = self.events.send(MonitorEvent::Changed);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(token) = lock(&self.schedule).take() {
            token.cancel();
        }
        lock(&self.state).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use anyhow::Result as AnyResult;
    use futures::future::BoxFuture;
    use storage_types::{DeviceRecord, FilesystemRecord, VolumeEventKind};

    use super::*;

    struct OneDevice(DeviceRecord);

    impl VolumeSource for OneDevice {
        fn devices(&self) -> BoxFuture<'_, AnyResult<Vec<DeviceRecord>>> {
            let records = vec![self.0.clone()];
            Box::pin(async move { Ok(records) })
        }

        fn filesystems(&self) -> BoxFuture<'_, AnyResult<Vec<FilesystemRecord>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    fn monitor_for(mount_path: &Path) -> VolumeMonitor {
        let record = DeviceRecord {
            device: "/dev/sdc1".to_string(),
            label: "USB".to_string(),
            filesystem_type: "vfat".to_string(),
            uuid: "1a2b-3c4d".to_string(),
            mount_path: mount_path.to_string_lossy().into_owned(),
            protocol: "usb".to_string(),
            medium: "flash".to_string(),
            removable: true,
            serial: "AA01".to_string(),
            size: Some(16 << 30),
        };
        VolumeMonitor::new(MonitorConfig::default(), Arc::new(OneDevice(record))).unwrap()
    }

    #[tokio::test]
    async fn pass_unmounts_a_vanished_volume_whose_watcher_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let usb = dir.path().join("usb");
        std::fs::create_dir(&usb).unwrap();
        let monitor = monitor_for(&usb);
        monitor.refresh().await.unwrap();

        monitor.inner.lock_state().stop_watcher(&usb);
        std::fs::remove_dir(&usb).unwrap();
        assert!(monitor.is_mounted(&usb));

        let events = monitor.refresh().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), VolumeEventKind::Unmounted);
        assert!(!monitor.is_mounted(&usb));
    }

    #[tokio::test]
    async fn pass_watches_a_present_volume_again() {
        let dir = tempfile::tempdir().unwrap();
        let usb = dir.path().join("usb");
        std::fs::create_dir(&usb).unwrap();
        let monitor = monitor_for(&usb);
        monitor.refresh().await.unwrap();

        monitor.inner.lock_state().stop_watcher(&usb);
        assert!(monitor.refresh().await.unwrap().is_empty());
        assert!(!monitor.inner.lock_state().is_unwatched(&usb));

        let mut unmounted = monitor.subscribe(EventFilter::Unmounted);
        std::fs::remove_dir(&usb).unwrap();
        tokio::time::timeout(Duration::from_secs(5), unmounted.recv())
            .await
            .expect("the new watcher should report the deletion")
            .unwrap();
        assert!(!monitor.is_mounted(&usb));
    }
}
