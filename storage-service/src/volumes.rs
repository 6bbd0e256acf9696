// SPDX-License-Identifier: GPL-3.0-only

//! Volume monitor D-Bus interface
//!
//! Exposes the monitor's state for queries and re-broadcasts its events as
//! signals. Volumes travel as JSON-serialized [`storage_monitor::Volume`]
//! objects.

use std::path::{Path, PathBuf};

use anyhow::Result;
use storage_monitor::{EventFilter, MonitorEvent, VolumeEvent, VolumeMonitor};
use zbus::{Connection, interface, object_server::SignalEmitter};

use crate::error::ServiceError;

pub const OBJECT_PATH: &str = "/org/cosmic/ext/Storage/VolumeMonitor";
pub const BUS_NAME: &str = "org.cosmic.ext.Storage.VolumeMonitor";

/// D-Bus interface for mounted volume queries and change signals
pub struct VolumesHandler {
    monitor: VolumeMonitor,
}

impl VolumesHandler {
    pub fn new(monitor: VolumeMonitor) -> Self {
        Self { monitor }
    }
}

#[interface(name = "org.cosmic.ext.Storage.VolumeMonitor")]
impl VolumesHandler {
    /// Signal emitted when a volume is mounted
    ///
    /// Args:
    /// - mount_path: Mount path (e.g., "/run/media/user/USB")
    /// - volume: JSON-serialized Volume
    #[zbus(signal)]
    pub(crate) async fn volume_mounted(
        signal_ctxt: &SignalEmitter<'_>,
        mount_path: &str,
        volume: &str,
    ) -> zbus::Result<()>;

    /// Signal emitted when a volume is unmounted or its mount path deleted
    #[zbus(signal)]
    pub(crate) async fn volume_unmounted(
        signal_ctxt: &SignalEmitter<'_>,
        mount_path: &str,
        volume: &str,
    ) -> zbus::Result<()>;

    /// Signal emitted when a volume's label changes
    ///
    /// Args:
    /// - mount_path: Unchanged mount path
    /// - volume: JSON-serialized Volume after the change
    /// - previous: JSON-serialized Volume before the change
    #[zbus(signal)]
    pub(crate) async fn volume_renamed(
        signal_ctxt: &SignalEmitter<'_>,
        mount_path: &str,
        volume: &str,
        previous: &str,
    ) -> zbus::Result<()>;

    /// Signal emitted after a batch of volume signals
    #[zbus(signal)]
    pub(crate) async fn changed(signal_ctxt: &SignalEmitter<'_>) -> zbus::Result<()>;

    /// List known volumes
    ///
    /// Returns a JSON array of Volume objects in sort order.
    ///
    /// **Example:**
    /// ```bash
    /// busctl --user call org.cosmic.ext.Storage.VolumeMonitor \
    ///   /org/cosmic/ext/Storage/VolumeMonitor \
    ///   org.cosmic.ext.Storage.VolumeMonitor \
    ///   ListVolumes
    /// ```
    async fn list_volumes(&self) -> zbus::fdo::Result<String> {
        tracing::debug!("ListVolumes called");
        let volumes = self.monitor.current_state();
        Ok(serde_json::to_string(&volumes).map_err(ServiceError::from)?)
    }

    /// Find the volume containing a path
    ///
    /// Returns a JSON Volume object, or an empty string when no known
    /// volume contains `path`.
    async fn lookup(&self, path: String) -> zbus::fdo::Result<String> {
        tracing::debug!("Lookup called for {path}");
        let path = absolute_path(&path)?;
        match self.monitor.lookup(&path) {
            Some(volume) => Ok(serde_json::to_string(&volume).map_err(ServiceError::from)?),
            None => Ok(String::new()),
        }
    }

    /// Whether `path` is exactly the mount path of a known volume
    async fn is_mounted(&self, path: String) -> zbus::fdo::Result<bool> {
        let path = absolute_path(&path)?;
        Ok(self.monitor.is_mounted(&path))
    }

    /// Run a reconciliation pass now
    async fn refresh(&self) -> zbus::fdo::Result<()> {
        tracing::debug!("Refresh called");
        let events = self.monitor.refresh().await.map_err(ServiceError::from)?;
        tracing::debug!("Refresh produced {} events", events.len());
        Ok(())
    }
}

fn absolute_path(path: &str) -> Result<PathBuf, ServiceError> {
    let path = Path::new(path);
    if !path.is_absolute() {
        return Err(ServiceError::InvalidArgument(format!(
            "Path must be absolute: {}",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

/// Re-emit every monitor notification as a D-Bus signal.
///
/// Subscribes before returning, so events from passes started afterwards
/// are never missed.
pub(crate) async fn forward_volume_events(
    connection: &Connection,
    monitor: &VolumeMonitor,
) -> Result<()> {
    let iface_ref = connection
        .object_server()
        .interface::<_, VolumesHandler>(OBJECT_PATH)
        .await?;
    let mut events = monitor.subscribe(EventFilter::All);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let emitter = iface_ref.signal_emitter();
            let result = match &event {
                MonitorEvent::Volume(volume_event) => {
                    emit_volume_event(emitter, volume_event).await
                }
                MonitorEvent::Changed => VolumesHandler::changed(emitter)
                    .await
                    .map_err(anyhow::Error::from),
                MonitorEvent::RefreshCompleted => Ok(()),
            };

            if let Err(e) = result {
                tracing::error!("Failed to emit volume signal: {e}");
            }
        }
        tracing::debug!("Volume event stream closed");
    });

    Ok(())
}

async fn emit_volume_event(emitter: &SignalEmitter<'_>, event: &VolumeEvent) -> Result<()> {
    let SignalPayload {
        mount_path,
        volume,
        previous,
    } = SignalPayload::of(event)?;

    match previous {
        None if matches!(event, VolumeEvent::Mounted { .. }) => {
            VolumesHandler::volume_mounted(emitter, &mount_path, &volume).await?
        }
        None => VolumesHandler::volume_unmounted(emitter, &mount_path, &volume).await?,
        Some(previous) => {
            VolumesHandler::volume_renamed(emitter, &mount_path, &volume, &previous).await?
        }
    }
    Ok(())
}

/// Signal arguments for one volume event
#[derive(Debug)]
struct SignalPayload {
    mount_path: String,
    volume: String,
    /// Only set for renames
    previous: Option<String>,
}

impl SignalPayload {
    fn of(event: &VolumeEvent) -> Result<Self> {
        let previous = match event {
            VolumeEvent::Renamed { previous, .. } => Some(serde_json::to_string(previous)?),
            _ => None,
        };
        Ok(Self {
            mount_path: event.mount_path().to_string_lossy().into_owned(),
            volume: serde_json::to_string(event.volume())?,
            previous,
        })
    }
}
