// SPDX-License-Identifier: GPL-3.0-only

//! Volume change events

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Volume;

/// A single detected change to the set of mounted volumes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum VolumeEvent {
    Mounted { volume: Volume },
    Unmounted { volume: Volume },
    Renamed { volume: Volume, previous: Volume },
}

/// Discriminant of [`VolumeEvent`], used for filtered subscriptions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VolumeEventKind {
    Mounted,
    Unmounted,
    Renamed,
}

impl VolumeEvent {
    pub fn kind(&self) -> VolumeEventKind {
        match self {
            VolumeEvent::Mounted { .. } => VolumeEventKind::Mounted,
            VolumeEvent::Unmounted { .. } => VolumeEventKind::Unmounted,
            VolumeEvent::Renamed { .. } => VolumeEventKind::Renamed,
        }
    }

    /// The volume as it is after the event.
    ///
    /// For `Unmounted` this is the volume that went away.
    pub fn volume(&self) -> &Volume {
        match self {
            VolumeEvent::Mounted { volume }
            | VolumeEvent::Unmounted { volume }
            | VolumeEvent::Renamed { volume, .. } => volume,
        }
    }

    pub fn mount_path(&self) -> &Path {
        &self.volume().mount_path
    }
}

impl std::fmt::Display for VolumeEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeEventKind::Mounted => write!(f, "mounted"),
            VolumeEventKind::Unmounted => write!(f, "unmounted"),
            VolumeEventKind::Renamed => write!(f, "renamed"),
        }
    }
}
