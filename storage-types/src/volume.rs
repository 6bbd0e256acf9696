// SPDX-License-Identifier: GPL-3.0-only

//! Mounted volume model

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Label shown (and sorted on) for volumes without one.
pub const UNTITLED_LABEL: &str = "Untitled";

/// A single place a volume is attached
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mountpoint {
    pub path: PathBuf,
    pub label: String,
}

/// One mounted storage resource: a block device filesystem or a network share
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    // === Identity ===
    /// Stable UUID for this volume, survives relabeling
    pub identity: String,

    /// Backing device (e.g. "/dev/sdb1") or share source (e.g. "nas:/export")
    pub device: String,

    /// Serial number of the backing drive, empty when unknown
    pub serial: String,

    // === Presentation ===
    /// Filesystem label, may be empty
    pub label: String,

    /// Filesystem type (e.g. "ext4", "nfs4")
    pub filesystem_type: String,

    // === Mount ===
    /// Canonical absolute mount path
    pub mount_path: PathBuf,

    /// Always holds exactly one entry mirroring `mount_path` and `label`
    pub mountpoints: Vec<Mountpoint>,

    // === Physical Properties ===
    /// Transport protocol (e.g. "usb", "nvme", "nfs4")
    pub protocol: String,

    /// Whether the backing medium can be removed
    pub removable: bool,

    /// Total size in bytes
    pub size: u64,
}

impl Volume {
    /// Label for display, falling back to [`UNTITLED_LABEL`].
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            UNTITLED_LABEL
        } else {
            &self.label
        }
    }

    /// Whether `path` is the mount path or lies below it.
    ///
    /// Matching is component-wise, so `/media/disk2` is not inside `/media/disk`.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.mount_path)
    }

    /// Number of components in the mount path, used to prefer nested mounts.
    pub fn depth(&self) -> usize {
        self.mount_path.components().count()
    }
}
