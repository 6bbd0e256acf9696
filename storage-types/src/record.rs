// SPDX-License-Identifier: GPL-3.0-only

//! Raw enumeration records
//!
//! These are produced by the device and mount-table providers before any
//! filtering or identity assignment happens.

use serde::{Deserialize, Serialize};

/// A mounted filesystem backed by a block device
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Device path (e.g. "/dev/sdb1")
    pub device: String,

    /// Filesystem label
    pub label: String,

    /// Filesystem type (e.g. "vfat")
    pub filesystem_type: String,

    /// Filesystem UUID, empty when the filesystem has none
    pub uuid: String,

    /// First mount point of the filesystem
    pub mount_path: String,

    /// Connection bus (e.g. "usb", "nvme", "loop")
    pub protocol: String,

    /// Physical medium ("hdd", "ssd", "optical", "network" or empty)
    pub medium: String,

    /// Whether the drive or its media is removable
    pub removable: bool,

    /// Drive serial number
    pub serial: String,

    /// Size in bytes, `None` when the provider could not report one
    pub size: Option<u64>,
}

/// An entry of the kernel mount table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilesystemRecord {
    /// Mount source (device node or share, e.g. "nas:/export")
    pub source: String,

    /// Filesystem type (e.g. "nfs4", "cifs")
    pub filesystem_type: String,

    /// Mount point
    pub mount_path: String,

    /// Size in bytes, `None` when statvfs failed or reported zero blocks
    pub size: Option<u64>,
}
