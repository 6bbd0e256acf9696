// SPDX-License-Identifier: GPL-3.0-only

//! Volume enumeration backends

use anyhow::Result;
use futures::future::BoxFuture;
use storage_types::{DeviceRecord, FilesystemRecord};
use storage_udisks::DiskManager;
use tracing::debug;

/// Supplies the raw records one reconciliation pass works from.
///
/// Both queries run concurrently. A failure in either one skips the pass.
pub trait VolumeSource: Send + Sync {
    /// Block devices that currently have a mounted filesystem
    fn devices(&self) -> BoxFuture<'_, Result<Vec<DeviceRecord>>>;

    /// Mount-table entries, sized
    fn filesystems(&self) -> BoxFuture<'_, Result<Vec<FilesystemRecord>>>;
}

/// Which mount-table entries [`SystemVolumeSource`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountTableScope {
    /// Network shares and loop-mounted images; block devices come from UDisks2
    SharesAndImages,
    /// Every non-pseudo filesystem, used when UDisks2 is unavailable
    All,
}

/// UDisks2 for block devices, `/proc/self/mountinfo` for everything else
#[derive(Clone)]
pub struct SystemVolumeSource {
    manager: Option<DiskManager>,
    scope: MountTableScope,
}

impl SystemVolumeSource {
    /// Without a [`DiskManager`] the mount table is the only source, so it
    /// is read in full.
    pub fn new(manager: Option<DiskManager>) -> Self {
        let scope = if manager.is_some() {
            MountTableScope::SharesAndImages
        } else {
            MountTableScope::All
        };
        Self { manager, scope }
    }

    pub fn scope(&self) -> MountTableScope {
        self.scope
    }
}

impl VolumeSource for SystemVolumeSource {
    fn devices(&self) -> BoxFuture<'_, Result<Vec<DeviceRecord>>> {
        Box::pin(async move {
            match &self.manager {
                Some(manager) => storage_udisks::list_device_records(manager).await,
                None => Ok(Vec::new()),
            }
        })
    }

    fn filesystems(&self) -> BoxFuture<'_, Result<Vec<FilesystemRecord>>> {
        Box::pin(async move {
            let mut records = storage_sys::filesystem_records().await?;
            if self.scope == MountTableScope::SharesAndImages {
                records.retain(is_share_or_image);
            }
            debug!("Mount table reported {} candidate filesystems", records.len());
            Ok(records)
        })
    }
}

fn is_share_or_image(record: &FilesystemRecord) -> bool {
    storage_sys::is_network_fs_type(&record.filesystem_type)
        || record.source.starts_with("/dev/loop")
}
