// SPDX-License-Identifier: GPL-3.0-only

//! Mounted filesystem discovery - builds storage_types::DeviceRecord directly from UDisks2.

use std::collections::HashMap;

use anyhow::Result;
use storage_types::DeviceRecord;
use tracing::debug;
use udisks2::{
    block::BlockProxy,
    drive::{DriveProxy, RotationRate},
    filesystem::FilesystemProxy,
};
use zbus::Connection;
use zbus::zvariant::OwnedObjectPath;

use crate::dbus::bytestring as bs;
use crate::manager::{DiskManager, UDisks2ManagerProxy};

/// Drive-level properties shared by every filesystem on the drive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DriveDetails {
    model: String,
    vendor: String,
    serial: String,
    removable: bool,
    optical: bool,
    medium: String,
}

/// One record per block device that currently has a mounted filesystem.
///
/// Blocks flagged `HintIgnore` are skipped, as are blocks that fail to
/// answer (they are usually vanishing mid-enumeration).
pub async fn list_device_records(manager: &DiskManager) -> Result<Vec<DeviceRecord>> {
    let connection = manager.connection();
    let manager_proxy = UDisks2ManagerProxy::new(connection).await?;
    let block_paths = manager_proxy.get_block_devices(HashMap::new()).await?;

    let mut records = Vec::new();
    for path in block_paths {
        match device_record(connection, &path).await {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e) => debug!("Skipping block {}: {e}", path.as_str()),
        }
    }

    debug!("UDisks2 reported {} mounted filesystems", records.len());
    Ok(records)
}

async fn device_record(
    connection: &Connection,
    block_path: &OwnedObjectPath,
) -> Result<Option<DeviceRecord>> {
    let block_proxy = BlockProxy::builder(connection)
        .path(block_path)?
        .build()
        .await?;

    if block_proxy.hint_ignore().await.unwrap_or(false) {
        return Ok(None);
    }

    let Some(mount_path) = first_mount_point(connection, block_path).await else {
        return Ok(None);
    };

    let device = block_device_path(&block_proxy, block_path).await?;
    let backing_file = loop_backing_file(connection, block_path).await;
    let is_loop = backing_file.is_some() || device.starts_with("/dev/loop");

    let drive = match drive_path_for_block(connection, &block_proxy).await {
        Some(drive_path) => drive_details(connection, &drive_path).await?,
        None => DriveDetails::default(),
    };

    let size = block_proxy.size().await.ok().filter(|size| *size > 0);

    Ok(Some(DeviceRecord {
        protocol: infer_connection_bus(
            &device,
            &drive.model,
            &drive.vendor,
            is_loop,
            drive.optical,
        ),
        device,
        label: block_proxy.id_label().await.unwrap_or_default(),
        filesystem_type: block_proxy.id_type().await.unwrap_or_default(),
        uuid: block_proxy.id_uuid().await.unwrap_or_default(),
        mount_path,
        medium: drive.medium,
        removable: drive.removable,
        serial: drive.serial,
        size,
    }))
}

async fn first_mount_point(
    connection: &Connection,
    block_path: &OwnedObjectPath,
) -> Option<String> {
    let proxy = FilesystemProxy::builder(connection)
        .path(block_path)
        .ok()?
        .build()
        .await
        .ok()?;

    // Fails when the block has no Filesystem interface.
    let mount_points = proxy.mount_points().await.ok()?;
    bs::decode_mount_points(mount_points).into_iter().next()
}

/// The drive object behind a block, following one level of crypto backing
/// so unlocked LUKS cleartext devices report their physical drive.
async fn drive_path_for_block(
    connection: &Connection,
    block_proxy: &BlockProxy<'_>,
) -> Option<OwnedObjectPath> {
    if let Ok(drive_path) = block_proxy.drive().await
        && drive_path.as_str() != "/"
    {
        return Some(drive_path);
    }

    let backing = block_proxy.crypto_backing_device().await.ok()?;
    if backing.as_str() == "/" {
        return None;
    }

    let backing_proxy = BlockProxy::builder(connection)
        .path(&backing)
        .ok()?
        .build()
        .await
        .ok()?;
    backing_proxy
        .drive()
        .await
        .ok()
        .filter(|drive_path| drive_path.as_str() != "/")
}

async fn drive_details(
    connection: &Connection,
    drive_path: &OwnedObjectPath,
) -> Result<DriveDetails> {
    let drive_proxy = DriveProxy::builder(connection)
        .path(drive_path)?
        .build()
        .await?;

    let optical = drive_proxy.optical().await.unwrap_or(false);
    let medium = if optical {
        "optical".to_string()
    } else {
        match drive_proxy.rotation_rate().await {
            Ok(RotationRate::Rotating(_)) => "hdd".to_string(),
            Ok(RotationRate::NonRotating) => "ssd".to_string(),
            Ok(RotationRate::Unknown) | Err(_) => String::new(),
        }
    };

    let removable = drive_proxy.removable().await.unwrap_or(false)
        || drive_proxy.media_removable().await.unwrap_or(false);

    Ok(DriveDetails {
        model: drive_proxy.model().await.unwrap_or_default(),
        vendor: drive_proxy.vendor().await.unwrap_or_default(),
        serial: drive_proxy.serial().await.unwrap_or_default(),
        removable,
        optical,
        medium,
    })
}

async fn block_device_path(
    block_proxy: &BlockProxy<'_>,
    block_path: &OwnedObjectPath,
) -> Result<String> {
    let preferred = bs::decode_c_string_bytes(
        &block_proxy
            .preferred_device()
            .await
            .map_err(anyhow::Error::msg)?,
    );
    let device = if preferred.is_empty() {
        bs::decode_c_string_bytes(&block_proxy.device().await.map_err(anyhow::Error::msg)?)
    } else {
        preferred
    };
    Ok(if device.is_empty() {
        block_path.to_string()
    } else {
        device
    })
}

async fn loop_backing_file(
    connection: &Connection,
    block_path: &OwnedObjectPath,
) -> Option<String> {
    let proxy = zbus::Proxy::new(
        connection,
        "org.freedesktop.UDisks2",
        block_path.as_str(),
        "org.freedesktop.UDisks2.Loop",
    )
    .await
    .ok()?;

    let bytes = proxy.get_property::<Vec<u8>>("BackingFile").await.ok()?;
    let backing = bs::decode_c_string_bytes(&bytes);
    (!backing.trim().is_empty()).then_some(backing)
}

fn infer_connection_bus(
    device_path: &str,
    model: &str,
    vendor: &str,
    is_loop: bool,
    optical: bool,
) -> String {
    if is_loop {
        return "loop".to_string();
    }

    let path_lower = device_path.to_lowercase();
    let model_lower = model.to_lowercase();
    let vendor_lower = vendor.to_lowercase();

    if path_lower.contains("nvme") {
        return "nvme".to_string();
    }
    if path_lower.contains("mmcblk") {
        return "mmc".to_string();
    }
    if path_lower.starts_with("/dev/sr") || optical {
        return "optical".to_string();
    }
    if model_lower.contains("usb") || vendor_lower.contains("usb") {
        return "usb".to_string();
    }

    "ata".to_string()
}
