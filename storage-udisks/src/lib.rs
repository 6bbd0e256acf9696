// SPDX-License-Identifier: GPL-3.0-only

//! UDisks2 access for volume monitoring
//!
//! - `disk`: enumerate mounted block-device filesystems as raw
//!   [`storage_types::DeviceRecord`]s
//! - `manager`: system bus connection and block device hotplug signals

mod dbus;

pub mod disk;
pub mod error;
pub mod manager;

pub use disk::discovery::list_device_records;
pub use error::DiskError;
pub use manager::{DeviceEvent, DeviceEventStream, DiskManager};
