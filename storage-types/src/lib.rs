// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for volume monitoring
//!
//! These types are shared by every layer of the stack:
//!
//! - **storage-udisks** / **storage-sys**: produce raw [`DeviceRecord`] and
//!   [`FilesystemRecord`] values from UDisks2 and the kernel mount table
//! - **storage-monitor**: turns raw records into [`Volume`] values and emits
//!   [`VolumeEvent`]s when the set of mounted volumes changes
//! - **storage-service**: serializes volumes and events for D-Bus clients

pub mod event;
pub mod record;
pub mod volume;

pub use event::{VolumeEvent, VolumeEventKind};
pub use record::{DeviceRecord, FilesystemRecord};
pub use volume::{Mountpoint, UNTITLED_LABEL, Volume};
