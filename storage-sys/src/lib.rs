// SPDX-License-Identifier: GPL-3.0-only

//! Low-level filesystem operations for volume monitoring
//!
//! This crate talks to the kernel directly rather than through D-Bus:
//! - Existence probes for directories (`probe`)
//! - Deletion watchers that fire when a directory or any of its ancestors
//!   disappears (`watch`)
//! - The kernel mount table and filesystem sizes (`mounts`)

pub mod error;
pub mod mounts;
pub mod probe;
pub mod watch;

pub use error::{Result, SysError};
pub use mounts::{filesystem_records, filesystem_size, is_network_fs_type, parse_mountinfo};
pub use probe::{PathKind, is_directory, probe, probe_now};
pub use watch::{CompleteOnce, DeletionWatcher, WatchStrategy, WatcherConfig};
