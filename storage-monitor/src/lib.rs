// SPDX-License-Identifier: GPL-3.0-only

//! Volume monitoring
//!
//! [`VolumeMonitor`] keeps an ordered, deduplicated mirror of the mounted
//! volumes on this host. Every pass enumerates devices and the mount table
//! through a [`VolumeSource`], filters and sorts the result, diffs it against
//! the known state by volume identity and emits exactly one [`VolumeEvent`]
//! per change. Between passes a deletion watcher on each mount path reports
//! vanished volumes early.

pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod monitor;
pub mod reconcile;
pub mod source;

mod state;

pub use config::{IgnoreConfig, MonitorConfig, SortPolicy};
pub use error::{MonitorError, Result};
pub use events::{EventFilter, EventSubscription, MonitorEvent};
pub use monitor::VolumeMonitor;
pub use source::{MountTableScope, SystemVolumeSource, VolumeSource};

pub use storage_sys::{WatchStrategy, WatcherConfig};
pub use storage_types::{Mountpoint, Volume, VolumeEvent, VolumeEventKind};
