// SPDX-License-Identifier: GPL-3.0-only

//! Device event monitoring
//!
//! - DiskManager owning the system bus connection
//! - Block device add/remove event streams

pub mod disk_manager;

pub use disk_manager::*;
