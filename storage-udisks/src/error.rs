// SPDX-License-Identifier: GPL-3.0-only

//! Error types for storage-udisks operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiskError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Zbus Error")]
    ZbusError(#[from] zbus::Error),
}
