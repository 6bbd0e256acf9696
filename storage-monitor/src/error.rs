// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Error types for volume monitoring
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The device or mount table query failed; the pass was skipped.
    #[error("volume enumeration failed: {0:#}")]
    Enumeration(#[from] anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
