// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("invalid mountinfo line: {0}")]
    InvalidMountInfoLine(String),
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
