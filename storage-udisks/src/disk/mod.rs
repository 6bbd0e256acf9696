// SPDX-License-Identifier: GPL-3.0-only

//! Block device discovery

pub mod discovery;
