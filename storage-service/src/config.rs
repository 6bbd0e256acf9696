// SPDX-License-Identifier: GPL-3.0-only

//! Service configuration file
//!
//! ```toml
//! bus = "session"
//! hotplug = true
//!
//! [monitor]
//! interval_ms = 10000
//! sort = "platform"
//!
//! [monitor.watcher]
//! strategy = "ancestors"
//!
//! [monitor.ignore]
//! prefixes = ["/var/lib/docker/"]
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use storage_monitor::MonitorConfig;

/// Which message bus the monitor interface is published on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Session,
    System,
    /// Run without publishing anything
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bus: BusKind,

    /// Run a pass whenever UDisks2 reports a block device or filesystem
    /// appearing or going away
    pub hotplug: bool,

    pub monitor: MonitorConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bus: BusKind::Session,
            hotplug: true,
            monitor: MonitorConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("Invalid configuration")?;
        config.monitor.validate()?;
        Ok(config)
    }

    /// Load `path`, or the defaults when no path is given or the file does
    /// not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        match std::fs::read_to_string(path) {
            Ok(input) => Self::from_toml_str(&input)
                .with_context(|| format!("Failed to load {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use storage_monitor::{SortPolicy, WatchStrategy};

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert!(config.hotplug);
        assert_eq!(ServiceConfig::load(None).unwrap(), ServiceConfig::default());
    }

    #[test]
    fn nested_monitor_tables_are_read() {
        let config = ServiceConfig::from_toml_str(
            r#"
bus = "none"
hotplug = false

[monitor]
interval_ms = 3000
sort = "label"

[monitor.watcher]
strategy = "polling"
"#,
        )
        .unwrap();

        assert_eq!(config.bus, BusKind::None);
        assert!(!config.hotplug);
        assert_eq!(config.monitor.interval_ms, 3000);
        assert_eq!(config.monitor.sort, SortPolicy::Label);
        assert_eq!(config.monitor.watcher.strategy, WatchStrategy::Polling);
        assert_eq!(config.monitor.watcher.poll_interval_ms, 5000);
    }

    #[test]
    fn invalid_files_are_startup_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(&path, "bus = \"carrier-pigeon\"").unwrap();
        assert!(ServiceConfig::load(Some(&path)).is_err());

        std::fs::write(&path, "[monitor]\ninterval_ms = 0").unwrap();
        assert!(ServiceConfig::load(Some(&path)).is_err());
    }
}
