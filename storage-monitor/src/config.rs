// SPDX-License-Identifier: GPL-3.0-only

//! Monitor configuration
//!
//! Loaded from the `[monitor]` table of the service TOML file. Every field
//! has a default, so an empty table is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use storage_sys::WatcherConfig;

use crate::error::{MonitorError, Result};
use crate::reconcile::canonical_mount_path;

/// Minimum accepted refresh interval.
const MIN_INTERVAL_MS: u64 = 100;

/// Mount paths that never surface as volumes on this platform.
#[cfg(target_os = "linux")]
const BUILTIN_IGNORED_PATHS: &[&str] = &["", "[SWAP]", "/boot", "/boot/efi", "/efi"];
#[cfg(target_os = "macos")]
const BUILTIN_IGNORED_PATHS: &[&str] = &["", "/private/var/vm"];
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const BUILTIN_IGNORED_PATHS: &[&str] = &[""];

/// Mount path prefixes whose volumes never surface on this platform.
#[cfg(target_os = "linux")]
const BUILTIN_IGNORED_PREFIXES: &[&str] = &[
    "/snap/",
    "/var/snap/",
    "/var/lib/snapd/",
    "/run/credentials/",
];
#[cfg(target_os = "macos")]
const BUILTIN_IGNORED_PREFIXES: &[&str] = &["/System/Volumes/"];
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const BUILTIN_IGNORED_PREFIXES: &[&str] = &[];

/// Ordering of volumes in state snapshots and within each event batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortPolicy {
    /// Label on macOS and Windows, mount path elsewhere
    #[default]
    Platform,
    Label,
    MountPath,
}

impl SortPolicy {
    /// Replace [`SortPolicy::Platform`] with the concrete order for this OS.
    pub fn resolve(self) -> Self {
        match self {
            SortPolicy::Platform => {
                if cfg!(any(target_os = "macos", target_os = "windows")) {
                    SortPolicy::Label
                } else {
                    SortPolicy::MountPath
                }
            }
            other => other,
        }
    }
}

/// Extra mount paths to ignore on top of the built-in list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Exact mount paths
    pub paths: Vec<String>,

    /// Mount path prefixes, matched as plain string prefixes
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Period of scheduled reconciliation passes
    pub interval_ms: u64,

    pub watcher: WatcherConfig,

    pub sort: SortPolicy,

    pub ignore: IgnoreConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            watcher: WatcherConfig::default(),
            sort: SortPolicy::Platform,
            ignore: IgnoreConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_ms < MIN_INTERVAL_MS {
            return Err(MonitorError::Config(format!(
                "interval_ms must be at least {MIN_INTERVAL_MS}, got {}",
                self.interval_ms
            )));
        }
        if self.watcher.poll_interval_ms == 0 {
            return Err(MonitorError::Config(
                "watcher.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.ignore.prefixes.iter().any(|p| p.is_empty()) {
            return Err(MonitorError::Config(
                "ignore.prefixes must not contain an empty prefix".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| MonitorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    /// The built-in ignore list merged with the configured entries.
    pub fn ignore_list(&self) -> IgnoreList {
        let mut paths: Vec<String> = BUILTIN_IGNORED_PATHS
            .iter()
            .map(|p| p.to_string())
            .collect();
        paths.extend(self.ignore.paths.iter().map(|p| canonical_string(p)));

        let mut prefixes: Vec<String> = BUILTIN_IGNORED_PREFIXES
            .iter()
            .map(|p| p.to_string())
            .collect();
        prefixes.extend(self.ignore.prefixes.iter().cloned());

        IgnoreList { paths, prefixes }
    }
}

/// Resolved set of mount paths excluded from monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    paths: Vec<String>,
    prefixes: Vec<String>,
}

impl IgnoreList {
    /// Matches the normalized form of `mount_path`, so `/boot/` and `//boot`
    /// are ignored like `/boot`.
    pub fn is_ignored(&self, mount_path: &str) -> bool {
        let mount_path = canonical_string(mount_path);
        self.paths.iter().any(|p| *p == mount_path)
            || self.prefixes.iter().any(|p| mount_path.starts_with(p.as_str()))
    }
}

fn canonical_string(mount_path: &str) -> String {
    canonical_mount_path(mount_path).to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use storage_sys::WatchStrategy;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = MonitorConfig::from_toml_str("").unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.interval(), Duration::from_secs(10));
    }

    #[test]
    fn parses_all_sections() {
        let config = MonitorConfig::from_toml_str(
            r#"
interval_ms = 2500
sort = "mount-path"

[watcher]
strategy = "polling"
poll_interval_ms = 750

[ignore]
paths = ["/mnt/scratch"]
prefixes = ["/var/lib/docker/"]
"#,
        )
        .unwrap();

        assert_eq!(config.interval_ms, 2500);
        assert_eq!(config.sort, SortPolicy::MountPath);
        assert_eq!(config.watcher.strategy, WatchStrategy::Polling);
        assert_eq!(config.watcher.poll_interval_ms, 750);

        let ignore = config.ignore_list();
        assert!(ignore.is_ignored("/mnt/scratch"));
        assert!(ignore.is_ignored("/var/lib/docker/overlay2/abc"));
        assert!(!ignore.is_ignored("/mnt/scratch2"));
    }

    #[test]
    fn rejects_tiny_intervals_and_unknown_sort() {
        assert!(matches!(
            MonitorConfig::from_toml_str("interval_ms = 5"),
            Err(MonitorError::Config(_))
        ));
        assert!(matches!(
            MonitorConfig::from_toml_str("sort = \"size\""),
            Err(MonitorError::Config(_))
        ));
        assert!(matches!(
            MonitorConfig::from_toml_str("[ignore]\nprefixes = [\"\"]"),
            Err(MonitorError::Config(_))
        ));
    }

    #[test]
    fn builtin_ignores_always_apply() {
        let ignore = MonitorConfig::default().ignore_list();
        assert!(ignore.is_ignored(""));
        #[cfg(target_os = "linux")]
        {
            assert!(ignore.is_ignored("/boot/efi"));
            assert!(ignore.is_ignored("/snap/core22/1380"));
            assert!(!ignore.is_ignored("/media/user/USB"));
        }
    }

    #[test]
    fn ignored_paths_match_after_normalization() {
        let config = MonitorConfig::from_toml_str("[ignore]\npaths = [\"/mnt/scratch/\"]").unwrap();
        let ignore = config.ignore_list();
        assert!(ignore.is_ignored("/mnt/scratch"));
        assert!(ignore.is_ignored("/mnt//scratch/"));
        assert!(!ignore.is_ignored("/mnt/scratch2"));
        #[cfg(target_os = "linux")]
        {
            assert!(ignore.is_ignored("/boot/"));
            assert!(ignore.is_ignored("//boot/efi"));
        }
    }

    #[test]
    fn platform_sort_resolves_to_a_concrete_policy() {
        assert_ne!(SortPolicy::Platform.resolve(), SortPolicy::Platform);
        assert_eq!(SortPolicy::Label.resolve(), SortPolicy::Label);
    }
}
