// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use storage_sys::DeletionWatcher;
use storage_types::Volume;

use crate::config::SortPolicy;
use crate::reconcile;

/// The deletion watcher for one known mount path.
///
/// `generation` tells a late callback apart from the watcher that currently
/// owns the path after a rename or remount recreated it.
pub(crate) struct WatchEntry {
    pub generation: u64,
    pub watcher: DeletionWatcher,
}

/// Known volumes and their deletion watchers, keyed by mount path.
///
/// Both maps always hold the same keys.
#[derive(Default)]
pub(crate) struct MonitorState {
    volumes: HashMap<PathBuf, Volume>,
    watchers: HashMap<PathBuf, WatchEntry>,
    next_generation: u64,
}

impl MonitorState {
    pub fn volumes(&self) -> &HashMap<PathBuf, Volume> {
        &self.volumes
    }

    pub fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub fn insert(&mut self, volume: Volume, entry: WatchEntry) {
        let path = volume.mount_path.clone();
        if let Some(previous) = self.watchers.insert(path.clone(), entry) {
            previous.watcher.stop();
        }
        self.volumes.insert(path, volume);
    }

    /// Remove the volume at `path` and stop its watcher.
    pub fn remove(&mut self, path: &Path) -> Option<Volume> {
        if let Some(entry) = self.watchers.remove(path) {
            entry.watcher.stop();
        }
        self.volumes.remove(path)
    }

    /// Whether the watcher registered at `path` is the one from `generation`.
    pub fn is_current(&self, path: &Path, generation: u64) -> bool {
        self.watchers
            .get(path)
            .is_some_and(|entry| entry.generation == generation)
    }

    /// Whether the volume at `path` is known but no longer watched, after a
    /// watch setup failure or a callback that never reached the monitor.
    pub fn is_unwatched(&self, path: &Path) -> bool {
        self.watchers
            .get(path)
            .is_some_and(|entry| entry.watcher.is_stopped())
    }

    pub fn get(&self, path: &Path) -> Option<&Volume> {
        self.volumes.get(path)
    }

    #[cfg(test)]
    pub fn stop_watcher(&self, path: &Path) {
        if let Some(entry) = self.watchers.get(path) {
            entry.watcher.stop();
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.volumes.contains_key(path)
    }

    pub fn sorted(&self, policy: SortPolicy) -> Vec<Volume> {
        let mut volumes: Vec<Volume> = self.volumes.values().cloned().collect();
        reconcile::sort_volumes(&mut volumes, policy);
        volumes
    }

    /// The volume whose mount path is the longest prefix of `path`.
    pub fn lookup(&self, path: &Path) -> Option<&Volume> {
        self.volumes
            .values()
            .filter(|volume| volume.contains(path))
            .max_by_key(|volume| (volume.depth(), volume.mount_path.as_os_str().len()))
    }

    /// Stop every watcher and forget all volumes.
    pub fn clear(&mut self) {
        for (_, entry) in self.watchers.drain() {
            entry.watcher.stop();
        }
        self.volumes.clear();
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }
}
