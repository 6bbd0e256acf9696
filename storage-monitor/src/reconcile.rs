// SPDX-License-Identifier: GPL-3.0-only

//! Pure reconciliation steps
//!
//! Everything here is a function of its inputs: the same raw records and
//! the same prior state always produce the same candidates and the same
//! ordered events. The monitor owns the I/O around these steps.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use storage_types::{
    DeviceRecord, FilesystemRecord, Mountpoint, UNTITLED_LABEL, Volume, VolumeEvent,
};

use crate::config::{IgnoreList, SortPolicy};
use crate::identity;

/// Device protocols that mean the filesystem lives in an image file.
const DISK_IMAGE_PROTOCOLS: &[&str] = &["loop", "disk image", "virtual", "file"];

/// Filter, map, sort and deduplicate one pass worth of raw records.
///
/// Device records win over mount-table entries at the same mount path. When
/// two candidates share an identity or a mount path, the first in sort
/// order is kept.
pub fn build_candidates(
    devices: Vec<DeviceRecord>,
    filesystems: Vec<FilesystemRecord>,
    ignore: &IgnoreList,
    sort: SortPolicy,
) -> Vec<Volume> {
    let devices: Vec<DeviceRecord> = devices
        .into_iter()
        .filter(|record| keep_device(record, ignore))
        .collect();

    let covered: HashSet<PathBuf> = devices
        .iter()
        .map(|record| canonical_mount_path(&record.mount_path))
        .collect();

    let mut candidates: Vec<Volume> = devices.iter().map(device_volume).collect();
    candidates.extend(
        filesystems
            .iter()
            .filter(|record| !ignore.is_ignored(&record.mount_path) && record.size.is_some())
            .filter(|record| !covered.contains(&canonical_mount_path(&record.mount_path)))
            .map(share_volume),
    );

    sort_volumes(&mut candidates, sort);
    dedupe(candidates)
}

fn keep_device(record: &DeviceRecord, ignore: &IgnoreList) -> bool {
    !ignore.is_ignored(&record.mount_path)
        && record.size.is_some()
        && !record.medium.eq_ignore_ascii_case("network")
        && !is_disk_image_protocol(&record.protocol)
}

fn is_disk_image_protocol(protocol: &str) -> bool {
    DISK_IMAGE_PROTOCOLS
        .iter()
        .any(|p| protocol.eq_ignore_ascii_case(p))
}

/// Lexically normalized absolute form of a reported mount path.
///
/// Collapses repeated and trailing separators without touching the
/// filesystem; mount points are already resolved by the kernel.
pub fn canonical_mount_path(mount_path: &str) -> PathBuf {
    Path::new(mount_path).components().collect()
}

fn device_volume(record: &DeviceRecord) -> Volume {
    let mount_path = canonical_mount_path(&record.mount_path);
    Volume {
        identity: identity::device_identity(record),
        device: record.device.clone(),
        serial: record.serial.clone(),
        label: record.label.clone(),
        filesystem_type: record.filesystem_type.clone(),
        mountpoints: vec![Mountpoint {
            path: mount_path.clone(),
            label: record.label.clone(),
        }],
        mount_path,
        protocol: record.protocol.clone(),
        removable: record.removable,
        size: record.size.unwrap_or_default(),
    }
}

/// Shares have no filesystem label; the last mount path component stands in.
fn share_volume(record: &FilesystemRecord) -> Volume {
    let mount_path = canonical_mount_path(&record.mount_path);
    let label = mount_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Volume {
        identity: identity::share_identity(&mount_path.to_string_lossy()),
        device: record.source.clone(),
        serial: String::new(),
        label: label.clone(),
        filesystem_type: record.filesystem_type.clone(),
        mountpoints: vec![Mountpoint {
            path: mount_path.clone(),
            label,
        }],
        mount_path,
        protocol: record.filesystem_type.clone(),
        removable: false,
        size: record.size.unwrap_or_default(),
    }
}

/// Sort in place, case-insensitively, per `policy`.
///
/// Ties fall back to the exact mount path and then the identity so the
/// order is total.
pub fn sort_volumes(volumes: &mut [Volume], policy: SortPolicy) {
    let policy = policy.resolve();
    volumes.sort_by(|a, b| compare(a, b, policy));
}

fn compare(a: &Volume, b: &Volume, policy: SortPolicy) -> Ordering {
    let primary = match policy {
        SortPolicy::Label => sort_label(a).cmp(&sort_label(b)),
        _ => sort_path(a).cmp(&sort_path(b)),
    };
    primary
        .then_with(|| a.mount_path.cmp(&b.mount_path))
        .then_with(|| a.identity.cmp(&b.identity))
}

fn sort_label(volume: &Volume) -> String {
    if volume.label.is_empty() {
        UNTITLED_LABEL.to_lowercase()
    } else {
        volume.label.to_lowercase()
    }
}

fn sort_path(volume: &Volume) -> String {
    volume.mount_path.to_string_lossy().to_lowercase()
}

fn dedupe(candidates: Vec<Volume>) -> Vec<Volume> {
    let mut identities = HashSet::new();
    let mut paths = HashSet::new();
    candidates
        .into_iter()
        .filter(|volume| {
            if identities.contains(&volume.identity) || paths.contains(&volume.mount_path) {
                tracing::debug!(
                    "Dropping duplicate volume {} at {:?}",
                    volume.identity,
                    volume.mount_path
                );
                return false;
            }
            identities.insert(volume.identity.clone());
            paths.insert(volume.mount_path.clone());
            true
        })
        .collect()
}

/// Whether `candidate` is already known with the same identity at the same
/// path. Unknown candidates need an existence probe before they mount.
pub fn is_known(prior: &HashMap<PathBuf, Volume>, candidate: &Volume) -> bool {
    prior
        .get(&candidate.mount_path)
        .is_some_and(|known| known.identity == candidate.identity)
}

/// Diff sorted `candidates` against `prior` by identity.
///
/// Unmounts come first, in `policy` order over the prior volumes, followed by
/// mounts and renames in candidate order. A candidate that is not yet known
/// only yields `Mounted` when its path is in `confirmed`. The same identity
/// at a different mount path is reported as an unmount and a mount.
pub fn diff(
    prior: &HashMap<PathBuf, Volume>,
    candidates: &[Volume],
    confirmed: &HashSet<PathBuf>,
    policy: SortPolicy,
) -> Vec<VolumeEvent> {
    let by_identity: HashMap<&str, &Volume> = candidates
        .iter()
        .map(|volume| (volume.identity.as_str(), volume))
        .collect();

    let mut previous: Vec<Volume> = prior.values().cloned().collect();
    sort_volumes(&mut previous, policy);

    let mut events: Vec<VolumeEvent> = previous
        .into_iter()
        .filter(|old| {
            by_identity
                .get(old.identity.as_str())
                .is_none_or(|new| new.mount_path != old.mount_path)
        })
        .map(|volume| VolumeEvent::Unmounted { volume })
        .collect();

    for candidate in candidates {
        match prior.get(&candidate.mount_path) {
            Some(old) if old.identity == candidate.identity => {
                if old.label != candidate.label {
                    events.push(VolumeEvent::Renamed {
                        volume: candidate.clone(),
                        previous: old.clone(),
                    });
                }
            }
            _ => {
                if confirmed.contains(&candidate.mount_path) {
                    events.push(VolumeEvent::Mounted {
                        volume: candidate.clone(),
                    });
                }
            }
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use storage_types::VolumeEventKind;

    use super::*;
    use crate::config::MonitorConfig;

    const BACKUP_UUID: &str = "0b9f1c44-7d0e-4c52-9d1b-0f6a2f1c8e01";

    fn device(mount_path: &str, label: &str, uuid: &str) -> DeviceRecord {
        DeviceRecord {
            device: "/dev/sdb1".to_string(),
            label: label.to_string(),
            filesystem_type: "exfat".to_string(),
            uuid: uuid.to_string(),
            mount_path: mount_path.to_string(),
            protocol: "usb".to_string(),
            medium: "ssd".to_string(),
            removable: true,
            serial: "S1".to_string(),
            size: Some(64 << 30),
        }
    }

    fn share(mount_path: &str, fs_type: &str) -> FilesystemRecord {
        FilesystemRecord {
            source: "nas:/export".to_string(),
            filesystem_type: fs_type.to_string(),
            mount_path: mount_path.to_string(),
            size: Some(1 << 40),
        }
    }

    fn build(devices: Vec<DeviceRecord>, filesystems: Vec<FilesystemRecord>) -> Vec<Volume> {
        let ignore = MonitorConfig::default().ignore_list();
        build_candidates(devices, filesystems, &ignore, SortPolicy::MountPath)
    }

    fn state(volumes: &[Volume]) -> HashMap<PathBuf, Volume> {
        volumes
            .iter()
            .map(|v| (v.mount_path.clone(), v.clone()))
            .collect()
    }

    fn all_paths(volumes: &[Volume]) -> HashSet<PathBuf> {
        volumes.iter().map(|v| v.mount_path.clone()).collect()
    }

    fn kinds(events: &[VolumeEvent]) -> Vec<(VolumeEventKind, PathBuf)> {
        events
            .iter()
            .map(|e| (e.kind(), e.mount_path().to_path_buf()))
            .collect()
    }

    #[test]
    fn filters_unsized_ignored_network_and_image_devices() {
        let mut no_size = device("/media/a", "A", "");
        no_size.size = None;
        let mut network = device("/media/b", "B", "");
        network.medium = "network".to_string();
        let mut image = device("/media/c", "C", "");
        image.protocol = "loop".to_string();
        let boot = device("/boot", "Boot", "");
        let kept = device("/media/d", "D", "");

        let candidates = build(vec![no_size, network, image, boot, kept], Vec::new());
        let paths: Vec<_> = candidates.iter().map(|v| v.mount_path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/media/d")]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn ignore_list_applies_to_unnormalized_mount_paths() {
        let candidates = build(
            vec![device("/boot/", "Boot", ""), device("/media/d", "D", "")],
            vec![share("//boot/efi/", "vfat")],
        );
        let paths: Vec<_> = candidates.iter().map(|v| v.mount_path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/media/d")]);
    }

    #[test]
    fn devices_take_precedence_over_mount_table_entries() {
        let candidates = build(
            vec![device("/media/usb/", "USB", BACKUP_UUID)],
            vec![share("/media/usb", "exfat"), share("/mnt/nas", "nfs4")],
        );

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].mount_path, PathBuf::from("/media/usb"));
        assert_eq!(candidates[0].identity, BACKUP_UUID);
        assert_eq!(candidates[1].mount_path, PathBuf::from("/mnt/nas"));
        assert_eq!(candidates[1].label, "nas");
        assert_eq!(candidates[1].protocol, "nfs4");
        assert_eq!(candidates[1].identity, identity::share_identity("/mnt/nas"));
    }

    #[test]
    fn label_sort_is_case_insensitive_with_untitled_for_empty_labels() {
        let mut volumes = build(
            vec![
                device("/media/1", "zeta", "11111111-1111-1111-1111-111111111111"),
                device("/media/2", "", "22222222-2222-2222-2222-222222222222"),
                device("/media/3", "Alpha", "33333333-3333-3333-3333-333333333333"),
                device("/media/4", "tango", "44444444-4444-4444-4444-444444444444"),
            ],
            Vec::new(),
        );
        sort_volumes(&mut volumes, SortPolicy::Label);

        let labels: Vec<_> = volumes.iter().map(|v| v.display_label()).collect();
        assert_eq!(labels, vec!["Alpha", "tango", "Untitled", "zeta"]);
    }

    #[test]
    fn duplicates_keep_the_first_in_sort_order() {
        let candidates = build(
            vec![
                device("/media/b", "B", BACKUP_UUID),
                device("/media/a", "A", BACKUP_UUID),
            ],
            Vec::new(),
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].mount_path, PathBuf::from("/media/a"));
    }

    #[test]
    fn empty_prior_mounts_every_confirmed_candidate_in_order() {
        let candidates = build(
            vec![
                device("/media/z", "Z", "11111111-1111-1111-1111-111111111111"),
                device("/media/a", "A", "22222222-2222-2222-2222-222222222222"),
            ],
            vec![share("/mnt/nas", "cifs")],
        );

        let events = diff(
            &HashMap::new(),
            &candidates,
            &all_paths(&candidates),
            SortPolicy::MountPath,
        );
        assert_eq!(
            kinds(&events),
            vec![
                (VolumeEventKind::Mounted, PathBuf::from("/media/a")),
                (VolumeEventKind::Mounted, PathBuf::from("/media/z")),
                (VolumeEventKind::Mounted, PathBuf::from("/mnt/nas")),
            ]
        );
    }

    #[test]
    fn unconfirmed_candidates_are_not_mounted() {
        let candidates = build(vec![device("/media/a", "A", BACKUP_UUID)], Vec::new());
        let events = diff(&HashMap::new(), &candidates, &HashSet::new(), SortPolicy::MountPath);
        assert!(events.is_empty());
    }

    #[test]
    fn identical_snapshot_produces_no_events() {
        let candidates = build(
            vec![device("/media/a", "A", BACKUP_UUID)],
            vec![share("/mnt/nas", "nfs")],
        );
        let prior = state(&candidates);
        let events = diff(&prior, &candidates, &all_paths(&candidates), SortPolicy::MountPath);
        assert!(events.is_empty());
    }

    #[test]
    fn label_change_is_a_single_rename() {
        let before = build(vec![device("/Volumes/Backup", "Backup", BACKUP_UUID)], Vec::new());
        let after = build(vec![device("/Volumes/Backup", "MyBackup", BACKUP_UUID)], Vec::new());

        let events = diff(&state(&before), &after, &all_paths(&after), SortPolicy::MountPath);
        assert_eq!(events.len(), 1);
        match &events[0] {
            VolumeEvent::Renamed { volume, previous } => {
                assert_eq!(volume.label, "MyBackup");
                assert_eq!(previous.label, "Backup");
                assert_eq!(volume.identity, previous.identity);
            }
            other => panic!("expected rename, got {other:?}"),
        }
    }

    #[test]
    fn vanished_identity_is_unmounted_before_new_mounts() {
        let before = build(vec![device("/media/old", "Old", BACKUP_UUID)], Vec::new());
        let after = build(
            vec![device("/media/new", "New", "22222222-2222-2222-2222-222222222222")],
            Vec::new(),
        );

        let events = diff(&state(&before), &after, &all_paths(&after), SortPolicy::MountPath);
        assert_eq!(
            kinds(&events),
            vec![
                (VolumeEventKind::Unmounted, PathBuf::from("/media/old")),
                (VolumeEventKind::Mounted, PathBuf::from("/media/new")),
            ]
        );
    }

    #[test]
    fn moved_identity_is_unmounted_and_mounted() {
        let before = build(vec![device("/media/a", "A", BACKUP_UUID)], Vec::new());
        let after = build(vec![device("/media/b", "A", BACKUP_UUID)], Vec::new());

        let events = diff(&state(&before), &after, &all_paths(&after), SortPolicy::MountPath);
        assert_eq!(
            kinds(&events),
            vec![
                (VolumeEventKind::Unmounted, PathBuf::from("/media/a")),
                (VolumeEventKind::Mounted, PathBuf::from("/media/b")),
            ]
        );
    }

    #[test]
    fn new_identity_at_a_known_path_replaces_it() {
        let before = build(vec![device("/media/usb", "Old", BACKUP_UUID)], Vec::new());
        let after = build(
            vec![device("/media/usb", "New", "22222222-2222-2222-2222-222222222222")],
            Vec::new(),
        );

        let events = diff(&state(&before), &after, &all_paths(&after), SortPolicy::MountPath);
        assert_eq!(
            kinds(&events),
            vec![
                (VolumeEventKind::Unmounted, PathBuf::from("/media/usb")),
                (VolumeEventKind::Mounted, PathBuf::from("/media/usb")),
            ]
        );
    }

    #[test]
    fn known_candidates_skip_probing() {
        let volumes = build(vec![device("/media/a", "A", BACKUP_UUID)], Vec::new());
        let prior = state(&volumes);
        assert!(is_known(&prior, &volumes[0]));

        let replaced = build(
            vec![device("/media/a", "A", "22222222-2222-2222-2222-222222222222")],
            Vec::new(),
        );
        assert!(!is_known(&prior, &replaced[0]));
    }
}
