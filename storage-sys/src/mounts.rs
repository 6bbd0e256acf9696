// SPDX-License-Identifier: GPL-3.0-only

//! Kernel mount table access

use std::ffi::CString;
use std::fs;
use std::mem::MaybeUninit;

use storage_types::FilesystemRecord;
use tracing::debug;

use crate::error::{Result, SysError};

const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Filesystem types that never back a user-visible volume.
const PSEUDO_FS_TYPES: &[&str] = &[
    "autofs",
    "binfmt_misc",
    "bpf",
    "cgroup",
    "cgroup2",
    "configfs",
    "debugfs",
    "devpts",
    "devtmpfs",
    "efivarfs",
    "fusectl",
    "hugetlbfs",
    "mqueue",
    "nsfs",
    "overlay",
    "proc",
    "pstore",
    "ramfs",
    "rpc_pipefs",
    "securityfs",
    "selinuxfs",
    "squashfs",
    "sysfs",
    "tmpfs",
    "tracefs",
];

/// Read the mount table and size every entry.
///
/// Runs on a blocking thread: statvfs on an unresponsive network share can
/// stall for a long time.
pub async fn filesystem_records() -> Result<Vec<FilesystemRecord>> {
    tokio::task::spawn_blocking(|| {
        let mount_info = fs::read_to_string(MOUNTINFO_PATH)?;
        let mut records = parse_mountinfo(&mount_info)?;
        for record in &mut records {
            record.size = filesystem_size(&record.mount_path);
        }
        Ok(records)
    })
    .await
    .map_err(|e| SysError::Io(std::io::Error::other(e)))?
}

/// Parse `/proc/self/mountinfo` content, skipping pseudo filesystems.
///
/// Sizes are left unset.
pub fn parse_mountinfo(input: &str) -> Result<Vec<FilesystemRecord>> {
    let mut records = Vec::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let (left, right) = line
            .split_once(" - ")
            .ok_or_else(|| SysError::InvalidMountInfoLine(line.to_string()))?;

        let mount_point = left
            .split_whitespace()
            .nth(4)
            .ok_or_else(|| SysError::InvalidMountInfoLine(line.to_string()))?;

        let mut right_fields = right.split_whitespace();
        let fs_type = right_fields
            .next()
            .ok_or_else(|| SysError::InvalidMountInfoLine(line.to_string()))?;
        let source = right_fields.next().unwrap_or_default();

        if is_pseudo_fs_type(fs_type) {
            continue;
        }

        records.push(FilesystemRecord {
            source: unescape_mount_field(source),
            filesystem_type: fs_type.to_string(),
            mount_path: unescape_mount_field(mount_point),
            size: None,
        });
    }

    Ok(records)
}

fn is_pseudo_fs_type(fs_type: &str) -> bool {
    PSEUDO_FS_TYPES.contains(&fs_type) || fs_type.starts_with("fuse.portal")
}

/// Whether `fs_type` is a network filesystem.
pub fn is_network_fs_type(fs_type: &str) -> bool {
    matches!(
        fs_type,
        "cifs" | "smb3" | "smbfs" | "9p" | "ceph" | "glusterfs" | "lustre" | "afs" | "davfs"
    ) || fs_type.starts_with("nfs")
        || fs_type == "fuse.sshfs"
        || fs_type == "fuse.rclone"
}

/// Total size in bytes of the filesystem mounted at `mount_point`.
///
/// `None` when statvfs fails or reports no blocks.
pub fn filesystem_size(mount_point: &str) -> Option<u64> {
    let mount_point_c = CString::new(mount_point).ok()?;

    let mut stat = MaybeUninit::<libc::statvfs>::uninit();
    let rc = unsafe { libc::statvfs(mount_point_c.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        debug!(
            "statvfs failed for {:?}: {}",
            mount_point,
            std::io::Error::last_os_error()
        );
        return None;
    }

    let stat = unsafe { stat.assume_init() };
    let frsize = if stat.f_frsize > 0 {
        stat.f_frsize
    } else {
        stat.f_bsize
    };

    let total = stat.f_blocks.saturating_mul(frsize);
    (total > 0).then_some(total)
}

fn unescape_mount_field(value: &str) -> String {
    let mut output = Vec::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let octal = &value[index + 1..index + 4];
            if let Ok(num) = u8::from_str_radix(octal, 8) {
                output.push(num);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mountinfo_and_skips_pseudo_filesystems() {
        let sample = "36 25 8:2 / / rw,relatime - ext4 /dev/nvme0n1p2 rw\n\
37 25 0:5 / /proc rw,nosuid,nodev,noexec,relatime - proc proc rw\n\
38 25 0:57 / /mnt/nfs rw,relatime - nfs4 nas:/export rw\n";

        let records = parse_mountinfo(sample).expect("parse should succeed");
        let paths: Vec<_> = records.iter().map(|r| r.mount_path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/mnt/nfs"]);
        assert_eq!(records[1].source, "nas:/export");
        assert_eq!(records[1].filesystem_type, "nfs4");
        assert_eq!(records[1].size, None);
    }

    #[test]
    fn unescapes_octal_sequences_in_mount_paths() {
        let sample = "40 25 0:60 / /media/My\\040Share rw - cifs //nas/My\\040Share rw\n";

        let records = parse_mountinfo(sample).unwrap();
        assert_eq!(records[0].mount_path, "/media/My Share");
        assert_eq!(records[0].source, "//nas/My Share");
    }

    #[test]
    fn rejects_lines_without_separator() {
        let err = parse_mountinfo("36 25 8:2 / / rw,relatime ext4").unwrap_err();
        assert!(matches!(err, SysError::InvalidMountInfoLine(_)));
    }

    #[test]
    fn network_fs_types_are_recognized() {
        assert!(is_network_fs_type("nfs4"));
        assert!(is_network_fs_type("cifs"));
        assert!(is_network_fs_type("fuse.sshfs"));
        assert!(!is_network_fs_type("ext4"));
    }

    #[test]
    fn root_filesystem_has_a_size() {
        assert!(filesystem_size("/").is_some());
        assert_eq!(filesystem_size("/definitely/not/mounted/here"), None);
    }
}
