// SPDX-License-Identifier: GPL-3.0-only

//! Stable volume identities
//!
//! Identities are UUID strings. Filesystems that carry a real UUID keep it;
//! everything else gets a name-based (v5) UUID so the same input always
//! maps to the same identity across passes and restarts.

use storage_types::DeviceRecord;
use uuid::Uuid;

/// Namespace for every derived volume identity.
pub const VOLUME_NAMESPACE: Uuid = Uuid::from_u128(0x5d1c_8e4a_37b2_4f0e_9a61_c2d7_04e8_b913);

/// Identity of a block device filesystem.
///
/// Uses the filesystem UUID when it parses as one, a hash of it when it
/// does not (FAT serials such as `1234-ABCD`), and a hash of device path
/// and drive serial when the filesystem has no UUID at all.
pub fn device_identity(record: &DeviceRecord) -> String {
    let uuid = record.uuid.trim();
    if !uuid.is_empty() {
        return match Uuid::parse_str(uuid) {
            Ok(parsed) => parsed.hyphenated().to_string(),
            Err(_) => derive(&format!("uuid:{uuid}")),
        };
    }

    derive(&format!("device:{}|{}", record.device, record.serial))
}

/// Identity of a network share or mount-table entry, keyed on its
/// canonical mount path.
pub fn share_identity(mount_path: &str) -> String {
    derive(mount_path)
}

fn derive(name: &str) -> String {
    Uuid::new_v5(&VOLUME_NAMESPACE, name.as_bytes())
        .hyphenated()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(uuid: &str, device: &str, serial: &str) -> DeviceRecord {
        DeviceRecord {
            uuid: uuid.to_string(),
            device: device.to_string(),
            serial: serial.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn real_uuids_are_kept_and_normalized() {
        let id = device_identity(&record("8A1F3C2E-5B6D-4E7F-8091-A2B3C4D5E6F7", "/dev/sdb1", ""));
        assert_eq!(id, "8a1f3c2e-5b6d-4e7f-8091-a2b3c4d5e6f7");
    }

    #[test]
    fn fat_serials_are_hashed_deterministically() {
        let a = device_identity(&record("1234-ABCD", "/dev/sdb1", ""));
        let b = device_identity(&record("1234-ABCD", "/dev/sdc1", "other"));
        assert_eq!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn missing_uuid_falls_back_to_device_and_serial() {
        let a = device_identity(&record("", "/dev/sr0", "XYZ"));
        let b = device_identity(&record("", "/dev/sr0", "ABC"));
        assert_ne!(a, b);
        assert_eq!(a, device_identity(&record("  ", "/dev/sr0", "XYZ")));
    }

    #[test]
    fn share_identity_depends_only_on_mount_path() {
        assert_eq!(share_identity("/mnt/nas"), share_identity("/mnt/nas"));
        assert_ne!(share_identity("/mnt/nas"), share_identity("/mnt/nas2"));
    }
}
