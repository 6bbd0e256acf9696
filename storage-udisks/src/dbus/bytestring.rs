// SPDX-License-Identifier: GPL-3.0-only

//! UDisks2 exposes paths as NUL-terminated byte arrays (`ay`).

/// Decode one `ay` value, dropping the terminator and anything after it.
pub(crate) fn decode_c_string_bytes(bytes: &[u8]) -> String {
    let raw = match bytes.split(|b| *b == 0).next() {
        Some(v) => v,
        None => bytes,
    };

    String::from_utf8_lossy(raw).to_string()
}

/// Decode an `aay` mount point list, skipping empty entries.
pub(crate) fn decode_mount_points(mount_points: Vec<Vec<u8>>) -> Vec<String> {
    mount_points
        .into_iter()
        .map(|mp| decode_c_string_bytes(&mp))
        .filter(|decoded| !decoded.is_empty())
        .collect()
}
