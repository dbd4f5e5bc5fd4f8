// SPDX-License-Identifier: CEPL-1.0

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Scale a byte count into the largest unit it reaches.
pub fn scale_bytes(bytes: u64) -> (f64, &'static str) {
    let b = bytes as f64;
    if bytes >= GIB {
        (b / GIB as f64, "GiB")
    } else if bytes >= MIB {
        (b / MIB as f64, "MiB")
    } else if bytes >= KIB {
        (b / KIB as f64, "KiB")
    } else {
        (b, "B")
    }
}

pub fn format_bytes(bytes: u64) -> String {
    let (amount, unit) = scale_bytes(bytes);
    format!("{amount:.2}{unit}")
}
