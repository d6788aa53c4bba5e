//! Pure formatting/parsing helpers with fixed boundary rules a UI
//! layer would otherwise have to re-derive per call site.

use crate::error::PveError;

const MAX_VMID: u32 = 9_999_999;

/// VM/container ids are 1..=9_999_999. Rejects non-digit input and 0.
pub fn parse_vmid(raw: &str) -> Result<u32, PveError> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PveError::ConfigInvalid(format!("'{raw}' is not a valid vmid")));
    }
    let vmid: u32 =
        raw.parse().map_err(|_| PveError::ConfigInvalid(format!("'{raw}' is not a valid vmid")))?;
    if vmid == 0 || vmid > MAX_VMID {
        return Err(PveError::ConfigInvalid(format!(
            "vmid {vmid} out of range 1..={MAX_VMID}"
        )));
    }
    Ok(vmid)
}

/// `< 60s` -> `Nm`; `< 24h` -> `Hh Mm`; otherwise `Dd Hh Mm`.
pub fn format_uptime(seconds: u64) -> String {
    let minutes = seconds / 60;
    if seconds < 60 {
        return format!("{minutes}m");
    }
    let hours = minutes / 60;
    let remaining_minutes = minutes % 60;
    if hours < 24 {
        return format!("{hours}h {remaining_minutes}m");
    }
    let days = hours / 24;
    let remaining_hours = hours % 24;
    format!("{days}d {remaining_hours}h {remaining_minutes}m")
}

const BYTE_UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

/// 1024-based units, two decimals, smallest unit with a value >= 1.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit_index = 0;
    while value >= 1024.0 && unit_index < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }
    if unit_index == 0 {
        format!("{bytes} {}", BYTE_UNITS[0])
    } else {
        format!("{value:.2} {}", BYTE_UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vmid_rejects_zero() {
        assert!(parse_vmid("0").is_err());
    }

    #[test]
    fn vmid_rejects_non_digit() {
        assert!(parse_vmid("abc").is_err());
        assert!(parse_vmid("10a").is_err());
        assert!(parse_vmid("-1").is_err());
    }

    #[test]
    fn vmid_rejects_out_of_range() {
        assert!(parse_vmid("10000000").is_err());
    }

    #[test]
    fn vmid_accepts_boundaries() {
        assert_eq!(parse_vmid("1").unwrap(), 1);
        assert_eq!(parse_vmid("9999999").unwrap(), 9_999_999);
    }

    #[test]
    fn uptime_under_a_minute_formats_as_minutes() {
        assert_eq!(format_uptime(45), "0m");
        assert_eq!(format_uptime(59), "0m");
    }

    #[test]
    fn uptime_under_a_day_formats_as_hours_and_minutes() {
        assert_eq!(format_uptime(3_661), "1h 1m");
        assert_eq!(format_uptime(86_399), "23h 59m");
    }

    #[test]
    fn uptime_over_a_day_formats_as_days_hours_minutes() {
        assert_eq!(format_uptime(90_061), "1d 1h 1m");
    }

    #[test]
    fn bytes_under_a_kilobyte_has_no_decimal() {
        assert_eq!(format_bytes(512), "512 B");
    }

    #[test]
    fn bytes_picks_smallest_unit_with_value_at_least_one() {
        assert_eq!(format_bytes(1_073_741_824), "1.00 GB");
        assert_eq!(format_bytes(1_536), "1.50 KB");
    }
}
