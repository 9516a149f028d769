//! Utility functions for minivol

use crate::common::{Error, Result};

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Parse a volume size string (e.g. "4096", "512K", "10Gi", "1TiB")
///
/// Suffixes are binary multiples. A trailing `B`, `i` or `iB` is accepted.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidSize("empty size".into()));
    }

    let unit_start = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num_str, unit) = s.split_at(unit_start);

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidSize(format!("invalid size: {}", s)))?;

    let unit = unit
        .trim()
        .trim_end_matches(['B', 'b'])
        .trim_end_matches('i');

    let shift = match unit.to_ascii_uppercase().as_str() {
        "" => 0,
        "K" => 10,
        "M" => 20,
        "G" => 30,
        "T" => 40,
        "P" => 50,
        _ => return Err(Error::InvalidSize(format!("unknown size unit: {}", s))),
    };

    num.checked_mul(1u64 << shift)
        .ok_or_else(|| Error::InvalidSize(format!("size overflows: {}", s)))
}

/// Current time as RFC 3339, the default snapshot creation time
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("512K").unwrap(), 512 * 1024);
        assert_eq!(parse_size("10Gi").unwrap(), 10 << 30);
        assert_eq!(parse_size("1TiB").unwrap(), 1 << 40);
        assert_eq!(parse_size(" 2m ").unwrap(), 2 << 20);
    }

    #[test]
    fn test_timestamp_now_is_rfc3339() {
        let ts = timestamp_now();
        let parsed = chrono::DateTime::parse_from_rfc3339(&ts).unwrap();
        assert!(parsed <= chrono::Utc::now());
    }

    #[test]
    fn test_parse_size_invalid() {
        assert!(parse_size("").is_err());
        assert!(parse_size("abc").is_err());
        assert!(parse_size("10x").is_err());
        assert!(parse_size("99999999999P").is_err());
    }
}
