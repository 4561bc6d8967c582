//! Utility functions and helpers

use chrono::Utc;

/// Get current timestamp in milliseconds since Unix epoch
pub fn current_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Format hash rate as a human-readable string
pub fn format_hash_rate(hashes_per_sec: f64) -> String {
    const UNITS: &[&str] = &["H/s", "KH/s", "MH/s", "GH/s", "TH/s", "PH/s"];
    let mut rate = hashes_per_sec;
    let mut unit_index = 0;

    while rate >= 1000.0 && unit_index < UNITS.len() - 1 {
        rate /= 1000.0;
        unit_index += 1;
    }

    format!("{:.2} {}", rate, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_millis() {
        let ts = current_timestamp_millis();
        // After 2020-01-01 and well before the year 3000
        assert!(ts > 1_577_836_800_000);
        assert!(ts < 32_503_680_000_000);
    }

    #[test]
    fn test_format_hash_rate() {
        assert_eq!(format_hash_rate(500.0), "500.00 H/s");
        assert_eq!(format_hash_rate(1500.0), "1.50 KH/s");
        assert_eq!(format_hash_rate(1_500_000.0), "1.50 MH/s");
        assert_eq!(format_hash_rate(1_500_000_000.0), "1.50 GH/s");
    }
}
