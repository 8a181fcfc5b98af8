//! Human-readable formatting for the display

use std::time::Duration;

const BYTE_UNITS: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

/// 1024-based byte count, e.g. `512 B`, `1.5 KB`, `3.2 GB`
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}B", bytes as f64 / div as f64, BYTE_UNITS[exp])
}

/// Compact duration rounded to whole seconds: `45s`, `3m5s`, `1h0m12s`
pub fn format_duration(duration: Duration) -> String {
    let secs = (duration.as_millis() + 500) / 1000;
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
