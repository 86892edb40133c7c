//! Compact human-readable numbers for progress and summary lines.

use std::time::Duration;

const NUMERIC_SUFFIXES: [&str; 6] = ["", "k", "M", "B", "T", "Q"];
const STORAGE_SUFFIXES: [&str; 6] = ["", "k", "M", "G", "T", "P"];

fn abbreviate(value: f64, suffixes: &[&str]) -> String {
    if value.is_nan() || value < 0.0 {
        return "-".to_string();
    }

    let mut scaled = value;
    let mut idx = 0;
    while scaled >= 1000.0 && idx + 1 < suffixes.len() {
        scaled /= 1000.0;
        idx += 1;
    }

    if idx > 0 && scaled < 10.0 {
        let tenths = (scaled * 10.0).floor();
        if tenths % 10.0 == 0.0 {
            format!("{}{}", tenths / 10.0, suffixes[idx])
        } else {
            format!("{:.1}{}", tenths / 10.0, suffixes[idx])
        }
    } else {
        format!("{}{}", scaled.floor(), suffixes[idx])
    }
}

/// Count with a k/M/B/T suffix: `9999` -> `9.9k`.
pub fn numeric(value: f64) -> String {
    abbreviate(value, &NUMERIC_SUFFIXES)
}

/// Byte count with a k/M/G/T suffix: `5.5e9` -> `5.5G`.
pub fn storage(bytes: f64) -> String {
    abbreviate(bytes, &STORAGE_SUFFIXES)
}

/// Ratio as a whole percentage: `0.11111` -> `11%`.
pub fn percent(ratio: f64) -> String {
    format!("{}%", (ratio * 100.0).round())
}

/// One decimal with thousands separators: `1111.11` -> `1,111.1`.
pub fn decimal(value: f64) -> String {
    let tenths = (value.abs() * 10.0).round() as u64;
    let whole = tenths / 10;
    let frac = tenths % 10;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && tenths > 0 { "-" } else { "" };
    if frac == 0 {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{frac}")
    }
}

/// Right-align `text` in a field of `width` characters.
pub fn pad_left(text: &str, width: usize) -> String {
    format!("{text:>width$}")
}

/// Short duration: `850ms`, `4.2s`, `3m5s`, `1h2m`.
pub fn duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else if secs >= 1 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Items per second over `elapsed`, abbreviated.
pub fn rate(items: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "-".to_string();
    }
    format!("{}/s", numeric(items as f64 / secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric() {
        let cases = [
            (1.5, "1"),
            (999.0, "999"),
            (1000.0, "1k"),
            (9999.0, "9.9k"),
            (10001.0, "10k"),
            (99999.0, "99k"),
            (999999.0, "999k"),
            (9999999.0, "9.9M"),
            (-9999999.0, "-"),
            (5.5e12, "5.5T"),
        ];
        for (value, expected) in cases {
            assert_eq!(numeric(value), expected, "numeric({value})");
        }
    }

    #[test]
    fn test_storage() {
        assert_eq!(storage(999.0), "999");
        assert_eq!(storage(1000.0), "1k");
        assert_eq!(storage(9999.0), "9.9k");
        assert_eq!(storage(5.5e9), "5.5G");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0.0), "0%");
        assert_eq!(percent(1.0), "100%");
        assert_eq!(percent(0.11111), "11%");
    }

    #[test]
    fn test_decimal() {
        assert_eq!(decimal(0.0), "0");
        assert_eq!(decimal(0.1), "0.1");
        assert_eq!(decimal(0.11), "0.1");
        assert_eq!(decimal(1111.11), "1,111.1");
        assert_eq!(decimal(-1234567.0), "-1,234,567");
    }

    #[test]
    fn test_pad_left() {
        assert_eq!(pad_left("a", 0), "a");
        assert_eq!(pad_left("a", 3), "  a");
        assert_eq!(pad_left("ab", 3), " ab");
        assert_eq!(pad_left("abc", 3), "abc");
    }

    #[test]
    fn test_duration() {
        assert_eq!(duration(Duration::from_millis(850)), "850ms");
        assert_eq!(duration(Duration::from_millis(4200)), "4.2s");
        assert_eq!(duration(Duration::from_secs(185)), "3m5s");
        assert_eq!(duration(Duration::from_secs(3720)), "1h2m");
    }

    #[test]
    fn test_rate() {
        assert_eq!(rate(5000, Duration::from_secs(2)), "2.5k/s");
        assert_eq!(rate(1, Duration::ZERO), "-");
    }
}
