//! Provides formatting helpers for byte sizes and durations used in build summaries.
use std::time::Duration;

const UNITS: [&str; 3] = ["KiB", "MiB", "GiB"];

/// Formats the size of a table or database.
///
/// Sizes below one KiB are given in bytes, larger ones in the largest fitting binary unit
/// (up to GiB) with three significant digits.
///
/// # Examples
///
/// ```
/// assert_eq!(buildmap::fmt::format_size(0), "0 bytes");
/// assert_eq!(buildmap::fmt::format_size(1), "1 byte");
/// assert_eq!(buildmap::fmt::format_size(100), "100 bytes");
/// assert_eq!(buildmap::fmt::format_size(8_734), "8.53 KiB");
/// assert_eq!(buildmap::fmt::format_size(873_400), "853 KiB");
/// assert_eq!(buildmap::fmt::format_size(8_734_000), "8.33 MiB");
/// assert_eq!(buildmap::fmt::format_size(8_734_000_000), "8.13 GiB");
/// ```
pub fn format_size(size_in_bytes: usize) -> String {
    match size_in_bytes {
        1 => return "1 byte".to_owned(),
        0..=1023 => return format!("{} bytes", size_in_bytes),
        _ => {}
    }

    let mut size = size_in_bytes as f64 / 1024.;
    let mut unit = 0;
    while size >= 1024. && unit < UNITS.len() - 1 {
        size /= 1024.;
        unit += 1;
    }

    let precision = if size < 10. {
        2
    } else if size < 100. {
        1
    } else {
        0
    };
    format!("{:.*} {}", precision, size, UNITS[unit])
}

/// Formats the duration of a build phase.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(buildmap::fmt::format_duration(Duration::from_micros(100)), "100 us");
/// assert_eq!(buildmap::fmt::format_duration(Duration::from_micros(8_192)), "8.19 ms");
/// assert_eq!(buildmap::fmt::format_duration(Duration::from_micros(128_123)), "128 ms");
/// assert_eq!(buildmap::fmt::format_duration(Duration::from_micros(10_128_123)), "10.1 s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    if micros < 1_000 {
        format!("{} us", micros)
    } else if micros < 10_000 {
        format!("{:.2} ms", micros as f32 / 1_000.)
    } else if micros < 100_000 {
        format!("{:.1} ms", micros as f32 / 1_000.)
    } else if micros < 1_000_000 {
        format!("{} ms", micros / 1_000)
    } else if micros < 10_000_000 {
        format!("{:.2} s", micros as f32 / 1_000_000.)
    } else if micros < 100_000_000 {
        format!("{:.1} s", micros as f32 / 1_000_000.)
    } else {
        format!("{} s", micros / 1_000_000)
    }
}

#[cfg(test)]
mod tests {
    use crate::fmt::format_size;

    #[test]
    fn huge_sizes_stay_in_gigabytes() {
        assert_eq!(format_size(1024), "1.00 KiB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024 * 1024), "5120 GiB");
    }
}
