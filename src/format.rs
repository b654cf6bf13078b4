//! Display formatting for sizes, rates and durations.

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Binary-prefixed size, e.g. `512B`, `1.500KiB`.
pub fn human_bytes(bytes: f64) -> String {
    let mut v = bytes.max(0.0);
    let mut u = 0usize;
    while v >= 1024.0 && u + 1 < UNITS.len() {
        v /= 1024.0;
        u += 1;
    }
    if u == 0 {
        format!("{v:.0}{}", UNITS[u])
    } else {
        format!("{v:.3}{}", UNITS[u])
    }
}

/// Compact `1h 02m 03s` / `4m 05s` / `6s` form. Negative ETAs are kept and
/// shown with a leading minus.
pub fn format_duration(secs: i64) -> String {
    let sign = if secs < 0 { "-" } else { "" };
    let total = secs.unsigned_abs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{sign}{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{sign}{m}m {s:02}s")
    } else {
        format!("{sign}{s}s")
    }
}
