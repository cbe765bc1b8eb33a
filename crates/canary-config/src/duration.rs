//! Duration strings.
//!
//! Parsing is `humantime` (`"5m"`, `"1h30m"`, `"250ms"`). Rendering follows
//! the Go `time.Duration` text form the canary's output lines have always
//! used: `2m3.456789012s`, `1h0m0s`, `1.5ms`.

use std::time::Duration;

pub use humantime::{parse_duration, DurationError};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Render `d` the way Go's `Duration.String()` does.
///
/// Below one second the largest fitting unit among `ns`, `µs` and `ms` is
/// used, with a trimmed decimal fraction. From one second up the value is
/// `[<h>h][<m>m]<s>[.<frac>]s`; once minutes appear every smaller unit is
/// printed, even when zero.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return format!("{}µs", decimal(nanos, 3));
    }
    if nanos < NANOS_PER_SEC {
        return format!("{}ms", decimal(nanos, 6));
    }

    let whole = nanos / NANOS_PER_SEC;
    let mut out = String::new();
    if whole >= 3_600 {
        out.push_str(&format!("{}h", whole / 3_600));
    }
    if whole >= 60 {
        out.push_str(&format!("{}m", (whole / 60) % 60));
    }
    out.push_str(&decimal((whole % 60) * NANOS_PER_SEC + nanos % NANOS_PER_SEC, 9));
    out.push('s');
    out
}

/// `value / 10^scale` with the remainder as a fraction, trailing zeros cut.
fn decimal(value: u128, scale: u32) -> String {
    let unit = 10u128.pow(scale);
    let (int, frac) = (value / unit, value % unit);
    if frac == 0 {
        return int.to_string();
    }
    let digits = format!("{frac:0width$}", width = scale as usize);
    format!("{int}.{}", digits.trim_end_matches('0'))
}
