//! Duration strings in the `1h30m` / `20m0s` notation used by the GCE
//! tooling, e.g. the `--timeout` flag and the `timeout` field of a build
//! request.

use std::fmt::Write;
use std::time::Duration;

/// The largest representable duration, in nanoseconds.
const MAX_NANOS: u64 = i64::MAX as u64;

/// The longest duration that can be written as a duration string, roughly
/// 292 years.
pub const MAX_DURATION: Duration = Duration::from_nanos(MAX_NANOS);

const NANOSECOND: u64 = 1;
const MICROSECOND: u64 = 1_000 * NANOSECOND;
const MILLISECOND: u64 = 1_000 * MICROSECOND;
const SECOND: u64 = 1_000 * MILLISECOND;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseDurationError {
    #[error("invalid duration {0:?}")]
    Invalid(String),

    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("duration {0:?} is out of range")]
    Overflow(String),

    #[error("duration {0:?} is negative")]
    Negative(String),
}

fn unit_nanos(unit: &str) -> Option<u64> {
    match unit {
        "ns" => Some(NANOSECOND),
        // Both the micro sign (U+00B5) and the greek mu (U+03BC)
        "us" | "µs" | "μs" => Some(MICROSECOND),
        "ms" => Some(MILLISECOND),
        "s" => Some(SECOND),
        "m" => Some(MINUTE),
        "h" => Some(HOUR),
        _ => None,
    }
}

/// Consume leading digits as an integer. Returns `None` on overflow.
fn leading_int(s: &str) -> Option<(u64, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let mut x: u64 = 0;
    for c in s[..end].bytes() {
        x = x.checked_mul(10)?.checked_add((c - b'0') as u64)?;
        if x > MAX_NANOS {
            return None;
        }
    }
    Some((x, &s[end..]))
}

/// Consume leading digits as the fractional part of a number. Digits beyond
/// what fits are dropped rather than reported as overflow.
fn leading_fraction(s: &str) -> (u64, f64, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let mut x: u64 = 0;
    let mut scale = 1.0;
    let mut overflow = false;
    for c in s[..end].bytes() {
        if overflow {
            continue;
        }
        if x > (MAX_NANOS - 1) / 10 {
            overflow = true;
            continue;
        }
        let y = x * 10 + (c - b'0') as u64;
        if y > MAX_NANOS {
            overflow = true;
            continue;
        }
        x = y;
        scale *= 10.0;
    }
    (x, scale, &s[end..])
}

/// Parse a duration string such as `"300ms"`, `"1.5h"` or `"2h45m"`.
///
/// A duration is a sequence of decimal numbers, each with an optional
/// fraction and a unit suffix. Valid units are `ns`, `us` (or `µs`), `ms`,
/// `s`, `m` and `h`. The lone string `"0"` is also accepted.
pub fn parse_duration(input: &str) -> Result<Duration, ParseDurationError> {
    let invalid = || ParseDurationError::Invalid(input.to_string());
    let overflow = || ParseDurationError::Overflow(input.to_string());

    let mut s = input;
    let mut negative = false;
    if let Some(rest) = s.strip_prefix('-') {
        negative = true;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }

    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total: u64 = 0;
    while !s.is_empty() {
        if !s.starts_with(|c: char| c == '.' || c.is_ascii_digit()) {
            return Err(invalid());
        }

        let before = s.len();
        let (mut value, rest) = leading_int(s).ok_or_else(overflow)?;
        s = rest;
        let has_int = before != s.len();

        let mut fraction = 0;
        let mut scale = 1.0;
        let mut has_fraction = false;
        if let Some(rest) = s.strip_prefix('.') {
            let before = rest.len();
            (fraction, scale, s) = leading_fraction(rest);
            has_fraction = before != s.len();
        }
        if !has_int && !has_fraction {
            return Err(invalid());
        }

        let unit_end = s
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(s.len());
        if unit_end == 0 {
            return Err(ParseDurationError::MissingUnit(input.to_string()));
        }
        let unit = &s[..unit_end];
        s = &s[unit_end..];
        let unit = unit_nanos(unit).ok_or_else(|| ParseDurationError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;

        if value > MAX_NANOS / unit {
            return Err(overflow());
        }
        value *= unit;
        if fraction > 0 {
            value += (fraction as f64 * (unit as f64 / scale)) as u64;
            if value > MAX_NANOS {
                return Err(overflow());
            }
        }

        total = total
            .checked_add(value)
            .filter(|t| *t <= MAX_NANOS)
            .ok_or_else(overflow)?;
    }

    if negative && total > 0 {
        return Err(ParseDurationError::Negative(input.to_string()));
    }
    Ok(Duration::from_nanos(total))
}

/// Render `value` (a multiple of `unit`) as a decimal with trailing zeros
/// trimmed from the fraction.
fn write_fraction(out: &mut String, value: u128, unit: u128) {
    let whole = value / unit;
    let fraction = value % unit;
    let _ = write!(out, "{whole}");
    if fraction != 0 {
        let width = unit.ilog10() as usize;
        let digits = format!("{fraction:0width$}");
        let _ = write!(out, ".{}", digits.trim_end_matches('0'));
    }
}

/// Format a duration in its canonical form, e.g. `"1h30m0s"`, `"20m0s"`,
/// `"1.5s"` or `"300ms"`. Sub-second durations use the smallest unit that
/// keeps the leading digit non-zero.
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    let mut out = String::new();

    if nanos == 0 {
        return "0s".to_string();
    }

    if nanos < SECOND as u128 {
        let (unit, suffix) = if nanos < MICROSECOND as u128 {
            (NANOSECOND, "ns")
        } else if nanos < MILLISECOND as u128 {
            (MICROSECOND, "µs")
        } else {
            (MILLISECOND, "ms")
        };
        write_fraction(&mut out, nanos, unit as u128);
        out.push_str(suffix);
        return out;
    }

    let hours = nanos / HOUR as u128;
    let minutes = (nanos % HOUR as u128) / MINUTE as u128;
    let seconds = nanos % MINUTE as u128;

    if hours > 0 {
        let _ = write!(out, "{hours}h");
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{minutes}m");
    }
    write_fraction(&mut out, seconds, SECOND as u128);
    out.push('s');
    out
}

/// Serde adapter encoding a [`Duration`] as its canonical string form.
pub mod as_go_string {
    use super::{MAX_DURATION, format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer, de, ser};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if *duration > MAX_DURATION {
            return Err(ser::Error::custom(format!(
                "duration {duration:?} exceeds the maximum of {}",
                format_duration(MAX_DURATION)
            )));
        }
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        parse_duration(&value).map_err(de::Error::custom)
    }
}
