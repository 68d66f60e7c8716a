//! Human-readable durations for freshness conditions.
//!
//! Accepts sequences of `<n><unit>` with units `s`, `m`, `h`, `d`:
//! `90s`, `30m`, `24h`, `1h30m`, `7d`.

use chrono::Duration;

/// Parse a duration string.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_owned());
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            return Err(format!("duration `{input}`: unit `{c}` without a number"));
        }
        let n: i64 = digits
            .parse()
            .map_err(|e| format!("duration `{input}`: {e}"))?;
        digits.clear();
        let part = match c {
            's' => Duration::try_seconds(n),
            'm' => Duration::try_minutes(n),
            'h' => Duration::try_hours(n),
            'd' => Duration::try_days(n),
            other => return Err(format!("duration `{input}`: unknown unit `{other}`")),
        }
        .ok_or_else(|| format!("duration `{input}` is out of range"))?;
        total = total
            .checked_add(&part)
            .ok_or_else(|| format!("duration `{input}` is out of range"))?;
    }

    if !digits.is_empty() {
        return Err(format!("duration `{input}`: trailing number without a unit"));
    }
    Ok(total)
}
