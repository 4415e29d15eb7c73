//! Human-friendly duration parsing and formatting.

use std::time::Duration;

/// Parse a duration string like "25", "25m", "1h30m" or "90s".
///
/// A bare number is minutes. Returns `None` for anything else.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }

    if let Ok(minutes) = s.parse::<u64>() {
        return minutes.checked_mul(60).map(Duration::from_secs);
    }

    let mut total_secs: u64 = 0;
    let mut current = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            current.push(c);
            continue;
        }

        if current.is_empty() {
            return None;
        }
        let value: u64 = current.parse().ok()?;
        current.clear();

        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        total_secs = total_secs.checked_add(value.checked_mul(unit)?)?;
    }

    // Trailing number without unit counts as minutes
    if !current.is_empty() {
        let value: u64 = current.parse().ok()?;
        total_secs = total_secs.checked_add(value.checked_mul(60)?)?;
    }

    Some(Duration::from_secs(total_secs))
}

/// Format a duration compactly, e.g. "25m", "1h 30m", "45s".
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{seconds}s"));
    }
    parts.join(" ")
}
