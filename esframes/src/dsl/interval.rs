//! Interval text such as `10s` or `1h`, and the `$__interval` placeholders.

const SECOND: i64 = 1_000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;
const YEAR: i64 = 365 * DAY;

pub const INTERVAL_MS_PLACEHOLDER: &str = "$__interval_ms";
pub const INTERVAL_PLACEHOLDER: &str = "$__interval";

/// Parse `500ms`, `10s`, `1m`, `2h`, `1d`, `1w`, `1M`, `1y`. A leading `>`
/// is accepted and a bare number means seconds.
pub fn parse_interval_ms(text: &str) -> Option<i64> {
    let text = text.trim().trim_start_matches('>');
    if text.is_empty() {
        return None;
    }

    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let amount: i64 = digits.parse().ok()?;

    let factor = match unit {
        "ms" => 1,
        "" | "s" => SECOND,
        "m" => MINUTE,
        "h" => HOUR,
        "d" => DAY,
        "w" => WEEK,
        "M" => 30 * DAY,
        "y" => YEAR,
        _ => return None,
    };
    amount.checked_mul(factor)
}

/// Render milliseconds in the largest whole unit, e.g. `15000` as `15s`.
pub fn format_interval(ms: i64) -> String {
    let units = [
        (YEAR, "y"),
        (WEEK, "w"),
        (DAY, "d"),
        (HOUR, "h"),
        (MINUTE, "m"),
        (SECOND, "s"),
        (1, "ms"),
    ];
    for (size, suffix) in units {
        if ms >= size {
            return format!("{}{}", ms / size, suffix);
        }
    }
    "1ms".to_string()
}

/// Replace the interval placeholders in a request body.
pub fn substitute(body: &str, interval_ms: i64) -> String {
    body.replace(INTERVAL_MS_PLACEHOLDER, &interval_ms.to_string())
        .replace(INTERVAL_PLACEHOLDER, &format_interval(interval_ms))
}
