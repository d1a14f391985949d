//! ST-012: Backoff policy and duration strings.

use std::time::Duration;

/// Fixed-interval cadence with a bounded total budget.
///
/// No jitter and no growth: every attempt is `initial_delay` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_total_duration: Duration,
}

impl BackoffPolicy {
    pub const fn new(initial_delay: Duration, max_total_duration: Duration) -> Self {
        Self {
            initial_delay,
            max_total_duration,
        }
    }

    /// Same cadence, with the budget replaced when an override is present.
    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(t) => Self {
                max_total_duration: t,
                ..self
            },
            None => self,
        }
    }
}

/// Parse a duration such as `90s`, `30m`, `2h`, `1h30m`, or raw seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("invalid duration: empty string".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => {
                return Err(format!(
                    "invalid duration '{s}', expected e.g. 2h, 30m, 90s"
                ))
            }
        };
        let n: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration '{s}', expected e.g. 2h, 30m, 90s"))?;
        total = n
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| format!("duration '{s}' is too large"))?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(format!("invalid duration '{s}': missing unit after {digits}"));
    }
    Ok(Duration::from_secs(total))
}

/// Render a duration the way it would be written in config: `45m`, `1h30m`, `90ms`.
pub fn format_duration(d: &Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        let ms = d.as_millis();
        return if ms == 0 { "0s".to_string() } else { format!("{ms}ms") };
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{h}h"));
    }
    if m > 0 {
        out.push_str(&format!("{m}m"));
    }
    if s > 0 {
        out.push_str(&format!("{s}s"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_st012_parse_units() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration(" 600 ").unwrap(), Duration::from_secs(600));
    }

    #[test]
    fn test_st012_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("10m5").is_err());
    }

    #[test]
    fn test_st012_format() {
        assert_eq!(format_duration(&Duration::from_secs(45 * 60)), "45m");
        assert_eq!(format_duration(&Duration::from_secs(5400)), "1h30m");
        assert_eq!(format_duration(&Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(&Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(&Duration::ZERO), "0s");
    }

    #[test]
    fn test_st012_with_timeout() {
        let p = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(600));
        assert_eq!(p.with_timeout(None), p);
        let q = p.with_timeout(Some(Duration::from_secs(60)));
        assert_eq!(q.initial_delay, Duration::from_secs(10));
        assert_eq!(q.max_total_duration, Duration::from_secs(60));
    }
}
