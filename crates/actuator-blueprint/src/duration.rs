use std::time::Duration;

use actuator_types::{ActuatorError, Result, Value};

const UNITS: &[(&str, f64)] = &[
    ("ms", 0.001),
    ("s", 1.0),
    ("m", 60.0),
    ("h", 3600.0),
    ("d", 86400.0),
];

/// Parse a duration such as `"250ms"`, `"1.5s"`, `"2m"`, `"1h"`, `"1d"`.
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || ActuatorError::ConfigurationError(format!("invalid duration: '{s}'"));

    // "ms" must be tried before "m" and "s".
    let (number, scale) = UNITS
        .iter()
        .find_map(|(suffix, scale)| s.strip_suffix(suffix).map(|n| (n, *scale)))
        .unwrap_or((s, 1.0));

    let n: f64 = number.trim().parse().map_err(|_| invalid())?;
    if !n.is_finite() || n < 0.0 {
        return Err(invalid());
    }
    Ok(Duration::from_secs_f64(n * scale))
}

/// Duration from a JSON parameter: numbers are seconds, strings go through
/// [`parse_duration`].
pub fn duration_from_value(value: &Value) -> Result<Duration> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(Duration::from_secs_f64)
            .ok_or_else(|| ActuatorError::ConfigurationError(format!("invalid duration: {n}"))),
        Value::String(s) => parse_duration(s),
        other => Err(ActuatorError::ConfigurationError(format!(
            "invalid duration: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn suffixed_durations() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
    }

    #[test]
    fn bare_number_is_seconds() {
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration(" 0 ").unwrap(), Duration::ZERO);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn from_json_values() {
        assert_eq!(duration_from_value(&json!(0.5)).unwrap(), Duration::from_millis(500));
        assert_eq!(duration_from_value(&json!("3s")).unwrap(), Duration::from_secs(3));
        assert!(duration_from_value(&json!(true)).is_err());
    }
}
