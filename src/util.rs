use crate::dto::DEFAULT_THRESHOLD;
use crate::error::ServiceError;
use serde_json::Value;
use std::env;
use std::str::FromStr;

pub fn get_env_var(name: &str) -> Result<String, ServiceError> {
    env::var(name).map_err(|_| {
        ServiceError::internal_server_error(&format!("Environment variable '{}' not found", name))
    })
}

/// Reads and parses an optional environment variable, falling back to
/// `default` when it is unset or does not parse.
pub fn get_env_or<T: FromStr>(name: &str, default: T) -> T {
    get_env_var(name)
        .ok()
        .and_then(|val| val.trim().parse().ok())
        .unwrap_or(default)
}

/// Detection threshold from a request parameter.
///
/// Accepts a number or a numeric string. Missing, unparsable, non-finite and
/// zero values all fall back to the default of 70.
pub fn parse_threshold(raw: Option<&Value>) -> f64 {
    let parsed = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => leading_float(s),
        _ => None,
    };
    match parsed {
        Some(t) if t.is_finite() && t != 0.0 => t,
        _ => DEFAULT_THRESHOLD,
    }
}

// Longest numeric prefix, so "85%" reads as 85
fn leading_float(s: &str) -> Option<f64> {
    let s = s.trim_start();
    (1..=s.len())
        .rev()
        .filter(|&end| s.is_char_boundary(end))
        .find_map(|end| s[..end].parse::<f64>().ok())
}
