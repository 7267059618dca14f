//! Small parsing helpers shared by the controller modules.

pub mod hash;

use crate::error::ControllerError;
use std::time::Duration;

/// Parses `500ms`, `5s`, `10m`, `1h`. A bare number is milliseconds.
pub fn parse_duration(value: &str) -> Result<Duration, ControllerError> {
    let value = value.trim();
    let invalid = || ControllerError::Validation(format!("invalid duration '{value}'"));
    if value.is_empty() {
        return Err(invalid());
    }
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: u64 = number.parse().map_err(|_e| invalid())?;
    let millis = match unit {
        "" | "ms" => number,
        "s" => number.saturating_mul(1_000),
        "m" => number.saturating_mul(60_000),
        "h" => number.saturating_mul(3_600_000),
        "d" => number.saturating_mul(86_400_000),
        _ => return Err(invalid()),
    };
    Ok(Duration::from_millis(millis))
}

/// Duration in the form HAProxy accepts in `timeout` lines.
pub fn haproxy_duration(value: &str) -> Result<String, ControllerError> {
    let duration = parse_duration(value)?;
    Ok(format!("{}ms", duration.as_millis()))
}

/// Splits `ns/name`. A missing namespace falls back to `default_ns`.
pub fn split_ns_name<'a>(value: &'a str, default_ns: &'a str) -> Result<(&'a str, &'a str), ControllerError> {
    let (ns, name) = match value.split_once('/') {
        Some((ns, name)) => (ns, name),
        None => (default_ns, value),
    };
    if ns.is_empty() || name.is_empty() || name.contains('/') {
        return Err(ControllerError::Validation(format!("invalid namespace/name '{value}'")));
    }
    Ok((ns, name))
}

/// Comma separated list, trimmed, empty items dropped.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Name of the backend serving `ns/service` on `port`.
pub fn backend_name(namespace: &str, service: &str, port: &str) -> String {
    format!("{namespace}_{service}_{port}")
}
