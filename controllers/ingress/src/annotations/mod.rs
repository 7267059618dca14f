//! Annotation lookup and value parsing.
//!
//! A setting is read from the ingress first, then from the service, then
//! from the controller ConfigMap. On Kubernetes objects every name is tried
//! under each of the accepted prefixes; ConfigMap keys carry no prefix.

pub mod backend;
pub mod ingress;

use crate::error::ControllerError;
use crate::utils::parse_duration;
use std::collections::BTreeMap;
use std::time::Duration;

/// Accepted annotation prefixes, in lookup order.
pub const PREFIXES: [&str; 3] = ["haproxy.org/", "ingress.kubernetes.io/", "haproxy.com/"];

/// Layered annotation sources of one ingress path.
#[derive(Debug, Clone, Copy, Default)]
pub struct Annotations<'a> {
    ingress: Option<&'a BTreeMap<String, String>>,
    service: Option<&'a BTreeMap<String, String>>,
    configmap: Option<&'a BTreeMap<String, String>>,
}

fn prefixed<'a>(source: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    PREFIXES
        .iter()
        .find_map(|prefix| source.get(&format!("{prefix}{name}")))
        .map(String::as_str)
}

impl<'a> Annotations<'a> {
    /// Layers any of which may be missing.
    pub fn new(
        ingress: Option<&'a BTreeMap<String, String>>,
        service: Option<&'a BTreeMap<String, String>>,
        configmap: Option<&'a BTreeMap<String, String>>,
    ) -> Self {
        Self {
            ingress,
            service,
            configmap,
        }
    }

    /// Only the ConfigMap layer.
    pub fn configmap(configmap: &'a BTreeMap<String, String>) -> Self {
        Self::new(None, None, Some(configmap))
    }

    /// Raw value with ingress › service › configmap precedence. Blank
    /// values count as unset.
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.ingress
            .and_then(|a| prefixed(a, name))
            .or_else(|| self.service.and_then(|a| prefixed(a, name)))
            .or_else(|| self.configmap.and_then(|c| c.get(name).map(String::as_str)))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// First set value among aliases, with the alias that carried it.
    pub fn get_any<'n>(&self, names: &[&'n str]) -> Option<(&'n str, &'a str)> {
        names
            .iter()
            .find_map(|name| self.get(name).map(|value| (*name, value)))
    }

    /// Boolean value, see [`parse_bool`] for the accepted spellings.
    pub fn bool(&self, name: &str) -> Result<Option<bool>, ControllerError> {
        self.get(name).map(|value| parse_bool(name, value)).transpose()
    }

    pub fn u64(&self, name: &str) -> Result<Option<u64>, ControllerError> {
        self.get(name)
            .map(|value| {
                value
                    .parse::<u64>()
                    .map_err(|e| ControllerError::validation(name, value, e))
            })
            .transpose()
    }

    /// Duration such as `5s`, a bare number is milliseconds.
    pub fn duration(&self, name: &str) -> Result<Option<Duration>, ControllerError> {
        self.get(name)
            .map(|value| parse_duration(value).map_err(|e| ControllerError::validation(name, value, e)))
            .transpose()
    }
}

/// Parses `true`/`on`/`enabled`/`1` and their negatives.
pub fn parse_bool(name: &str, value: &str) -> Result<bool, ControllerError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "enabled" | "1" => Ok(true),
        "false" | "off" | "disabled" | "0" => Ok(false),
        _ => Err(ControllerError::validation(name, value, "expected a boolean")),
    }
}

/// Parses sizes such as `100k`, `1m` or `512` into HAProxy notation.
pub fn parse_size(name: &str, value: &str) -> Result<String, ControllerError> {
    let digits = value.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let unit = &value[digits.len()..];
    if digits.is_empty() || digits.parse::<u64>().is_err() {
        return Err(ControllerError::validation(name, value, "invalid size"));
    }
    match unit.to_ascii_lowercase().as_str() {
        "" | "k" | "m" | "g" => Ok(format!("{digits}{}", unit.to_ascii_lowercase())),
        _ => Err(ControllerError::validation(name, value, "unknown size unit")),
    }
}

/// Validates a comma separated list of IP addresses or CIDR blocks.
pub fn parse_ip_list(name: &str, value: &str) -> Result<Vec<String>, ControllerError> {
    let mut ips = Vec::new();
    for item in crate::utils::split_list(value) {
        let (address, mask) = match item.split_once('/') {
            Some((address, mask)) => (address, Some(mask)),
            None => (item.as_str(), None),
        };
        let addr: std::net::IpAddr = address
            .parse()
            .map_err(|e| ControllerError::validation(name, &item, e))?;
        if let Some(mask) = mask {
            let bits: u8 = mask
                .parse()
                .map_err(|e| ControllerError::validation(name, &item, e))?;
            let max = if addr.is_ipv4() { 32 } else { 128 };
            if bits > max {
                return Err(ControllerError::validation(name, &item, "mask out of range"));
            }
        }
        ips.push(item);
    }
    if ips.is_empty() {
        return Err(ControllerError::validation(name, value, "empty address list"));
    }
    Ok(ips)
}

/// Non-empty lines of a multi-line annotation.
pub fn lines(value: &str) -> Vec<String> {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_precedence_ingress_service_configmap() {
        let ingress = map(&[("haproxy.org/timeout-server", "5s")]);
        let service = map(&[("ingress.kubernetes.io/timeout-server", "10s"), ("haproxy.com/check", "true")]);
        let configmap = map(&[("timeout-server", "30s"), ("check", "false"), ("maxconn", "1000")]);
        let ann = Annotations::new(Some(&ingress), Some(&service), Some(&configmap));

        assert_eq!(ann.get("timeout-server"), Some("5s"));
        assert_eq!(ann.get("check"), Some("true"));
        assert_eq!(ann.get("maxconn"), Some("1000"));
        assert_eq!(ann.get("missing"), None);
    }

    #[test]
    fn test_aliases_and_blank_values() {
        let ingress = map(&[("haproxy.org/allow-list", " "), ("haproxy.org/whitelist", "10.0.0.0/8")]);
        let ann = Annotations::new(Some(&ingress), None, None);
        assert_eq!(ann.get("allow-list"), None);
        assert_eq!(ann.get_any(&["allow-list", "whitelist"]), Some(("whitelist", "10.0.0.0/8")));
    }

    #[test]
    fn test_alias_value_outlives_alias_list() {
        let ingress = map(&[("haproxy.org/blacklist", "10.0.0.1")]);
        let ann = Annotations::new(Some(&ingress), None, None);
        let value = {
            let names = vec!["deny-list".to_string(), "blacklist".to_string()];
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            ann.get_any(&names).map(|(_, value)| value)
        };
        assert_eq!(value, Some("10.0.0.1"));
    }

    #[test]
    fn test_typed_values() {
        let ingress = map(&[
            ("haproxy.org/ssl-redirect", "yes"),
            ("haproxy.org/rate-limit-requests", "10"),
            ("haproxy.org/rate-limit-period", "1m"),
        ]);
        let ann = Annotations::new(Some(&ingress), None, None);
        assert!(matches!(ann.bool("ssl-redirect"), Err(ControllerError::Validation(_))));
        assert_eq!(ann.u64("rate-limit-requests").unwrap(), Some(10));
        assert_eq!(ann.duration("rate-limit-period").unwrap(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_parse_size_and_ip_list() {
        assert_eq!(parse_size("rate-limit-size", "100k").unwrap(), "100k");
        assert!(parse_size("rate-limit-size", "k").is_err());
        assert!(parse_size("rate-limit-size", "10t").is_err());

        assert_eq!(
            parse_ip_list("deny-list", "10.0.0.1, 192.168.0.0/16,::1").unwrap(),
            vec!["10.0.0.1", "192.168.0.0/16", "::1"]
        );
        assert!(parse_ip_list("deny-list", "10.0.0.0/33").is_err());
        assert!(parse_ip_list("deny-list", "nope").is_err());
    }
}
