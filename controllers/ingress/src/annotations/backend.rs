//! Backend settings derived from service and ingress annotations.

use super::{lines, Annotations};
use crate::error::{ControllerError, ErrorPool};
use crate::utils::haproxy_duration;
use haproxy_client::{Backend, Balance, Mode};

/// Slots created for a new backend and added per growth step.
pub const DEFAULT_SERVER_SLOTS: usize = 42;

const BALANCE_ALGORITHMS: [&str; 8] = [
    "roundrobin",
    "static-rr",
    "leastconn",
    "first",
    "source",
    "random",
    "uri",
    "url_param",
];

/// What a backend looks like once annotations are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub backend: Backend,
    /// Server slots of the pool, and the growth step
    pub slots: usize,
    pub snippet: Vec<String>,
    /// Backend owned by a single ingress
    pub standalone: bool,
    /// `ns/name` of a Backend custom resource applied over the result
    pub cr_backend: Option<String>,
}

impl BackendSettings {
    /// Server parameter binding a server to the persistence cookie.
    pub fn cookie_param(&self, server: &str) -> Option<String> {
        self.backend.cookie.as_ref().map(|_| format!("cookie {server}"))
    }
}

/// Parses backend annotations. `replicas` divides `pod-maxconn` between
/// controller instances.
pub fn parse(
    ann: &Annotations<'_>,
    name: &str,
    mode: Mode,
    replicas: usize,
    snippets_disabled: bool,
    errors: &mut ErrorPool,
) -> BackendSettings {
    let mut backend = Backend::new(name, mode);

    if let Some(balance) = errors.collect(balance(ann)).flatten() {
        backend.balance = Some(balance);
    }
    if let Some(Some(timeout)) = errors.collect(timeout(ann, "timeout-server")) {
        backend.timeouts.insert("server".to_string(), timeout);
    }
    if let Some(Some(timeout)) = errors.collect(timeout(ann, "timeout-check")) {
        backend.timeouts.insert("check".to_string(), timeout);
    }
    if let Some(cookie) = ann.get("cookie-persistence") {
        backend.cookie = Some(format!("{cookie} indirect nocache insert"));
    }
    if mode == Mode::Http && errors.collect(ann.bool("forwarded-for")).flatten().unwrap_or(true) {
        backend.options.push("forwardfor".to_string());
    }
    if let Some(params) = errors.collect(default_server(ann, replicas)) {
        backend.default_server = params;
    }

    let slots = match errors.collect(ann.u64("scale-server-slots")).flatten() {
        Some(0) => {
            errors.add(ControllerError::validation("scale-server-slots", "0", "must be positive"));
            DEFAULT_SERVER_SLOTS
        }
        Some(slots) => usize::try_from(slots).unwrap_or(DEFAULT_SERVER_SLOTS),
        None => DEFAULT_SERVER_SLOTS,
    };

    let snippet = match ann.get("backend-config-snippet") {
        Some(_) if snippets_disabled => Vec::new(),
        Some(value) => lines(value),
        None => Vec::new(),
    };

    BackendSettings {
        backend,
        slots,
        snippet,
        standalone: errors.collect(ann.bool("standalone-backend")).flatten().unwrap_or(false),
        cr_backend: ann.get("cr-backend").map(ToString::to_string),
    }
}

fn balance(ann: &Annotations<'_>) -> Result<Option<Balance>, ControllerError> {
    let Some(value) = ann.get("load-balance") else {
        return Ok(None);
    };
    let (algorithm, params) = match value.split_once(char::is_whitespace) {
        Some((algorithm, params)) => (algorithm, Some(params.trim().to_string())),
        None => (value, None),
    };
    let known = BALANCE_ALGORITHMS.contains(&algorithm)
        || algorithm.starts_with("hdr(")
        || algorithm.starts_with("rdp-cookie");
    if !known {
        return Err(ControllerError::validation("load-balance", value, "unknown algorithm"));
    }
    Ok(Some(Balance {
        algorithm: algorithm.to_string(),
        params,
    }))
}

fn timeout(ann: &Annotations<'_>, name: &str) -> Result<Option<String>, ControllerError> {
    ann.get(name)
        .map(|value| haproxy_duration(value).map_err(|e| ControllerError::validation(name, value, e)))
        .transpose()
}

/// Parameters of the `default-server` line.
fn default_server(ann: &Annotations<'_>, replicas: usize) -> Result<Vec<String>, ControllerError> {
    let mut params = Vec::new();

    if ann.bool("check")?.unwrap_or(false) {
        params.push("check".to_string());
        if let Some(interval) = timeout(ann, "check-interval")? {
            params.push(format!("inter {interval}"));
        }
    }
    if let Some(value) = ann.get("send-proxy-protocol") {
        let keyword = match value {
            "proxy" | "proxy-v1" => "send-proxy",
            "proxy-v2" => "send-proxy-v2",
            "proxy-v2-ssl" => "send-proxy-v2-ssl",
            "proxy-v2-ssl-cn" => "send-proxy-v2-ssl-cn",
            _ => {
                return Err(ControllerError::validation(
                    "send-proxy-protocol",
                    value,
                    "expected proxy, proxy-v1, proxy-v2, proxy-v2-ssl or proxy-v2-ssl-cn",
                ));
            }
        };
        params.push(keyword.to_string());
    }
    if ann.bool("server-ssl")?.unwrap_or(false) {
        params.push("ssl".to_string());
        params.push("verify none".to_string());
    }
    if let Some(maxconn) = ann.u64("pod-maxconn")? {
        let replicas = u64::try_from(replicas.max(1)).unwrap_or(1);
        params.push(format!("maxconn {}", (maxconn / replicas).max(1)));
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn settings(pairs: &[(&str, &str)], replicas: usize) -> (BackendSettings, ErrorPool) {
        let service: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("haproxy.org/{k}"), v.to_string()))
            .collect();
        let ann = Annotations::new(None, Some(&service), None);
        let mut errors = ErrorPool::new();
        let settings = parse(&ann, "ns_app_http", Mode::Http, replicas, false, &mut errors);
        (settings, errors)
    }

    #[test]
    fn test_defaults() {
        let (settings, errors) = settings(&[], 1);
        assert!(errors.is_empty());
        assert_eq!(settings.slots, DEFAULT_SERVER_SLOTS);
        assert_eq!(settings.backend.options, vec!["forwardfor".to_string()]);
        assert!(settings.backend.default_server.is_empty());
        assert!(!settings.standalone);
    }

    #[test]
    fn test_server_params() {
        let (settings, errors) = settings(
            &[
                ("check", "true"),
                ("check-interval", "2s"),
                ("send-proxy-protocol", "proxy-v2"),
                ("server-ssl", "true"),
                ("pod-maxconn", "100"),
            ],
            3,
        );
        assert!(errors.is_empty());
        assert_eq!(
            settings.backend.default_server,
            vec!["check", "inter 2000ms", "send-proxy-v2", "ssl", "verify none", "maxconn 33"]
        );
    }

    #[test]
    fn test_balance_timeouts_and_cookie() {
        let (settings, errors) = settings(
            &[
                ("load-balance", "hdr(X-User) use_domain_only"),
                ("timeout-server", "1m"),
                ("cookie-persistence", "SRV"),
            ],
            1,
        );
        assert!(errors.is_empty());
        let balance = settings.backend.balance.clone().unwrap();
        assert_eq!(balance.algorithm, "hdr(X-User)");
        assert_eq!(balance.params.as_deref(), Some("use_domain_only"));
        assert_eq!(settings.backend.timeouts["server"], "60000ms");
        assert_eq!(settings.cookie_param("SRV_1").as_deref(), Some("cookie SRV_1"));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let (settings, errors) = settings(
            &[("load-balance", "fastest"), ("scale-server-slots", "0"), ("send-proxy-protocol", "v3")],
            1,
        );
        assert_eq!(errors.len(), 3);
        assert!(settings.backend.balance.is_none());
        assert_eq!(settings.slots, DEFAULT_SERVER_SLOTS);
    }

    #[test]
    fn test_snippet_respects_disable_flag() {
        let service = BTreeMap::from([(
            "haproxy.org/backend-config-snippet".to_string(),
            "http-send-name-header x-dst\n\noption redispatch".to_string(),
        )]);
        let ann = Annotations::new(None, Some(&service), None);
        let mut errors = ErrorPool::new();
        let enabled = parse(&ann, "b", Mode::Http, 1, false, &mut errors);
        assert_eq!(enabled.snippet, vec!["http-send-name-header x-dst", "option redispatch"]);
        let disabled = parse(&ann, "b", Mode::Http, 1, true, &mut errors);
        assert!(disabled.snippet.is_empty());
    }
}
