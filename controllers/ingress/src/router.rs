//! # Router
//!
//! Host/path/SNI dispatch through map files. Every route becomes one or
//! more map rows whose value is `<backend>.<ruleID>.<ruleID>...`; a single
//! `use_backend %[var(txn.path_match),field(1,.)]` rule on the HTTP
//! frontends picks the backend, and ingress-scoped rules match the rule IDs
//! with `-m dom`.

use crate::error::{ControllerError, ErrorPool};
use crate::maps::{self, MapFiles};
use crate::rules::{Rule, RuleId};
use crate::store::types::PathType;
use haproxy_client::{BackendSwitchingRule, Condition, HAProxyError, Transaction};
use std::collections::BTreeMap;
use tracing::debug;

/// One routed (host, path) pair.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Route {
    pub host: String,
    pub path: String,
    pub path_type: PathType,
    pub backend: String,
    pub rule_ids: Vec<RuleId>,
    pub ssl_passthrough: bool,
}

impl Route {
    /// Host with a leading wildcard removed: `*.example.com` becomes
    /// `.example.com`.
    pub fn map_host(&self) -> &str {
        self.host.strip_prefix('*').unwrap_or(&self.host)
    }

    /// Map row value.
    pub fn map_value(&self) -> String {
        let mut value = self.backend.clone();
        for id in &self.rule_ids {
            value.push('.');
            value.push_str(id);
        }
        value
    }
}

/// Adds the map rows of `route`.
pub fn add_route(maps: &mut MapFiles, route: &Route) -> Result<(), ControllerError> {
    let host = route.map_host();
    let value = route.map_value();

    if route.ssl_passthrough {
        if host.is_empty() {
            return Err(ControllerError::Validation(format!(
                "ssl-passthrough route to {} requires a host",
                route.backend
            )));
        }
        maps.append(maps::SNI, host, value);
        return Ok(());
    }

    if !host.is_empty() {
        maps.append(maps::HOST, host, host);
    }

    let path = route.path.as_str();
    match route.path_type {
        PathType::Exact => {
            let path = if path.is_empty() { "/" } else { path };
            maps.append(maps::PATH_EXACT, format!("{host}{path}"), value);
        }
        _ if path.is_empty() || path == "/" => {
            maps.append(maps::PATH_PREFIX, format!("{host}/"), value);
        }
        PathType::Prefix => {
            let path = path.trim_end_matches('/');
            maps.append(maps::PATH_EXACT, format!("{host}{path}"), value.clone());
            maps.append(maps::PATH_PREFIX, format!("{host}{path}/"), value);
        }
        PathType::ImplementationSpecific => {
            let path = path.trim_end_matches('/');
            maps.append(maps::PATH_EXACT, format!("{host}{path}"), value.clone());
            maps.append(maps::PATH_PREFIX, format!("{host}{path}"), value);
        }
    }
    Ok(())
}

fn set_var(name: &str, expr: String, cond: Option<&str>) -> Rule {
    Rule::SetVar {
        name: name.to_string(),
        expr,
        cond: cond.map(ToString::to_string),
        tcp: false,
    }
}

/// Request rules resolving `txn.path_match` on the HTTP frontends. Lookups
/// run exact, then prefix, first for the full host, then for the wildcard
/// form of the host, then for the path alone.
pub fn routing_rules(maps: &MapFiles) -> Vec<Rule> {
    let exact = maps.path_str(maps::PATH_EXACT);
    let prefix = maps.path_str(maps::PATH_PREFIX);
    let host = maps.path_str(maps::HOST);
    let not_found = "!{ var(txn.path_match) -m found }";
    let wildcard = "var(txn.host),regsub(^[^.]*,,)";

    vec![
        set_var("txn.host", "req.hdr(Host),field(1,:),lower".to_string(), None),
        set_var("txn.path", "path".to_string(), None),
        set_var("txn.host_match", format!("var(txn.host),map({host})"), None),
        set_var(
            "txn.host_match",
            format!("{wildcard},map({host})"),
            Some("!{ var(txn.host_match) -m found }"),
        ),
        set_var("txn.path_match", format!("var(txn.host),concat(,txn.path),map({exact})"), None),
        set_var(
            "txn.path_match",
            format!("var(txn.host),concat(,txn.path),map_beg({prefix})"),
            Some(not_found),
        ),
        set_var(
            "txn.path_match",
            format!("{wildcard},concat(,txn.path),map({exact})"),
            Some(not_found),
        ),
        set_var(
            "txn.path_match",
            format!("{wildcard},concat(,txn.path),map_beg({prefix})"),
            Some(not_found),
        ),
        set_var("txn.path_match", format!("var(txn.path),map({exact})"), Some(not_found)),
        set_var("txn.path_match", format!("var(txn.path),map_beg({prefix})"), Some(not_found)),
    ]
}

/// Request rules resolving `txn.sni_match` on the SSL passthrough frontend.
pub fn sni_rules(maps: &MapFiles) -> Vec<Rule> {
    let sni = maps.path_str(maps::SNI);
    vec![
        Rule::SetVar {
            name: "txn.sni_match".to_string(),
            expr: format!("req_ssl_sni,lower,map({sni})"),
            cond: None,
            tcp: true,
        },
        Rule::SetVar {
            name: "txn.sni_match".to_string(),
            expr: format!("req_ssl_sni,lower,regsub(^[^.]*,,),map({sni})"),
            cond: Some("!{ var(txn.sni_match) -m found }".to_string()),
            tcp: true,
        },
    ]
}

/// The map driven `use_backend` rule for `var`.
pub fn map_switching_rule(var: &str) -> BackendSwitchingRule {
    BackendSwitchingRule {
        backend: format!("%[var({var}),field(1,.)]"),
        cond: Some(Condition::If(format!("{{ var({var}) -m found }}"))),
    }
}

fn host_condition(host: &str) -> Option<String> {
    if host.is_empty() {
        None
    } else if let Some(suffix) = host.strip_prefix('*') {
        Some(format!("{{ var(txn.host) -m end {suffix} }}"))
    } else {
        Some(format!("{{ var(txn.host) -m str {host} }}"))
    }
}

fn path_condition(path: &str, path_type: PathType) -> Option<String> {
    match path_type {
        _ if path.is_empty() => None,
        PathType::Exact => Some(format!("{{ path {path} }}")),
        _ if path == "/" => None,
        _ => Some(format!("{{ path_beg {path} }}")),
    }
}

/// `use_backend` rules for routes carrying a `route-acl` expression,
/// emitted ahead of the map driven rule. Each route also sets
/// `txn.path_match` under the same condition so its ingress-scoped rules
/// match.
#[derive(Debug, Default)]
pub struct CustomRoutes {
    desired: BTreeMap<(String, String, String), (BackendSwitchingRule, Rule)>,
}

impl CustomRoutes {
    /// Empty route set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every route at the start of a sync.
    pub fn clean(&mut self) {
        self.desired.clear();
    }

    /// Routes `route` on `acl` and writes its host row, the host map backs
    /// `txn.host_match` whatever the route is dispatched by.
    pub fn add(&mut self, maps: &mut MapFiles, route: &Route, acl: &str) {
        let host = route.map_host();
        if !host.is_empty() {
            maps.append(maps::HOST, host, host);
        }
        let cond: Vec<String> = host_condition(&route.host)
            .into_iter()
            .chain(path_condition(&route.path, route.path_type))
            .chain(std::iter::once(acl.to_string()))
            .collect();
        let cond = cond.join(" ");
        self.desired.insert(
            (route.host.clone(), route.path.clone(), route.backend.clone()),
            (
                BackendSwitchingRule {
                    backend: route.backend.clone(),
                    cond: Some(Condition::If(cond.clone())),
                },
                set_var("txn.path_match", format!("str({})", route.map_value()), Some(&cond)),
            ),
        );
    }

    /// `txn.path_match` rules of the custom routes. Added after
    /// [`routing_rules`] so they override a map lookup that also matched.
    pub fn path_match_rules(&self) -> Vec<Rule> {
        self.desired.values().map(|(_, rule)| rule.clone()).collect()
    }

    /// Sets the switching rules of `frontends`. Returns true when any
    /// frontend changed.
    pub fn refresh(&self, txn: &mut Transaction, frontends: &[&str], errors: &mut ErrorPool) -> bool {
        let mut wanted: Vec<BackendSwitchingRule> = self.desired.values().map(|(rule, _)| rule.clone()).collect();
        wanted.push(map_switching_rule("txn.path_match"));
        let mut changed = false;
        for frontend in frontends {
            if let Some(updated) = errors.collect(set_switching_rules(txn, frontend, &wanted)) {
                changed |= updated;
            }
        }
        changed
    }
}

/// Replaces the `use_backend` rules of `frontend` unless they already
/// equal `wanted`. Returns true when they changed.
pub fn set_switching_rules(
    txn: &mut Transaction,
    frontend: &str,
    wanted: &[BackendSwitchingRule],
) -> Result<bool, HAProxyError> {
    if txn.backend_switching_rules(frontend)? == wanted {
        return Ok(false);
    }
    debug!(frontend = %frontend, rules = wanted.len(), "updating backend switching rules");
    txn.backend_switching_rules_delete_all(frontend)?;
    for (index, rule) in wanted.iter().enumerate() {
        txn.backend_switching_rule_create(frontend, index, rule.clone())?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use haproxy_client::{ConfigClient, Configuration, Frontend, Mode};

    fn route(host: &str, path: &str, path_type: PathType) -> Route {
        Route {
            host: host.to_string(),
            path: path.to_string(),
            path_type,
            backend: "ns_app_http".to_string(),
            ..Default::default()
        }
    }

    fn rows(maps: &MapFiles, name: &str) -> Vec<(String, String)> {
        maps.rows(name)
    }

    fn row(key: &str, value: &str) -> (String, String) {
        (key.to_string(), value.to_string())
    }

    #[test]
    fn test_exact_path_rows() {
        let mut maps = MapFiles::new("/tmp/maps");
        add_route(&mut maps, &route("a.example", "/foo", PathType::Exact)).unwrap();
        assert_eq!(rows(&maps, maps::PATH_EXACT), vec![row("a.example/foo", "ns_app_http")]);
        assert_eq!(rows(&maps, maps::HOST), vec![row("a.example", "a.example")]);
        assert!(rows(&maps, maps::PATH_PREFIX).is_empty());
    }

    #[test]
    fn test_prefix_path_rows() {
        let mut maps = MapFiles::new("/tmp/maps");
        add_route(&mut maps, &route("a.example", "/foo/", PathType::Prefix)).unwrap();
        assert_eq!(rows(&maps, maps::PATH_EXACT), vec![row("a.example/foo", "ns_app_http")]);
        assert_eq!(rows(&maps, maps::PATH_PREFIX), vec![row("a.example/foo/", "ns_app_http")]);
    }

    #[test]
    fn test_root_and_implementation_specific_rows() {
        let mut maps = MapFiles::new("/tmp/maps");
        add_route(&mut maps, &route("a.example", "/", PathType::Prefix)).unwrap();
        add_route(&mut maps, &route("a.example", "/bar/", PathType::ImplementationSpecific)).unwrap();
        assert_eq!(
            rows(&maps, maps::PATH_PREFIX),
            vec![row("a.example/bar", "ns_app_http"), row("a.example/", "ns_app_http")]
        );
        assert_eq!(rows(&maps, maps::PATH_EXACT), vec![row("a.example/bar", "ns_app_http")]);
    }

    #[test]
    fn test_wildcard_host_and_rule_ids() {
        let mut maps = MapFiles::new("/tmp/maps");
        let mut r = route("*.example.com", "/", PathType::Prefix);
        r.rule_ids = vec!["aa".to_string(), "bb".to_string()];
        add_route(&mut maps, &r).unwrap();
        assert_eq!(
            rows(&maps, maps::PATH_PREFIX),
            vec![row(".example.com/", "ns_app_http.aa.bb")]
        );
        assert_eq!(rows(&maps, maps::HOST), vec![row(".example.com", ".example.com")]);
    }

    #[test]
    fn test_ssl_passthrough_adds_sni_only() {
        let mut maps = MapFiles::new("/tmp/maps");
        let mut r = route("s.example", "", PathType::ImplementationSpecific);
        r.ssl_passthrough = true;
        r.backend = "ns_app_https".to_string();
        add_route(&mut maps, &r).unwrap();
        assert_eq!(rows(&maps, maps::SNI), vec![row("s.example", "ns_app_https")]);
        assert!(rows(&maps, maps::HOST).is_empty());

        r.host = String::new();
        assert!(matches!(add_route(&mut maps, &r), Err(ControllerError::Validation(_))));
    }

    #[test]
    fn test_custom_routes_refresh_is_idempotent() {
        let mut client = ConfigClient::new("/tmp/unused.cfg", Configuration::default());
        let mut txn = client.transaction_start().unwrap();
        txn.frontend_create_if_not_exists(Frontend::new("http", Mode::Http));
        let mut errors = ErrorPool::new();

        let mut maps = MapFiles::new("/tmp/maps");
        let mut routes = CustomRoutes::new();
        routes.add(&mut maps, &route("a.example", "/api", PathType::Prefix), "{ req.hdr(x-canary) -m found }");
        assert!(routes.refresh(&mut txn, &["http"], &mut errors));
        assert!(!routes.refresh(&mut txn, &["http"], &mut errors));

        let rendered: Vec<String> = txn
            .backend_switching_rules("http")
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            rendered,
            vec![
                "use_backend ns_app_http if { var(txn.host) -m str a.example } { path_beg /api } { req.hdr(x-canary) -m found }"
                    .to_string(),
                "use_backend %[var(txn.path_match),field(1,.)] if { var(txn.path_match) -m found }".to_string(),
            ]
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn test_custom_route_sets_path_match_and_host_row() {
        let mut maps = MapFiles::new("/tmp/maps");
        let mut routes = CustomRoutes::new();
        let mut r = route("a.example", "/api", PathType::Prefix);
        r.rule_ids = vec!["aa".to_string()];
        routes.add(&mut maps, &r, "{ req.hdr(x-canary) -m found }");

        assert_eq!(rows(&maps, maps::HOST), vec![row("a.example", "a.example")]);
        assert!(rows(&maps, maps::PATH_PREFIX).is_empty());
        assert_eq!(
            routes.path_match_rules(),
            vec![Rule::SetVar {
                name: "txn.path_match".to_string(),
                expr: "str(ns_app_http.aa)".to_string(),
                cond: Some(
                    "{ var(txn.host) -m str a.example } { path_beg /api } { req.hdr(x-canary) -m found }".to_string()
                ),
                tcp: false,
            }]
        );
    }
}
