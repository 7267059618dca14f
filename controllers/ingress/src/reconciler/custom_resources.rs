//! HAProxy custom resources: Global, Defaults, Backend and Frontend
//! overlays on the generated sections, and TCP services.

use super::{service_addresses, SyncContext};
use crate::annotations::{backend, Annotations};
use crate::error::{ControllerError, ErrorPool};
use crate::haproxy::base;
use crate::store::types::{CustomResource, Tracked};
use crate::store::{K8sStore, Namespace, PortRef};
use crate::utils::{backend_name, haproxy_duration, split_ns_name};
use crds::backend::v3::BackendSpec;
use crds::backend::BackendConfig;
use crds::defaults::v3::DefaultsSpec;
use crds::defaults::Forwardfor;
use crds::global::v3::GlobalSpec;
use crds::tcp::{TCPBind, TCPModel};
use crds::FrontendConfig;
use haproxy_client::{Backend, Balance, Bind, Defaults, Frontend, Global, LogTarget, Mode};
use std::collections::BTreeMap;
use tracing::{debug, warn};

fn lookup<'s, T>(
    store: &'s K8sStore,
    reference: Option<&String>,
    kind: &str,
    resources: fn(&Namespace) -> &BTreeMap<String, Tracked<CustomResource<T>>>,
    errors: &mut ErrorPool,
) -> Option<&'s T> {
    let reference = reference?;
    let Some((ns, name)) = errors.collect(split_ns_name(reference, "default")) else {
        return None;
    };
    let found = store
        .namespace(ns)
        .and_then(|namespace| resources(namespace).get(name))
        .filter(|resource| !resource.is_deleted())
        .map(|resource| &resource.data.spec);
    if found.is_none() {
        errors.add(ControllerError::NotFound(format!("{kind} {ns}/{name}")));
    }
    found
}

pub fn lookup_global<'s>(store: &'s K8sStore, reference: Option<&String>, errors: &mut ErrorPool) -> Option<&'s GlobalSpec> {
    lookup(store, reference, "Global", |ns| &ns.cr_globals, errors)
}

pub fn lookup_defaults<'s>(
    store: &'s K8sStore,
    reference: Option<&String>,
    errors: &mut ErrorPool,
) -> Option<&'s DefaultsSpec> {
    lookup(store, reference, "Defaults", |ns| &ns.cr_defaults, errors)
}

pub fn lookup_backend<'s>(store: &'s K8sStore, reference: Option<&String>, errors: &mut ErrorPool) -> Option<&'s BackendSpec> {
    lookup(store, reference, "Backend", |ns| &ns.cr_backends, errors)
}

pub fn apply_global(global: &mut Global, log_targets: &mut Vec<LogTarget>, spec: &GlobalSpec) {
    if let Some(config) = &spec.config {
        overlay(&mut global.maxconn, &config.maxconn);
        overlay(&mut global.nbthread, &config.nbthread);
        overlay(&mut global.hard_stop_after, &config.hard_stop_after);
        overlay(&mut global.stats_timeout, &config.stats_timeout);
        overlay(&mut global.ssl_default_bind_ciphers, &config.ssl_default_bind_ciphers);
        overlay(&mut global.ssl_default_bind_ciphersuites, &config.ssl_default_bind_ciphersuites);
        overlay(&mut global.ssl_default_bind_options, &config.ssl_default_bind_options);
        overlay(&mut global.tune_ssl_default_dh_param, &config.tune_ssl_default_dh_param);
        overlay(&mut global.log_send_hostname, &config.log_send_hostname);
        overlay(&mut global.spread_checks, &config.spread_checks);
    }
    if !spec.log_targets.is_empty() {
        *log_targets = spec
            .log_targets
            .iter()
            .map(|target| LogTarget {
                global: target.global,
                address: target.address.clone(),
                facility: target.facility.clone().unwrap_or_else(|| "local0".to_string()),
                level: target.level.clone(),
                format: target.format.clone(),
                length: target.length.and_then(|l| u32::try_from(l).ok()),
            })
            .collect();
    }
}

fn overlay<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        target.clone_from(value);
    }
}

fn set_option(options: &mut Vec<String>, name: &str, enabled: bool) {
    options.retain(|option| option != name);
    if enabled {
        options.push(name.to_string());
    }
}

fn forwardfor_option(forwardfor: &Forwardfor) -> String {
    let mut option = "forwardfor".to_string();
    if let Some(except) = &forwardfor.except {
        option.push_str(&format!(" except {except}"));
    }
    if let Some(header) = &forwardfor.header {
        option.push_str(&format!(" header {header}"));
    }
    if forwardfor.ifnone {
        option.push_str(" if-none");
    }
    option
}

fn parse_mode(value: &str) -> Result<Mode, ControllerError> {
    match value {
        "http" => Ok(Mode::Http),
        "tcp" => Ok(Mode::Tcp),
        _ => Err(ControllerError::validation("mode", value, "expected http or tcp")),
    }
}

fn set_timeout(timeouts: &mut BTreeMap<String, String>, name: &str, value: &Option<String>, errors: &mut ErrorPool) {
    if let Some(value) = value
        && let Some(timeout) = errors.collect(haproxy_duration(value))
    {
        timeouts.insert(name.to_string(), timeout);
    }
}

pub fn apply_defaults(defaults: &mut Defaults, spec: &DefaultsSpec, errors: &mut ErrorPool) {
    let Some(config) = &spec.config else {
        return;
    };
    if let Some(mode) = &config.mode
        && let Some(mode) = errors.collect(parse_mode(mode))
    {
        defaults.mode = Some(mode);
    }
    overlay(&mut defaults.maxconn, &config.maxconn);
    overlay(&mut defaults.retries, &config.retries);
    overlay(&mut defaults.log_format, &config.log_format);

    let t = &config.timeouts;
    for (name, value) in [
        ("connect", &t.connect),
        ("client", &t.client),
        ("server", &t.server),
        ("queue", &t.queue),
        ("tunnel", &t.tunnel),
        ("http-request", &t.http_request),
        ("http-keep-alive", &t.http_keep_alive),
        ("check", &t.check),
        ("client-fin", &t.client_fin),
        ("server-fin", &t.server_fin),
    ] {
        set_timeout(&mut defaults.timeouts, name, value, errors);
    }

    if let Some(enabled) = config.dontlognull {
        set_option(&mut defaults.options, "dontlognull", enabled);
    }
    if let Some(enabled) = config.redispatch {
        set_option(&mut defaults.options, "redispatch", enabled);
    }
    if let Some(mode) = &config.http_connection_mode {
        match mode.as_str() {
            "http-keep-alive" | "httpclose" | "http-server-close" => {
                defaults
                    .options
                    .retain(|o| !matches!(o.as_str(), "http-keep-alive" | "httpclose" | "http-server-close"));
                defaults.options.push(mode.clone());
            }
            other => errors.add(ControllerError::validation("http_connection_mode", other, "unknown mode")),
        }
    }
    if let Some(forwardfor) = &config.forwardfor {
        defaults.options.retain(|o| !o.starts_with("forwardfor"));
        if forwardfor.enabled {
            defaults.options.push(forwardfor_option(forwardfor));
        }
    }
}

/// Applies a Backend resource over the annotation derived backend.
pub fn apply_backend(backend: &mut Backend, config: &BackendConfig, errors: &mut ErrorPool) {
    if let Some(mode) = &config.mode
        && let Some(mode) = errors.collect(parse_mode(mode))
    {
        backend.mode = mode;
    }
    if let Some(balance) = &config.balance {
        backend.balance = Some(Balance {
            algorithm: balance.algorithm.clone(),
            params: balance.params.clone(),
        });
    }
    set_timeout(&mut backend.timeouts, "connect", &config.connect_timeout, errors);
    set_timeout(&mut backend.timeouts, "server", &config.server_timeout, errors);
    set_timeout(&mut backend.timeouts, "check", &config.check_timeout, errors);
    set_timeout(&mut backend.timeouts, "tunnel", &config.tunnel_timeout, errors);

    if let Some(forwardfor) = &config.forwardfor {
        backend.options.retain(|o| !o.starts_with("forwardfor"));
        if forwardfor.enabled && backend.mode == Mode::Http {
            backend.options.push(forwardfor_option(forwardfor));
        }
    }
    if let Some(enabled) = config.abortonclose {
        set_option(&mut backend.options, "abortonclose", enabled);
    }
    if let Some(reuse) = &config.http_reuse {
        backend.http_reuse = Some(reuse.clone());
    }
    if let Some(cookie) = &config.cookie {
        let mut value = cookie.name.clone();
        value.push(' ');
        value.push_str(cookie.r#type.as_deref().unwrap_or("insert"));
        for (flag, set) in [("indirect", cookie.indirect), ("nocache", cookie.nocache), ("dynamic", cookie.dynamic)] {
            if set {
                value.push(' ');
                value.push_str(flag);
            }
        }
        backend.cookie = Some(value);
    }
    if let Some(server) = &config.default_server {
        let mut params = Vec::new();
        if server.check == Some(true) {
            params.push("check".to_string());
        }
        if let Some(inter) = &server.inter
            && let Some(inter) = errors.collect(haproxy_duration(inter))
        {
            params.push(format!("inter {inter}"));
        }
        for (keyword, value) in [("fall", server.fall), ("rise", server.rise), ("maxconn", server.maxconn)] {
            if let Some(value) = value {
                params.push(format!("{keyword} {value}"));
            }
        }
        if server.ssl == Some(true) {
            params.push("ssl".to_string());
            params.push(format!("verify {}", server.verify.as_deref().unwrap_or("none")));
            if let Some(alpn) = &server.alpn {
                params.push(format!("alpn {alpn}"));
            }
        }
        if server.send_proxy_v2 == Some(true) {
            params.push("send-proxy-v2".to_string());
        }
        backend.default_server = params;
    }
}

/// Applies a Frontend resource over a generated frontend.
pub fn apply_frontend(frontend: &mut Frontend, config: &FrontendConfig, errors: &mut ErrorPool) {
    overlay(&mut frontend.maxconn, &config.maxconn);
    overlay(&mut frontend.log_format, &config.log_format);
    set_timeout(&mut frontend.timeouts, "client", &config.client_timeout, errors);
    set_timeout(&mut frontend.timeouts, "http-keep-alive", &config.http_keep_alive_timeout, errors);
    set_timeout(&mut frontend.timeouts, "http-request", &config.http_request_timeout, errors);
}

/// Frontend resources of relevant namespaces, keyed by the frontend they
/// target. The first resource in namespace/name order wins.
pub fn frontend_overrides(store: &K8sStore) -> BTreeMap<String, &FrontendConfig> {
    let mut overrides: BTreeMap<String, &FrontendConfig> = BTreeMap::new();
    for ns in store.namespaces.values().filter(|ns| ns.relevant) {
        for resource in ns.cr_frontends.values().filter(|r| !r.is_deleted()) {
            let spec = &resource.data.spec;
            if overrides.contains_key(&spec.frontend) {
                warn!(
                    frontend = %spec.frontend,
                    resource = %format!("{}/{}", ns.name, resource.data.name),
                    "frontend already configured by another resource, ignored"
                );
                continue;
            }
            overrides.insert(spec.frontend.clone(), &spec.config);
        }
    }
    overrides
}

/// Name of the frontend of one TCP service.
pub fn tcp_frontend_name(namespace: &str, resource: &str, model: &TCPModel) -> String {
    let name = if model.frontend.name.is_empty() {
        &model.name
    } else {
        &model.frontend.name
    };
    format!("tcp-{namespace}-{resource}-{name}")
}

fn tcp_bind(config: &crate::config::ControllerConfig, bind: &TCPBind) -> Result<Bind, ControllerError> {
    let port = u16::try_from(bind.port)
        .map_err(|_| ControllerError::validation("port", &bind.port.to_string(), "out of range"))?;
    let mut params = Vec::new();
    if bind.ssl {
        params.push("ssl".to_string());
        let crt = bind
            .ssl_certificate
            .clone()
            .unwrap_or_else(|| config.frontend_certs_dir().to_string_lossy().into_owned());
        params.push(format!("crt {crt}"));
    }
    if bind.accept_proxy {
        params.push("accept-proxy".to_string());
    }
    if bind.v4v6 {
        params.push("v4v6".to_string());
    }
    let address = bind
        .address
        .clone()
        .unwrap_or_else(|| if bind.v4v6 { "::".to_string() } else { config.ipv4_bind_address.clone() });
    Ok(Bind {
        name: bind.name.clone(),
        address,
        port: Some(port),
        params,
    })
}

/// Frontends and backends of every TCP resource.
pub(super) fn sync_tcp(ctx: &mut SyncContext<'_>) {
    let store = ctx.store;
    for ns in store.namespaces.values().filter(|ns| ns.relevant) {
        for resource in ns.cr_tcps.values().filter(|r| !r.is_deleted()) {
            for model in &resource.data.spec.services {
                sync_tcp_model(ctx, ns, &resource.data.name, model);
            }
        }
    }
}

fn sync_tcp_model(ctx: &mut SyncContext<'_>, ns: &Namespace, resource: &str, model: &TCPModel) {
    let frontend_name = tcp_frontend_name(&ns.name, resource, model);
    let Some(service) = ns.service(&model.service.name) else {
        ctx.errors.add(ControllerError::NotFound(format!(
            "service {}/{} of TCP {frontend_name}",
            ns.name, model.service.name
        )));
        return;
    };
    let Ok(port) = i32::try_from(model.service.port) else {
        ctx.errors.add(ControllerError::validation(
            "service.port",
            &model.service.port.to_string(),
            "out of range",
        ));
        return;
    };
    let Some(service_port) = service.port(&PortRef::Number(port)) else {
        ctx.errors.add(ControllerError::NotFound(format!(
            "port {port} of service {}/{}",
            ns.name, service.name
        )));
        return;
    };

    let port_label = if service_port.name.is_empty() {
        service_port.port.to_string()
    } else {
        service_port.name.clone()
    };
    let name = backend_name(&ns.name, &service.name, &port_label);
    let ann = Annotations::new(None, Some(&service.annotations), ctx.configmap);
    let mut settings = backend::parse(
        &ann,
        &name,
        Mode::Tcp,
        ctx.store.replicas(),
        ctx.config.disable_config_snippets.backend,
        ctx.errors,
    );
    if let Some(spec) = lookup_backend(ctx.store, settings.cr_backend.as_ref(), ctx.errors)
        && let Some(config) = &spec.config
    {
        apply_backend(&mut settings.backend, config, ctx.errors);
    }
    let (addresses, target_port) = service_addresses(ns, service, service_port);
    if let Err(e) = ctx.haproxy.sync_backend(ctx.txn, &settings, &addresses, target_port) {
        ctx.errors.add(e);
        return;
    }

    let mut binds = Vec::new();
    for bind in &model.frontend.binds {
        if let Some(bind) = ctx.errors.collect(tcp_bind(ctx.config, bind)) {
            binds.push(bind);
        }
    }
    let mut frontend = Frontend {
        default_backend: Some(name.clone()),
        maxconn: model.frontend.maxconn,
        log_format: model.frontend.log_format.clone(),
        ..Frontend::new(&frontend_name, Mode::Tcp)
    };
    if model.frontend.tcplog {
        frontend.options.push("tcplog".to_string());
    }
    debug!(frontend = %frontend_name, backend = %name, "tcp service");
    if let Err(e) = ctx.haproxy.sync_frontend(ctx.txn, frontend, binds) {
        ctx.errors.add(e);
    }
}

/// Names of the frontends a Frontend resource may target.
pub fn overridable_frontends() -> [&'static str; 3] {
    [base::HTTP_FRONTEND, base::HTTPS_FRONTEND, base::STATS_FRONTEND]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::backend::{Cookie, DefaultServer};
    use crds::defaults::{DefaultsConfig, Timeouts};
    use crds::global::{GlobalConfig, LogTarget as CrLogTarget};

    #[test]
    fn test_global_overlay_keeps_base_fields() {
        let mut global = Global {
            master_worker: true,
            maxconn: Some(1000),
            ..Default::default()
        };
        let mut targets = vec![LogTarget {
            address: "127.0.0.1".to_string(),
            facility: "local0".to_string(),
            ..Default::default()
        }];
        let spec = GlobalSpec {
            config: Some(GlobalConfig {
                nbthread: Some(4),
                ..Default::default()
            }),
            log_targets: vec![CrLogTarget {
                address: "10.0.0.9:514".to_string(),
                facility: None,
                level: Some("info".to_string()),
                format: None,
                length: Some(2048),
                global: false,
            }],
        };
        apply_global(&mut global, &mut targets, &spec);
        assert!(global.master_worker);
        assert_eq!(global.maxconn, Some(1000));
        assert_eq!(global.nbthread, Some(4));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].address, "10.0.0.9:514");
        assert_eq!(targets[0].facility, "local0");
        assert_eq!(targets[0].length, Some(2048));
    }

    #[test]
    fn test_defaults_overlay() {
        let mut defaults = base::defaults();
        let spec = DefaultsSpec {
            config: Some(DefaultsConfig {
                mode: Some("tcp".to_string()),
                timeouts: Timeouts {
                    client: Some("20s".to_string()),
                    ..Default::default()
                },
                http_connection_mode: Some("http-server-close".to_string()),
                dontlognull: Some(false),
                forwardfor: Some(Forwardfor {
                    enabled: true,
                    except: Some("127.0.0.0/8".to_string()),
                    header: None,
                    ifnone: true,
                }),
                ..Default::default()
            }),
        };
        let mut errors = ErrorPool::new();
        apply_defaults(&mut defaults, &spec, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(defaults.mode, Some(Mode::Tcp));
        assert_eq!(defaults.timeouts["client"], "20000ms");
        assert!(!defaults.options.contains(&"dontlognull".to_string()));
        assert!(!defaults.options.contains(&"http-keep-alive".to_string()));
        assert!(defaults.options.contains(&"http-server-close".to_string()));
        assert!(defaults.options.contains(&"forwardfor except 127.0.0.0/8 if-none".to_string()));
        assert!(defaults.log_global);
    }

    #[test]
    fn test_backend_overlay() {
        let mut backend = Backend::new("ns_app_http", Mode::Http);
        backend.options.push("forwardfor".to_string());
        let config = BackendConfig {
            server_timeout: Some("1m".to_string()),
            check_timeout: Some("soon".to_string()),
            cookie: Some(Cookie {
                name: "SRV".to_string(),
                r#type: None,
                indirect: true,
                nocache: true,
                dynamic: false,
            }),
            default_server: Some(DefaultServer {
                check: Some(true),
                inter: Some("2s".to_string()),
                fall: Some(3),
                ssl: Some(true),
                ..Default::default()
            }),
            abortonclose: Some(true),
            ..Default::default()
        };
        let mut errors = ErrorPool::new();
        apply_backend(&mut backend, &config, &mut errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(backend.timeouts["server"], "60000ms");
        assert!(!backend.timeouts.contains_key("check"));
        assert_eq!(backend.cookie.as_deref(), Some("SRV insert indirect nocache"));
        assert_eq!(
            backend.default_server,
            vec!["check", "inter 2000ms", "fall 3", "ssl", "verify none"]
        );
        assert!(backend.options.contains(&"abortonclose".to_string()));
        assert!(backend.options.contains(&"forwardfor".to_string()));
    }

    #[test]
    fn test_tcp_bind() {
        let config = crate::config::ControllerConfig::from_lookup(|_| None).unwrap();
        let bind = tcp_bind(
            &config,
            &TCPBind {
                name: "pg".to_string(),
                address: None,
                port: 5432,
                ssl: false,
                ssl_certificate: None,
                v4v6: false,
                accept_proxy: true,
            },
        )
        .unwrap();
        assert_eq!(bind.to_string(), "bind 0.0.0.0:5432 name pg accept-proxy");
        let invalid = TCPBind {
            port: 70000,
            ..Default::default()
        };
        assert!(tcp_bind(&config, &invalid).is_err());
    }
}
