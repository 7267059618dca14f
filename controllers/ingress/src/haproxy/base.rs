//! Sections every configuration carries
//!
//! The controller rebuilds these each sync and lets the transaction drop
//! the edits that change nothing.

use crate::config::ControllerConfig;
use crate::rules::Rule;
use haproxy_client::{
    Backend, Bind, Defaults, Frontend, Global, HAProxyError, HttpRequestAction, HttpRequestRule, Mode, ParentType,
    RuntimeApiBind, Server, Transaction,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Plain HTTP frontend.
pub const HTTP_FRONTEND: &str = "http";
/// TLS terminating frontend.
pub const HTTPS_FRONTEND: &str = "https";
/// SSL passthrough frontend, TCP mode.
pub const SSL_FRONTEND: &str = "ssl";
pub const HEALTHZ_FRONTEND: &str = "healthz";
pub const STATS_FRONTEND: &str = "stats";
/// Backend forwarding passthrough traffic to the HTTPS frontend
pub const SSL_BACKEND: &str = "ssl";
/// Built-in backend answering 404 when no default service is configured
pub const DEFAULT_LOCAL_BACKEND: &str = "default-local-service";

const SSL_INSPECT_DELAY: &str = "5000";

/// Global section for `config`.
pub fn global(config: &ControllerConfig) -> Global {
    Global {
        master_worker: true,
        pidfile: Some(config.pid_file().to_string_lossy().into_owned()),
        runtime_apis: vec![RuntimeApiBind {
            address: config.runtime_socket().to_string_lossy().into_owned(),
            level: "admin".to_string(),
            expose_fd_listeners: true,
        }],
        default_path: Some("config".to_string()),
        limited_quic: true,
        server_state_file: Some("global".to_string()),
        server_state_base: Some(format!("{}/", config.state_dir.to_string_lossy())),
        stats_timeout: Some("1m".to_string()),
        ..Default::default()
    }
}

/// Defaults section before ConfigMap and custom resource overrides.
pub fn defaults() -> Defaults {
    let timeouts = [
        ("connect", "5s"),
        ("client", "50s"),
        ("queue", "5s"),
        ("server", "50s"),
        ("tunnel", "1h"),
        ("http-request", "5s"),
        ("http-keep-alive", "1m"),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .collect();
    Defaults {
        mode: Some(Mode::Http),
        log_global: true,
        options: vec!["redispatch".to_string(), "dontlognull".to_string(), "http-keep-alive".to_string()],
        maxconn: None,
        retries: Some(3),
        timeouts,
        load_server_state_from_file: Some("global".to_string()),
        ..Default::default()
    }
}

/// IPv4 and IPv6 binds on `port`, as enabled.
pub fn binds(config: &ControllerConfig, port: u16, params: &[String]) -> Vec<Bind> {
    let mut binds = Vec::new();
    if !config.disable_ipv4 {
        binds.push(Bind {
            name: "v4".to_string(),
            address: config.ipv4_bind_address.clone(),
            port: Some(port),
            params: params.to_vec(),
        });
    }
    if !config.disable_ipv6 {
        let mut params = params.to_vec();
        if !config.disable_ipv4 {
            params.push("v6only".to_string());
        }
        binds.push(Bind {
            name: "v6".to_string(),
            address: config.ipv6_bind_address.clone(),
            port: Some(port),
            params,
        });
    }
    binds
}

/// Binds of the HTTPS frontend. Behind SSL passthrough it listens on a
/// local socket fed by the `ssl` backend. Without certificates it has none.
pub fn https_binds(config: &ControllerConfig, has_certs: bool, passthrough: bool) -> Vec<Bind> {
    if !has_certs {
        return Vec::new();
    }
    let ssl = vec![
        "ssl".to_string(),
        format!("crt {}", config.frontend_certs_dir().to_string_lossy()),
        "alpn h2,http/1.1".to_string(),
    ];
    if passthrough {
        let mut params = ssl;
        params.insert(0, "accept-proxy".to_string());
        return vec![Bind {
            name: "haproxy-ssl".to_string(),
            address: format!("unix@{}", config.ssl_frontend_socket().to_string_lossy()),
            port: None,
            params,
        }];
    }
    binds(config, config.https_bind_port, &ssl)
}

/// Settings of the HTTP and HTTPS frontends before ConfigMap and custom
/// resource overrides.
pub fn http_frontend(name: &str, default_backend: &str) -> Frontend {
    Frontend {
        default_backend: Some(default_backend.to_string()),
        options: vec!["http-keep-alive".to_string(), "forwardfor".to_string()],
        ..Frontend::new(name, Mode::Http)
    }
}

/// Creates or updates `frontend` and makes its binds equal to `binds`.
/// Returns true when anything changed.
pub fn sync_frontend(txn: &mut Transaction, frontend: Frontend, binds: Vec<Bind>) -> Result<bool, HAProxyError> {
    let name = frontend.name.clone();
    let mut changed = if txn.frontend_get(&name).is_ok() {
        txn.frontend_edit(frontend)?
    } else {
        txn.frontend_create(frontend)?;
        true
    };

    let wanted: BTreeMap<String, Bind> = binds.into_iter().map(|b| (b.name.clone(), b)).collect();
    let current: Vec<String> = txn.frontend_binds(&name)?.iter().map(|b| b.name.clone()).collect();
    for bind in current.iter().filter(|bind| !wanted.contains_key(*bind)) {
        txn.frontend_bind_delete(&name, bind)?;
        changed = true;
    }
    for bind in wanted.into_values() {
        if current.contains(&bind.name) {
            changed |= txn.frontend_bind_edit(&name, bind)?;
        } else {
            txn.frontend_bind_create(&name, bind)?;
            changed = true;
        }
    }
    if changed {
        debug!(frontend = %name, "frontend updated");
    }
    Ok(changed)
}

/// Deletes `frontend` if present. Returns true when it existed.
pub fn remove_frontend(txn: &mut Transaction, frontend: &str) -> Result<bool, HAProxyError> {
    match txn.frontend_delete(frontend) {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Healthz and stats frontends plus the built-in 404 backend.
pub fn sync_static(txn: &mut Transaction, config: &ControllerConfig) -> Result<bool, HAProxyError> {
    let healthz = Frontend {
        monitor_uri: Some("/healthz".to_string()),
        options: vec!["dontlog-normal".to_string()],
        ..Frontend::new(HEALTHZ_FRONTEND, Mode::Http)
    };
    let mut changed = sync_frontend(txn, healthz, binds(config, config.healthz_bind_port, &[]))?;

    let stats = Frontend {
        stats_uri: Some("/".to_string()),
        ..Frontend::new(STATS_FRONTEND, Mode::Http)
    };
    changed |= sync_frontend(txn, stats, binds(config, config.stats_bind_port, &[]))?;

    if txn.backend_create_if_not_exists(Backend::new(DEFAULT_LOCAL_BACKEND, Mode::Http)) {
        txn.http_request_rule_create(
            ParentType::Backend,
            DEFAULT_LOCAL_BACKEND,
            0,
            HttpRequestRule {
                action: HttpRequestAction::Return {
                    status: 404,
                    content_type: None,
                    content: None,
                },
                cond: None,
            },
        )?;
        changed = true;
    }
    Ok(changed)
}

/// The `ssl` frontend and backend of SSL passthrough. Rules of the `ssl`
/// frontend go through the rules engine, see [`ssl_rules`].
pub fn sync_ssl_passthrough(txn: &mut Transaction, config: &ControllerConfig, enabled: bool) -> Result<bool, HAProxyError> {
    if !enabled {
        let mut changed = remove_frontend(txn, SSL_FRONTEND)?;
        if txn.backend_exists(SSL_BACKEND) {
            txn.backend_delete(SSL_BACKEND)?;
            changed = true;
        }
        return Ok(changed);
    }

    let frontend = Frontend {
        default_backend: Some(SSL_BACKEND.to_string()),
        options: vec!["tcplog".to_string()],
        ..Frontend::new(SSL_FRONTEND, Mode::Tcp)
    };
    let mut changed = sync_frontend(txn, frontend, binds(config, config.https_bind_port, &[]))?;

    if txn.backend_create_if_not_exists(Backend::new(SSL_BACKEND, Mode::Tcp)) {
        txn.backend_server_create(
            SSL_BACKEND,
            Server {
                name: "haproxy-ssl".to_string(),
                address: format!("unix@{}", config.ssl_frontend_socket().to_string_lossy()),
                port: None,
                params: vec!["send-proxy-v2".to_string()],
                maintenance: false,
            },
        )?;
        changed = true;
    }
    Ok(changed)
}

/// Inspect and accept rules of the `ssl` frontend.
pub fn ssl_rules() -> Vec<Rule> {
    vec![
        Rule::InspectDelay {
            timeout: SSL_INSPECT_DELAY.to_string(),
        },
        Rule::AcceptContent {
            cond: "{ req_ssl_hello_type 1 }".to_string(),
        },
        Rule::RejectContent {
            cond: "!{ req_ssl_hello_type 1 }".to_string(),
        },
    ]
}
