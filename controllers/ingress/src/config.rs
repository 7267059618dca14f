//! Controller configuration loaded from environment variables.

use crate::error::ControllerError;
use crate::logging::LogLevel;
use crate::store::NamespaceFilter;
use crate::utils::{parse_duration, split_list, split_ns_name};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How the HAProxy process is supervised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisorKind {
    #[default]
    Direct,
    Pebble,
    S6,
}

impl FromStr for SupervisorKind {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "pebble" => Ok(Self::Pebble),
            "s6" | "s6-overlay" => Ok(Self::S6),
            other => Err(ControllerError::InvalidConfig(format!(
                "unknown process supervisor '{other}'"
            ))),
        }
    }
}

/// Sections where user config snippets are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisabledSnippets {
    pub global: bool,
    pub frontend: bool,
    pub backend: bool,
}

impl FromStr for DisabledSnippets {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut disabled = Self::default();
        for item in split_list(s) {
            match item.as_str() {
                "all" => {
                    disabled.global = true;
                    disabled.frontend = true;
                    disabled.backend = true;
                }
                "global" => disabled.global = true,
                "frontend" => disabled.frontend = true,
                "backend" => disabled.backend = true,
                other => {
                    return Err(ControllerError::InvalidConfig(format!(
                        "unknown config snippet section '{other}'"
                    )));
                }
            }
        }
        Ok(disabled)
    }
}

/// `ns/name:port` of the default backend service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
    pub port: Option<String>,
}

impl FromStr for ServiceRef {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ns_name, port) = match s.rsplit_once(':') {
            Some((ns_name, port)) => (ns_name, Some(port.to_string())),
            None => (s, None),
        };
        let (namespace, name) = split_ns_name(ns_name, "default")
            .map_err(|e| ControllerError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            port,
        })
    }
}

/// `ns/name` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl FromStr for NamespacedName {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) =
            split_ns_name(s, "default").map_err(|e| ControllerError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub pod_name: String,
    pub pod_namespace: String,
    pub configmap: NamespacedName,
    pub ingress_class: String,
    pub empty_ingress_class: bool,
    pub controller_class: String,
    pub gateway_controller_name: String,
    pub namespace_whitelist: Vec<String>,
    pub namespace_blacklist: Vec<String>,
    pub default_backend_service: Option<ServiceRef>,
    pub default_ssl_certificate: Option<NamespacedName>,
    pub http_bind_port: u16,
    pub https_bind_port: u16,
    pub healthz_bind_port: u16,
    pub stats_bind_port: u16,
    pub controller_port: u16,
    pub disable_ipv4: bool,
    pub disable_ipv6: bool,
    pub ipv4_bind_address: String,
    pub ipv6_bind_address: String,
    pub sync_period: Duration,
    pub cache_resync_period: Duration,
    pub log_level: LogLevel,
    pub haproxy_binary: PathBuf,
    pub config_dir: PathBuf,
    pub runtime_dir: PathBuf,
    pub state_dir: PathBuf,
    pub process_supervisor: SupervisorKind,
    pub s6_service_dir: PathBuf,
    pub prometheus: bool,
    pub disable_config_snippets: DisabledSnippets,
    pub ssl_passthrough: bool,
    pub gateway_api: bool,
    pub custom_resources: bool,
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ControllerError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(ControllerError::InvalidConfig(format!("{name}: invalid boolean '{other}'"))),
    }
}

fn parse_port(name: &str, value: &str) -> Result<u16, ControllerError> {
    value
        .trim()
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("{name}: invalid port '{value}': {e}")))
}

impl ControllerConfig {
    /// Reads every variable from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());
        let opt = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let flag = |name: &str, default: bool| -> Result<bool, ControllerError> {
            lookup(name).map_or(Ok(default), |value| parse_bool(name, &value))
        };
        let port = |name: &str, default: u16| -> Result<u16, ControllerError> {
            lookup(name).map_or(Ok(default), |value| parse_port(name, &value))
        };
        let duration = |name: &str, default: &str| -> Result<Duration, ControllerError> {
            let value = var(name, default);
            parse_duration(&value).map_err(|e| ControllerError::InvalidConfig(format!("{name}: {e}")))
        };

        Ok(Self {
            pod_name: var("POD_NAME", "haproxy-ingress"),
            pod_namespace: var("POD_NAMESPACE", "default"),
            configmap: var("CONFIGMAP", "default/haproxy-kubernetes-ingress").parse()?,
            ingress_class: var("INGRESS_CLASS", "haproxy"),
            empty_ingress_class: flag("EMPTY_INGRESS_CLASS", false)?,
            controller_class: var("CONTROLLER_CLASS", "haproxy.org/ingress-controller"),
            gateway_controller_name: var("GATEWAY_CONTROLLER_NAME", "haproxy.org/gateway-controller"),
            namespace_whitelist: split_list(&var("NAMESPACE_WHITELIST", "")),
            namespace_blacklist: split_list(&var("NAMESPACE_BLACKLIST", "")),
            default_backend_service: opt("DEFAULT_BACKEND_SERVICE").map(|v| v.parse()).transpose()?,
            default_ssl_certificate: opt("DEFAULT_SSL_CERTIFICATE").map(|v| v.parse()).transpose()?,
            http_bind_port: port("HTTP_BIND_PORT", 8080)?,
            https_bind_port: port("HTTPS_BIND_PORT", 8443)?,
            healthz_bind_port: port("HEALTHZ_BIND_PORT", 1042)?,
            stats_bind_port: port("STATS_BIND_PORT", 1024)?,
            controller_port: port("CONTROLLER_PORT", 6060)?,
            disable_ipv4: flag("DISABLE_IPV4", false)?,
            disable_ipv6: flag("DISABLE_IPV6", false)?,
            ipv4_bind_address: var("IPV4_BIND_ADDRESS", "0.0.0.0"),
            ipv6_bind_address: var("IPV6_BIND_ADDRESS", "::"),
            sync_period: duration("SYNC_PERIOD", "5s")?,
            cache_resync_period: duration("CACHE_RESYNC_PERIOD", "10m")?,
            log_level: var("LOG_LEVEL", "info").parse()?,
            haproxy_binary: var("HAPROXY_BINARY", "/usr/local/sbin/haproxy").into(),
            config_dir: var("CONFIG_DIR", "/etc/haproxy").into(),
            runtime_dir: var("RUNTIME_DIR", "/var/run/haproxy").into(),
            state_dir: var("STATE_DIR", "/var/state/haproxy").into(),
            process_supervisor: var("PROCESS_SUPERVISOR", "direct").parse()?,
            s6_service_dir: var("S6_SERVICE_DIR", "/run/service/haproxy").into(),
            prometheus: flag("PROMETHEUS", false)?,
            disable_config_snippets: var("DISABLE_CONFIG_SNIPPETS", "").parse()?,
            ssl_passthrough: flag("SSL_PASSTHROUGH", true)?,
            gateway_api: flag("GATEWAY_API", false)?,
            custom_resources: flag("CUSTOM_RESOURCES", true)?,
        })
    }

    /// Main configuration file.
    pub fn main_config_file(&self) -> PathBuf {
        self.config_dir.join("haproxy.cfg")
    }

    /// Auxiliary configuration file, loaded after the main one when present.
    pub fn aux_config_file(&self) -> PathBuf {
        self.config_dir.join("haproxy-aux.cfg")
    }

    /// Routing map files.
    pub fn maps_dir(&self) -> PathBuf {
        self.config_dir.join("maps")
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.config_dir.join("certs")
    }

    /// Certificates loaded by the HTTPS frontend.
    pub fn frontend_certs_dir(&self) -> PathBuf {
        self.certs_dir().join("frontend")
    }

    /// Files written from the `errorfiles` ConfigMap.
    pub fn errorfiles_dir(&self) -> PathBuf {
        self.config_dir.join("errorfiles")
    }

    /// Pattern files written from the `pattern-files` ConfigMap.
    pub fn patterns_dir(&self) -> PathBuf {
        self.config_dir.join("patterns")
    }

    /// Runtime API socket.
    pub fn runtime_socket(&self) -> PathBuf {
        self.runtime_dir.join("haproxy-runtime-api.sock")
    }

    pub fn master_socket(&self) -> PathBuf {
        self.runtime_dir.join("haproxy-master.sock")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.runtime_dir.join("haproxy.pid")
    }

    /// Unix socket the HTTPS frontend listens on behind SSL passthrough.
    pub fn ssl_frontend_socket(&self) -> PathBuf {
        self.runtime_dir.join("ssl-frontend.sock")
    }

    /// Server-state dump consumed by HAProxy on start.
    pub fn server_state_file(&self) -> PathBuf {
        self.state_dir.join("global")
    }

    /// Directories the controller writes to, created on startup.
    pub fn working_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.config_dir.clone(),
            self.maps_dir(),
            self.frontend_certs_dir(),
            self.certs_dir().join("backend"),
            self.certs_dir().join("ca"),
            self.errorfiles_dir(),
            self.patterns_dir(),
            self.runtime_dir.clone(),
            self.state_dir.clone(),
        ]
    }

    /// Namespace filter built from the watch and blacklist settings.
    pub fn namespace_filter(&self) -> NamespaceFilter {
        NamespaceFilter {
            whitelist: self.namespace_whitelist.clone(),
            blacklist: self.namespace_blacklist.clone(),
        }
    }
}
