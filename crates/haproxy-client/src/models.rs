//! HAProxy configuration models
//!
//! Typed representation of the sections and section children the controller
//! manages. Every model renders to its configuration line(s) through
//! `Display`, so the renderer only has to order them.

use std::collections::BTreeMap;
use std::fmt;

/// Proxy mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Http,
    Tcp,
}

impl Mode {
    /// Keyword used in the configuration file.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `stats socket` line of the global section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeApiBind {
    pub address: String,
    /// user, operator or admin
    pub level: String,
    pub expose_fd_listeners: bool,
}

/// Global section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Global {
    pub master_worker: bool,
    pub pidfile: Option<String>,
    pub runtime_apis: Vec<RuntimeApiBind>,
    pub default_path: Option<String>,
    pub limited_quic: bool,
    pub server_state_file: Option<String>,
    pub server_state_base: Option<String>,
    pub nbthread: Option<i64>,
    pub maxconn: Option<i64>,
    pub hard_stop_after: Option<String>,
    pub stats_timeout: Option<String>,
    pub ssl_default_bind_ciphers: Option<String>,
    pub ssl_default_bind_ciphersuites: Option<String>,
    pub ssl_default_bind_options: Option<String>,
    pub tune_ssl_default_dh_param: Option<i64>,
    pub log_send_hostname: Option<String>,
    pub spread_checks: Option<i64>,
}

/// `errorfile <code> <file>` entry of the defaults section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFile {
    pub code: u16,
    pub file: String,
}

/// Defaults section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Defaults {
    pub mode: Option<Mode>,
    pub log_global: bool,
    pub log_format: Option<String>,
    /// `option <name>` lines, rendered in order
    pub options: Vec<String>,
    pub maxconn: Option<i64>,
    pub retries: Option<i64>,
    /// `timeout <name> <value>`, keyed by name
    pub timeouts: BTreeMap<String, String>,
    pub load_server_state_from_file: Option<String>,
    pub errorfiles: Vec<ErrorFile>,
}

/// Frontend section header and settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frontend {
    pub name: String,
    pub mode: Mode,
    pub default_backend: Option<String>,
    pub maxconn: Option<i64>,
    pub log_format: Option<String>,
    pub options: Vec<String>,
    pub timeouts: BTreeMap<String, String>,
    pub monitor_uri: Option<String>,
    /// `stats enable` + `stats uri <uri>`
    pub stats_uri: Option<String>,
}

impl Frontend {
    /// Frontend with only a name and a mode set.
    pub fn new(name: impl Into<String>, mode: Mode) -> Self {
        Self {
            name: name.into(),
            mode,
            ..Default::default()
        }
    }
}

/// Load-balancing algorithm of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Balance {
    pub algorithm: String,
    pub params: Option<String>,
}

/// Backend section header and settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Backend {
    pub name: String,
    pub mode: Mode,
    pub balance: Option<Balance>,
    /// Rendered as `cookie <value>`
    pub cookie: Option<String>,
    pub options: Vec<String>,
    pub http_reuse: Option<String>,
    pub timeouts: BTreeMap<String, String>,
    /// Parameters of the `default-server` line
    pub default_server: Vec<String>,
    /// Rendered as `stick-table <value>`
    pub stick_table: Option<String>,
}

impl Backend {
    /// Backend with only a name and a mode set.
    pub fn new(name: impl Into<String>, mode: Mode) -> Self {
        Self {
            name: name.into(),
            mode,
            ..Default::default()
        }
    }
}

/// A listening socket of a frontend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bind {
    pub name: String,
    /// IP address, or a `unix@` path when `port` is unset
    pub address: String,
    pub port: Option<u16>,
    pub params: Vec<String>,
}

impl fmt::Display for Bind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) if self.address.contains(':') => write!(f, "bind [{}]:{port}", self.address)?,
            Some(port) => write!(f, "bind {}:{port}", self.address)?,
            None => write!(f, "bind {}", self.address)?,
        }
        write!(f, " name {}", self.name)?;
        for param in &self.params {
            write!(f, " {param}")?;
        }
        Ok(())
    }
}

/// A server line of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Server {
    pub name: String,
    pub address: String,
    pub port: Option<u16>,
    pub params: Vec<String>,
    /// Rendered with the `disabled` keyword (runtime state `maint`)
    pub maintenance: bool,
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) if self.address.contains(':') => {
                write!(f, "server {} [{}]:{port}", self.name, self.address)?;
            }
            Some(port) => write!(f, "server {} {}:{port}", self.name, self.address)?,
            None => write!(f, "server {} {}", self.name, self.address)?,
        }
        for param in &self.params {
            write!(f, " {param}")?;
        }
        if self.maintenance {
            f.write_str(" disabled")?;
        }
        Ok(())
    }
}

/// `if` / `unless` condition attached to a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    If(String),
    Unless(String),
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::If(test) => write!(f, "if {test}"),
            Self::Unless(test) => write!(f, "unless {test}"),
        }
    }
}

fn write_cond(f: &mut fmt::Formatter<'_>, cond: Option<&Condition>) -> fmt::Result {
    match cond {
        Some(cond) => write!(f, " {cond}"),
        None => Ok(()),
    }
}

/// `http-request` actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpRequestAction {
    Allow,
    Deny { status: Option<u16> },
    Auth { realm: String },
    Redirect { kind: String, value: String, code: Option<u16> },
    Return { status: u16, content_type: Option<String>, content: Option<String> },
    SetHeader { name: String, fmt: String },
    DelHeader { name: String },
    SetPath { fmt: String },
    ReplacePath { regex: String, fmt: String },
    SetVar { name: String, expr: String },
    SetSrc { expr: String },
    TrackSc { slot: u8, key: String, table: Option<String> },
    Capture { sample: String, len: u32 },
}

/// An `http-request` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestRule {
    pub action: HttpRequestAction,
    pub cond: Option<Condition>,
}

impl fmt::Display for HttpRequestRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("http-request ")?;
        match &self.action {
            HttpRequestAction::Allow => f.write_str("allow")?,
            HttpRequestAction::Deny { status } => {
                f.write_str("deny")?;
                if let Some(status) = status {
                    write!(f, " deny_status {status}")?;
                }
            }
            HttpRequestAction::Auth { realm } => write!(f, "auth realm \"{realm}\"")?,
            HttpRequestAction::Redirect { kind, value, code } => {
                write!(f, "redirect {kind} {value}")?;
                if let Some(code) = code {
                    write!(f, " code {code}")?;
                }
            }
            HttpRequestAction::Return { status, content_type, content } => {
                write!(f, "return status {status}")?;
                if let (Some(content_type), Some(content)) = (content_type, content) {
                    write!(f, " content-type \"{content_type}\" string \"{content}\"")?;
                }
            }
            HttpRequestAction::SetHeader { name, fmt } => write!(f, "set-header {name} {fmt}")?,
            HttpRequestAction::DelHeader { name } => write!(f, "del-header {name}")?,
            HttpRequestAction::SetPath { fmt } => write!(f, "set-path {fmt}")?,
            HttpRequestAction::ReplacePath { regex, fmt } => write!(f, "replace-path {regex} {fmt}")?,
            HttpRequestAction::SetVar { name, expr } => write!(f, "set-var({name}) {expr}")?,
            HttpRequestAction::SetSrc { expr } => write!(f, "set-src {expr}")?,
            HttpRequestAction::TrackSc { slot, key, table } => {
                write!(f, "track-sc{slot} {key}")?;
                if let Some(table) = table {
                    write!(f, " table {table}")?;
                }
            }
            HttpRequestAction::Capture { sample, len } => write!(f, "capture {sample} len {len}")?,
        }
        write_cond(f, self.cond.as_ref())
    }
}

/// `http-response` actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpResponseAction {
    SetHeader { name: String, fmt: String },
    AddHeader { name: String, fmt: String },
    DelHeader { name: String },
    SetStatus { status: u16 },
}

/// An `http-response` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponseRule {
    pub action: HttpResponseAction,
    pub cond: Option<Condition>,
}

impl fmt::Display for HttpResponseRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("http-response ")?;
        match &self.action {
            HttpResponseAction::SetHeader { name, fmt } => write!(f, "set-header {name} {fmt}")?,
            HttpResponseAction::AddHeader { name, fmt } => write!(f, "add-header {name} {fmt}")?,
            HttpResponseAction::DelHeader { name } => write!(f, "del-header {name}")?,
            HttpResponseAction::SetStatus { status } => write!(f, "set-status {status}")?,
        }
        write_cond(f, self.cond.as_ref())
    }
}

/// Evaluation point of a `tcp-request` rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpRequestKind {
    Connection,
    Content,
}

/// `tcp-request` rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpRequestRule {
    /// `tcp-request inspect-delay <timeout>`
    InspectDelay { timeout: String },
    Accept { kind: TcpRequestKind, cond: Option<Condition> },
    Reject { kind: TcpRequestKind, cond: Option<Condition> },
    /// `tcp-request connection expect-proxy layer4`
    ExpectProxy { cond: Option<Condition> },
    SetVar { kind: TcpRequestKind, name: String, expr: String, cond: Option<Condition> },
    SetSrc { kind: TcpRequestKind, expr: String, cond: Option<Condition> },
    TrackSc { kind: TcpRequestKind, slot: u8, key: String, table: Option<String>, cond: Option<Condition> },
}

impl fmt::Display for TcpRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("connection"),
            Self::Content => f.write_str("content"),
        }
    }
}

impl fmt::Display for TcpRequestRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InspectDelay { timeout } => write!(f, "tcp-request inspect-delay {timeout}"),
            Self::Accept { kind, cond } => {
                write!(f, "tcp-request {kind} accept")?;
                write_cond(f, cond.as_ref())
            }
            Self::Reject { kind, cond } => {
                write!(f, "tcp-request {kind} reject")?;
                write_cond(f, cond.as_ref())
            }
            Self::ExpectProxy { cond } => {
                f.write_str("tcp-request connection expect-proxy layer4")?;
                write_cond(f, cond.as_ref())
            }
            Self::SetVar { kind, name, expr, cond } => {
                write!(f, "tcp-request {kind} set-var({name}) {expr}")?;
                write_cond(f, cond.as_ref())
            }
            Self::SetSrc { kind, expr, cond } => {
                write!(f, "tcp-request {kind} set-src {expr}")?;
                write_cond(f, cond.as_ref())
            }
            Self::TrackSc { kind, slot, key, table, cond } => {
                write!(f, "tcp-request {kind} track-sc{slot} {key}")?;
                if let Some(table) = table {
                    write!(f, " table {table}")?;
                }
                write_cond(f, cond.as_ref())
            }
        }
    }
}

/// Named ACL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub name: String,
    pub criterion: String,
    pub value: String,
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acl {} {} {}", self.name, self.criterion, self.value)
    }
}

/// `use_backend` rule of a frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSwitchingRule {
    /// Backend name or a log-format expression resolving to one
    pub backend: String,
    pub cond: Option<Condition>,
}

impl fmt::Display for BackendSwitchingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "use_backend {}", self.backend)?;
        write_cond(f, self.cond.as_ref())
    }
}

/// `declare capture` slot of a frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// "request" or "response"
    pub kind: String,
    pub len: u32,
}

impl fmt::Display for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "declare capture {} len {}", self.kind, self.len)
    }
}

/// `filter` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub kind: String,
    pub args: Vec<String>,
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter {}", self.kind)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// `log` line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogTarget {
    /// `log global` when set, every other field is ignored
    pub global: bool,
    pub address: String,
    pub facility: String,
    pub level: Option<String>,
    pub format: Option<String>,
    pub length: Option<u32>,
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.global {
            return f.write_str("log global");
        }
        write!(f, "log {}", self.address)?;
        if let Some(length) = self.length {
            write!(f, " len {length}")?;
        }
        if let Some(format) = &self.format {
            write!(f, " format {format}")?;
        }
        write!(f, " {}", self.facility)?;
        if let Some(level) = &self.level {
            write!(f, " {level}")?;
        }
        Ok(())
    }
}

/// `peer` entry of a peers section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub name: String,
    pub address: String,
    pub port: u16,
}

impl fmt::Display for PeerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer {} {}:{}", self.name, self.address, self.port)
    }
}

/// A user of a userlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub password: String,
    /// true for `password` (crypt hash), false for `insecure-password`
    pub secure: bool,
}

/// Userlist section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Userlist {
    pub name: String,
    pub users: Vec<User>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_rendering() {
        let v4 = Bind {
            name: "v4".to_string(),
            address: "0.0.0.0".to_string(),
            port: Some(8443),
            params: vec!["ssl".to_string(), "crt /etc/haproxy/certs/frontend".to_string()],
        };
        assert_eq!(v4.to_string(), "bind 0.0.0.0:8443 name v4 ssl crt /etc/haproxy/certs/frontend");

        let v6 = Bind {
            name: "v6".to_string(),
            address: "::".to_string(),
            port: Some(8080),
            params: vec!["v4v6".to_string()],
        };
        assert_eq!(v6.to_string(), "bind [::]:8080 name v6 v4v6");

        let unix = Bind {
            name: "haproxy-ssl".to_string(),
            address: "unix@/var/run/haproxy/ssl-frontend.sock".to_string(),
            port: None,
            params: vec!["accept-proxy".to_string()],
        };
        assert_eq!(
            unix.to_string(),
            "bind unix@/var/run/haproxy/ssl-frontend.sock name haproxy-ssl accept-proxy"
        );
    }

    #[test]
    fn test_server_rendering() {
        let server = Server {
            name: "SRV_1".to_string(),
            address: "127.0.0.1".to_string(),
            port: Some(0),
            params: vec!["check".to_string()],
            maintenance: true,
        };
        assert_eq!(server.to_string(), "server SRV_1 127.0.0.1:0 check disabled");
    }

    #[test]
    fn test_rule_rendering() {
        let rule = HttpRequestRule {
            action: HttpRequestAction::SetVar {
                name: "txn.host".to_string(),
                expr: "req.hdr(Host),field(1,:),lower".to_string(),
            },
            cond: None,
        };
        assert_eq!(rule.to_string(), "http-request set-var(txn.host) req.hdr(Host),field(1,:),lower");

        let deny = HttpRequestRule {
            action: HttpRequestAction::Deny { status: Some(403) },
            cond: Some(Condition::If("{ var(txn.path_match) -m dom abc }".to_string())),
        };
        assert_eq!(
            deny.to_string(),
            "http-request deny deny_status 403 if { var(txn.path_match) -m dom abc }"
        );

        let tcp = TcpRequestRule::Accept {
            kind: TcpRequestKind::Content,
            cond: Some(Condition::If("{ req_ssl_hello_type 1 }".to_string())),
        };
        assert_eq!(tcp.to_string(), "tcp-request content accept if { req_ssl_hello_type 1 }");
    }

    #[test]
    fn test_log_target_rendering() {
        let target = LogTarget {
            address: "127.0.0.1:514".to_string(),
            facility: "local0".to_string(),
            level: Some("notice".to_string()),
            length: Some(1024),
            ..Default::default()
        };
        assert_eq!(target.to_string(), "log 127.0.0.1:514 len 1024 local0 notice");
        let global = LogTarget {
            global: true,
            ..Default::default()
        };
        assert_eq!(global.to_string(), "log global");
    }
}
