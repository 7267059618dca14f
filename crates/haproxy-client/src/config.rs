//! In-memory HAProxy configuration and its text rendering

use crate::models::*;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Children shared by frontend and backend sections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SectionRules {
    pub acls: Vec<Acl>,
    pub tcp_request_rules: Vec<TcpRequestRule>,
    pub http_request_rules: Vec<HttpRequestRule>,
    pub http_response_rules: Vec<HttpResponseRule>,
    pub filters: Vec<Filter>,
    pub log_targets: Vec<LogTarget>,
    pub config_snippet: Vec<String>,
}

/// A frontend with its children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrontendSection {
    pub frontend: Frontend,
    pub binds: Vec<Bind>,
    pub captures: Vec<Capture>,
    pub backend_switching_rules: Vec<BackendSwitchingRule>,
    pub rules: SectionRules,
}

/// A backend with its children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackendSection {
    pub backend: Backend,
    pub servers: Vec<Server>,
    pub rules: SectionRules,
}

/// Whole configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Configuration {
    pub global: Global,
    pub global_log_targets: Vec<LogTarget>,
    pub global_config_snippet: Vec<String>,
    pub defaults: Defaults,
    pub peers: BTreeMap<String, Vec<PeerEntry>>,
    pub userlists: BTreeMap<String, Userlist>,
    pub frontends: BTreeMap<String, FrontendSection>,
    pub backends: BTreeMap<String, BackendSection>,
}

const INDENT: &str = "  ";

macro_rules! emit {
    ($out:expr, $($arg:tt)*) => {{
        $out.push_str(INDENT);
        let _ = write!($out, $($arg)*);
        $out.push('\n');
    }};
}

fn opt_line<T: std::fmt::Display>(out: &mut String, keyword: &str, value: Option<&T>) {
    if let Some(value) = value {
        emit!(out, "{keyword} {value}");
    }
}

fn render_rules(out: &mut String, rules: &SectionRules) {
    for filter in &rules.filters {
        emit!(out, "{filter}");
    }
    for acl in &rules.acls {
        emit!(out, "{acl}");
    }
    for rule in &rules.tcp_request_rules {
        emit!(out, "{rule}");
    }
    for rule in &rules.http_request_rules {
        emit!(out, "{rule}");
    }
    for rule in &rules.http_response_rules {
        emit!(out, "{rule}");
    }
    for target in &rules.log_targets {
        emit!(out, "{target}");
    }
}

fn render_snippet(out: &mut String, snippet: &[String]) {
    if snippet.is_empty() {
        return;
    }
    emit!(out, "###_config-snippet_### BEGIN");
    for snippet_line in snippet {
        emit!(out, "{snippet_line}");
    }
    emit!(out, "###_config-snippet_### END");
}

impl Configuration {
    /// Renders the configuration file. Output is a pure function of the
    /// model: sections are emitted in name order.
    pub fn render(&self) -> String {
        let mut out = String::from("# _version=1\n# Managed by haproxy-ingress-controller, do not edit\n\n");
        self.render_global(&mut out);
        self.render_defaults(&mut out);

        for (name, entries) in &self.peers {
            let _ = writeln!(out, "peers {name}");
            for entry in entries {
                emit!(out, "{entry}");
            }
            out.push('\n');
        }

        for (name, userlist) in &self.userlists {
            let _ = writeln!(out, "userlist {name}");
            for user in &userlist.users {
                let keyword = if user.secure { "password" } else { "insecure-password" };
                emit!(out, "user {} {keyword} {}", user.name, user.password);
            }
            out.push('\n');
        }

        for section in self.frontends.values() {
            render_frontend(&mut out, section);
        }
        for section in self.backends.values() {
            render_backend(&mut out, section);
        }
        out
    }

    fn render_global(&self, out: &mut String) {
        let g = &self.global;
        out.push_str("global\n");
        if g.master_worker {
            emit!(out, "master-worker");
        }
        opt_line(out, "pidfile", g.pidfile.as_ref());
        for api in &g.runtime_apis {
            let mut socket = format!("stats socket {}", api.address);
            if !api.level.is_empty() {
                let _ = write!(socket, " level {}", api.level);
            }
            if api.expose_fd_listeners {
                socket.push_str(" expose-fd listeners");
            }
            emit!(out, "{socket}");
        }
        opt_line(out, "default-path", g.default_path.as_ref());
        if g.limited_quic {
            emit!(out, "limited-quic");
        }
        opt_line(out, "server-state-file", g.server_state_file.as_ref());
        opt_line(out, "server-state-base", g.server_state_base.as_ref());
        opt_line(out, "nbthread", g.nbthread.as_ref());
        opt_line(out, "maxconn", g.maxconn.as_ref());
        opt_line(out, "hard-stop-after", g.hard_stop_after.as_ref());
        opt_line(out, "stats timeout", g.stats_timeout.as_ref());
        opt_line(out, "ssl-default-bind-ciphers", g.ssl_default_bind_ciphers.as_ref());
        opt_line(out, "ssl-default-bind-ciphersuites", g.ssl_default_bind_ciphersuites.as_ref());
        opt_line(out, "ssl-default-bind-options", g.ssl_default_bind_options.as_ref());
        opt_line(out, "tune.ssl.default-dh-param", g.tune_ssl_default_dh_param.as_ref());
        opt_line(out, "log-send-hostname", g.log_send_hostname.as_ref());
        opt_line(out, "spread-checks", g.spread_checks.as_ref());
        for target in &self.global_log_targets {
            emit!(out, "{target}");
        }
        render_snippet(out, &self.global_config_snippet);
        out.push('\n');
    }

    fn render_defaults(&self, out: &mut String) {
        let d = &self.defaults;
        out.push_str("defaults\n");
        opt_line(out, "mode", d.mode.as_ref());
        if d.log_global {
            emit!(out, "log global");
        }
        opt_line(out, "log-format", d.log_format.as_ref());
        for option in &d.options {
            emit!(out, "option {option}");
        }
        opt_line(out, "maxconn", d.maxconn.as_ref());
        opt_line(out, "retries", d.retries.as_ref());
        for (name, value) in &d.timeouts {
            emit!(out, "timeout {name} {value}");
        }
        opt_line(out, "load-server-state-from-file", d.load_server_state_from_file.as_ref());
        for errorfile in &d.errorfiles {
            emit!(out, "errorfile {} {}", errorfile.code, errorfile.file);
        }
        out.push('\n');
    }
}

fn render_frontend(out: &mut String, section: &FrontendSection) {
    let f = &section.frontend;
    let _ = writeln!(out, "frontend {}", f.name);
    emit!(out, "mode {}", f.mode);
    for bind in &section.binds {
        emit!(out, "{bind}");
    }
    opt_line(out, "maxconn", f.maxconn.as_ref());
    opt_line(out, "log-format", f.log_format.as_ref());
    for option in &f.options {
        emit!(out, "option {option}");
    }
    for (name, value) in &f.timeouts {
        emit!(out, "timeout {name} {value}");
    }
    opt_line(out, "monitor-uri", f.monitor_uri.as_ref());
    if let Some(uri) = &f.stats_uri {
        emit!(out, "stats enable");
        emit!(out, "stats uri {uri}");
    }
    for capture in &section.captures {
        emit!(out, "{capture}");
    }
    render_rules(out, &section.rules);
    render_snippet(out, &section.rules.config_snippet);
    for rule in &section.backend_switching_rules {
        emit!(out, "{rule}");
    }
    opt_line(out, "default_backend", f.default_backend.as_ref());
    out.push('\n');
}

fn render_backend(out: &mut String, section: &BackendSection) {
    let b = &section.backend;
    let _ = writeln!(out, "backend {}", b.name);
    emit!(out, "mode {}", b.mode);
    if let Some(balance) = &b.balance {
        match &balance.params {
            Some(params) => emit!(out, "balance {} {params}", balance.algorithm),
            None => emit!(out, "balance {}", balance.algorithm),
        }
    }
    opt_line(out, "cookie", b.cookie.as_ref());
    for option in &b.options {
        emit!(out, "option {option}");
    }
    opt_line(out, "http-reuse", b.http_reuse.as_ref());
    for (name, value) in &b.timeouts {
        emit!(out, "timeout {name} {value}");
    }
    opt_line(out, "stick-table", b.stick_table.as_ref());
    render_rules(out, &section.rules);
    render_snippet(out, &section.rules.config_snippet);
    if !b.default_server.is_empty() {
        emit!(out, "default-server {}", b.default_server.join(" "));
    }
    for server in &section.servers {
        emit!(out, "{server}");
    }
    out.push('\n');
}
