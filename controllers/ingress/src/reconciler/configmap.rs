//! Controller ConfigMap: global and defaults sections, syslog targets,
//! proxy-protocol sources and the errorfiles and patterns directories.

use super::custom_resources;
use super::SyncContext;
use crate::annotations::{lines, parse_ip_list};
use crate::error::{ControllerError, ErrorPool};
use crate::fs_writer::FsWriter;
use crate::haproxy::base;
use crate::rules::Rule;
use crate::utils::hash::fnv64a;
use crate::utils::{haproxy_duration, split_ns_name};
use haproxy_client::{Defaults, ErrorFile, Global, LogTarget};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const DEFAULT_SYSLOG_SERVER: &str = "address:127.0.0.1, facility:local0, level:notice";

/// ConfigMap keys mapped onto `timeout <name>` of the defaults section.
const TIMEOUTS: [(&str, &str); 8] = [
    ("timeout-connect", "connect"),
    ("timeout-client", "client"),
    ("timeout-server", "server"),
    ("timeout-queue", "queue"),
    ("timeout-tunnel", "tunnel"),
    ("timeout-http-request", "http-request"),
    ("timeout-http-keep-alive", "http-keep-alive"),
    ("timeout-check", "check"),
];

/// Files of one auxiliary directory, rewritten when their content changes.
#[derive(Debug)]
pub struct AuxFiles {
    kind: &'static str,
    dir: PathBuf,
    written: BTreeMap<String, u64>,
}

impl AuxFiles {
    pub fn new(kind: &'static str, dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            dir: dir.into(),
            written: BTreeMap::new(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Makes the directory hold exactly `files`. The writes run as delayed
    /// functions ahead of the commit. Returns true when anything changed.
    pub fn sync(&mut self, files: &BTreeMap<String, String>, writer: &FsWriter) -> bool {
        let mut changed = false;
        for (name, content) in files {
            let hash = fnv64a(content.as_bytes());
            if self.written.get(name) == Some(&hash) {
                continue;
            }
            debug!(kind = self.kind, file = %name, "writing file");
            let path = self.path(name);
            let content = content.clone();
            writer.add_delayed(format!("{}/{name}", self.kind), move || write_file(&path, content.as_bytes()));
            self.written.insert(name.clone(), hash);
            changed = true;
        }
        let stale: Vec<String> = self
            .written
            .keys()
            .filter(|name| !files.contains_key(*name))
            .cloned()
            .collect();
        for name in stale {
            info!(kind = self.kind, file = %name, "removing file");
            let path = self.path(&name);
            writer.add_delayed(format!("{}/{name}", self.kind), move || remove_file(&path));
            self.written.remove(&name);
            changed = true;
        }
        changed
    }
}

fn write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

fn remove_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Global section, log targets and the global snippet.
pub(super) fn sync_global(ctx: &mut SyncContext<'_>) {
    let empty = BTreeMap::new();
    let cm = ctx.configmap.unwrap_or(&empty);

    let mut global = base::global(ctx.config);
    apply_global_keys(&mut global, cm, ctx.errors);

    let syslog = cm.get("syslog-server").map_or(DEFAULT_SYSLOG_SERVER, String::as_str);
    let mut log_targets = ctx.errors.collect(parse_syslog(syslog)).unwrap_or_default();

    if let Some(spec) = custom_resources::lookup_global(ctx.store, cm.get("cr-global"), ctx.errors) {
        custom_resources::apply_global(&mut global, &mut log_targets, spec);
    }

    let snippet = match cm.get("global-config-snippet") {
        Some(value) if !ctx.config.disable_config_snippets.global => lines(value),
        _ => Vec::new(),
    };

    let txn = &mut *ctx.txn;
    let mut reasons = Vec::new();
    if txn.global_replace(global) {
        reasons.push("global section updated");
    }
    if txn.global_log_targets_replace(log_targets) {
        reasons.push("global log targets updated");
    }
    if txn.global_config_snippet_set(snippet) {
        reasons.push("global snippet updated");
    }
    for reason in reasons {
        ctx.haproxy.request_reload(reason);
    }
}

/// Defaults section, including the errorfiles written from the referenced
/// ConfigMap. The patterns ConfigMap is mirrored alongside.
pub(super) fn sync_defaults(ctx: &mut SyncContext<'_>, errorfiles: &mut AuxFiles, patterns: &mut AuxFiles) {
    let empty = BTreeMap::new();
    let cm = ctx.configmap.unwrap_or(&empty);

    let mut defaults = base::defaults();
    apply_timeouts(&mut defaults, cm, ctx.errors);
    if let Some(spec) = custom_resources::lookup_defaults(ctx.store, cm.get("cr-defaults"), ctx.errors) {
        custom_resources::apply_defaults(&mut defaults, spec, ctx.errors);
    }

    let files = referenced_files(ctx, cm.get("errorfiles"));
    for (name, _content) in &files {
        match name.parse::<u16>() {
            Ok(code) => defaults.errorfiles.push(ErrorFile {
                code,
                file: errorfiles.path(name).to_string_lossy().into_owned(),
            }),
            Err(_) => ctx
                .errors
                .add(ControllerError::validation("errorfiles", name, "key must be an HTTP status code")),
        }
    }
    if errorfiles.sync(&files, &ctx.haproxy.writer) {
        ctx.haproxy.request_reload("errorfiles changed");
    }

    let files = referenced_files(ctx, cm.get("patterns"));
    if patterns.sync(&files, &ctx.haproxy.writer) {
        ctx.haproxy.request_reload("pattern files changed");
    }

    if ctx.txn.defaults_replace(defaults) {
        ctx.haproxy.request_reload("defaults section updated");
    }
}

/// Data of the ConfigMap `reference` points to, empty when unset.
fn referenced_files(ctx: &mut SyncContext<'_>, reference: Option<&String>) -> BTreeMap<String, String> {
    let Some(reference) = reference else {
        return BTreeMap::new();
    };
    let Some((ns, name)) = ctx.errors.collect(split_ns_name(reference, &ctx.config.configmap.namespace)) else {
        return BTreeMap::new();
    };
    match ctx.store.configmap(ns, name) {
        Some(configmap) => configmap.data.clone(),
        None => {
            ctx.errors.add(ControllerError::NotFound(format!("configmap {ns}/{name}")));
            BTreeMap::new()
        }
    }
}

/// `tcp-request connection expect-proxy` for the `proxy-protocol` sources.
pub(super) fn proxy_protocol(ctx: &mut SyncContext<'_>) -> Option<Rule> {
    let value = ctx.configmap?.get("proxy-protocol")?;
    let src_ips = ctx.errors.collect(parse_ip_list("proxy-protocol", value))?;
    (!src_ips.is_empty()).then_some(Rule::ProxyProtocol { src_ips })
}

/// Lines of `frontend-config-snippet`, empty when snippets are disabled.
pub(super) fn frontend_snippet(ctx: &SyncContext<'_>) -> Vec<String> {
    match ctx.configmap.and_then(|cm| cm.get("frontend-config-snippet")) {
        Some(value) if !ctx.config.disable_config_snippets.frontend => lines(value),
        _ => Vec::new(),
    }
}

fn int(cm: &BTreeMap<String, String>, key: &str) -> Result<Option<i64>, ControllerError> {
    cm.get(key)
        .map(|value| {
            value
                .trim()
                .parse::<i64>()
                .map_err(|e| ControllerError::validation(key, value, e))
        })
        .transpose()
}

fn duration(cm: &BTreeMap<String, String>, key: &str) -> Result<Option<String>, ControllerError> {
    cm.get(key)
        .map(|value| haproxy_duration(value).map_err(|e| ControllerError::validation(key, value, e)))
        .transpose()
}

/// Parses `syslog-server`: one target per line, each a comma separated
/// list of `key:value` pairs.
fn parse_syslog(value: &str) -> Result<Vec<LogTarget>, ControllerError> {
    let mut targets = Vec::new();
    for line in value.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
        for pair in line.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once(':') else {
                return Err(ControllerError::validation("syslog-server", line, "expected key:value pairs"));
            };
            fields.insert(key.trim(), value.trim());
        }
        let Some(address) = fields.get("address") else {
            return Err(ControllerError::validation("syslog-server", line, "address is required"));
        };
        let address = match fields.get("port") {
            Some(port) => format!("{address}:{port}"),
            None => (*address).to_string(),
        };
        let length = fields
            .get("length")
            .map(|l| l.parse::<u32>().map_err(|e| ControllerError::validation("syslog-server", l, e)))
            .transpose()?;
        targets.push(LogTarget {
            global: false,
            address,
            facility: fields.get("facility").copied().unwrap_or("local0").to_string(),
            level: fields.get("level").map(ToString::to_string),
            format: fields.get("format").map(ToString::to_string),
            length,
        });
    }
    Ok(targets)
}

fn apply_global_keys(global: &mut Global, cm: &BTreeMap<String, String>, errors: &mut ErrorPool) {
    if let Some(value) = errors.collect(int(cm, "maxconn")).flatten() {
        global.maxconn = Some(value);
    }
    if let Some(value) = errors.collect(int(cm, "nbthread")).flatten() {
        global.nbthread = Some(value);
    }
    if let Some(value) = errors.collect(duration(cm, "hard-stop-after")).flatten() {
        global.hard_stop_after = Some(value);
    }
}

fn apply_timeouts(defaults: &mut Defaults, cm: &BTreeMap<String, String>, errors: &mut ErrorPool) {
    for (key, timeout) in TIMEOUTS {
        if let Some(value) = errors.collect(duration(cm, key)).flatten() {
            defaults.timeouts.insert(timeout.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    fn cm(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_syslog_targets() {
        let targets = parse_syslog(
            "address:10.0.0.1, port:514, facility:local1, level:info\naddress:stdout, format:raw, facility:daemon",
        )
        .unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].address, "10.0.0.1:514");
        assert_eq!(targets[0].facility, "local1");
        assert_eq!(targets[0].level.as_deref(), Some("info"));
        assert_eq!(targets[1].format.as_deref(), Some("raw"));
        assert!(parse_syslog("facility:local0").is_err());
        assert!(parse_syslog("address").is_err());
    }

    #[test]
    fn test_global_keys() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_utils::config(dir.path());
        let mut global = base::global(&config);
        let mut errors = ErrorPool::new();
        apply_global_keys(
            &mut global,
            &cm(&[("maxconn", "2000"), ("hard-stop-after", "30m"), ("nbthread", "many")]),
            &mut errors,
        );
        assert_eq!(global.maxconn, Some(2000));
        assert_eq!(global.hard_stop_after.as_deref(), Some("1800000ms"));
        assert_eq!(global.nbthread, None);
        assert!(global.master_worker);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_defaults_timeouts() {
        let mut defaults = base::defaults();
        let mut errors = ErrorPool::new();
        apply_timeouts(&mut defaults, &cm(&[("timeout-client", "30s"), ("timeout-check", "2s")]), &mut errors);
        assert!(errors.is_empty());
        assert_eq!(defaults.timeouts["client"], "30000ms");
        assert_eq!(defaults.timeouts["check"], "2000ms");
        assert_eq!(defaults.timeouts["connect"], "5s");
        assert!(defaults.log_global);
    }

    #[tokio::test]
    async fn test_aux_files_follow_configmap() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FsWriter::new();
        let mut files = AuxFiles::new("errorfiles", dir.path().join("errorfiles"));

        let wanted = cm(&[("503", "HTTP/1.0 503\r\n\r\n")]);
        assert!(files.sync(&wanted, &writer));
        writer.run_delayed().await;
        assert!(dir.path().join("errorfiles/503").exists());

        assert!(!files.sync(&wanted, &writer));
        assert_eq!(writer.delayed_count(), 0);

        assert!(files.sync(&BTreeMap::new(), &writer));
        writer.run_delayed().await;
        assert!(!dir.path().join("errorfiles/503").exists());
    }
}
