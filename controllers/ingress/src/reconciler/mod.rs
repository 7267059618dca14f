//! Reconciliation loop
//!
//! Each sync applies the pending watch events to the store, rebuilds the
//! whole desired HAProxy configuration from the store inside one
//! transaction and commits it. Syncs run one at a time on a fixed period.
//!
//! Build order inside a sync:
//! 1. global and defaults sections from the controller ConfigMap
//! 2. default backend
//! 3. ingresses: backends, annotation rules, certificates, routes
//! 4. Gateway API listeners and routes, TCP custom resources
//! 5. HTTP, HTTPS, SSL passthrough, healthz and stats frontends
//!
//! Objects that fail to build are reported and skipped, the rest of the
//! configuration still goes out.

mod configmap;
mod custom_resources;
mod gateway;
mod ingress;
#[cfg(test)]
mod scenarios_test;

use crate::annotations::{backend, Annotations};
use crate::config::ControllerConfig;
use crate::error::{ControllerError, ErrorPool};
use crate::haproxy::{base, CommitOutcome, HAProxy};
use crate::metrics;
use crate::router::{map_switching_rule, routing_rules, set_switching_rules, sni_rules};
use crate::status::StatusSnapshot;
use crate::store::events::SyncDataEvent;
use crate::store::{K8sStore, Namespace, PortRef, Service, ServicePort};
use crate::utils::backend_name;
use crate::watcher::ProcessedVersions;
use configmap::AuxFiles;
use haproxy_client::{Mode, ParentType, Transaction};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything a builder step needs during one sync.
pub(crate) struct SyncContext<'a> {
    pub config: &'a ControllerConfig,
    pub store: &'a K8sStore,
    pub haproxy: &'a mut HAProxy,
    pub txn: &'a mut Transaction,
    pub errors: &'a mut ErrorPool,
    /// Data of the controller ConfigMap
    pub configmap: Option<&'a BTreeMap<String, String>>,
}

/// Server addresses and port of `port` of `service`. ExternalName
/// services resolve to their DNS name. Without endpoints the service port
/// is kept so the pool still has a valid target.
pub(crate) fn service_addresses(ns: &Namespace, service: &Service, port: &ServicePort) -> (BTreeSet<String>, u16) {
    let service_port = u16::try_from(port.port).unwrap_or_default();
    if let Some(external) = &service.external_name {
        return (BTreeSet::from([external.clone()]), service_port);
    }
    let endpoints = ns.service_endpoints(&service.name);
    let matching = endpoints.get(&port.name).or_else(|| {
        // unnamed single-port services
        (endpoints.len() == 1).then(|| endpoints.values().next()).flatten()
    });
    match matching {
        Some(ep) => (ep.addresses.clone(), u16::try_from(ep.port).unwrap_or(service_port)),
        None => (BTreeSet::new(), service_port),
    }
}

/// Owns the store and the HAProxy instance and runs the syncs.
pub struct Reconciler {
    config: Arc<ControllerConfig>,
    store: K8sStore,
    haproxy: HAProxy,
    events: mpsc::Receiver<SyncDataEvent>,
    processed: Arc<ProcessedVersions>,
    status: Option<mpsc::Sender<StatusSnapshot>>,
    errorfiles: AuxFiles,
    patterns: AuxFiles,
    /// Events in the store since the last successful commit
    applied: Vec<SyncDataEvent>,
    synced_once: bool,
    /// The last commit failed and must be retried
    dirty: bool,
    last_errors: Vec<String>,
}

impl Reconciler {
    pub fn new(
        config: Arc<ControllerConfig>,
        haproxy: HAProxy,
        events: mpsc::Receiver<SyncDataEvent>,
        processed: Arc<ProcessedVersions>,
    ) -> Self {
        Self {
            store: K8sStore::new(config.namespace_filter()),
            errorfiles: AuxFiles::new("errorfiles", config.errorfiles_dir()),
            patterns: AuxFiles::new("patterns", config.patterns_dir()),
            config,
            haproxy,
            events,
            processed,
            status: None,
            applied: Vec::new(),
            synced_once: false,
            dirty: false,
            last_errors: Vec::new(),
        }
    }

    /// Publishes Gateway API statuses on `tx` after each sync.
    #[must_use]
    pub fn with_status(mut self, tx: mpsc::Sender<StatusSnapshot>) -> Self {
        self.status = Some(tx);
        self
    }

    pub fn store(&self) -> &K8sStore {
        &self.store
    }

    pub fn haproxy(&self) -> &HAProxy {
        &self.haproxy
    }

    /// Errors of the last sync.
    pub fn last_errors(&self) -> &[String] {
        &self.last_errors
    }

    /// Runs one sync. `Ok(None)` when nothing changed since the last one.
    pub async fn sync(&mut self) -> Result<Option<CommitOutcome>, ControllerError> {
        metrics::set_events_pending(self.events.len());
        let mut changed = false;
        while let Ok(event) = self.events.try_recv() {
            changed |= self.store.event_process(&event);
            self.applied.push(event);
        }
        if !changed && self.synced_once && !self.dirty {
            self.mark_applied();
            return Ok(None);
        }

        let started = Instant::now();
        let result = self.build_and_commit().await;
        metrics::observe_sync(started.elapsed());

        let (outcome, errors, snapshot) = match result {
            Ok(result) => result,
            Err(e) => {
                // the store keeps its statuses so the next sync rebuilds
                self.dirty = true;
                metrics::record_sync_error();
                return Err(e);
            }
        };
        self.store.clean();
        self.mark_applied();
        self.synced_once = true;
        self.dirty = false;

        if let (Some(tx), Some(snapshot)) = (&self.status, snapshot)
            && let Err(e) = tx.try_send(snapshot)
        {
            debug!("status update skipped: {}", e);
        }

        self.last_errors.clear();
        if let Err(e) = errors.into_result() {
            metrics::record_sync_error();
            warn!("sync completed with errors: {}", e);
            self.last_errors = match e {
                ControllerError::Aggregate(all) => all.iter().map(ToString::to_string).collect(),
                other => vec![other.to_string()],
            };
        }
        if outcome.reloaded {
            info!(reasons = ?outcome.reasons, "configuration reloaded");
        } else if outcome.runtime_ops > 0 {
            info!(commands = outcome.runtime_ops, "configuration updated at runtime");
        }
        Ok(Some(outcome))
    }

    fn mark_applied(&mut self) {
        for event in self.applied.drain(..) {
            self.processed.mark_processed(&event);
        }
    }

    async fn build_and_commit(
        &mut self,
    ) -> Result<(CommitOutcome, ErrorPool, Option<StatusSnapshot>), ControllerError> {
        let config = Arc::clone(&self.config);
        let store = &self.store;
        let haproxy = &mut self.haproxy;
        let mut txn = haproxy.transaction_start()?;
        let mut errors = ErrorPool::new();
        let configmap = store
            .configmap(&config.configmap.namespace, &config.configmap.name)
            .map(|cm| &cm.data);
        if configmap.is_none() {
            debug!(configmap = %config.configmap, "controller configmap not found, using defaults");
        }

        let mut ctx = SyncContext {
            config: &config,
            store,
            haproxy,
            txn: &mut txn,
            errors: &mut errors,
            configmap,
        };
        configmap::sync_global(&mut ctx);
        configmap::sync_defaults(&mut ctx, &mut self.errorfiles, &mut self.patterns);
        let default_backend = sync_default_backend(&mut ctx);
        let summary = ingress::sync_ingresses(&mut ctx).await;
        if let Some(cert) = &config.default_ssl_certificate {
            let reference = format!("{}/{}", cert.namespace, cert.name);
            ingress::add_certificate(&mut ctx, &cert.namespace, &reference).await;
        }
        let snapshot = config.gateway_api.then(|| gateway::sync_gateways(&mut ctx));
        if config.custom_resources {
            custom_resources::sync_tcp(&mut ctx);
        }
        sync_http_frontends(&mut ctx, &default_backend, summary.ssl_passthrough);
        sync_userlists(&mut ctx, &summary.userlists);
        debug!(
            routes = summary.routes,
            errors = errors.len(),
            "configuration built"
        );

        let outcome = self.haproxy.commit(txn, &mut errors).await?;
        Ok((outcome, errors, snapshot))
    }

    /// Syncs every `sync_period` until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(period = ?self.config.sync_period, "reconciler started");
        let mut interval = tokio::time::interval(self.config.sync_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.sync().await {
                        error!("sync failed, retrying next period: {}", e);
                    }
                }
            }
        }
        info!("reconciler stopped");
    }
}

/// Backend of the `DEFAULT_BACKEND_SERVICE`, or the built-in 404 backend.
fn sync_default_backend(ctx: &mut SyncContext<'_>) -> String {
    let Some(reference) = &ctx.config.default_backend_service else {
        return base::DEFAULT_LOCAL_BACKEND.to_string();
    };
    let store = ctx.store;
    let found = store
        .namespace(&reference.namespace)
        .and_then(|ns| ns.service(&reference.name).map(|svc| (ns, svc)));
    let Some((ns, service)) = found else {
        ctx.errors.add(ControllerError::NotFound(format!(
            "default backend service {}/{}",
            reference.namespace, reference.name
        )));
        return base::DEFAULT_LOCAL_BACKEND.to_string();
    };
    let port = match &reference.port {
        Some(port) => service.port(&port.parse::<i32>().map_or_else(|_| PortRef::Name(port.clone()), PortRef::Number)),
        None => service.ports.first(),
    };
    let Some(port) = port else {
        ctx.errors.add(ControllerError::NotFound(format!(
            "port of default backend service {}/{}",
            reference.namespace, reference.name
        )));
        return base::DEFAULT_LOCAL_BACKEND.to_string();
    };

    let label = if port.name.is_empty() {
        port.port.to_string()
    } else {
        port.name.clone()
    };
    let name = backend_name(&ns.name, &service.name, &label);
    let ann = Annotations::new(None, Some(&service.annotations), ctx.configmap);
    let settings = backend::parse(
        &ann,
        &name,
        Mode::Http,
        store.replicas(),
        ctx.config.disable_config_snippets.backend,
        ctx.errors,
    );
    let (addresses, target) = service_addresses(ns, service, port);
    ctx.haproxy.set_permanent(name.clone());
    if let Err(e) = ctx.haproxy.sync_backend(ctx.txn, &settings, &addresses, target) {
        ctx.errors.add(e);
        return base::DEFAULT_LOCAL_BACKEND.to_string();
    }
    name
}

/// HTTP and HTTPS frontends, SSL passthrough and the static frontends.
fn sync_http_frontends(ctx: &mut SyncContext<'_>, default_backend: &str, ssl_passthrough: bool) {
    let config = ctx.config;
    let overrides = if config.custom_resources {
        custom_resources::frontend_overrides(ctx.store)
    } else {
        BTreeMap::new()
    };
    let passthrough = ssl_passthrough && config.ssl_passthrough;
    let has_certs = !ctx.haproxy.certs.is_empty();
    let proxy_protocol = configmap::proxy_protocol(ctx);
    let snippet = configmap::frontend_snippet(ctx);

    let frontends = [
        (
            base::HTTP_FRONTEND,
            base::binds(config, config.http_bind_port, &[]),
        ),
        (
            base::HTTPS_FRONTEND,
            base::https_binds(config, has_certs, passthrough),
        ),
    ];
    for (name, binds) in frontends {
        let mut frontend = base::http_frontend(name, default_backend);
        if let Some(resource) = overrides.get(name) {
            custom_resources::apply_frontend(&mut frontend, resource, ctx.errors);
        }
        if let Err(e) = ctx.haproxy.sync_frontend(ctx.txn, frontend, binds) {
            ctx.errors.add(e);
            continue;
        }
        let path_match = routing_rules(&ctx.haproxy.maps)
            .into_iter()
            .chain(ctx.haproxy.custom_routes.path_match_rules());
        for rule in path_match {
            ctx.haproxy.rules.add(name, rule, false);
        }
        if let Some(rule) = &proxy_protocol {
            ctx.haproxy.rules.add(name, rule.clone(), false);
        }
        match ctx.txn.config_snippet_set(ParentType::Frontend, name, snippet.clone()) {
            Ok(true) => ctx.haproxy.request_reload(format!("frontend {name} snippet updated")),
            Ok(false) => {}
            Err(e) => ctx.errors.add(e),
        }
    }

    match base::sync_ssl_passthrough(ctx.txn, config, passthrough) {
        Ok(changed) => {
            if changed {
                ctx.haproxy.request_reload("ssl passthrough updated");
            }
            if passthrough {
                sync_ssl_frontend(ctx, proxy_protocol);
            }
        }
        Err(e) => ctx.errors.add(e),
    }

    match base::sync_static(ctx.txn, config) {
        Ok(changed) => {
            if changed {
                ctx.haproxy.request_reload("static frontends updated");
            }
            ctx.haproxy.frontend_active(base::HEALTHZ_FRONTEND);
            ctx.haproxy.frontend_active(base::STATS_FRONTEND);
        }
        Err(e) => ctx.errors.add(e),
    }
    if let Some(resource) = overrides.get(base::STATS_FRONTEND)
        && let Ok(mut stats) = ctx.txn.frontend_get(base::STATS_FRONTEND).cloned()
    {
        custom_resources::apply_frontend(&mut stats, resource, ctx.errors);
        match ctx.txn.frontend_edit(stats) {
            Ok(true) => ctx.haproxy.request_reload("stats frontend updated"),
            Ok(false) => {}
            Err(e) => ctx.errors.add(e),
        }
    }
    for name in overrides.keys() {
        if !custom_resources::overridable_frontends().contains(&name.as_str()) {
            warn!(frontend = %name, "Frontend resource targets an unknown frontend");
        }
    }
}

fn sync_ssl_frontend(ctx: &mut SyncContext<'_>, proxy_protocol: Option<crate::rules::Rule>) {
    let ssl = base::SSL_FRONTEND;
    ctx.haproxy.frontend_active(ssl);
    if let Some(rule) = proxy_protocol {
        ctx.haproxy.rules.add(ssl, rule, false);
    }
    for rule in base::ssl_rules().into_iter().chain(sni_rules(&ctx.haproxy.maps)) {
        ctx.haproxy.rules.add(ssl, rule, false);
    }
    match set_switching_rules(ctx.txn, ssl, &[map_switching_rule("txn.sni_match")]) {
        Ok(true) => ctx.haproxy.request_reload("ssl switching rules updated"),
        Ok(false) => {}
        Err(e) => ctx.errors.add(e),
    }
}

/// Deletes userlists no ingress referenced this sync.
fn sync_userlists(ctx: &mut SyncContext<'_>, wanted: &BTreeSet<String>) {
    for name in ctx.txn.userlist_names() {
        if wanted.contains(&name) {
            continue;
        }
        match ctx.txn.userlist_delete(&name) {
            Ok(()) => ctx.haproxy.request_reload(format!("userlist {name} deleted")),
            Err(e) => ctx.errors.add(e),
        }
    }
}
