//! HAProxy adaptation layer
//!
//! Owns everything that outlives a sync: the configuration client, map
//! files, rules engine, server slots and certificates. A sync opens a
//! transaction with [`HAProxy::transaction_start`], builds the desired
//! configuration into it and hands it back to [`HAProxy::commit`], which
//! decides between runtime socket updates and a reload.

pub mod backends;
pub mod base;
pub mod certs;

use crate::annotations::backend::BackendSettings;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, ErrorPool};
use crate::fs_writer::FsWriter;
use crate::maps::{ChangedMap, MapFiles};
use crate::metrics;
use crate::process::Process;
use crate::router::CustomRoutes;
use crate::rules::Rules;
use backends::{RuntimeOp, ServerSlots};
use certs::Certificates;
use haproxy_client::{
    Backend, Bind, ConfigClient, Configuration, Frontend, HAProxyError, ParentType, RuntimeClientTrait, Transaction,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What one commit did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// The configuration file was rewritten
    pub written: bool,
    pub reloaded: bool,
    /// Runtime socket commands that succeeded
    pub runtime_ops: usize,
    pub reasons: Vec<String>,
}

/// HAProxy instance managed by the controller.
pub struct HAProxy {
    client: ConfigClient,
    runtime: Arc<dyn RuntimeClientTrait>,
    process: Arc<dyn Process>,
    pub maps: MapFiles,
    pub rules: Rules,
    pub custom_routes: CustomRoutes,
    pub slots: ServerSlots,
    pub certs: Certificates,
    pub writer: Arc<FsWriter>,
    working_dirs: Vec<std::path::PathBuf>,
    active_frontends: BTreeSet<String>,
    active_backends: BTreeSet<String>,
    permanent_backends: BTreeSet<String>,
    reload_reasons: Vec<String>,
    runtime_ops: Vec<RuntimeOp>,
    /// A reload failed and must be retried
    reload_pending: bool,
}

impl std::fmt::Debug for HAProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HAProxy")
            .field("config_file", &self.client.config_file())
            .field("version", &self.client.version())
            .field("active_backends", &self.active_backends.len())
            .finish_non_exhaustive()
    }
}

impl HAProxy {
    /// Controller owned HAProxy state; nothing is written before [`HAProxy::init`].
    pub fn new(config: &ControllerConfig, runtime: Arc<dyn RuntimeClientTrait>, process: Arc<dyn Process>) -> Self {
        Self {
            client: ConfigClient::new(config.main_config_file(), Configuration::default()),
            runtime,
            process,
            maps: MapFiles::new(config.maps_dir()),
            rules: Rules::new(),
            custom_routes: CustomRoutes::new(),
            slots: ServerSlots::new(),
            certs: Certificates::new(config.frontend_certs_dir()),
            writer: Arc::new(FsWriter::new()),
            working_dirs: config.working_dirs(),
            active_frontends: BTreeSet::new(),
            active_backends: BTreeSet::new(),
            permanent_backends: BTreeSet::from([
                base::DEFAULT_LOCAL_BACKEND.to_string(),
                base::SSL_BACKEND.to_string(),
            ]),
            reload_reasons: Vec::new(),
            runtime_ops: Vec::new(),
            reload_pending: false,
        }
    }

    /// Creates the working directories and loads the persistent maps.
    pub async fn init(&mut self) -> Result<(), ControllerError> {
        for dir in &self.working_dirs {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                ControllerError::InvalidConfig(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        self.maps.init().await
    }

    /// Last committed configuration.
    pub fn configuration(&self) -> &Configuration {
        self.client.committed()
    }

    pub fn process(&self) -> &Arc<dyn Process> {
        &self.process
    }

    /// Opens the transaction of a sync and resets the per-sync bookkeeping.
    pub fn transaction_start(&mut self) -> Result<Transaction, ControllerError> {
        let txn = self.client.transaction_start()?;
        self.maps.clean();
        self.rules.clean();
        self.custom_routes.clean();
        self.certs.clean();
        self.active_frontends.clear();
        self.active_backends.clear();
        self.reload_reasons.clear();
        self.runtime_ops.clear();
        Ok(txn)
    }

    /// Records a change only a reload can apply.
    pub fn request_reload(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(reason = %reason, "reload requested");
        self.reload_reasons.push(reason);
    }

    /// True when the coming commit will reload.
    pub fn reload_requested(&self) -> bool {
        self.reload_pending || !self.reload_reasons.is_empty()
    }

    /// Keeps `backend` out of garbage collection.
    pub fn set_permanent(&mut self, backend: impl Into<String>) {
        self.permanent_backends.insert(backend.into());
    }

    /// Marks `backend` as used by the current sync.
    pub fn backend_active(&mut self, backend: impl Into<String>) {
        self.active_backends.insert(backend.into());
    }

    /// True when `backend` was synced this sync.
    pub fn is_backend_active(&self, backend: &str) -> bool {
        self.active_backends.contains(backend)
    }

    /// Marks `frontend` as used by the current sync.
    pub fn frontend_active(&mut self, frontend: impl Into<String>) {
        self.active_frontends.insert(frontend.into());
    }

    /// Creates or updates `frontend` with exactly `binds`.
    pub fn sync_frontend(&mut self, txn: &mut Transaction, frontend: Frontend, binds: Vec<Bind>) -> Result<(), HAProxyError> {
        let name = frontend.name.clone();
        if txn.frontend_get(&name).is_err() {
            self.rules.invalidate(&name);
        }
        if base::sync_frontend(txn, frontend, binds)? {
            self.request_reload(format!("frontend {name} updated"));
        }
        self.frontend_active(name);
        Ok(())
    }

    /// Deletes frontends the current sync did not produce.
    pub fn refresh_frontends(&mut self, txn: &mut Transaction) -> Result<Vec<String>, HAProxyError> {
        let stale: Vec<String> = txn
            .frontend_names()
            .into_iter()
            .filter(|name| !self.active_frontends.contains(name))
            .collect();
        for name in &stale {
            info!(frontend = %name, "deleting unused frontend");
            txn.frontend_delete(name)?;
            self.rules.invalidate(name);
        }
        if !stale.is_empty() {
            self.request_reload(format!("{} frontends deleted", stale.len()));
        }
        Ok(stale)
    }

    /// Creates or updates `backend` without servers.
    pub fn sync_backend_section(&mut self, txn: &mut Transaction, backend: Backend, snippet: Vec<String>) -> Result<(), HAProxyError> {
        let name = backend.name.clone();
        if txn.backend_exists(&name) {
            if txn.backend_edit(backend)? {
                self.request_reload(format!("backend {name} updated"));
            }
        } else {
            txn.backend_create(backend)?;
            self.request_reload(format!("backend {name} created"));
        }
        if txn.config_snippet_set(ParentType::Backend, &name, snippet)? {
            self.request_reload(format!("backend {name} snippet updated"));
        }
        self.backend_active(name);
        Ok(())
    }

    /// Creates or updates a service backend and binds its server slots to
    /// `addresses`.
    pub fn sync_backend(
        &mut self,
        txn: &mut Transaction,
        settings: &BackendSettings,
        addresses: &BTreeSet<String>,
        port: u16,
    ) -> Result<(), HAProxyError> {
        let name = settings.backend.name.as_str();
        if self.is_backend_active(name) {
            // already synced by another path of this sync
            return Ok(());
        }
        self.sync_backend_section(txn, settings.backend.clone(), settings.snippet.clone())?;
        let outcome = self.slots.sync_backend_servers(txn, settings, addresses, port)?;
        if outcome.reload {
            self.request_reload(format!("backend {name} servers updated"));
        }
        self.runtime_ops.extend(outcome.ops);
        Ok(())
    }

    /// Deletes backends neither active this sync nor permanent. Returns the
    /// deleted names.
    pub fn refresh_backends(&mut self, txn: &mut Transaction) -> Result<Vec<String>, HAProxyError> {
        let stale: Vec<String> = txn
            .backend_names()
            .into_iter()
            .filter(|name| !self.active_backends.contains(name) && !self.permanent_backends.contains(name))
            .collect();
        for name in &stale {
            info!(backend = %name, "deleting unused backend");
            txn.backend_delete(name)?;
            self.slots.remove(name);
            self.runtime_ops.retain(|op| op.backend() != name);
        }
        if !stale.is_empty() {
            self.request_reload(format!("{} backends deleted", stale.len()));
        }
        Ok(stale)
    }

    /// Refreshes frontends, rules, maps, certificates and backends, commits `txn`,
    /// then either reloads HAProxy or pushes the runtime changes.
    pub async fn commit(&mut self, mut txn: Transaction, errors: &mut ErrorPool) -> Result<CommitOutcome, ControllerError> {
        if self.reload_pending {
            self.request_reload("previous configuration not applied");
        }
        if let Err(e) = self.refresh_frontends(&mut txn) {
            self.dispose(txn);
            return Err(e.into());
        }
        if self.rules.refresh(&mut txn, errors) {
            self.request_reload("frontend rules changed");
        }
        if self.custom_routes_changed(&mut txn, errors) {
            self.request_reload("backend switching rules changed");
        }

        let map_changes = match self.maps.refresh().await {
            Ok(refresh) => {
                if refresh.reload {
                    self.request_reload("map files created or removed");
                }
                refresh.changed
            }
            Err(e) => {
                self.dispose(txn);
                return Err(e);
            }
        };
        match self.certs.refresh().await {
            Ok(true) => self.request_reload("certificates changed"),
            Ok(false) => {}
            Err(e) => errors.add(e),
        }
        if let Err(e) = self.refresh_backends(&mut txn) {
            self.dispose(txn);
            return Err(e.into());
        }

        self.writer.run_delayed().await;
        let written = match self.client.transaction_commit(txn).await {
            Ok(written) => written,
            Err(e) => {
                self.abandon();
                return Err(e.into());
            }
        };

        let mut outcome = CommitOutcome {
            written,
            ..Default::default()
        };
        if !self.reload_requested() {
            outcome.runtime_ops = self.apply_runtime_ops().await;
            self.push_maps(&map_changes).await;
        }

        outcome.reasons = self.reload_reasons.clone();
        if self.reload_requested() {
            self.reload().await?;
            outcome.reloaded = true;
        }
        Ok(outcome)
    }

    fn custom_routes_changed(&mut self, txn: &mut Transaction, errors: &mut ErrorPool) -> bool {
        let frontends: Vec<String> = [base::HTTP_FRONTEND, base::HTTPS_FRONTEND]
            .into_iter()
            .filter(|name| txn.frontend_get(name).is_ok())
            .map(ToString::to_string)
            .collect();
        let frontends: Vec<&str> = frontends.iter().map(String::as_str).collect();
        self.custom_routes.refresh(txn, &frontends, errors)
    }

    fn dispose(&mut self, txn: Transaction) {
        if let Err(e) = self.client.transaction_dispose(txn) {
            error!("failed to dispose transaction: {}", e);
        }
        self.abandon();
    }

    /// Forgets what the uncommitted transaction carried. Slots, rules and
    /// map hashes already moved to the new state, so the next commit
    /// rewrites every rule and reloads to pick up the files.
    fn abandon(&mut self) {
        warn!("transaction not committed, next sync reloads");
        self.rules.invalidate_all();
        self.reload_pending = true;
        self.runtime_ops.clear();
    }

    /// Runs the pending runtime ops. A failed op flips the backend to the
    /// reload path and requests a reload; the committed file already
    /// carries the desired servers.
    async fn apply_runtime_ops(&mut self) -> usize {
        let ops = std::mem::take(&mut self.runtime_ops);
        let mut applied = 0;
        let mut failed: BTreeSet<String> = BTreeSet::new();
        for op in ops {
            if failed.contains(op.backend()) {
                continue;
            }
            let result = match &op {
                RuntimeOp::SetServerAddr {
                    backend,
                    server,
                    address,
                    port,
                } => self.runtime.set_server_addr(backend, server, address, *port).await,
                RuntimeOp::SetServerState { backend, server, state } => {
                    self.runtime.set_server_state(backend, server, *state).await
                }
            };
            match result {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!(backend = %op.backend(), "runtime update failed, falling back to reload: {}", e);
                    metrics::record_runtime_failure();
                    self.slots.mark_dynamic_update_failed(op.backend());
                    failed.insert(op.backend().to_string());
                }
            }
        }
        for backend in failed {
            self.request_reload(format!("runtime update of {backend} failed"));
        }
        if applied > 0 {
            debug!(commands = applied, "runtime updates applied");
        }
        applied
    }

    async fn push_maps(&mut self, changes: &[ChangedMap]) {
        for map in changes {
            let file = map.path.to_string_lossy();
            if let Err(e) = self.runtime.set_map_content(&file, &map.rows).await {
                warn!(map = %map.name, "runtime map update failed, falling back to reload: {}", e);
                metrics::record_runtime_failure();
                self.request_reload(format!("runtime update of map {} failed", map.name));
            }
        }
    }

    /// Reloads HAProxy, restarting it when the reload fails.
    async fn reload(&mut self) -> Result<(), ControllerError> {
        self.writer.wait_until_writes_done().await;
        info!(reasons = ?self.reload_reasons, "reloading haproxy");
        if let Err(e) = self.process.reload().await {
            error!("reload failed, restarting haproxy: {}", e);
            if let Err(e) = self.process.restart().await {
                self.reload_pending = true;
                return Err(e);
            }
            metrics::record_restart();
        } else {
            metrics::record_reload();
        }
        self.reload_pending = false;
        self.runtime_ops.clear();
        self.maps.mark_loaded();
        self.slots.reloaded();
        Ok(())
    }
}
