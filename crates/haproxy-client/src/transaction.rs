//! Configuration transactions
//!
//! A [`Transaction`] is a working copy of the last committed configuration.
//! Every mutation that alters the copy sets `has_changes`; committing a
//! transaction without changes skips the file write entirely.

use crate::config::{BackendSection, Configuration, FrontendSection, SectionRules};
use crate::error::HAProxyError;
use crate::models::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Section owning a child object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentType {
    Frontend,
    Backend,
}

/// Staged configuration edits.
#[derive(Debug)]
pub struct Transaction {
    id: Uuid,
    config: Configuration,
    has_changes: bool,
}

fn insert_at<T>(list: &mut Vec<T>, index: usize, item: T, what: &str) -> Result<(), HAProxyError> {
    if index > list.len() {
        return Err(HAProxyError::Conflict(format!(
            "{what}: index {index} out of range (len {})",
            list.len()
        )));
    }
    list.insert(index, item);
    Ok(())
}

impl Transaction {
    fn new(config: Configuration) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            has_changes: false,
        }
    }

    /// Transaction identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// True once any mutation altered the working copy.
    pub fn has_changes(&self) -> bool {
        self.has_changes
    }

    /// Working copy.
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    fn mark(&mut self) {
        self.has_changes = true;
    }

    fn set_if_changed<T: PartialEq>(target: &mut T, value: T) -> bool {
        if *target == value {
            return false;
        }
        *target = value;
        true
    }

    // Global / defaults

    /// The global section.
    pub fn global(&self) -> &Global {
        &self.config.global
    }

    /// Replaces the global section, returns true when it differed.
    pub fn global_replace(&mut self, global: Global) -> bool {
        let changed = Self::set_if_changed(&mut self.config.global, global);
        if changed {
            self.mark();
        }
        changed
    }

    /// Replaces the global log targets, returns true when they differed.
    pub fn global_log_targets_replace(&mut self, targets: Vec<LogTarget>) -> bool {
        let changed = Self::set_if_changed(&mut self.config.global_log_targets, targets);
        if changed {
            self.mark();
        }
        changed
    }

    /// Replaces the raw lines appended to the global section, returns true
    /// when they differed.
    pub fn global_config_snippet_set(&mut self, snippet: Vec<String>) -> bool {
        let changed = Self::set_if_changed(&mut self.config.global_config_snippet, snippet);
        if changed {
            self.mark();
        }
        changed
    }

    /// The defaults section.
    pub fn defaults(&self) -> &Defaults {
        &self.config.defaults
    }

    /// Replaces the defaults section, returns true when it differed.
    pub fn defaults_replace(&mut self, defaults: Defaults) -> bool {
        let changed = Self::set_if_changed(&mut self.config.defaults, defaults);
        if changed {
            self.mark();
        }
        changed
    }

    // Frontends

    /// Frontend `name` without its binds and rules.
    pub fn frontend_get(&self, name: &str) -> Result<&Frontend, HAProxyError> {
        self.config
            .frontends
            .get(name)
            .map(|section| &section.frontend)
            .ok_or_else(|| HAProxyError::NotFound(format!("frontend {name}")))
    }

    /// Names of every frontend, sorted.
    pub fn frontend_names(&self) -> Vec<String> {
        self.config.frontends.keys().cloned().collect()
    }

    /// Creates a frontend, failing when one with the same name exists.
    pub fn frontend_create(&mut self, frontend: Frontend) -> Result<(), HAProxyError> {
        if self.config.frontends.contains_key(&frontend.name) {
            return Err(HAProxyError::AlreadyExists(format!("frontend {}", frontend.name)));
        }
        debug!(frontend = %frontend.name, "creating frontend");
        self.config.frontends.insert(
            frontend.name.clone(),
            FrontendSection {
                frontend,
                ..Default::default()
            },
        );
        self.mark();
        Ok(())
    }

    /// Creates the frontend unless one with the same name exists. Returns
    /// true when it was created.
    pub fn frontend_create_if_not_exists(&mut self, frontend: Frontend) -> bool {
        if self.config.frontends.contains_key(&frontend.name) {
            return false;
        }
        self.frontend_create(frontend).is_ok()
    }

    /// Replaces the frontend settings, returns true when they differed.
    pub fn frontend_edit(&mut self, frontend: Frontend) -> Result<bool, HAProxyError> {
        let section = self
            .config
            .frontends
            .get_mut(&frontend.name)
            .ok_or_else(|| HAProxyError::NotFound(format!("frontend {}", frontend.name)))?;
        let changed = Self::set_if_changed(&mut section.frontend, frontend);
        if changed {
            self.mark();
        }
        Ok(changed)
    }

    /// Deletes a frontend with its binds, rules and switching rules.
    pub fn frontend_delete(&mut self, name: &str) -> Result<(), HAProxyError> {
        self.config
            .frontends
            .remove(name)
            .ok_or_else(|| HAProxyError::NotFound(format!("frontend {name}")))?;
        debug!(frontend = %name, "deleted frontend");
        self.mark();
        Ok(())
    }

    fn frontend_section_mut(&mut self, name: &str) -> Result<&mut FrontendSection, HAProxyError> {
        self.config
            .frontends
            .get_mut(name)
            .ok_or_else(|| HAProxyError::NotFound(format!("frontend {name}")))
    }

    fn frontend_section(&self, name: &str) -> Result<&FrontendSection, HAProxyError> {
        self.config
            .frontends
            .get(name)
            .ok_or_else(|| HAProxyError::NotFound(format!("frontend {name}")))
    }

    // Binds

    /// Binds of `frontend`.
    pub fn frontend_binds(&self, frontend: &str) -> Result<&[Bind], HAProxyError> {
        Ok(&self.frontend_section(frontend)?.binds)
    }

    /// Adds a bind, failing on a duplicate name.
    pub fn frontend_bind_create(&mut self, frontend: &str, bind: Bind) -> Result<(), HAProxyError> {
        let section = self.frontend_section_mut(frontend)?;
        if section.binds.iter().any(|b| b.name == bind.name) {
            return Err(HAProxyError::AlreadyExists(format!("bind {frontend}/{}", bind.name)));
        }
        section.binds.push(bind);
        self.mark();
        Ok(())
    }

    /// Returns true when the bind was created.
    pub fn frontend_bind_create_if_not_exists(&mut self, frontend: &str, bind: Bind) -> Result<bool, HAProxyError> {
        if self.frontend_section(frontend)?.binds.iter().any(|b| b.name == bind.name) {
            return Ok(false);
        }
        self.frontend_bind_create(frontend, bind)?;
        Ok(true)
    }

    /// Replaces the bind with the same name, returns true when it differed.
    pub fn frontend_bind_edit(&mut self, frontend: &str, bind: Bind) -> Result<bool, HAProxyError> {
        let section = self.frontend_section_mut(frontend)?;
        let existing = section
            .binds
            .iter_mut()
            .find(|b| b.name == bind.name)
            .ok_or_else(|| HAProxyError::NotFound(format!("bind {frontend}/{}", bind.name)))?;
        let changed = Self::set_if_changed(existing, bind);
        if changed {
            self.mark();
        }
        Ok(changed)
    }

    /// Removes bind `name` of `frontend`.
    pub fn frontend_bind_delete(&mut self, frontend: &str, name: &str) -> Result<(), HAProxyError> {
        let section = self.frontend_section_mut(frontend)?;
        let before = section.binds.len();
        section.binds.retain(|b| b.name != name);
        if section.binds.len() == before {
            return Err(HAProxyError::NotFound(format!("bind {frontend}/{name}")));
        }
        self.mark();
        Ok(())
    }

    // Backends

    /// Backend `name` without its servers.
    pub fn backend_get(&self, name: &str) -> Result<&Backend, HAProxyError> {
        self.config
            .backends
            .get(name)
            .map(|section| &section.backend)
            .ok_or_else(|| HAProxyError::NotFound(format!("backend {name}")))
    }

    /// True when backend `name` exists.
    pub fn backend_exists(&self, name: &str) -> bool {
        self.config.backends.contains_key(name)
    }

    /// Names of every backend, sorted.
    pub fn backend_names(&self) -> Vec<String> {
        self.config.backends.keys().cloned().collect()
    }

    /// Creates a backend, failing when one with the same name exists.
    pub fn backend_create(&mut self, backend: Backend) -> Result<(), HAProxyError> {
        if self.config.backends.contains_key(&backend.name) {
            return Err(HAProxyError::AlreadyExists(format!("backend {}", backend.name)));
        }
        debug!(backend = %backend.name, "creating backend");
        self.config.backends.insert(
            backend.name.clone(),
            BackendSection {
                backend,
                ..Default::default()
            },
        );
        self.mark();
        Ok(())
    }

    /// Returns true when the backend was created.
    pub fn backend_create_if_not_exists(&mut self, backend: Backend) -> bool {
        if self.config.backends.contains_key(&backend.name) {
            return false;
        }
        self.backend_create(backend).is_ok()
    }

    /// Replaces the backend settings, returns true when they differed.
    pub fn backend_edit(&mut self, backend: Backend) -> Result<bool, HAProxyError> {
        let section = self
            .config
            .backends
            .get_mut(&backend.name)
            .ok_or_else(|| HAProxyError::NotFound(format!("backend {}", backend.name)))?;
        let changed = Self::set_if_changed(&mut section.backend, backend);
        if changed {
            self.mark();
        }
        Ok(changed)
    }

    /// Deletes a backend with its servers.
    pub fn backend_delete(&mut self, name: &str) -> Result<(), HAProxyError> {
        self.config
            .backends
            .remove(name)
            .ok_or_else(|| HAProxyError::NotFound(format!("backend {name}")))?;
        debug!(backend = %name, "deleted backend");
        self.mark();
        Ok(())
    }

    fn backend_section_mut(&mut self, name: &str) -> Result<&mut BackendSection, HAProxyError> {
        self.config
            .backends
            .get_mut(name)
            .ok_or_else(|| HAProxyError::NotFound(format!("backend {name}")))
    }

    // Servers

    /// Servers of `backend` in file order.
    pub fn backend_servers(&self, backend: &str) -> Result<&[Server], HAProxyError> {
        self.config
            .backends
            .get(backend)
            .map(|section| section.servers.as_slice())
            .ok_or_else(|| HAProxyError::NotFound(format!("backend {backend}")))
    }

    /// Appends a server, failing on a duplicate name.
    pub fn backend_server_create(&mut self, backend: &str, server: Server) -> Result<(), HAProxyError> {
        let section = self.backend_section_mut(backend)?;
        if section.servers.iter().any(|s| s.name == server.name) {
            return Err(HAProxyError::AlreadyExists(format!("server {backend}/{}", server.name)));
        }
        section.servers.push(server);
        self.mark();
        Ok(())
    }

    /// Replaces the server with the same name, returns true when it differed.
    pub fn backend_server_edit(&mut self, backend: &str, server: Server) -> Result<bool, HAProxyError> {
        let section = self.backend_section_mut(backend)?;
        let existing = section
            .servers
            .iter_mut()
            .find(|s| s.name == server.name)
            .ok_or_else(|| HAProxyError::NotFound(format!("server {backend}/{}", server.name)))?;
        let changed = Self::set_if_changed(existing, server);
        if changed {
            self.mark();
        }
        Ok(changed)
    }

    /// Removes server `name` of `backend`.
    pub fn backend_server_delete(&mut self, backend: &str, name: &str) -> Result<(), HAProxyError> {
        let section = self.backend_section_mut(backend)?;
        let before = section.servers.len();
        section.servers.retain(|s| s.name != name);
        if section.servers.len() == before {
            return Err(HAProxyError::NotFound(format!("server {backend}/{name}")));
        }
        self.mark();
        Ok(())
    }

    // Rules shared by frontends and backends

    fn rules_mut(&mut self, parent: ParentType, name: &str) -> Result<&mut SectionRules, HAProxyError> {
        match parent {
            ParentType::Frontend => Ok(&mut self.frontend_section_mut(name)?.rules),
            ParentType::Backend => Ok(&mut self.backend_section_mut(name)?.rules),
        }
    }

    /// Rules of a frontend or backend.
    pub fn rules(&self, parent: ParentType, name: &str) -> Result<&SectionRules, HAProxyError> {
        match parent {
            ParentType::Frontend => Ok(&self.frontend_section(name)?.rules),
            ParentType::Backend => self
                .config
                .backends
                .get(name)
                .map(|section| &section.rules)
                .ok_or_else(|| HAProxyError::NotFound(format!("backend {name}"))),
        }
    }

    /// Inserts an `http-request` rule at `index`.
    pub fn http_request_rule_create(
        &mut self,
        parent: ParentType,
        name: &str,
        index: usize,
        rule: HttpRequestRule,
    ) -> Result<(), HAProxyError> {
        let rules = self.rules_mut(parent, name)?;
        insert_at(&mut rules.http_request_rules, index, rule, "http-request")?;
        self.mark();
        Ok(())
    }

    /// Drops every `http-request` rule of the section.
    pub fn http_request_rules_delete_all(&mut self, parent: ParentType, name: &str) -> Result<(), HAProxyError> {
        let rules = self.rules_mut(parent, name)?;
        if !rules.http_request_rules.is_empty() {
            rules.http_request_rules.clear();
            self.mark();
        }
        Ok(())
    }

    /// Inserts an `http-response` rule at `index`.
    pub fn http_response_rule_create(
        &mut self,
        parent: ParentType,
        name: &str,
        index: usize,
        rule: HttpResponseRule,
    ) -> Result<(), HAProxyError> {
        let rules = self.rules_mut(parent, name)?;
        insert_at(&mut rules.http_response_rules, index, rule, "http-response")?;
        self.mark();
        Ok(())
    }

    /// Drops every `http-response` rule of the section.
    pub fn http_response_rules_delete_all(&mut self, parent: ParentType, name: &str) -> Result<(), HAProxyError> {
        let rules = self.rules_mut(parent, name)?;
        if !rules.http_response_rules.is_empty() {
            rules.http_response_rules.clear();
            self.mark();
        }
        Ok(())
    }

    /// Inserts a `tcp-request` rule at `index`.
    pub fn tcp_request_rule_create(
        &mut self,
        parent: ParentType,
        name: &str,
        index: usize,
        rule: TcpRequestRule,
    ) -> Result<(), HAProxyError> {
        let rules = self.rules_mut(parent, name)?;
        insert_at(&mut rules.tcp_request_rules, index, rule, "tcp-request")?;
        self.mark();
        Ok(())
    }

    /// Drops every `tcp-request` rule of the section.
    pub fn tcp_request_rules_delete_all(&mut self, parent: ParentType, name: &str) -> Result<(), HAProxyError> {
        let rules = self.rules_mut(parent, name)?;
        if !rules.tcp_request_rules.is_empty() {
            rules.tcp_request_rules.clear();
            self.mark();
        }
        Ok(())
    }

    /// Inserts an ACL at `index`.
    pub fn acl_create(&mut self, parent: ParentType, name: &str, index: usize, acl: Acl) -> Result<(), HAProxyError> {
        let rules = self.rules_mut(parent, name)?;
        insert_at(&mut rules.acls, index, acl, "acl")?;
        self.mark();
        Ok(())
    }

    /// Deletes every ACL with the given name.
    pub fn acl_delete(&mut self, parent: ParentType, name: &str, acl_name: &str) -> Result<(), HAProxyError> {
        let rules = self.rules_mut(parent, name)?;
        let before = rules.acls.len();
        rules.acls.retain(|acl| acl.name != acl_name);
        if rules.acls.len() == before {
            return Err(HAProxyError::NotFound(format!("acl {acl_name} in {name}")));
        }
        self.mark();
        Ok(())
    }

    /// Inserts a filter at `index`.
    pub fn filter_create(&mut self, parent: ParentType, name: &str, index: usize, filter: Filter) -> Result<(), HAProxyError> {
        let rules = self.rules_mut(parent, name)?;
        insert_at(&mut rules.filters, index, filter, "filter")?;
        self.mark();
        Ok(())
    }

    /// Drops every filter of the section.
    pub fn filters_delete_all(&mut self, parent: ParentType, name: &str) -> Result<(), HAProxyError> {
        let rules = self.rules_mut(parent, name)?;
        if !rules.filters.is_empty() {
            rules.filters.clear();
            self.mark();
        }
        Ok(())
    }

    /// Replaces the log targets of a section, returns true when they differed.
    pub fn log_targets_replace(&mut self, parent: ParentType, name: &str, targets: Vec<LogTarget>) -> Result<bool, HAProxyError> {
        let rules = self.rules_mut(parent, name)?;
        let changed = Self::set_if_changed(&mut rules.log_targets, targets);
        if changed {
            self.mark();
        }
        Ok(changed)
    }

    /// Sets the config snippet of a frontend or backend. Returns true when
    /// it differed.
    pub fn config_snippet_set(&mut self, parent: ParentType, name: &str, snippet: Vec<String>) -> Result<bool, HAProxyError> {
        let rules = self.rules_mut(parent, name)?;
        let changed = Self::set_if_changed(&mut rules.config_snippet, snippet);
        if changed {
            self.mark();
        }
        Ok(changed)
    }

    // Frontend only children

    /// `use_backend` rules of `frontend` in evaluation order.
    pub fn backend_switching_rules(&self, frontend: &str) -> Result<&[BackendSwitchingRule], HAProxyError> {
        Ok(&self.frontend_section(frontend)?.backend_switching_rules)
    }

    /// Inserts a `use_backend` rule at `index`.
    pub fn backend_switching_rule_create(
        &mut self,
        frontend: &str,
        index: usize,
        rule: BackendSwitchingRule,
    ) -> Result<(), HAProxyError> {
        let section = self.frontend_section_mut(frontend)?;
        insert_at(&mut section.backend_switching_rules, index, rule, "use_backend")?;
        self.mark();
        Ok(())
    }

    /// Drops every `use_backend` rule of `frontend`.
    pub fn backend_switching_rules_delete_all(&mut self, frontend: &str) -> Result<(), HAProxyError> {
        let section = self.frontend_section_mut(frontend)?;
        if !section.backend_switching_rules.is_empty() {
            section.backend_switching_rules.clear();
            self.mark();
        }
        Ok(())
    }

    /// Replaces the request captures of `frontend`, returns true when they
    /// differed.
    pub fn captures_replace(&mut self, frontend: &str, captures: Vec<Capture>) -> Result<bool, HAProxyError> {
        let section = self.frontend_section_mut(frontend)?;
        let changed = Self::set_if_changed(&mut section.captures, captures);
        if changed {
            self.mark();
        }
        Ok(changed)
    }

    // Peers / userlists

    /// Adds a peer to `section`, creating the section when missing.
    pub fn peer_entry_create(&mut self, section: &str, entry: PeerEntry) -> Result<(), HAProxyError> {
        let entries = self.config.peers.entry(section.to_string()).or_default();
        if entries.iter().any(|e| e.name == entry.name) {
            return Err(HAProxyError::AlreadyExists(format!("peer {section}/{}", entry.name)));
        }
        entries.push(entry);
        self.mark();
        Ok(())
    }

    /// Removes a peer. The section goes away with its last peer.
    pub fn peer_entry_delete(&mut self, section: &str, name: &str) -> Result<(), HAProxyError> {
        let entries = self
            .config
            .peers
            .get_mut(section)
            .ok_or_else(|| HAProxyError::NotFound(format!("peers {section}")))?;
        let before = entries.len();
        entries.retain(|e| e.name != name);
        if entries.len() == before {
            return Err(HAProxyError::NotFound(format!("peer {section}/{name}")));
        }
        if entries.is_empty() {
            self.config.peers.remove(section);
        }
        self.mark();
        Ok(())
    }

    /// Names of every userlist, sorted.
    pub fn userlist_names(&self) -> Vec<String> {
        self.config.userlists.keys().cloned().collect()
    }

    /// Creates or replaces a userlist, returns true when it differed.
    pub fn userlist_replace(&mut self, userlist: Userlist) -> bool {
        if self.config.userlists.get(&userlist.name) == Some(&userlist) {
            return false;
        }
        self.config.userlists.insert(userlist.name.clone(), userlist);
        self.mark();
        true
    }

    /// Deletes userlist `name`.
    pub fn userlist_delete(&mut self, name: &str) -> Result<(), HAProxyError> {
        self.config
            .userlists
            .remove(name)
            .ok_or_else(|| HAProxyError::NotFound(format!("userlist {name}")))?;
        self.mark();
        Ok(())
    }
}

/// Owner of the configuration file and of the single active transaction.
#[derive(Debug)]
pub struct ConfigClient {
    config_file: PathBuf,
    committed: Configuration,
    active: Option<Uuid>,
    version: u64,
}

impl ConfigClient {
    /// Client writing to `config_file`, starting from `initial`.
    pub fn new(config_file: impl Into<PathBuf>, initial: Configuration) -> Self {
        Self {
            config_file: config_file.into(),
            committed: initial,
            active: None,
            version: 0,
        }
    }

    /// File the committed configuration is written to.
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Last committed configuration.
    pub fn committed(&self) -> &Configuration {
        &self.committed
    }

    /// Number of commits that wrote the file.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Opens a transaction over a copy of the committed configuration.
    pub fn transaction_start(&mut self) -> Result<Transaction, HAProxyError> {
        if let Some(active) = self.active {
            return Err(HAProxyError::TransactionActive(active.to_string()));
        }
        let txn = Transaction::new(self.committed.clone());
        self.active = Some(txn.id);
        debug!(transaction = %txn.id, "transaction started");
        Ok(txn)
    }

    /// Commits the transaction. Returns false when the transaction carried
    /// no changes and the file was left untouched.
    pub async fn transaction_commit(&mut self, txn: Transaction) -> Result<bool, HAProxyError> {
        self.check_active(&txn)?;
        self.active = None;
        if !txn.has_changes {
            debug!(transaction = %txn.id, "no changes, commit skipped");
            return Ok(false);
        }
        let rendered = txn.config.render();
        write_atomic(&self.config_file, rendered.as_bytes()).await?;
        self.committed = txn.config;
        self.version += 1;
        info!(transaction = %txn.id, version = self.version, "configuration committed");
        Ok(true)
    }

    /// Drops the transaction, keeping the committed configuration.
    pub fn transaction_dispose(&mut self, txn: Transaction) -> Result<(), HAProxyError> {
        self.check_active(&txn)?;
        self.active = None;
        debug!(transaction = %txn.id, "transaction disposed");
        Ok(())
    }

    fn check_active(&self, txn: &Transaction) -> Result<(), HAProxyError> {
        match self.active {
            Some(active) if active == txn.id => Ok(()),
            _ => Err(HAProxyError::TransactionMismatch(txn.id.to_string())),
        }
    }
}

/// Writes `content` to a sibling temp file and renames it over `path`.
pub async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), HAProxyError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| HAProxyError::Conflict(format!("invalid file path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
