//! Server slots
//!
//! Every backend owns a fixed pool of server lines (`SRV_1`, `SRV_2`, ...).
//! Endpoint changes rebind slots to new addresses through the runtime
//! socket; unused slots park on `127.0.0.1:0` in maintenance. The pool only
//! grows, one block at a time, and growing needs a reload.

use crate::annotations::backend::BackendSettings;
use haproxy_client::{HAProxyError, Server, ServerState, Transaction};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info};

/// Address of a parked slot.
pub const MAINT_ADDRESS: &str = "127.0.0.1";

/// A live change applied through the runtime socket after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeOp {
    SetServerAddr {
        backend: String,
        server: String,
        address: String,
        port: u16,
    },
    SetServerState {
        backend: String,
        server: String,
        state: ServerState,
    },
}

impl RuntimeOp {
    /// Backend the op targets.
    pub fn backend(&self) -> &str {
        match self {
            Self::SetServerAddr { backend, .. } | Self::SetServerState { backend, .. } => backend,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    name: String,
    /// Empty when the slot is parked
    address: String,
    modified: bool,
}

#[derive(Debug, Default)]
struct BackendSlots {
    slots: Vec<Slot>,
    port: u16,
    dynamic_update_failed: bool,
}

impl BackendSlots {
    fn grow(&mut self, count: usize) {
        let start = self.slots.len();
        self.slots.extend((start + 1..=start + count).map(|n| Slot {
            name: format!("SRV_{n}"),
            address: String::new(),
            modified: true,
        }));
    }

    /// Binds `addresses` to slots. Returns true when the pool had to grow.
    fn assign(&mut self, addresses: &BTreeSet<String>, block: usize) -> bool {
        let mut remaining = addresses.clone();
        let mut disabled = VecDeque::new();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if !slot.address.is_empty() && remaining.remove(&slot.address) {
                continue;
            }
            if !slot.address.is_empty() {
                slot.address.clear();
                slot.modified = true;
            }
            disabled.push_back(index);
        }

        let mut grew = false;
        for address in remaining {
            let index = match disabled.pop_front() {
                Some(index) => index,
                None => {
                    let start = self.slots.len();
                    self.grow(block.max(1));
                    disabled.extend(start + 1..self.slots.len());
                    grew = true;
                    start
                }
            };
            let slot = &mut self.slots[index];
            slot.address = address;
            slot.modified = true;
        }
        grew
    }
}

/// Outcome of one backend's slot sync.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SlotSync {
    pub ops: Vec<RuntimeOp>,
    pub reload: bool,
}

/// Slot pools of every backend, kept across syncs.
#[derive(Debug, Default)]
pub struct ServerSlots {
    backends: BTreeMap<String, BackendSlots>,
}

impl ServerSlots {
    /// Empty pool set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles the servers of `backend` with `addresses`. The transaction
    /// always carries the resulting server lines; changes the runtime socket
    /// cannot express are reported as `reload`.
    pub fn sync_backend_servers(
        &mut self,
        txn: &mut Transaction,
        settings: &BackendSettings,
        addresses: &BTreeSet<String>,
        port: u16,
    ) -> Result<SlotSync, HAProxyError> {
        let backend = settings.backend.name.as_str();
        let state = self.backends.entry(backend.to_string()).or_default();
        let mut outcome = SlotSync::default();

        let port_changed = !state.slots.is_empty() && state.port != port;
        if state.slots.is_empty() {
            state.grow(settings.slots.max(1));
        }
        state.port = port;
        if state.assign(addresses, settings.slots) {
            info!(backend = %backend, slots = state.slots.len(), "server pool grown, reload required");
            outcome.reload = true;
        }
        if port_changed {
            debug!(backend = %backend, port, "port changed, every slot re-emitted");
            for slot in &mut state.slots {
                slot.modified = true;
            }
            outcome.reload = true;
        }

        let existing: BTreeMap<String, Server> = txn
            .backend_servers(backend)?
            .iter()
            .map(|server| (server.name.clone(), server.clone()))
            .collect();
        let live = !state.dynamic_update_failed && !port_changed;

        for slot in &mut state.slots {
            let server = desired_server(settings, slot, port);
            match existing.get(&slot.name) {
                None => {
                    txn.backend_server_create(backend, server)?;
                    outcome.reload = true;
                }
                Some(current) if *current == server => {}
                Some(current) => {
                    let only_address = Server {
                        address: current.address.clone(),
                        port: current.port,
                        maintenance: current.maintenance,
                        ..server.clone()
                    } == *current;
                    txn.backend_server_edit(backend, server)?;
                    if !(only_address && live) {
                        outcome.reload = true;
                    }
                }
            }
            if slot.modified && live && !outcome.reload {
                outcome.ops.extend(slot_ops(backend, slot, port));
            }
            slot.modified = false;
        }

        if outcome.reload {
            // the reload applies every slot, pending runtime ops are moot
            outcome.ops.clear();
            state.dynamic_update_failed = false;
        }
        Ok(outcome)
    }

    /// Routes the next change of `backend` through a reload.
    pub fn mark_dynamic_update_failed(&mut self, backend: &str) {
        if let Some(state) = self.backends.get_mut(backend) {
            state.dynamic_update_failed = true;
        }
    }

    /// Clears the bit once a reload applied the whole configuration.
    pub fn reloaded(&mut self) {
        for state in self.backends.values_mut() {
            state.dynamic_update_failed = false;
        }
    }

    /// Forgets the slots of a deleted backend.
    pub fn remove(&mut self, backend: &str) {
        self.backends.remove(backend);
    }

    /// Bound addresses of `backend`, by slot name.
    pub fn addresses(&self, backend: &str) -> BTreeMap<String, String> {
        self.backends
            .get(backend)
            .map(|state| {
                state
                    .slots
                    .iter()
                    .filter(|slot| !slot.address.is_empty())
                    .map(|slot| (slot.name.clone(), slot.address.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Server slots allocated to `backend`.
    pub fn slot_count(&self, backend: &str) -> usize {
        self.backends.get(backend).map_or(0, |state| state.slots.len())
    }
}

fn desired_server(settings: &BackendSettings, slot: &Slot, port: u16) -> Server {
    let parked = slot.address.is_empty();
    Server {
        name: slot.name.clone(),
        address: if parked { MAINT_ADDRESS.to_string() } else { slot.address.clone() },
        port: Some(if parked { 0 } else { port }),
        params: settings.cookie_param(&slot.name).into_iter().collect(),
        maintenance: parked,
    }
}

fn slot_ops(backend: &str, slot: &Slot, port: u16) -> [RuntimeOp; 2] {
    let (address, port, state) = if slot.address.is_empty() {
        (MAINT_ADDRESS.to_string(), 0, ServerState::Maint)
    } else {
        (slot.address.clone(), port, ServerState::Ready)
    };
    [
        RuntimeOp::SetServerAddr {
            backend: backend.to_string(),
            server: slot.name.clone(),
            address,
            port,
        },
        RuntimeOp::SetServerState {
            backend: backend.to_string(),
            server: slot.name.clone(),
            state,
        },
    ]
}
