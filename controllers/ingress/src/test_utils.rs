//! Test utilities shared by the reconciler and HAProxy layer tests.

#![cfg(test)]

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::process::Process;
use crate::store::events::{EventData, SyncDataEvent};
use crate::store::{
    Endpoints, Ingress, IngressPath, IngressRule, IngressTls, PathType, PortEndpoints, PortRef, Secret, Service,
    ServicePort,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Configuration with every working directory under `dir`.
pub fn config(dir: &Path) -> ControllerConfig {
    config_with(dir, &[])
}

/// Like [`config`], with extra environment variables.
pub fn config_with(dir: &Path, env: &[(&str, &str)]) -> ControllerConfig {
    let root = dir.to_string_lossy().into_owned();
    ControllerConfig::from_lookup(|name| match name {
        "CONFIG_DIR" => Some(format!("{root}/etc")),
        "RUNTIME_DIR" => Some(format!("{root}/run")),
        "STATE_DIR" => Some(format!("{root}/state")),
        _ => env.iter().find(|(key, _)| *key == name).map(|(_, value)| value.to_string()),
    })
    .unwrap()
}

/// Process double counting lifecycle calls.
#[derive(Debug, Default)]
pub struct RecordingProcess {
    reloads: AtomicUsize,
    restarts: AtomicUsize,
    fail_reload: AtomicBool,
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingProcess {
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn fail_reload(&self, fail: bool) {
        self.fail_reload.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl Process for RecordingProcess {
    async fn start(&self) -> Result<(), ControllerError> {
        self.record("start");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ControllerError> {
        self.record("stop");
        Ok(())
    }

    async fn reload(&self) -> Result<(), ControllerError> {
        self.record("reload");
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(ControllerError::Process("reload refused".to_string()));
        }
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn restart(&self) -> Result<(), ControllerError> {
        self.record("restart");
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn service(ns: &str, name: &str, port_name: &str, port: i32) -> SyncDataEvent {
    SyncDataEvent::new(
        ns,
        name,
        EventData::Service(Service {
            namespace: ns.to_string(),
            name: name.to_string(),
            ports: vec![ServicePort {
                name: port_name.to_string(),
                protocol: "TCP".to_string(),
                port,
            }],
            ..Default::default()
        }),
    )
}

pub fn endpoints(ns: &str, service: &str, port_name: &str, port: i32, addresses: &[&str]) -> SyncDataEvent {
    let slice_name = format!("{service}-abcde");
    SyncDataEvent::new(
        ns,
        &slice_name,
        EventData::Endpoints(Endpoints {
            namespace: ns.to_string(),
            service: service.to_string(),
            slice_name: slice_name.clone(),
            ports: BTreeMap::from([(
                port_name.to_string(),
                PortEndpoints {
                    port,
                    addresses: addresses.iter().map(ToString::to_string).collect::<BTreeSet<_>>(),
                },
            )]),
        }),
    )
}

/// Ingress routing `host` + `path` to `service:port_name`.
pub fn ingress(ns: &str, name: &str, host: &str, path: &str, path_type: PathType, service: &str, port_name: &str) -> Ingress {
    Ingress {
        namespace: ns.to_string(),
        name: name.to_string(),
        class_name: Some("haproxy".to_string()),
        rules: vec![IngressRule {
            host: host.to_string(),
            paths: vec![IngressPath {
                path: path.to_string(),
                path_type,
                service: service.to_string(),
                port: PortRef::Name(port_name.to_string()),
            }],
        }],
        ..Default::default()
    }
}

pub fn with_annotation(mut ingress: Ingress, name: &str, value: &str) -> Ingress {
    ingress
        .annotations
        .insert(format!("haproxy.org/{name}"), value.to_string());
    ingress
}

pub fn with_tls(mut ingress: Ingress, secret: &str, hosts: &[&str]) -> Ingress {
    ingress.tls.push(IngressTls {
        hosts: hosts.iter().map(ToString::to_string).collect(),
        secret_name: secret.to_string(),
    });
    ingress
}

pub fn ingress_event(ingress: Ingress) -> SyncDataEvent {
    let (ns, name) = (ingress.namespace.clone(), ingress.name.clone());
    SyncDataEvent::new(&ns, &name, EventData::Ingress(ingress))
}

pub fn tls_secret(ns: &str, name: &str) -> SyncDataEvent {
    SyncDataEvent::new(
        ns,
        name,
        EventData::Secret(Secret {
            namespace: ns.to_string(),
            name: name.to_string(),
            secret_type: "kubernetes.io/tls".to_string(),
            data: BTreeMap::from([
                ("tls.crt".to_string(), b"CERT\n".to_vec()),
                ("tls.key".to_string(), b"KEY\n".to_vec()),
            ]),
        }),
    )
}
