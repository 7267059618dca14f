//! Ingress walk: backends, annotation rules, certificates and routes.

use super::custom_resources::{apply_backend, lookup_backend};
use super::{service_addresses, SyncContext};
use crate::annotations::ingress::{self as ingress_annotations, IngressContext};
use crate::annotations::{backend, Annotations};
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::haproxy::base::{HTTPS_FRONTEND, HTTP_FRONTEND};
use crate::router::{add_route, Route};
use crate::rules::RuleId;
use crate::store::{Ingress, IngressPath, K8sStore, Namespace, PathType};
use crate::utils::{backend_name, split_ns_name};
use haproxy_client::{Backend, Mode};
use std::collections::BTreeSet;
use tracing::{debug, trace};

const LEGACY_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// What the ingress walk found across all ingresses.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngressSummary {
    /// At least one route is SSL passthrough
    pub ssl_passthrough: bool,
    /// Userlists referenced this sync
    pub userlists: BTreeSet<String>,
    pub routes: usize,
}

/// True when this controller serves `ingress`.
fn class_matches(config: &ControllerConfig, store: &K8sStore, ingress: &Ingress) -> bool {
    let annotated = Annotations::new(Some(&ingress.annotations), None, None)
        .get("ingress.class")
        .or_else(|| ingress.annotations.get(LEGACY_CLASS_ANNOTATION).map(String::as_str));
    let class = ingress.class_name.as_deref().or(annotated);
    let Some(class) = class.filter(|c| !c.is_empty()) else {
        return config.empty_ingress_class;
    };
    if let Some(ingress_class) = store.ingress_class(class) {
        return ingress_class.controller == config.controller_class;
    }
    class == config.ingress_class
}

/// Adds every served ingress to the transaction.
pub(super) async fn sync_ingresses(ctx: &mut SyncContext<'_>) -> IngressSummary {
    let store = ctx.store;
    let mut summary = IngressSummary::default();
    for ns in store.namespaces.values().filter(|ns| ns.relevant) {
        for ingress in ns.live_ingresses() {
            if !class_matches(ctx.config, store, ingress) {
                trace!(ingress = %format!("{}/{}", ns.name, ingress.name), "ingress class not served");
                continue;
            }
            sync_ingress(ctx, ns, ingress, &mut summary).await;
        }
    }
    summary
}

async fn sync_ingress(ctx: &mut SyncContext<'_>, ns: &Namespace, ingress: &Ingress, summary: &mut IngressSummary) {
    let ann = Annotations::new(Some(&ingress.annotations), None, ctx.configmap);
    let settings = ingress_annotations::parse(
        &ann,
        IngressContext {
            namespace: &ns.name,
            name: &ingress.name,
            has_tls: !ingress.tls.is_empty(),
            allow_ssl_passthrough: ctx.config.ssl_passthrough,
        },
        ctx.store,
        ctx.errors,
    );

    if let Some(userlist) = settings.userlist.clone() {
        summary.userlists.insert(userlist.name.clone());
        let name = userlist.name.clone();
        if ctx.txn.userlist_replace(userlist) {
            ctx.haproxy.request_reload(format!("userlist {name} updated"));
        }
    }
    if let Some(table) = &settings.rate_limit {
        let backend = Backend {
            stick_table: Some(table.stick_table.clone()),
            ..Backend::new(&table.name, Mode::Http)
        };
        if let Err(e) = ctx.haproxy.sync_backend_section(ctx.txn, backend, Vec::new()) {
            ctx.errors.add(e);
        }
    }

    let mut rule_ids: Vec<RuleId> = Vec::new();
    for rule in &settings.rules {
        for frontend in [HTTP_FRONTEND, HTTPS_FRONTEND] {
            ctx.haproxy.rules.add(frontend, rule.clone(), true);
        }
        rule_ids.push(rule.id());
    }
    for rule in &settings.http_rules {
        rule_ids.push(ctx.haproxy.rules.add(HTTP_FRONTEND, rule.clone(), true));
    }

    for tls in &ingress.tls {
        if settings.ssl_passthrough {
            break;
        }
        add_certificate(ctx, &ns.name, &tls.secret_name).await;
    }

    let mut paths: Vec<(&str, &IngressPath)> = Vec::new();
    if let Some(default) = &ingress.default_backend {
        paths.push(("", default));
    }
    for rule in &ingress.rules {
        for path in &rule.paths {
            paths.push((rule.host.as_str(), path));
        }
    }

    for (host, path) in paths {
        let Some(backend) = sync_path_backend(ctx, ns, ingress, path, settings.ssl_passthrough) else {
            continue;
        };
        let mut route = Route {
            host: host.to_string(),
            path: path.path.clone(),
            path_type: path.path_type,
            backend,
            rule_ids: rule_ids.clone(),
            ssl_passthrough: settings.ssl_passthrough,
        };
        if route.path.is_empty() && !route.ssl_passthrough {
            route.path = "/".to_string();
            route.path_type = PathType::Prefix;
        }
        if let Some(acl) = &settings.route_acl
            && !route.ssl_passthrough
        {
            ctx.haproxy.custom_routes.add(&mut ctx.haproxy.maps, &route, acl);
        } else if let Err(e) = add_route(&mut ctx.haproxy.maps, &route) {
            ctx.errors.add(e);
            continue;
        }
        summary.ssl_passthrough |= route.ssl_passthrough;
        summary.routes += 1;
    }
}

/// Writes the certificate of `secret`, either `name` in the ingress
/// namespace or `ns/name`.
pub(super) async fn add_certificate(ctx: &mut SyncContext<'_>, namespace: &str, secret: &str) {
    let Some((ns, name)) = ctx.errors.collect(split_ns_name(secret, namespace)) else {
        return;
    };
    let Some(secret) = ctx.store.secret(ns, name) else {
        ctx.errors.add(ControllerError::NotFound(format!("secret {ns}/{name}")));
        return;
    };
    let haproxy = &mut *ctx.haproxy;
    if let Err(e) = haproxy.certs.add_secret(secret, &haproxy.writer).await {
        ctx.errors.add(e);
    }
}

/// Syncs the backend of one ingress path. Returns its name.
fn sync_path_backend(
    ctx: &mut SyncContext<'_>,
    ns: &Namespace,
    ingress: &Ingress,
    path: &IngressPath,
    tcp: bool,
) -> Option<String> {
    let Some(service) = ns.service(&path.service) else {
        ctx.errors.add(ControllerError::NotFound(format!(
            "service {}/{} of ingress {}",
            ns.name, path.service, ingress.name
        )));
        return None;
    };
    let Some(service_port) = service.port(&path.port) else {
        ctx.errors.add(ControllerError::NotFound(format!(
            "port {} of service {}/{}",
            path.port, ns.name, service.name
        )));
        return None;
    };

    let port_label = if service_port.name.is_empty() {
        service_port.port.to_string()
    } else {
        service_port.name.clone()
    };
    let ann = Annotations::new(Some(&ingress.annotations), Some(&service.annotations), ctx.configmap);
    // invalid values are reported by backend::parse
    let standalone = ann.bool("standalone-backend").ok().flatten().unwrap_or(false);
    let name = if standalone {
        backend_name(&ns.name, &format!("{}_{}", ingress.name, service.name), &port_label)
    } else {
        backend_name(&ns.name, &service.name, &port_label)
    };
    if ctx.haproxy.is_backend_active(&name) {
        return Some(name);
    }

    let mode = if tcp { Mode::Tcp } else { Mode::Http };
    let mut settings = backend::parse(
        &ann,
        &name,
        mode,
        ctx.store.replicas(),
        ctx.config.disable_config_snippets.backend,
        ctx.errors,
    );
    if let Some(spec) = lookup_backend(ctx.store, settings.cr_backend.as_ref(), ctx.errors)
        && let Some(config) = &spec.config
    {
        apply_backend(&mut settings.backend, config, ctx.errors);
    }

    let (addresses, port) = service_addresses(ns, service, service_port);
    debug!(backend = %name, servers = addresses.len(), "syncing backend");
    if let Err(e) = ctx.haproxy.sync_backend(ctx.txn, &settings, &addresses, port) {
        ctx.errors.add(e);
        return None;
    }
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::events::{EventData, SyncDataEvent};
    use crate::store::{IngressClass, NamespaceFilter};
    use crate::test_utils;

    fn config() -> ControllerConfig {
        ControllerConfig::from_lookup(|_| None).unwrap()
    }

    fn ingress(class: Option<&str>) -> Ingress {
        Ingress {
            namespace: "ns".to_string(),
            name: "web".to_string(),
            class_name: class.map(ToString::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_class_by_name_and_annotation() {
        let store = K8sStore::new(NamespaceFilter::default());
        let config = config();
        assert!(class_matches(&config, &store, &ingress(Some("haproxy"))));
        assert!(!class_matches(&config, &store, &ingress(Some("nginx"))));
        assert!(!class_matches(&config, &store, &ingress(None)));

        let legacy = test_utils::with_annotation(ingress(None), "ingress.class", "haproxy");
        assert!(class_matches(&config, &store, &legacy));
        let mut kubernetes = ingress(None);
        kubernetes
            .annotations
            .insert(LEGACY_CLASS_ANNOTATION.to_string(), "haproxy".to_string());
        assert!(class_matches(&config, &store, &kubernetes));
    }

    #[test]
    fn test_class_resolved_through_ingress_class() {
        let mut store = K8sStore::new(NamespaceFilter::default());
        store.event_process(&SyncDataEvent::new(
            "",
            "public",
            EventData::IngressClass(IngressClass {
                name: "public".to_string(),
                controller: "haproxy.org/ingress-controller".to_string(),
            }),
        ));
        store.event_process(&SyncDataEvent::new(
            "",
            "haproxy",
            EventData::IngressClass(IngressClass {
                name: "haproxy".to_string(),
                controller: "example.com/other".to_string(),
            }),
        ));
        let config = config();
        assert!(class_matches(&config, &store, &ingress(Some("public"))));
        assert!(!class_matches(&config, &store, &ingress(Some("haproxy"))));
    }

    #[test]
    fn test_empty_class_served_when_enabled() {
        let store = K8sStore::new(NamespaceFilter::default());
        let config = ControllerConfig::from_lookup(|name| (name == "EMPTY_INGRESS_CLASS").then(|| "true".to_string()))
            .unwrap();
        assert!(class_matches(&config, &store, &ingress(None)));
    }
}
