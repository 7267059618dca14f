//! Gateway API TCP routing.
//!
//! Every TCP (or TLS passthrough) listener of a gateway whose class names
//! this controller becomes a TCP frontend. TCPRoutes attach to listeners
//! through their parent references; per listener the oldest attached route
//! wins and its backend becomes the frontend `default_backend`.

use super::{service_addresses, SyncContext};
use crate::annotations::{backend, Annotations};
use crate::config::ControllerConfig;
use crate::haproxy::base;
use crate::status::{condition, GatewayStatusUpdate, RouteStatusUpdate, StatusSnapshot};
use crate::store::{Gateway, K8sStore, Namespace, PortRef, Service, ServicePort, TcpRoute};
use crate::utils::backend_name;
use crds::{
    FromNamespaces, GatewayStatus, Listener, ListenerStatus, ParentReference, RouteGroupKind, RouteParentStatus,
    TCPRouteStatus, GATEWAY_API_GROUP,
};
use haproxy_client::{Frontend, Mode};
use std::collections::BTreeSet;
use tracing::{debug, warn};

const ROUTE_KIND: &str = "TCPRoute";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Problem {
    reason: &'static str,
    message: String,
}

impl Problem {
    fn new(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

#[derive(Debug)]
struct ListenerPlan<'s> {
    gateway: &'s Gateway,
    listener: &'s Listener,
    frontend: String,
    port: u16,
    passthrough: bool,
    problem: Option<Problem>,
    /// Indexes into `GatewayPlan::routes`, oldest first
    candidates: Vec<usize>,
    winner: Option<usize>,
}

#[derive(Debug)]
struct ResolvedBackend<'s> {
    namespace: &'s Namespace,
    service: &'s Service,
    port: &'s ServicePort,
    name: String,
}

#[derive(Debug)]
struct ParentPlan {
    parent_ref: ParentReference,
    /// Indexes into `GatewayPlan::listeners`
    listeners: Vec<usize>,
    problem: Option<Problem>,
}

#[derive(Debug)]
struct RoutePlan<'s> {
    route: &'s TcpRoute,
    backend: Result<ResolvedBackend<'s>, Problem>,
    parents: Vec<ParentPlan>,
}

/// Listener and route graph of one sync.
#[derive(Debug, Default)]
struct GatewayPlan<'s> {
    gateways: Vec<&'s Gateway>,
    listeners: Vec<ListenerPlan<'s>>,
    routes: Vec<RoutePlan<'s>>,
}

/// Adds the gateway frontends and route backends to the transaction and
/// returns the statuses to publish.
pub(super) fn sync_gateways(ctx: &mut SyncContext<'_>) -> StatusSnapshot {
    let store = ctx.store;
    let plan = plan(ctx.config, store);

    for route in &plan.routes {
        if let Ok(resolved) = &route.backend {
            sync_route_backend(ctx, resolved);
        }
    }

    for listener in plan.listeners.iter().filter(|l| l.problem.is_none()) {
        let default_backend = listener
            .winner
            .and_then(|winner| plan.routes[winner].backend.as_ref().ok())
            .map(|resolved| resolved.name.clone());
        let frontend = Frontend {
            default_backend,
            options: vec!["tcplog".to_string()],
            ..Frontend::new(&listener.frontend, Mode::Tcp)
        };
        if let Err(e) = ctx
            .haproxy
            .sync_frontend(ctx.txn, frontend, base::binds(ctx.config, listener.port, &[]))
        {
            ctx.errors.add(e);
            continue;
        }
        if listener.passthrough {
            for rule in base::ssl_rules() {
                ctx.haproxy.rules.add(&listener.frontend, rule, false);
            }
        }
    }
    snapshot(ctx.config, &plan)
}

fn sync_route_backend(ctx: &mut SyncContext<'_>, resolved: &ResolvedBackend<'_>) {
    let ann = Annotations::new(None, Some(&resolved.service.annotations), ctx.configmap);
    let settings = backend::parse(
        &ann,
        &resolved.name,
        Mode::Tcp,
        ctx.store.replicas(),
        ctx.config.disable_config_snippets.backend,
        ctx.errors,
    );
    let (addresses, port) = service_addresses(resolved.namespace, resolved.service, resolved.port);
    debug!(backend = %resolved.name, servers = addresses.len(), "syncing tcproute backend");
    if let Err(e) = ctx.haproxy.sync_backend(ctx.txn, &settings, &addresses, port) {
        ctx.errors.add(e);
    }
}

fn plan<'s>(config: &ControllerConfig, store: &'s K8sStore) -> GatewayPlan<'s> {
    let classes: BTreeSet<&str> = store
        .gateway_classes
        .values()
        .filter(|c| !c.is_deleted() && c.data.controller_name == config.gateway_controller_name)
        .map(|c| c.data.name.as_str())
        .collect();

    let mut plan = GatewayPlan::default();
    let mut ports: BTreeSet<u16> = [
        config.http_bind_port,
        config.https_bind_port,
        config.healthz_bind_port,
        config.stats_bind_port,
    ]
    .into_iter()
    .collect();

    for ns in store.namespaces.values().filter(|ns| ns.relevant) {
        for gateway in ns.gateways.values().filter(|g| !g.is_deleted()).map(|g| &g.data) {
            if !classes.contains(gateway.spec.gateway_class_name.as_str()) {
                continue;
            }
            plan.gateways.push(gateway);
            for listener in &gateway.spec.listeners {
                plan.listeners.push(plan_listener(gateway, listener, &mut ports));
            }
        }
    }

    let mut routes: Vec<&TcpRoute> = store
        .namespaces
        .values()
        .filter(|ns| ns.relevant)
        .flat_map(|ns| ns.tcp_routes.values())
        .filter(|r| !r.is_deleted())
        .map(|r| &r.data)
        .collect();
    routes.sort_by(|a, b| route_order(a).cmp(&route_order(b)));

    for route in routes {
        let parents = route
            .spec
            .parent_refs
            .iter()
            .filter_map(|parent| attach(&plan, store, route, parent))
            .collect::<Vec<_>>();
        if parents.is_empty() {
            continue;
        }
        let index = plan.routes.len();
        let backend = resolve_backend(store, route);
        if backend.is_ok() {
            for listener in parents.iter().flat_map(|p| p.listeners.iter()) {
                plan.listeners[*listener].candidates.push(index);
            }
        }
        plan.routes.push(RoutePlan { route, backend, parents });
    }

    for listener in &mut plan.listeners {
        listener.winner = elect(&plan.routes, &listener.candidates);
    }
    plan
}

fn plan_listener<'s>(gateway: &'s Gateway, listener: &'s Listener, ports: &mut BTreeSet<u16>) -> ListenerPlan<'s> {
    let mut plan = ListenerPlan {
        gateway,
        listener,
        frontend: format!("{}_{}_{}", gateway.namespace, gateway.name, listener.name),
        port: 0,
        passthrough: false,
        problem: None,
        candidates: Vec::new(),
        winner: None,
    };
    let tls_mode = listener.tls.as_ref().and_then(|tls| tls.mode.as_deref());
    match listener.protocol.as_str() {
        "TCP" => {}
        "TLS" if tls_mode == Some("Passthrough") => plan.passthrough = true,
        "TLS" => {
            plan.problem = Some(Problem::new("UnsupportedProtocol", "only TLS passthrough is supported"));
            return plan;
        }
        other => {
            plan.problem = Some(Problem::new("UnsupportedProtocol", format!("protocol {other} is not supported")));
            return plan;
        }
    }
    match u16::try_from(listener.port) {
        Ok(port) if port > 0 && ports.insert(port) => plan.port = port,
        Ok(port) if port > 0 => {
            plan.problem = Some(Problem::new("PortUnavailable", format!("port {port} is already in use")));
        }
        _ => {
            plan.problem = Some(Problem::new("PortUnavailable", format!("invalid port {}", listener.port)));
        }
    }
    plan
}

fn route_order(route: &TcpRoute) -> (chrono::DateTime<chrono::Utc>, &str) {
    (route.creation_timestamp, &route.name)
}

/// Oldest candidate, ties broken by name. Candidates are in store order, so
/// equal keys across namespaces keep the first namespace.
fn elect(routes: &[RoutePlan<'_>], candidates: &[usize]) -> Option<usize> {
    candidates
        .iter()
        .copied()
        .min_by(|a, b| route_order(routes[*a].route).cmp(&route_order(routes[*b].route)))
}

/// Listeners `parent` selects. `None` when the parent is not a gateway
/// served by this controller.
fn attach(plan: &GatewayPlan<'_>, store: &K8sStore, route: &TcpRoute, parent: &ParentReference) -> Option<ParentPlan> {
    let group = parent.group.as_deref().unwrap_or(GATEWAY_API_GROUP);
    let kind = parent.kind.as_deref().unwrap_or("Gateway");
    if group != GATEWAY_API_GROUP || kind != "Gateway" {
        return None;
    }
    let namespace = parent.namespace.as_deref().unwrap_or(&route.namespace);
    plan.gateways
        .iter()
        .find(|g| g.namespace == namespace && g.name == parent.name)?;

    let mut parent_plan = ParentPlan {
        parent_ref: parent.clone(),
        listeners: Vec::new(),
        problem: None,
    };
    let selected: Vec<usize> = plan
        .listeners
        .iter()
        .enumerate()
        .filter(|(_, l)| l.gateway.namespace == namespace && l.gateway.name == parent.name)
        .filter(|(_, l)| parent.section_name.as_ref().is_none_or(|s| *s == l.listener.name))
        .filter(|(_, l)| parent.port.is_none_or(|p| p == l.listener.port))
        .map(|(i, _)| i)
        .collect();
    if selected.is_empty() {
        parent_plan.problem = Some(Problem::new("NoMatchingParent", "no listener matches the parent reference"));
        return Some(parent_plan);
    }

    let route_labels = store.namespace(&route.namespace).map(|ns| &ns.labels);
    parent_plan.listeners = selected
        .into_iter()
        .filter(|i| {
            let listener = &plan.listeners[*i];
            listener.problem.is_none()
                && kind_allowed(listener.listener)
                && namespace_allowed(listener, &route.namespace, route_labels)
        })
        .collect();
    if parent_plan.listeners.is_empty() {
        parent_plan.problem = Some(Problem::new("NotAllowedByListeners", "listeners do not accept this route"));
    }
    Some(parent_plan)
}

fn kind_allowed(listener: &Listener) -> bool {
    let kinds: &[RouteGroupKind] = listener
        .allowed_routes
        .as_ref()
        .map(|a| a.kinds.as_slice())
        .unwrap_or_default();
    kinds.is_empty()
        || kinds
            .iter()
            .any(|k| k.kind == ROUTE_KIND && k.group.as_deref().is_none_or(|g| g == GATEWAY_API_GROUP))
}

fn namespace_allowed(
    listener: &ListenerPlan<'_>,
    route_namespace: &str,
    labels: Option<&std::collections::BTreeMap<String, String>>,
) -> bool {
    let namespaces = listener
        .listener
        .allowed_routes
        .as_ref()
        .and_then(|a| a.namespaces.as_ref());
    let from = namespaces.map(|n| n.from).unwrap_or_default();
    match from {
        FromNamespaces::All => true,
        FromNamespaces::Same => listener.gateway.namespace == route_namespace,
        FromNamespaces::Selector => {
            let selector = namespaces.and_then(|n| n.selector.as_ref());
            match (selector, labels) {
                (Some(selector), Some(labels)) => selector.matches(labels),
                _ => false,
            }
        }
    }
}

/// First backend reference of the route. Additional references are not
/// load balanced.
fn resolve_backend<'s>(store: &'s K8sStore, route: &TcpRoute) -> Result<ResolvedBackend<'s>, Problem> {
    let mut refs = route.spec.rules.iter().flat_map(|r| r.backend_refs.iter());
    let Some(backend_ref) = refs.next() else {
        return Err(Problem::new("BackendNotFound", "route has no backend reference"));
    };
    if refs.next().is_some() {
        warn!(route = %format!("{}/{}", route.namespace, route.name), "only the first backendRef is used");
    }

    let group = backend_ref.group.as_deref().unwrap_or_default();
    let kind = backend_ref.kind.as_deref().unwrap_or("Service");
    if !group.is_empty() || kind != "Service" {
        return Err(Problem::new("InvalidKind", format!("backend kind {kind} is not supported")));
    }
    let namespace = backend_ref.namespace.as_deref().unwrap_or(&route.namespace);
    if namespace != route.namespace {
        let granted = store.namespace(namespace).is_some_and(|ns| {
            ns.reference_grants.values().filter(|g| !g.is_deleted()).any(|g| {
                g.data
                    .spec
                    .allows(GATEWAY_API_GROUP, ROUTE_KIND, &route.namespace, "", "Service", &backend_ref.name)
            })
        });
        if !granted {
            return Err(Problem::new(
                "RefNotPermitted",
                format!("no ReferenceGrant allows service {namespace}/{}", backend_ref.name),
            ));
        }
    }

    let not_found = || Problem::new("BackendNotFound", format!("service {namespace}/{} not found", backend_ref.name));
    let ns = store.namespace(namespace).ok_or_else(not_found)?;
    let service = ns.service(&backend_ref.name).ok_or_else(not_found)?;
    let Some(port) = backend_ref.port else {
        return Err(Problem::new("BackendNotFound", "backend reference has no port"));
    };
    let service_port = service.port(&PortRef::Number(port)).ok_or_else(|| {
        Problem::new(
            "BackendNotFound",
            format!("service {namespace}/{} has no port {port}", backend_ref.name),
        )
    })?;
    Ok(ResolvedBackend {
        namespace: ns,
        service,
        port: service_port,
        name: backend_name(&route.namespace, &route.name, "tcproute"),
    })
}

fn snapshot(config: &ControllerConfig, plan: &GatewayPlan<'_>) -> StatusSnapshot {
    let mut snapshot = StatusSnapshot::default();

    for gateway in &plan.gateways {
        let generation = gateway.generation;
        let listeners: Vec<ListenerStatus> = plan
            .listeners
            .iter()
            .filter(|l| std::ptr::eq(l.gateway, *gateway))
            .map(|l| listener_status(l, generation))
            .collect();
        let programmed = listeners
            .iter()
            .all(|l| l.conditions.iter().all(|c| c.status == "True"));
        snapshot.gateways.push(GatewayStatusUpdate {
            namespace: gateway.namespace.clone(),
            name: gateway.name.clone(),
            status: GatewayStatus {
                conditions: vec![
                    condition("Accepted", true, "Accepted", "", generation),
                    if programmed {
                        condition("Programmed", true, "Programmed", "", generation)
                    } else {
                        condition("Programmed", false, "Invalid", "some listeners are invalid", generation)
                    },
                ],
                listeners,
            },
        });
    }

    for (index, route) in plan.routes.iter().enumerate() {
        let generation = route.route.generation;
        let resolved = match &route.backend {
            Ok(_) => condition("ResolvedRefs", true, "ResolvedRefs", "", generation),
            Err(problem) => condition("ResolvedRefs", false, problem.reason, problem.message.clone(), generation),
        };
        let parents = route
            .parents
            .iter()
            .map(|parent| {
                let accepted = match &parent.problem {
                    Some(problem) => condition("Accepted", false, problem.reason, problem.message.clone(), generation),
                    None if route.backend.is_err() => condition("Accepted", true, "Accepted", "", generation),
                    None if parent.listeners.iter().any(|l| plan.listeners[*l].winner == Some(index)) => {
                        condition("Accepted", true, "Accepted", "", generation)
                    }
                    None => condition(
                        "Accepted",
                        false,
                        "NotAllowedByListeners",
                        "listener is bound to an older route",
                        generation,
                    ),
                };
                RouteParentStatus {
                    parent_ref: parent.parent_ref.clone(),
                    controller_name: config.gateway_controller_name.clone(),
                    conditions: vec![accepted, resolved.clone()],
                }
            })
            .collect();
        snapshot.routes.push(RouteStatusUpdate {
            namespace: route.route.namespace.clone(),
            name: route.route.name.clone(),
            status: TCPRouteStatus { parents },
        });
    }
    snapshot
}

fn listener_status(listener: &ListenerPlan<'_>, generation: Option<i64>) -> ListenerStatus {
    let conditions = match &listener.problem {
        Some(problem) => vec![
            condition("Accepted", false, problem.reason, problem.message.clone(), generation),
            condition("Programmed", false, "Invalid", problem.message.clone(), generation),
        ],
        None => vec![
            condition("Accepted", true, "Accepted", "", generation),
            condition("Programmed", true, "Programmed", "", generation),
        ],
    };
    ListenerStatus {
        name: listener.listener.name.clone(),
        supported_kinds: vec![RouteGroupKind {
            group: Some(GATEWAY_API_GROUP.to_string()),
            kind: ROUTE_KIND.to_string(),
        }],
        attached_routes: i32::from(listener.winner.is_some()),
        conditions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::events::{EventData, SyncDataEvent};
    use crate::store::{GatewayClass, NamespaceFilter, ReferenceGrant};
    use crate::test_utils;
    use chrono::{TimeZone, Utc};
    use crds::{
        AllowedRoutes, BackendRef, GatewaySpec, GatewayTLSConfig, ReferenceGrantFrom, ReferenceGrantSpec,
        ReferenceGrantTo, RouteNamespaces, TCPRouteRule, TCPRouteSpec,
    };

    fn config() -> ControllerConfig {
        ControllerConfig::from_lookup(|_| None).unwrap()
    }

    fn listener(name: &str, port: i32, protocol: &str) -> Listener {
        Listener {
            name: name.to_string(),
            port,
            protocol: protocol.to_string(),
            ..Default::default()
        }
    }

    fn store_with_gateway(listeners: Vec<Listener>) -> K8sStore {
        let config = config();
        let mut store = K8sStore::new(NamespaceFilter::default());
        store.event_process(&SyncDataEvent::new(
            "",
            "haproxy",
            EventData::GatewayClass(GatewayClass {
                name: "haproxy".to_string(),
                controller_name: config.gateway_controller_name.clone(),
            }),
        ));
        store.event_process(&SyncDataEvent::new(
            "infra",
            "gw",
            EventData::Gateway(Gateway {
                namespace: "infra".to_string(),
                name: "gw".to_string(),
                generation: Some(2),
                spec: GatewaySpec {
                    gateway_class_name: "haproxy".to_string(),
                    listeners,
                },
            }),
        ));
        store.event_process(&test_utils::service("infra", "pg", "db", 5432));
        store
    }

    fn route(ns: &str, name: &str, created: i64, service: &str, port: i32) -> SyncDataEvent {
        SyncDataEvent::new(
            ns,
            name,
            EventData::TcpRoute(TcpRoute {
                namespace: ns.to_string(),
                name: name.to_string(),
                generation: Some(1),
                creation_timestamp: Utc.timestamp_opt(created, 0).unwrap(),
                spec: TCPRouteSpec {
                    parent_refs: vec![ParentReference {
                        namespace: Some("infra".to_string()),
                        name: "gw".to_string(),
                        ..Default::default()
                    }],
                    rules: vec![TCPRouteRule {
                        backend_refs: vec![BackendRef {
                            name: service.to_string(),
                            port: Some(port),
                            ..Default::default()
                        }],
                    }],
                },
            }),
        )
    }

    #[test]
    fn test_oldest_route_wins_listener() {
        let mut store = store_with_gateway(vec![listener("db", 5432, "TCP")]);
        store.event_process(&route("infra", "b-route", 100, "pg", 5432));
        store.event_process(&route("infra", "a-route", 100, "pg", 5432));
        store.event_process(&route("infra", "young", 50, "pg", 5432));
        store.event_process(&route("infra", "old", 10, "pg", 5432));

        let config = config();
        let plan = plan(&config, &store);
        assert_eq!(plan.listeners.len(), 1);
        let winner = plan.listeners[0].winner.unwrap();
        assert_eq!(plan.routes[winner].route.name, "old");

        let snapshot = snapshot(&config, &plan);
        assert_eq!(snapshot.gateways[0].status.listeners[0].attached_routes, 1);
        let accepted: Vec<(&str, &str)> = snapshot
            .routes
            .iter()
            .map(|r| (r.name.as_str(), r.status.parents[0].conditions[0].status.as_str()))
            .collect();
        assert_eq!(
            accepted,
            vec![("old", "True"), ("young", "False"), ("a-route", "False"), ("b-route", "False")]
        );
    }

    #[test]
    fn test_same_timestamp_broken_by_name() {
        let mut store = store_with_gateway(vec![listener("db", 5432, "TCP")]);
        store.event_process(&route("infra", "b-route", 100, "pg", 5432));
        store.event_process(&route("infra", "a-route", 100, "pg", 5432));
        let plan = plan(&config(), &store);
        let winner = plan.listeners[0].winner.unwrap();
        assert_eq!(plan.routes[winner].route.name, "a-route");
    }

    #[test]
    fn test_same_timestamp_ignores_namespace() {
        let mut open = listener("db", 5432, "TCP");
        open.allowed_routes = Some(AllowedRoutes {
            namespaces: Some(RouteNamespaces {
                from: FromNamespaces::All,
                selector: None,
            }),
            kinds: Vec::new(),
        });
        let mut store = store_with_gateway(vec![open]);
        store.event_process(&test_utils::service("zone", "pg", "db", 5432));
        store.event_process(&route("infra", "b-route", 100, "pg", 5432));
        store.event_process(&route("zone", "a-route", 100, "pg", 5432));

        let plan = plan(&config(), &store);
        let winner = plan.listeners[0].winner.unwrap();
        assert_eq!(plan.routes[winner].route.namespace, "zone");
        assert_eq!(plan.routes[winner].backend.as_ref().unwrap().name, "zone_a-route_tcproute");
    }

    #[test]
    fn test_listener_validation() {
        let mut tls = listener("tls", 6443, "TLS");
        tls.tls = Some(GatewayTLSConfig {
            mode: Some("Passthrough".to_string()),
        });
        let store = store_with_gateway(vec![
            listener("db", 5432, "TCP"),
            listener("dup", 5432, "TCP"),
            listener("web", 80, "HTTP"),
            listener("http-port", 8080, "TCP"),
            tls,
        ]);
        let plan = plan(&config(), &store);
        let reasons: Vec<Option<&str>> = plan.listeners.iter().map(|l| l.problem.as_ref().map(|p| p.reason)).collect();
        assert_eq!(
            reasons,
            vec![None, Some("PortUnavailable"), Some("UnsupportedProtocol"), Some("PortUnavailable"), None]
        );
        assert!(plan.listeners[4].passthrough);
        assert_eq!(plan.listeners[0].frontend, "infra_gw_db");

        let snapshot = snapshot(&config(), &plan);
        let programmed = &snapshot.gateways[0].status.conditions[1];
        assert_eq!(programmed.status, "False");
    }

    #[test]
    fn test_cross_namespace_routes_need_permission() {
        let mut store = store_with_gateway(vec![listener("db", 5432, "TCP")]);
        store.event_process(&route("apps", "pg", 10, "pg", 5432));

        // listener only accepts routes from its own namespace
        let plan_same = plan(&config(), &store);
        let parent = &plan_same.routes[0].parents[0];
        assert_eq!(parent.problem.as_ref().unwrap().reason, "NotAllowedByListeners");

        let mut open = listener("db", 5432, "TCP");
        open.allowed_routes = Some(AllowedRoutes {
            namespaces: Some(RouteNamespaces {
                from: FromNamespaces::All,
                selector: None,
            }),
            kinds: Vec::new(),
        });
        let mut store = store_with_gateway(vec![open]);
        let mut cross = route("apps", "pg", 10, "pg", 5432);
        if let EventData::TcpRoute(route) = &mut cross.data {
            route.spec.rules[0].backend_refs[0].namespace = Some("infra".to_string());
        }
        store.event_process(&cross);

        let denied = plan(&config(), &store);
        assert_eq!(denied.routes[0].backend.as_ref().unwrap_err().reason, "RefNotPermitted");
        assert!(denied.listeners[0].winner.is_none());

        store.event_process(&SyncDataEvent::new(
            "infra",
            "allow-apps",
            EventData::ReferenceGrant(ReferenceGrant {
                namespace: "infra".to_string(),
                name: "allow-apps".to_string(),
                spec: ReferenceGrantSpec {
                    from: vec![ReferenceGrantFrom {
                        group: GATEWAY_API_GROUP.to_string(),
                        kind: ROUTE_KIND.to_string(),
                        namespace: "apps".to_string(),
                    }],
                    to: vec![ReferenceGrantTo {
                        group: String::new(),
                        kind: "Service".to_string(),
                        name: None,
                    }],
                },
            }),
        ));
        let granted = plan(&config(), &store);
        let winner = granted.listeners[0].winner.unwrap();
        assert_eq!(granted.routes[winner].backend.as_ref().unwrap().name, "apps_pg_tcproute");
    }

    #[test]
    fn test_section_name_must_match_listener() {
        let mut store = store_with_gateway(vec![listener("db", 5432, "TCP")]);
        let mut event = route("infra", "pg", 10, "pg", 5432);
        if let EventData::TcpRoute(route) = &mut event.data {
            route.spec.parent_refs[0].section_name = Some("redis".to_string());
        }
        store.event_process(&event);
        let plan = plan(&config(), &store);
        assert_eq!(plan.routes[0].parents[0].problem.as_ref().unwrap().reason, "NoMatchingParent");
    }

    #[test]
    fn test_unmanaged_class_ignored() {
        let mut store = store_with_gateway(vec![listener("db", 5432, "TCP")]);
        store.event_process(&SyncDataEvent::new(
            "",
            "haproxy",
            EventData::GatewayClass(GatewayClass {
                name: "haproxy".to_string(),
                controller_name: "example.com/other".to_string(),
            }),
        ));
        store.event_process(&route("infra", "pg", 10, "pg", 5432));
        let plan = plan(&config(), &store);
        assert!(plan.gateways.is_empty());
        assert!(plan.routes.is_empty());
    }
}
