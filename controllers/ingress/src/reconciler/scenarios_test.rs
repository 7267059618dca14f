//! End-to-end syncs against the in-memory HAProxy client.

use super::*;
use crate::maps;
use crate::store::events::EventData;
use crate::store::{Gateway, GatewayClass, PathType, TcpRoute};
use crate::test_utils::{self, RecordingProcess};
use crate::watcher::convert::dedup_ingress;
use chrono::{TimeZone, Utc};
use crds::{BackendRef, GatewaySpec, Listener, ParentReference, TCPRouteRule, TCPRouteSpec};
use haproxy_client::MockRuntimeClient;
use tempfile::TempDir;

struct Harness {
    reconciler: Reconciler,
    tx: mpsc::Sender<SyncDataEvent>,
    runtime: Arc<MockRuntimeClient>,
    process: Arc<RecordingProcess>,
    dir: TempDir,
}

impl Harness {
    async fn new(env: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_utils::config_with(dir.path(), env));
        let runtime = Arc::new(MockRuntimeClient::new());
        let process = Arc::new(RecordingProcess::default());
        let mut haproxy = HAProxy::new(&config, runtime.clone(), process.clone());
        haproxy.init().await.unwrap();
        let (tx, rx) = mpsc::channel(64);
        let reconciler = Reconciler::new(config, haproxy, rx, Arc::new(ProcessedVersions::new()));
        Self {
            reconciler,
            tx,
            runtime,
            process,
            dir,
        }
    }

    async fn apply(&mut self, events: Vec<SyncDataEvent>) -> Option<CommitOutcome> {
        for event in events {
            self.tx.send(event).await.unwrap();
        }
        self.reconciler.sync().await.unwrap()
    }

    fn map(&self, name: &str) -> String {
        self.reconciler.haproxy().maps.content(name)
    }

    fn configuration(&self) -> &haproxy_client::Configuration {
        self.reconciler.haproxy().configuration()
    }

    /// Makes the next configuration commits fail until the returned path
    /// is removed.
    fn block_commits(&self) -> std::path::PathBuf {
        let blocker = self.dir.path().join("etc/.haproxy.cfg.tmp");
        std::fs::create_dir_all(&blocker).unwrap();
        blocker
    }

    fn http_request_rules(&self) -> Vec<String> {
        self.configuration().frontends[base::HTTP_FRONTEND]
            .rules
            .http_request_rules
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

fn app(port: i32, addresses: &[&str]) -> Vec<SyncDataEvent> {
    vec![
        test_utils::service("ns", "app", "http", 80),
        test_utils::endpoints("ns", "app", "http", port, addresses),
    ]
}

fn exact_ingress() -> SyncDataEvent {
    test_utils::ingress_event(test_utils::ingress("ns", "web", "a.example", "/foo", PathType::Exact, "app", "http"))
}

#[tokio::test]
async fn test_exact_path_route() {
    let mut h = Harness::new(&[]).await;
    let mut events = app(8080, &["10.0.0.5"]);
    events.push(exact_ingress());

    let outcome = h.apply(events).await.unwrap();
    assert!(outcome.reloaded);
    assert!(h.reconciler.last_errors().is_empty());
    assert_eq!(h.map(maps::PATH_EXACT), "a.example/foo\t\t\tns_app_http\n");
    assert_eq!(h.map(maps::HOST), "a.example\t\t\ta.example\n");
    let backend = &h.configuration().backends["ns_app_http"];
    assert_eq!(backend.servers[0].address, "10.0.0.5");
    assert_eq!(h.process.reloads(), 1);

    // identical input: nothing to do
    assert!(h.apply(vec![exact_ingress()]).await.is_none());
    assert_eq!(h.process.reloads(), 1);
}

#[tokio::test]
async fn test_prefix_path_route() {
    let mut h = Harness::new(&[]).await;
    let mut events = app(8080, &["10.0.0.5"]);
    events.push(test_utils::ingress_event(test_utils::ingress(
        "ns",
        "web",
        "a.example",
        "/foo",
        PathType::Prefix,
        "app",
        "http",
    )));
    h.apply(events).await.unwrap();
    assert_eq!(h.map(maps::PATH_EXACT), "a.example/foo\t\t\tns_app_http\n");
    assert_eq!(h.map(maps::PATH_PREFIX), "a.example/foo/\t\t\tns_app_http\n");
}

#[tokio::test]
async fn test_endpoint_change_goes_through_runtime() {
    let mut h = Harness::new(&[]).await;
    let mut events = app(8080, &["10.0.0.5"]);
    events.push(exact_ingress());
    h.apply(events).await.unwrap();

    let outcome = h
        .apply(vec![test_utils::endpoints("ns", "app", "http", 8080, &["10.0.0.6"])])
        .await
        .unwrap();
    assert!(!outcome.reloaded);
    assert_eq!(outcome.runtime_ops, 2);
    assert_eq!(
        h.runtime.commands(),
        vec![
            "set server ns_app_http/SRV_1 addr 10.0.0.6 port 8080",
            "set server ns_app_http/SRV_1 state ready",
        ]
    );
    assert_eq!(h.process.reloads(), 1);
}

#[tokio::test]
async fn test_endpoint_change_after_failed_commit_reloads() {
    let mut h = Harness::new(&[]).await;
    let mut events = app(8080, &["10.0.0.5"]);
    events.push(exact_ingress());
    h.apply(events).await.unwrap();

    let blocker = h.block_commits();
    h.tx.send(test_utils::endpoints("ns", "app", "http", 8080, &["10.0.0.6"]))
        .await
        .unwrap();
    assert!(h.reconciler.sync().await.is_err());
    assert_eq!(h.configuration().backends["ns_app_http"].servers[0].address, "10.0.0.5");

    std::fs::remove_dir(&blocker).unwrap();
    let outcome = h.apply(Vec::new()).await.unwrap();
    assert!(outcome.written);
    assert!(outcome.reloaded);
    assert!(outcome.reasons.iter().any(|r| r == "previous configuration not applied"));
    assert_eq!(h.configuration().backends["ns_app_http"].servers[0].address, "10.0.0.6");
    assert!(h.runtime.commands().is_empty());
    assert_eq!(h.process.reloads(), 2);
}

#[tokio::test]
async fn test_rules_rewritten_after_failed_commit() {
    let mut h = Harness::new(&[]).await;
    let mut events = app(8080, &["10.0.0.5"]);
    events.push(exact_ingress());
    h.apply(events).await.unwrap();
    assert!(!h.http_request_rules().iter().any(|r| r.contains("set-header X-Env")));

    let blocker = h.block_commits();
    let ingress = test_utils::with_annotation(
        test_utils::ingress("ns", "web", "a.example", "/foo", PathType::Exact, "app", "http"),
        "request-set-header",
        "X-Env prod",
    );
    h.tx.send(test_utils::ingress_event(ingress)).await.unwrap();
    assert!(h.reconciler.sync().await.is_err());

    std::fs::remove_dir(&blocker).unwrap();
    let outcome = h.apply(Vec::new()).await.unwrap();
    assert!(outcome.reloaded);
    let headers: Vec<String> = h
        .http_request_rules()
        .into_iter()
        .filter(|r| r.contains("set-header X-Env"))
        .collect();
    assert_eq!(headers.len(), 1);
    assert!(headers[0].contains("var(txn.path_match) -m dom"));
}

#[tokio::test]
async fn test_loaded_map_change_goes_through_runtime() {
    let mut h = Harness::new(&[]).await;
    let mut events = app(8080, &["10.0.0.5"]);
    events.push(exact_ingress());
    h.apply(events).await.unwrap();
    let exact = h.reconciler.haproxy().maps.path_str(maps::PATH_EXACT);

    let second = test_utils::ingress("ns", "second", "b.example", "/bar", PathType::Exact, "app", "http");
    let outcome = h.apply(vec![test_utils::ingress_event(second)]).await.unwrap();
    assert!(!outcome.reloaded);
    assert!(h.runtime.commands().contains(&format!("clear map {exact}")));
    assert!(h.runtime.commands().iter().any(|c| c.starts_with(&format!("add map {exact}"))));
    assert_eq!(
        h.runtime.map(&exact).unwrap(),
        vec![
            ("a.example/foo".to_string(), "ns_app_http".to_string()),
            ("b.example/bar".to_string(), "ns_app_http".to_string()),
        ]
    );
    assert_eq!(h.process.reloads(), 1);

    // a failed map push falls back to a reload in the same sync
    h.runtime.fail_on("add map");
    let third = test_utils::ingress("ns", "third", "c.example", "/baz", PathType::Exact, "app", "http");
    let outcome = h.apply(vec![test_utils::ingress_event(third)]).await.unwrap();
    assert!(outcome.reloaded);
    assert!(outcome.reasons.iter().any(|r| r.starts_with("runtime update of map")));
    assert_eq!(h.process.reloads(), 2);
    assert!(h.map(maps::PATH_EXACT).contains("c.example/baz"));
}

#[tokio::test]
async fn test_route_acl_scopes_rules_through_path_match() {
    let mut h = Harness::new(&[]).await;
    let mut ingress = test_utils::ingress("ns", "canary", "a.example", "/api", PathType::Prefix, "app", "http");
    ingress = test_utils::with_annotation(ingress, "route-acl", "{ req.hdr(x-canary) -m found }");
    ingress = test_utils::with_annotation(ingress, "deny-list", "10.1.0.1");
    let mut events = app(8080, &["10.0.0.5"]);
    events.push(test_utils::ingress_event(ingress));
    h.apply(events).await.unwrap();
    assert!(h.reconciler.last_errors().is_empty());

    assert_eq!(h.map(maps::HOST), "a.example\t\t\ta.example\n");
    assert_eq!(h.map(maps::PATH_PREFIX), "");
    let rules = h.http_request_rules();
    let deny = rules.iter().find(|r| r.contains("deny")).unwrap();
    let id = deny
        .split("-m dom ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap()
        .to_string();
    let set_var = rules
        .iter()
        .position(|r| r == &format!(
            "http-request set-var(txn.path_match) str(ns_app_http.{id}) if {{ var(txn.host) -m str a.example }} {{ path_beg /api }} {{ req.hdr(x-canary) -m found }}"
        ))
        .unwrap();
    let deny_at = rules.iter().position(|r| r == deny).unwrap();
    assert!(set_var < deny_at);
    let switching = &h.configuration().frontends[base::HTTP_FRONTEND].backend_switching_rules;
    assert_eq!(switching[0].backend, "ns_app_http");
}

#[tokio::test]
async fn test_port_change_reloads() {
    let mut h = Harness::new(&[]).await;
    let mut events = app(8080, &["10.0.0.5"]);
    events.push(exact_ingress());
    h.apply(events).await.unwrap();

    let outcome = h
        .apply(vec![test_utils::endpoints("ns", "app", "http", 9090, &["10.0.0.5"])])
        .await
        .unwrap();
    assert!(outcome.reloaded);
    assert_eq!(h.process.reloads(), 2);
    let servers = &h.configuration().backends["ns_app_http"].servers;
    assert_eq!(servers[0].port, Some(9090));
}

#[tokio::test]
async fn test_ssl_passthrough_route() {
    let mut h = Harness::new(&[]).await;
    let ingress = test_utils::with_annotation(
        test_utils::ingress("ns", "secure", "s.example", "", PathType::ImplementationSpecific, "app", "https"),
        "ssl-passthrough",
        "true",
    );
    h.apply(vec![
        test_utils::service("ns", "app", "https", 443),
        test_utils::endpoints("ns", "app", "https", 8443, &["10.0.0.7"]),
        test_utils::ingress_event(ingress),
    ])
    .await
    .unwrap();

    assert_eq!(h.map(maps::SNI), "s.example\t\t\tns_app_https\n");
    assert_eq!(h.map(maps::HOST), "");
    let configuration = h.configuration();
    assert_eq!(configuration.backends["ns_app_https"].backend.mode, haproxy_client::Mode::Tcp);
    let ssl = &configuration.frontends[base::SSL_FRONTEND];
    assert_eq!(ssl.frontend.mode, haproxy_client::Mode::Tcp);
    assert_eq!(ssl.binds[0].port, Some(8443));
    assert!(!ssl.rules.tcp_request_rules.is_empty());
    assert_eq!(ssl.backend_switching_rules, vec![map_switching_rule("txn.sni_match")]);
    assert!(configuration.backends.contains_key(base::SSL_BACKEND));
}

#[tokio::test]
async fn test_duplicate_tls_entries_removed_before_store() {
    let mut h = Harness::new(&[]).await;
    let mut ingress = test_utils::ingress("ns", "web", "a.example", "/", PathType::Prefix, "app", "http");
    ingress = test_utils::with_tls(ingress, "web-tls", &["a.example"]);
    ingress = test_utils::with_tls(ingress, "web-tls", &["a.example"]);
    dedup_ingress(&mut ingress);
    assert_eq!(ingress.tls.len(), 1);

    let mut events = app(8080, &["10.0.0.5"]);
    events.push(test_utils::tls_secret("ns", "web-tls"));
    events.push(test_utils::ingress_event(ingress.clone()));
    h.apply(events).await.unwrap();
    assert!(h.reconciler.last_errors().is_empty());
    assert_eq!(h.reconciler.store().namespace("ns").unwrap().ingresses["web"].data.tls.len(), 1);

    assert!(h.apply(vec![test_utils::ingress_event(ingress)]).await.is_none());
    assert_eq!(h.process.reloads(), 1);
}

#[tokio::test]
async fn test_rebuild_of_same_state_is_a_noop() {
    let mut h = Harness::new(&[]).await;
    let mut events = app(8080, &["10.0.0.5", "10.0.0.6"]);
    events.push(exact_ingress());
    h.apply(events).await.unwrap();
    let exact = h.map(maps::PATH_EXACT);
    let prefix = h.map(maps::PATH_PREFIX);

    // a replica joining changes the store but not the configuration
    let outcome = h
        .apply(vec![SyncDataEvent::new("ns", "haproxy-ingress-1", EventData::Pod("haproxy-ingress-1".to_string()))])
        .await
        .unwrap();
    assert_eq!(outcome, CommitOutcome::default());
    assert_eq!(h.map(maps::PATH_EXACT), exact);
    assert_eq!(h.map(maps::PATH_PREFIX), prefix);
    assert_eq!(h.process.reloads(), 1);
}

#[tokio::test]
async fn test_missing_service_reported_others_served() {
    let mut h = Harness::new(&[]).await;
    let mut events = app(8080, &["10.0.0.5"]);
    events.push(exact_ingress());
    events.push(test_utils::ingress_event(test_utils::ingress(
        "ns",
        "broken",
        "b.example",
        "/",
        PathType::Prefix,
        "missing",
        "http",
    )));
    let outcome = h.apply(events).await.unwrap();
    assert!(outcome.reloaded);
    assert_eq!(h.reconciler.last_errors().len(), 1);
    assert!(h.map(maps::PATH_EXACT).contains("ns_app_http"));
    assert!(!h.map(maps::HOST).contains("b.example"));
}

#[tokio::test]
async fn test_deleted_ingress_backend_collected() {
    let mut h = Harness::new(&[]).await;
    let mut events = app(8080, &["10.0.0.5"]);
    events.push(exact_ingress());
    h.apply(events).await.unwrap();

    let outcome = h.apply(vec![exact_ingress().deleted()]).await.unwrap();
    assert!(outcome.reloaded);
    assert!(!h.configuration().backends.contains_key("ns_app_http"));
    assert_eq!(h.map(maps::PATH_EXACT), "");
}

fn gateway_events() -> Vec<SyncDataEvent> {
    vec![
        SyncDataEvent::new(
            "",
            "haproxy",
            EventData::GatewayClass(GatewayClass {
                name: "haproxy".to_string(),
                controller_name: "haproxy.org/gateway-controller".to_string(),
            }),
        ),
        SyncDataEvent::new(
            "infra",
            "gw",
            EventData::Gateway(Gateway {
                namespace: "infra".to_string(),
                name: "gw".to_string(),
                generation: Some(1),
                spec: GatewaySpec {
                    gateway_class_name: "haproxy".to_string(),
                    listeners: vec![Listener {
                        name: "db".to_string(),
                        port: 5432,
                        protocol: "TCP".to_string(),
                        ..Default::default()
                    }],
                },
            }),
        ),
        test_utils::service("infra", "pg", "db", 5432),
        test_utils::endpoints("infra", "pg", "db", 5432, &["10.0.1.1"]),
    ]
}

fn tcp_route(name: &str, created: i64) -> SyncDataEvent {
    SyncDataEvent::new(
        "infra",
        name,
        EventData::TcpRoute(TcpRoute {
            namespace: "infra".to_string(),
            name: name.to_string(),
            generation: Some(1),
            creation_timestamp: Utc.timestamp_opt(created, 0).unwrap(),
            spec: TCPRouteSpec {
                parent_refs: vec![ParentReference {
                    name: "gw".to_string(),
                    ..Default::default()
                }],
                rules: vec![TCPRouteRule {
                    backend_refs: vec![BackendRef {
                        name: "pg".to_string(),
                        port: Some(5432),
                        ..Default::default()
                    }],
                }],
            },
        }),
    )
}

#[tokio::test]
async fn test_gateway_listener_elects_oldest_route() {
    let mut h = Harness::new(&[("GATEWAY_API", "true")]).await;
    let (status_tx, mut status_rx) = mpsc::channel(4);
    h.reconciler = h.reconciler.with_status(status_tx);

    let mut events = gateway_events();
    events.push(tcp_route("newer", 200));
    events.push(tcp_route("b-old", 100));
    events.push(tcp_route("a-old", 100));
    h.apply(events).await.unwrap();
    assert!(h.reconciler.last_errors().is_empty());

    let frontend = &h.configuration().frontends["infra_gw_db"];
    assert_eq!(frontend.frontend.mode, haproxy_client::Mode::Tcp);
    assert_eq!(frontend.frontend.default_backend.as_deref(), Some("infra_a-old_tcproute"));
    assert_eq!(frontend.binds[0].port, Some(5432));
    // every resolved route keeps a backend, only the winner is the default
    for backend in ["infra_a-old_tcproute", "infra_b-old_tcproute", "infra_newer_tcproute"] {
        assert!(h.configuration().backends.contains_key(backend));
    }

    let snapshot = status_rx.try_recv().unwrap();
    assert_eq!(snapshot.gateways[0].status.listeners[0].attached_routes, 1);
    let accepted: Vec<&str> = snapshot
        .routes
        .iter()
        .map(|r| r.status.parents[0].conditions[0].status.as_str())
        .collect();
    assert_eq!(accepted, vec!["True", "False", "False"]);

    // removing the gateway removes its frontend
    let deleted = SyncDataEvent::new("infra", "gw", EventData::Gateway(Gateway::default())).deleted();
    let outcome = h.apply(vec![deleted]).await.unwrap();
    assert!(outcome.reloaded);
    assert!(!h.configuration().frontends.contains_key("infra_gw_db"));
    assert!(!h.configuration().backends.contains_key("infra_a-old_tcproute"));
    assert!(!h.configuration().backends.contains_key("infra_newer_tcproute"));
}
