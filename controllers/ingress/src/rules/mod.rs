//! # Rules engine
//!
//! Per-frontend bookkeeping of HAProxy request/response rules. Every sync
//! starts with [`Rules::clean`], re-adds the rules it still wants and ends
//! with [`Rules::refresh`], which rewrites the rules of each frontend whose
//! rule set changed and reports whether a reload is needed.
//!
//! Entry states over syncs:
//!
//! ```text
//! none --add--> ToCreate --refresh--> Created --clean--> ToDelete --refresh--> removed
//!                                        ^                  |
//!                                        +------add---------+
//! ```

pub mod types;

pub use types::{Rule, RuleId, RuleType};

use crate::error::ErrorPool;
use haproxy_client::{ParentType, Transaction};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleState {
    ToCreate,
    Created,
    ToDelete,
}

#[derive(Debug, Clone)]
struct Entry {
    rule: Rule,
    state: RuleState,
    ingress_scoped: bool,
    /// Scope the rule was last emitted with
    applied_scoped: Option<bool>,
}

#[derive(Debug, Default)]
struct FrontendRules {
    entries: HashMap<RuleId, Entry>,
    /// Add order of the current sync, per type
    order: BTreeMap<RuleType, Vec<RuleId>>,
    /// Ordered ids last emitted
    applied: Vec<RuleId>,
    /// The emitted rules may not match the committed configuration
    stale: bool,
}

impl FrontendRules {
    fn desired(&self) -> Vec<RuleId> {
        self.order
            .values()
            .flatten()
            .filter(|id| self.entries.get(*id).is_some_and(|e| e.state != RuleState::ToDelete))
            .cloned()
            .collect()
    }

    fn changed(&self) -> bool {
        self.stale
            || self.desired() != self.applied
            || self.entries.values().any(|e| {
                e.state != RuleState::Created || e.applied_scoped != Some(e.ingress_scoped)
            })
    }
}

/// Rules of every frontend.
#[derive(Debug, Default)]
pub struct Rules {
    frontends: BTreeMap<String, FrontendRules>,
}

impl Rules {
    /// Empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks every rule for deletion at the start of a sync.
    pub fn clean(&mut self) {
        for frontend in self.frontends.values_mut() {
            frontend.order.clear();
            for entry in frontend.entries.values_mut() {
                entry.state = RuleState::ToDelete;
            }
        }
    }

    /// Adds `rule` to `frontend` and returns its id. A rule added both
    /// ingress-scoped and unscoped in the same sync is emitted unscoped.
    pub fn add(&mut self, frontend: &str, rule: Rule, ingress_scoped: bool) -> RuleId {
        let id = rule.id();
        let rules = self.frontends.entry(frontend.to_string()).or_default();
        let rule_type = rule.rule_type();

        match rules.entries.get_mut(&id) {
            Some(entry) if entry.state == RuleState::ToDelete => {
                entry.state = RuleState::Created;
                entry.ingress_scoped = ingress_scoped;
                rules.order.entry(rule_type).or_default().push(id.clone());
            }
            Some(entry) => {
                entry.ingress_scoped &= ingress_scoped;
            }
            None => {
                rules.entries.insert(
                    id.clone(),
                    Entry {
                        rule,
                        state: RuleState::ToCreate,
                        ingress_scoped,
                        applied_scoped: None,
                    },
                );
                rules.order.entry(rule_type).or_default().push(id.clone());
            }
        }
        id
    }

    /// Forces a rewrite of `frontend` on the next refresh, used when the
    /// frontend itself was recreated.
    pub fn invalidate(&mut self, frontend: &str) {
        if let Some(rules) = self.frontends.get_mut(frontend) {
            rules.applied.clear();
            rules.stale = true;
        }
    }

    /// Forces a rewrite of every frontend on the next refresh. Called when
    /// the transaction the last refresh wrote into was never committed.
    pub fn invalidate_all(&mut self) {
        for rules in self.frontends.values_mut() {
            rules.applied.clear();
            rules.stale = true;
        }
    }

    /// Number of live rules of `frontend`.
    pub fn count(&self, frontend: &str) -> usize {
        self.frontends
            .get(frontend)
            .map_or(0, |rules| rules.desired().len())
    }

    /// Rewrites changed frontends in `txn`. Returns true when a reload is
    /// required.
    pub fn refresh(&mut self, txn: &mut Transaction, errors: &mut ErrorPool) -> bool {
        let mut reload = false;

        for (frontend, rules) in &mut self.frontends {
            if !rules.changed() {
                continue;
            }
            if !txn.frontend_names().contains(frontend) {
                // frontend not created this sync, keep the rules pending
                continue;
            }
            debug!(frontend = %frontend, "rewriting rules");
            reload = true;

            for result in [
                txn.tcp_request_rules_delete_all(ParentType::Frontend, frontend),
                txn.http_request_rules_delete_all(ParentType::Frontend, frontend),
                txn.http_response_rules_delete_all(ParentType::Frontend, frontend),
            ] {
                errors.collect(result);
            }

            let desired = rules.desired();
            for id in desired.iter().rev() {
                let Some(entry) = rules.entries.get_mut(id) else {
                    continue;
                };
                let scope = entry.ingress_scoped.then(|| entry.rule.scope_acl(id));
                match entry.rule.create(txn, frontend, scope.as_deref()) {
                    Ok(()) => {
                        entry.state = RuleState::Created;
                        entry.applied_scoped = Some(entry.ingress_scoped);
                    }
                    Err(e) => {
                        error!(frontend = %frontend, rule = %id, "rule not applied: {}", e);
                        errors.add(e);
                    }
                }
            }
            rules.entries.retain(|_, entry| entry.state == RuleState::Created);
            rules.applied = rules.desired();
            rules.stale = false;
        }
        reload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haproxy_client::{ConfigClient, Configuration, Frontend, Mode};

    fn transaction(client: &mut ConfigClient) -> Transaction {
        let mut txn = client.transaction_start().unwrap();
        txn.frontend_create_if_not_exists(Frontend::new("http", Mode::Http));
        txn
    }

    fn header(name: &str) -> Rule {
        Rule::SetHeader {
            name: name.to_string(),
            fmt: "\"1\"".to_string(),
        }
    }

    fn rendered(txn: &Transaction) -> Vec<String> {
        let rules = txn.rules(ParentType::Frontend, "http").unwrap();
        rules.http_request_rules.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_rule_id_is_stable() {
        assert_eq!(header("X-A").id(), header("X-A").id());
        assert_ne!(header("X-A").id(), header("X-B").id());
        assert_eq!(header("X-A").id().len(), 32);
    }

    #[test]
    fn test_rules_emitted_in_type_then_add_order() {
        let mut client = ConfigClient::new("/tmp/unused.cfg", Configuration::default());
        let mut txn = transaction(&mut client);
        let mut rules = Rules::new();
        let mut errors = ErrorPool::new();

        rules.add("http", header("X-B"), false);
        rules.add(
            "http",
            Rule::Deny {
                src_ips: vec!["10.0.0.1".to_string()],
                allow_list: false,
            },
            false,
        );
        rules.add("http", header("X-A"), false);

        assert!(rules.refresh(&mut txn, &mut errors));
        assert!(errors.is_empty());
        assert_eq!(
            rendered(&txn),
            vec![
                "http-request deny if { src 10.0.0.1 }".to_string(),
                "http-request set-header X-B \"1\"".to_string(),
                "http-request set-header X-A \"1\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_unchanged_rules_do_not_reload() {
        let mut client = ConfigClient::new("/tmp/unused.cfg", Configuration::default());
        let mut txn = transaction(&mut client);
        let mut rules = Rules::new();
        let mut errors = ErrorPool::new();

        rules.add("http", header("X-A"), false);
        assert!(rules.refresh(&mut txn, &mut errors));

        rules.clean();
        rules.add("http", header("X-A"), false);
        assert!(!rules.refresh(&mut txn, &mut errors));
        assert_eq!(rules.count("http"), 1);
    }

    #[test]
    fn test_dropped_rule_is_deleted_and_reloads() {
        let mut client = ConfigClient::new("/tmp/unused.cfg", Configuration::default());
        let mut txn = transaction(&mut client);
        let mut rules = Rules::new();
        let mut errors = ErrorPool::new();

        rules.add("http", header("X-A"), false);
        rules.add("http", header("X-B"), false);
        rules.refresh(&mut txn, &mut errors);

        rules.clean();
        rules.add("http", header("X-B"), false);
        assert!(rules.refresh(&mut txn, &mut errors));
        assert_eq!(rendered(&txn), vec!["http-request set-header X-B \"1\"".to_string()]);
    }

    #[test]
    fn test_invalidated_rules_rewritten_into_fresh_transaction() {
        let mut client = ConfigClient::new("/tmp/unused.cfg", Configuration::default());
        let mut rules = Rules::new();
        let mut errors = ErrorPool::new();

        let mut discarded = transaction(&mut client);
        rules.add("http", header("X-A"), false);
        assert!(rules.refresh(&mut discarded, &mut errors));
        client.transaction_dispose(discarded).unwrap();

        rules.invalidate_all();
        rules.clean();
        rules.add("http", header("X-A"), false);
        let mut txn = transaction(&mut client);
        assert!(rules.refresh(&mut txn, &mut errors));
        assert_eq!(rendered(&txn), vec!["http-request set-header X-A \"1\"".to_string()]);

        rules.clean();
        rules.add("http", header("X-A"), false);
        assert!(!rules.refresh(&mut txn, &mut errors));
    }

    #[test]
    fn test_scoped_rule_uses_path_match_acl() {
        let mut client = ConfigClient::new("/tmp/unused.cfg", Configuration::default());
        let mut txn = transaction(&mut client);
        let mut rules = Rules::new();
        let mut errors = ErrorPool::new();

        let id = rules.add("http", header("X-A"), true);
        rules.refresh(&mut txn, &mut errors);
        assert_eq!(
            rendered(&txn),
            vec![format!("http-request set-header X-A \"1\" if {{ var(txn.path_match) -m dom {id} }}")]
        );
    }

    #[test]
    fn test_unscoped_wins_over_scoped() {
        let mut client = ConfigClient::new("/tmp/unused.cfg", Configuration::default());
        let mut txn = transaction(&mut client);
        let mut rules = Rules::new();
        let mut errors = ErrorPool::new();

        rules.add("http", header("X-A"), true);
        rules.add("http", header("X-A"), false);
        rules.refresh(&mut txn, &mut errors);
        assert_eq!(rendered(&txn), vec!["http-request set-header X-A \"1\"".to_string()]);
    }

    #[test]
    fn test_scope_change_reloads() {
        let mut client = ConfigClient::new("/tmp/unused.cfg", Configuration::default());
        let mut txn = transaction(&mut client);
        let mut rules = Rules::new();
        let mut errors = ErrorPool::new();

        rules.add("http", header("X-A"), true);
        rules.refresh(&mut txn, &mut errors);

        rules.clean();
        rules.add("http", header("X-A"), false);
        assert!(rules.refresh(&mut txn, &mut errors));
    }

    #[test]
    fn test_tcp_rules_use_sni_scope() {
        let mut client = ConfigClient::new("/tmp/unused.cfg", Configuration::default());
        let mut txn = client.transaction_start().unwrap();
        txn.frontend_create_if_not_exists(Frontend::new("ssl", Mode::Tcp));
        let mut rules = Rules::new();
        let mut errors = ErrorPool::new();

        rules.add(
            "ssl",
            Rule::InspectDelay {
                timeout: "5000".to_string(),
            },
            false,
        );
        rules.add(
            "ssl",
            Rule::AcceptContent {
                cond: "{ req_ssl_hello_type 1 }".to_string(),
            },
            false,
        );
        rules.refresh(&mut txn, &mut errors);

        let tcp: Vec<String> = txn
            .rules(ParentType::Frontend, "ssl")
            .unwrap()
            .tcp_request_rules
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            tcp,
            vec![
                "tcp-request inspect-delay 5000".to_string(),
                "tcp-request content accept if { req_ssl_hello_type 1 }".to_string(),
            ]
        );
        let scoped = Rule::SetVar {
            name: "txn.x".to_string(),
            expr: "str(1)".to_string(),
            cond: None,
            tcp: true,
        };
        assert!(scoped.scope_acl("abc").contains("txn.sni_match"));
    }
}
