//! Rule variants and their HAProxy rendering.

use crate::utils::hash::fnv128a_hex;
use haproxy_client::{
    Condition, HAProxyError, HttpRequestAction, HttpRequestRule, HttpResponseAction, HttpResponseRule,
    ParentType, TcpRequestKind, TcpRequestRule, Transaction,
};
use serde::Serialize;

/// Rule identifier, hex FNV-128a of the rule content.
pub type RuleId = String;

/// Emit order of rules inside a frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RuleType {
    ReqInspectDelay,
    ReqProxyProtocol,
    /// Before accept, which ends `tcp-request content` evaluation
    ReqSetVar,
    ReqAcceptContent,
    ReqRejectContent,
    ReqSetSrc,
    ReqDeny,
    ReqTrack,
    ReqRateLimit,
    ReqAuth,
    ReqCapture,
    ReqRedirect,
    ReqSetHeader,
    ReqPathRewrite,
    ReqReturnStatus,
    ResSetHeader,
}

impl RuleType {
    /// Rules evaluated by `tcp-request`.
    pub fn is_tcp(self) -> bool {
        matches!(
            self,
            Self::ReqAcceptContent | Self::ReqRejectContent | Self::ReqInspectDelay | Self::ReqProxyProtocol
        )
    }
}

/// A frontend rule. Conditions are HAProxy condition fragments joined with
/// an implicit AND; negations are written inline (`!{ ssl_fc }`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Rule {
    /// `tcp-request content accept if <cond>`
    AcceptContent { cond: String },
    /// `tcp-request content reject if <cond>`
    RejectContent { cond: String },
    InspectDelay { timeout: String },
    /// `tcp-request connection expect-proxy layer4 if { src ... }`
    ProxyProtocol { src_ips: Vec<String> },
    SetVar {
        name: String,
        expr: String,
        cond: Option<String>,
        /// `tcp-request content` instead of `http-request`
        tcp: bool,
    },
    SetSrc { header: String },
    /// Deny matching sources, or every source outside an allow list.
    Deny { src_ips: Vec<String>, allow_list: bool },
    Track { table: String, key: String },
    RateLimit { table: String, requests: u64, status: u16 },
    Auth { userlist: String, realm: String },
    Capture { sample: String, len: u32 },
    Redirect {
        kind: String,
        value: String,
        code: u16,
        cond: Option<String>,
    },
    SetHeader { name: String, fmt: String },
    PathRewrite { regex: Option<String>, fmt: String },
    ReturnStatus { status: u16, cond: Option<String> },
    ResponseSetHeader { name: String, fmt: String },
}

fn join_cond(scope: Option<&str>, cond: Option<String>) -> Option<Condition> {
    let parts: Vec<String> = scope.map(ToString::to_string).into_iter().chain(cond).collect();
    (!parts.is_empty()).then(|| Condition::If(parts.join(" ")))
}

impl Rule {
    /// Type deciding where the rule sorts in its frontend.
    pub fn rule_type(&self) -> RuleType {
        match self {
            Self::AcceptContent { .. } => RuleType::ReqAcceptContent,
            Self::RejectContent { .. } => RuleType::ReqRejectContent,
            Self::InspectDelay { .. } => RuleType::ReqInspectDelay,
            Self::ProxyProtocol { .. } => RuleType::ReqProxyProtocol,
            Self::SetVar { .. } => RuleType::ReqSetVar,
            Self::SetSrc { .. } => RuleType::ReqSetSrc,
            Self::Deny { .. } => RuleType::ReqDeny,
            Self::Track { .. } => RuleType::ReqTrack,
            Self::RateLimit { .. } => RuleType::ReqRateLimit,
            Self::Auth { .. } => RuleType::ReqAuth,
            Self::Capture { .. } => RuleType::ReqCapture,
            Self::Redirect { .. } => RuleType::ReqRedirect,
            Self::SetHeader { .. } => RuleType::ReqSetHeader,
            Self::PathRewrite { .. } => RuleType::ReqPathRewrite,
            Self::ReturnStatus { .. } => RuleType::ReqReturnStatus,
            Self::ResponseSetHeader { .. } => RuleType::ResSetHeader,
        }
    }

    /// Content hash of the rule and its type tag.
    pub fn id(&self) -> RuleId {
        let mut bytes = serde_json::to_vec(self).unwrap_or_default();
        bytes.push(self.rule_type() as u8);
        fnv128a_hex(&bytes)
    }

    /// Guard restricting a rule to the routes that carry `id`.
    pub fn scope_acl(&self, id: &str) -> String {
        let var = if self.is_tcp() { "txn.sni_match" } else { "txn.path_match" };
        format!("{{ var({var}) -m dom {id} }}")
    }

    fn is_tcp(&self) -> bool {
        match self {
            Self::SetVar { tcp, .. } => *tcp,
            other => other.rule_type().is_tcp(),
        }
    }

    /// Inserts the rule at the head of `frontend`'s rules.
    pub fn create(&self, txn: &mut Transaction, frontend: &str, scope: Option<&str>) -> Result<(), HAProxyError> {
        if let Some(rule) = self.tcp_rule(scope) {
            return txn.tcp_request_rule_create(ParentType::Frontend, frontend, 0, rule);
        }
        if let Self::ResponseSetHeader { name, fmt } = self {
            let rule = HttpResponseRule {
                action: HttpResponseAction::SetHeader {
                    name: name.clone(),
                    fmt: fmt.clone(),
                },
                cond: join_cond(scope, None),
            };
            return txn.http_response_rule_create(ParentType::Frontend, frontend, 0, rule);
        }
        let (action, cond) = self.http_action();
        let rule = HttpRequestRule {
            action,
            cond: join_cond(scope, cond),
        };
        txn.http_request_rule_create(ParentType::Frontend, frontend, 0, rule)
    }

    fn tcp_rule(&self, scope: Option<&str>) -> Option<TcpRequestRule> {
        let rule = match self {
            Self::InspectDelay { timeout } => TcpRequestRule::InspectDelay {
                timeout: timeout.clone(),
            },
            Self::AcceptContent { cond } => TcpRequestRule::Accept {
                kind: TcpRequestKind::Content,
                cond: join_cond(scope, Some(cond.clone())),
            },
            Self::RejectContent { cond } => TcpRequestRule::Reject {
                kind: TcpRequestKind::Content,
                cond: join_cond(scope, Some(cond.clone())),
            },
            Self::ProxyProtocol { src_ips } => TcpRequestRule::ExpectProxy {
                cond: join_cond(scope, Some(format!("{{ src {} }}", src_ips.join(" ")))),
            },
            Self::SetVar {
                name,
                expr,
                cond,
                tcp: true,
            } => TcpRequestRule::SetVar {
                kind: TcpRequestKind::Content,
                name: name.clone(),
                expr: expr.clone(),
                cond: join_cond(scope, cond.clone()),
            },
            _ => return None,
        };
        Some(rule)
    }

    fn http_action(&self) -> (HttpRequestAction, Option<String>) {
        match self {
            Self::SetVar { name, expr, cond, .. } => (
                HttpRequestAction::SetVar {
                    name: name.clone(),
                    expr: expr.clone(),
                },
                cond.clone(),
            ),
            Self::SetSrc { header } => (
                HttpRequestAction::SetSrc {
                    expr: format!("hdr({header})"),
                },
                Some(format!("{{ req.hdr({header}) -m found }}")),
            ),
            Self::Deny { src_ips, allow_list } => {
                let negate = if *allow_list { "!" } else { "" };
                (
                    HttpRequestAction::Deny { status: None },
                    Some(format!("{negate}{{ src {} }}", src_ips.join(" "))),
                )
            }
            Self::Track { table, key } => (
                HttpRequestAction::TrackSc {
                    slot: 0,
                    key: key.clone(),
                    table: Some(table.clone()),
                },
                None,
            ),
            Self::RateLimit { table, requests, status } => (
                HttpRequestAction::Deny { status: Some(*status) },
                Some(format!("{{ sc0_http_req_rate({table}) gt {requests} }}")),
            ),
            Self::Auth { userlist, realm } => (
                HttpRequestAction::Auth { realm: realm.clone() },
                Some(format!("!{{ http_auth({userlist}) }}")),
            ),
            Self::Capture { sample, len } => (
                HttpRequestAction::Capture {
                    sample: sample.clone(),
                    len: *len,
                },
                None,
            ),
            Self::Redirect { kind, value, code, cond } => (
                HttpRequestAction::Redirect {
                    kind: kind.clone(),
                    value: value.clone(),
                    code: Some(*code),
                },
                cond.clone(),
            ),
            Self::SetHeader { name, fmt } => (
                HttpRequestAction::SetHeader {
                    name: name.clone(),
                    fmt: fmt.clone(),
                },
                None,
            ),
            Self::PathRewrite { regex: None, fmt } => (HttpRequestAction::SetPath { fmt: fmt.clone() }, None),
            Self::PathRewrite { regex: Some(regex), fmt } => (
                HttpRequestAction::ReplacePath {
                    regex: regex.clone(),
                    fmt: fmt.clone(),
                },
                None,
            ),
            Self::ReturnStatus { status, cond } => (
                HttpRequestAction::Return {
                    status: *status,
                    content_type: None,
                    content: None,
                },
                cond.clone(),
            ),
            // tcp and response rules never reach here
            _ => (HttpRequestAction::Allow, None),
        }
    }
}
