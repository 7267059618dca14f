//! Frontend rules derived from ingress annotations.
//!
//! Every handler validates its own annotations. An invalid value skips that
//! rule only; the rest of the ingress is still applied.

use super::{lines, parse_ip_list, parse_size, Annotations};
use crate::error::{ControllerError, ErrorPool};
use crate::rules::Rule;
use crate::store::K8sStore;
use crate::utils::split_ns_name;
use haproxy_client::{User, Userlist};
use tracing::warn;

const DEFAULT_REDIRECT_CODE: u16 = 302;
const DEFAULT_CAPTURE_LEN: u32 = 128;
const DEFAULT_AUTH_REALM: &str = "Protected Content";
const DEFAULT_RATE_LIMIT_SIZE: &str = "100k";
const DEFAULT_RATE_LIMIT_STATUS: u16 = 403;
const RATE_LIMIT_PREFIX: &str = "RateLimit-";

/// Stick table backend tracking request rates over one period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitTable {
    pub name: String,
    pub stick_table: String,
}

/// Annotation derived settings of one ingress.
#[derive(Debug, Default)]
pub struct IngressSettings {
    /// Rules for the HTTP and HTTPS frontends
    pub rules: Vec<Rule>,
    /// Rules for the plain HTTP frontend only
    pub http_rules: Vec<Rule>,
    pub userlist: Option<Userlist>,
    pub rate_limit: Option<RateLimitTable>,
    pub ssl_passthrough: bool,
    pub route_acl: Option<String>,
}

/// Ingress facts the handlers need.
#[derive(Debug, Clone, Copy)]
pub struct IngressContext<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
    pub has_tls: bool,
    pub allow_ssl_passthrough: bool,
}

pub fn parse(ann: &Annotations<'_>, ctx: IngressContext<'_>, store: &K8sStore, errors: &mut ErrorPool) -> IngressSettings {
    let mut settings = IngressSettings::default();

    if let Some(passthrough) = errors.collect(ann.bool("ssl-passthrough")).flatten() {
        if passthrough && !ctx.allow_ssl_passthrough {
            warn!(ingress = %ctx.name, "ssl-passthrough disabled on this controller, ignored");
        } else {
            settings.ssl_passthrough = passthrough;
        }
    }
    if settings.ssl_passthrough {
        // TCP routed, none of the HTTP rules apply
        return settings;
    }

    if let Some(rule) = errors.collect(ssl_redirect(ann, ctx)).flatten() {
        settings.http_rules.push(rule);
    }
    if let Some(rule) = errors.collect(request_redirect(ann)).flatten() {
        settings.rules.push(rule);
    }
    if let Some(header) = ann.get("src-ip-header") {
        settings.rules.push(Rule::SetSrc {
            header: header.to_string(),
        });
    }
    if let Some(rule) = errors.collect(access_list(ann)).flatten() {
        settings.rules.push(rule);
    }
    if let Some((rules, table)) = errors.collect(rate_limit(ann)).flatten() {
        settings.rules.extend(rules);
        settings.rate_limit = Some(table);
    }
    if let Some((rule, userlist)) = errors.collect(basic_auth(ann, ctx, store)).flatten() {
        settings.rules.push(rule);
        settings.userlist = Some(userlist);
    }
    if let Some(rules) = errors.collect(request_capture(ann)) {
        settings.rules.extend(rules);
    }
    if let Some(host) = ann.get("set-host") {
        settings.rules.push(Rule::SetHeader {
            name: "Host".to_string(),
            fmt: host.to_string(),
        });
    }
    if let Some(rules) = errors.collect(set_headers(ann, "request-set-header", false)) {
        settings.rules.extend(rules);
    }
    if let Some(rule) = errors.collect(path_rewrite(ann)).flatten() {
        settings.rules.push(rule);
    }
    if let Some(rules) = errors.collect(cors(ann)) {
        settings.rules.extend(rules);
    }
    if let Some(rules) = errors.collect(set_headers(ann, "response-set-header", true)) {
        settings.rules.extend(rules);
    }
    settings.route_acl = ann.get("route-acl").map(ToString::to_string);
    settings
}

fn redirect_code(ann: &Annotations<'_>, name: &str) -> Result<u16, ControllerError> {
    let Some(value) = ann.get(name) else {
        return Ok(DEFAULT_REDIRECT_CODE);
    };
    match value.parse::<u16>() {
        Ok(code @ (301 | 302 | 303 | 307 | 308)) => Ok(code),
        _ => Err(ControllerError::validation(name, value, "expected a 3xx redirect code")),
    }
}

/// Redirects plain HTTP to HTTPS. Enabled by default for ingresses with TLS.
fn ssl_redirect(ann: &Annotations<'_>, ctx: IngressContext<'_>) -> Result<Option<Rule>, ControllerError> {
    let enabled = ann.bool("ssl-redirect")?.unwrap_or(ctx.has_tls);
    if !enabled {
        return Ok(None);
    }
    let code = redirect_code(ann, "ssl-redirect-code")?;
    let cond = Some("!{ ssl_fc }".to_string());
    let rule = match ann.get("ssl-redirect-port") {
        Some(port) => {
            let port: u16 = port
                .parse()
                .map_err(|e| ControllerError::validation("ssl-redirect-port", port, e))?;
            Rule::Redirect {
                kind: "location".to_string(),
                value: format!("https://%[hdr(host),field(1,:)]:{port}%[capture.req.uri]"),
                code,
                cond,
            }
        }
        None => Rule::Redirect {
            kind: "scheme".to_string(),
            value: "https".to_string(),
            code,
            cond,
        },
    };
    Ok(Some(rule))
}

fn request_redirect(ann: &Annotations<'_>) -> Result<Option<Rule>, ControllerError> {
    let Some(target) = ann.get("request-redirect") else {
        return Ok(None);
    };
    if target.contains(char::is_whitespace) {
        return Err(ControllerError::validation("request-redirect", target, "expected host[:port]"));
    }
    Ok(Some(Rule::Redirect {
        kind: "location".to_string(),
        value: format!("%[ssl_fc,iif(https,http)]://{target}%[capture.req.uri]"),
        code: redirect_code(ann, "request-redirect-code")?,
        cond: None,
    }))
}

fn access_list(ann: &Annotations<'_>) -> Result<Option<Rule>, ControllerError> {
    if let Some((name, value)) = ann.get_any(&["allow-list", "whitelist"]) {
        return Ok(Some(Rule::Deny {
            src_ips: parse_ip_list(name, value)?,
            allow_list: true,
        }));
    }
    if let Some((name, value)) = ann.get_any(&["deny-list", "blacklist"]) {
        return Ok(Some(Rule::Deny {
            src_ips: parse_ip_list(name, value)?,
            allow_list: false,
        }));
    }
    Ok(None)
}

/// Track and deny rules plus the stick table they share. A period or size
/// without a request limit is ignored.
fn rate_limit(ann: &Annotations<'_>) -> Result<Option<(Vec<Rule>, RateLimitTable)>, ControllerError> {
    let Some(requests) = ann.u64("rate-limit-requests")? else {
        return Ok(None);
    };
    let period = ann
        .duration("rate-limit-period")?
        .unwrap_or(std::time::Duration::from_secs(1));
    let size = match ann.get("rate-limit-size") {
        Some(size) => parse_size("rate-limit-size", size)?,
        None => DEFAULT_RATE_LIMIT_SIZE.to_string(),
    };
    let status = match ann.get("rate-limit-status-code") {
        Some(value) => value
            .parse::<u16>()
            .ok()
            .filter(|code| (100..600).contains(code))
            .ok_or_else(|| ControllerError::validation("rate-limit-status-code", value, "expected an HTTP status"))?,
        None => DEFAULT_RATE_LIMIT_STATUS,
    };

    let millis = period.as_millis();
    let table = RateLimitTable {
        name: format!("{RATE_LIMIT_PREFIX}{millis}"),
        stick_table: format!("type ip size {size} store http_req_rate({millis}ms)"),
    };
    let rules = vec![
        Rule::Track {
            table: table.name.clone(),
            key: "src".to_string(),
        },
        Rule::RateLimit {
            table: table.name.clone(),
            requests,
            status,
        },
    ];
    Ok(Some((rules, table)))
}

fn basic_auth(
    ann: &Annotations<'_>,
    ctx: IngressContext<'_>,
    store: &K8sStore,
) -> Result<Option<(Rule, Userlist)>, ControllerError> {
    let Some(auth_type) = ann.get("auth-type") else {
        return Ok(None);
    };
    if auth_type != "basic-auth" {
        return Err(ControllerError::validation("auth-type", auth_type, "only basic-auth is supported"));
    }
    let secret_ref = ann
        .get("auth-secret")
        .ok_or_else(|| ControllerError::validation("auth-secret", "", "required with auth-type"))?;
    let (ns, name) = split_ns_name(secret_ref, ctx.namespace)?;
    let secret = store
        .secret(ns, name)
        .ok_or_else(|| ControllerError::NotFound(format!("auth secret {ns}/{name}")))?;

    let users: Vec<User> = secret
        .data
        .iter()
        .map(|(user, password)| User {
            name: user.clone(),
            password: String::from_utf8_lossy(password).trim().to_string(),
            secure: true,
        })
        .filter(|user| !user.password.is_empty())
        .collect();
    if users.is_empty() {
        return Err(ControllerError::validation("auth-secret", secret_ref, "secret holds no credentials"));
    }

    let userlist = Userlist {
        name: format!("{ns}-{name}"),
        users,
    };
    let rule = Rule::Auth {
        userlist: userlist.name.clone(),
        realm: ann.get("auth-realm").unwrap_or(DEFAULT_AUTH_REALM).replace('"', ""),
    };
    Ok(Some((rule, userlist)))
}

fn request_capture(ann: &Annotations<'_>) -> Result<Vec<Rule>, ControllerError> {
    let Some(samples) = ann.get("request-capture") else {
        return Ok(Vec::new());
    };
    let len = match ann.get("request-capture-len") {
        Some(len) => len
            .parse::<u32>()
            .map_err(|e| ControllerError::validation("request-capture-len", len, e))?,
        None => DEFAULT_CAPTURE_LEN,
    };
    Ok(lines(samples)
        .into_iter()
        .map(|sample| Rule::Capture { sample, len })
        .collect())
}

/// One `Name value` pair per line.
fn set_headers(ann: &Annotations<'_>, name: &str, response: bool) -> Result<Vec<Rule>, ControllerError> {
    let Some(value) = ann.get(name) else {
        return Ok(Vec::new());
    };
    let mut rules = Vec::new();
    for line in lines(value) {
        let (header, fmt) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| ControllerError::validation(name, &line, "expected 'Header value'"))?;
        let fmt = format!("\"{}\"", fmt.trim().trim_matches('"'));
        let header = header.to_string();
        rules.push(if response {
            Rule::ResponseSetHeader { name: header, fmt }
        } else {
            Rule::SetHeader { name: header, fmt }
        });
    }
    Ok(rules)
}

/// `/new` sets the path, `^/old/(.*) /new/\1` rewrites it.
fn path_rewrite(ann: &Annotations<'_>) -> Result<Option<Rule>, ControllerError> {
    let Some(value) = ann.get("path-rewrite") else {
        return Ok(None);
    };
    let parts: Vec<&str> = value.split_whitespace().collect();
    match parts.as_slice() {
        [fmt] => Ok(Some(Rule::PathRewrite {
            regex: None,
            fmt: (*fmt).to_string(),
        })),
        [regex, fmt] => Ok(Some(Rule::PathRewrite {
            regex: Some((*regex).to_string()),
            fmt: (*fmt).to_string(),
        })),
        _ => Err(ControllerError::validation("path-rewrite", value, "expected 'path' or 'regex replacement'")),
    }
}

fn cors(ann: &Annotations<'_>) -> Result<Vec<Rule>, ControllerError> {
    if !ann.bool("cors-enable")?.unwrap_or(false) {
        return Ok(Vec::new());
    }
    let header = |name: &str, value: &str| Rule::ResponseSetHeader {
        name: name.to_string(),
        fmt: format!("\"{value}\""),
    };
    let mut rules = vec![
        header("Access-Control-Allow-Origin", ann.get("cors-allow-origin").unwrap_or("*")),
        header("Access-Control-Allow-Methods", ann.get("cors-allow-methods").unwrap_or("*")),
        header("Access-Control-Allow-Headers", ann.get("cors-allow-headers").unwrap_or("*")),
    ];
    if ann.bool("cors-allow-credentials")?.unwrap_or(false) {
        rules.push(header("Access-Control-Allow-Credentials", "true"));
    }
    let max_age = ann
        .duration("cors-max-age")?
        .unwrap_or(std::time::Duration::from_secs(5));
    rules.push(header("Access-Control-Max-Age", &max_age.as_secs().to_string()));
    rules.push(Rule::ReturnStatus {
        status: 204,
        cond: Some("METH_OPTIONS".to_string()),
    });
    Ok(rules)
}
