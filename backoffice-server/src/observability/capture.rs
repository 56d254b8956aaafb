//! Failure capture
//!
//! Turns a failed request into the pieces an [`ErrorRecord`] is built from:
//! a redacted copy of the request, the route template with its variables
//! pulled out, a fingerprint and the retry plan.
//!
//! [`ErrorRecord`]: shared::models::ErrorRecord

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use shared::models::{EditableField, FieldLocation, RetryPlan, RetryTarget, Severity};
use std::collections::BTreeMap;

pub const REDACTED: &str = "[REDACTED]";
pub const IDEMPOTENCY_KEY_TEMPLATE: &str = "OBS-RETRY-{err_id}-{attempt}";

/// A failed request as seen by the capture middleware
#[derive(Debug, Clone)]
pub struct FailedRequest {
    pub venue_id: String,
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub body: Value,
    pub status_code: u16,
    pub response: Value,
}

impl FailedRequest {
    /// `code` of an error envelope, or `HTTP_<status>` for anything else
    pub fn error_code(&self) -> String {
        self.response
            .get("code")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP_{}", self.status_code))
    }

    pub fn error_message(&self) -> String {
        self.response
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    }

    pub fn severity(&self) -> Severity {
        Severity::from_status(self.status_code)
    }
}

/// Replace every value whose key is on the deny-list, at any depth
pub fn redact(value: &Value, deny: &[String]) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, v) in map {
                if is_denied(key, deny) {
                    out.insert(key.clone(), Value::String(REDACTED.into()));
                } else {
                    out.insert(key.clone(), redact(v, deny));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| redact(v, deny)).collect()),
        other => other.clone(),
    }
}

pub fn redact_query(
    query: &BTreeMap<String, String>,
    deny: &[String],
) -> BTreeMap<String, String> {
    query
        .iter()
        .map(|(k, v)| {
            let v = if is_denied(k, deny) { REDACTED.to_string() } else { v.clone() };
            (k.clone(), v)
        })
        .collect()
}

fn is_denied(key: &str, deny: &[String]) -> bool {
    deny.iter().any(|d| d.eq_ignore_ascii_case(key))
}

/// Segment holding an identifier rather than a route literal
fn is_identifier(segment: &str) -> bool {
    uuid::Uuid::parse_str(segment).is_ok() || segment.bytes().any(|b| b.is_ascii_digit())
}

/// Route template and the captured values of its variables
///
/// `/api/pos/orders/4f0c.../payments` becomes `/api/pos/orders/{id}/payments`
/// with `id = 4f0c...`. Further variables are `{id2}`, `{id3}`, ...
pub fn normalize_path(path: &str) -> (String, BTreeMap<String, String>) {
    let mut params = BTreeMap::new();
    let mut segments = Vec::new();
    for segment in path.split('/') {
        if !segment.is_empty() && is_identifier(segment) {
            let name = match params.len() {
                0 => "id".to_string(),
                n => format!("id{}", n + 1),
            };
            segments.push(format!("{{{name}}}"));
            params.insert(name, segment.to_string());
        } else {
            segments.push(segment.to_string());
        }
    }
    (segments.join("/"), params)
}

/// `H(method ‖ normalized_path ‖ error_code)`
pub fn fingerprint(method: &str, template: &str, error_code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(template.as_bytes());
    hasher.update(b"\n");
    hasher.update(error_code.as_bytes());
    hex::encode(hasher.finalize())
}

/// `/api/<domain>/...`, `other` outside the API
pub fn domain_of(path: &str) -> String {
    let mut parts = path.trim_start_matches('/').split('/');
    match (parts.next(), parts.next()) {
        (Some("api"), Some(domain)) if !domain.is_empty() => domain.to_string(),
        _ => "other".to_string(),
    }
}

/// Fill `{name}` variables of a template
pub fn render_path(template: &str, params: &BTreeMap<String, String>) -> Option<String> {
    let mut out = Vec::new();
    for segment in template.split('/') {
        match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => out.push(params.get(name)?.clone()),
            None => out.push(segment.to_string()),
        }
    }
    Some(out.join("/"))
}

fn retry_meaningful(method: &str, status: u16, error_code: &str) -> bool {
    let mutating = matches!(method, "POST" | "PUT" | "PATCH" | "DELETE");
    let hopeless = matches!(status, 401 | 403 | 404 | 405)
        || matches!(error_code, "IDEMPOTENCY_CONFLICT" | "LEDGER_TAMPERED");
    mutating && !hopeless
}

/// Synthesize the retry plan of a captured failure
///
/// Top-level body keys, query keys and path variables are editable.
pub fn retry_plan(
    failed: &FailedRequest,
    redacted_body: &Value,
    redacted_query: &BTreeMap<String, String>,
    token_ttl_seconds: u64,
) -> RetryPlan {
    let (template, path_params) = normalize_path(&failed.path);

    let mut editable_fields = Vec::new();
    if let Value::Object(map) = redacted_body {
        editable_fields.extend(map.keys().map(|k| EditableField {
            path: k.clone(),
            location: FieldLocation::Body,
        }));
    }
    editable_fields.extend(redacted_query.keys().map(|k| EditableField {
        path: k.clone(),
        location: FieldLocation::Query,
    }));
    editable_fields.extend(path_params.keys().map(|k| EditableField {
        path: k.clone(),
        location: FieldLocation::Path,
    }));

    RetryPlan {
        allowed: retry_meaningful(&failed.method, failed.status_code, &failed.error_code()),
        target: RetryTarget {
            method: failed.method.clone(),
            path: template,
        },
        editable_fields,
        base_body_redacted: redacted_body.clone(),
        base_query: redacted_query.clone(),
        path_params,
        idempotency_key_template: IDEMPOTENCY_KEY_TEMPLATE.to_string(),
        action_token_ttl_seconds: token_ttl_seconds,
    }
}

pub fn idempotency_key(template: &str, error_id: &str, attempt: u32) -> String {
    template
        .replace("{err_id}", error_id)
        .replace("{attempt}", &attempt.to_string())
}
