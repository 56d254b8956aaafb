//! Error inbox records, retry plans and action tokens

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn from_status(status: u16) -> Self {
        match status {
            500.. => Severity::High,
            409 | 422 => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorStatus {
    Open,
    Acked,
    Resolved,
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldLocation {
    Body,
    Query,
    Path,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditableField {
    pub path: String,
    pub location: FieldLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryTarget {
    pub method: String,
    /// Route template, variables as `{name}`
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPlan {
    pub allowed: bool,
    pub target: RetryTarget,
    pub editable_fields: Vec<EditableField>,
    pub base_body_redacted: Value,
    pub base_query: BTreeMap<String, String>,
    /// Captured values of the path variables
    pub path_params: BTreeMap<String, String>,
    pub idempotency_key_template: String,
    pub action_token_ttl_seconds: u64,
}

impl RetryPlan {
    pub fn is_editable(&self, location: FieldLocation, key: &str) -> bool {
        self.editable_fields
            .iter()
            .any(|f| f.location == location && f.path == key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// The failed request as captured at the boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSource {
    pub method: String,
    pub path: String,
    pub body: Value,
    pub query: BTreeMap<String, String>,
    pub status_code: u16,
    pub response: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Captured,
    Recurred,
    Acknowledged,
    Suppressed,
    TokenIssued,
    RetrySucceeded,
    RetryFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStatus {
    pub kind: StepKind,
    pub at: DateTime<Utc>,
    pub actor: Option<String>,
    pub status_code: Option<u16>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub display_id: String,
    pub venue_id: String,
    pub fingerprint: String,
    pub domain: String,
    pub severity: Severity,
    pub error: ErrorInfo,
    pub source: RequestSource,
    pub retry_plan: Option<RetryPlan>,
    pub steps: Vec<StepStatus>,
    pub occurrence_count: u64,
    pub retry_attempts: u32,
    pub status: ErrorStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// One-time credential authorizing a single retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionToken {
    pub token: String,
    pub error_id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Operator edits applied on top of the captured request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPatch {
    #[serde(default)]
    pub body: Option<Map<String, Value>>,
    #[serde(default)]
    pub query: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub path: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetryRequest {
    #[validate(length(min = 1, max = 256))]
    pub token: String,
    #[serde(default)]
    pub patch: RetryPatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub error_id: String,
    pub attempt: u32,
    pub idempotency_key: String,
    pub status_code: u16,
    pub resolved: bool,
    pub response: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxSort {
    #[default]
    LastSeenDesc,
    FirstSeenDesc,
    OccurrencesDesc,
    SeverityDesc,
}

/// Error inbox filter; list filters are comma separated
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct InboxQuery {
    #[validate(length(min = 1, max = 64))]
    pub venue_id: String,
    pub domains: Option<String>,
    pub statuses: Option<String>,
    pub severities: Option<String>,
    pub error_codes: Option<String>,
    #[validate(length(max = 200))]
    pub q: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    #[validate(range(min = 1))]
    pub page: u32,
    #[serde(default = "default_page_size")]
    #[validate(range(min = 1, max = 200))]
    pub page_size: u32,
    #[serde(default)]
    pub sort: InboxSort,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxPage {
    pub items: Vec<ErrorRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_from_status() {
        assert_eq!(Severity::from_status(503), Severity::High);
        assert_eq!(Severity::from_status(409), Severity::Medium);
        assert_eq!(Severity::from_status(422), Severity::Medium);
        assert_eq!(Severity::from_status(404), Severity::Low);
    }

    #[test]
    fn test_retry_patch_defaults() {
        let req: RetryRequest = serde_json::from_value(serde_json::json!({"token": "abc"})).unwrap();
        assert!(req.patch.body.is_none());
        assert!(req.patch.query.is_none());
    }
}
