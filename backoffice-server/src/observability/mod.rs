//! Error inbox and replay engine
//!
//! Failed API requests are captured at the HTTP boundary, merged by
//! fingerprint per venue, and may be retried by an operator holding a
//! one-time action token. A retry replays the captured request, with the
//! operator's edits applied to declared-editable fields only, against an
//! allow-listed path.

pub mod alerts;
pub mod capture;
pub mod replay;
pub mod tokens;

#[cfg(test)]
mod tests;

use redb::{ReadableTable, WriteTransaction};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::error::{AppError, ErrorCode};
use shared::models::{
    ActionToken, ErrorInfo, ErrorRecord, ErrorStatus, FieldLocation, InboxPage, InboxQuery,
    InboxSort, RequestSource, RetryOutcome, RetryPlan, RetryRequest, Severity, StepKind,
    StepStatus,
};
use std::sync::Arc;
use thiserror::Error;

use crate::db::tables::{ERROR_FINGERPRINTS, ERROR_RECORDS, ERRORS_BY_VENUE};
use crate::db::{Storage, StorageError, get_doc, load_indexed, next_counter, put_doc};

pub use capture::FailedRequest;
pub use replay::{HttpReplayer, ReplayCall, ReplayReply, Replayer};

/// Venue id reserved for a cross-venue inbox
pub const GLOBAL_VENUE: &str = "GLOBAL";

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Error record not found: {0}")]
    RecordNotFound(String),

    #[error("Error record {0} cannot be retried")]
    RetryNotAllowed(String),

    #[error("Error record {display_id} is {status:?}")]
    InvalidState {
        display_id: String,
        status: ErrorStatus,
    },

    #[error("A retry of error record {0} is already running")]
    RetryInFlight(String),

    #[error("Action token not found")]
    TokenNotFound,

    #[error("Action token has already been used")]
    TokenUsed,

    #[error("Action token has expired")]
    TokenExpired,

    #[error("Action token belongs to another user")]
    TokenUserMismatch,

    #[error("Field {key} ({location:?}) is not editable")]
    FieldNotEditable { location: FieldLocation, key: String },

    #[error("Replay target {0} is not allowed")]
    PathNotAllowed(String),

    #[error("The global inbox is not available")]
    GlobalInbox,

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
}

impl From<redb::TableError> for ReplayError {
    fn from(e: redb::TableError) -> Self {
        ReplayError::Storage(e.into())
    }
}

impl From<redb::StorageError> for ReplayError {
    fn from(e: redb::StorageError) -> Self {
        ReplayError::Storage(e.into())
    }
}

impl From<redb::TransactionError> for ReplayError {
    fn from(e: redb::TransactionError) -> Self {
        ReplayError::Storage(e.into())
    }
}

impl From<serde_json::Error> for ReplayError {
    fn from(e: serde_json::Error) -> Self {
        ReplayError::Storage(e.into())
    }
}

pub type ReplayResult<T> = Result<T, ReplayError>;

impl From<ReplayError> for AppError {
    fn from(err: ReplayError) -> Self {
        let message = err.to_string();
        match err {
            ReplayError::Storage(e) => e.into(),
            ReplayError::RecordNotFound(_) => {
                AppError::with_message(ErrorCode::ErrorRecordNotFound, message)
            }
            ReplayError::RetryNotAllowed(_) => {
                AppError::with_message(ErrorCode::RetryNotAllowed, message)
            }
            ReplayError::InvalidState { .. } | ReplayError::RetryInFlight(_) => {
                AppError::with_message(ErrorCode::InvalidRequest, message)
            }
            ReplayError::TokenNotFound => AppError::with_message(ErrorCode::TokenNotFound, message),
            ReplayError::TokenUsed => AppError::with_message(ErrorCode::TokenUsed, message),
            ReplayError::TokenExpired => AppError::with_message(ErrorCode::TokenExpired, message),
            ReplayError::TokenUserMismatch => {
                AppError::with_message(ErrorCode::TokenUserMismatch, message)
            }
            ReplayError::FieldNotEditable { ref key, location } => {
                let path = format!("patch.{}.{key}", location_name(location));
                AppError::with_message(ErrorCode::FieldNotEditable, message)
                    .with_detail(path, "not editable")
            }
            ReplayError::PathNotAllowed(_) => {
                AppError::with_message(ErrorCode::PathNotAllowed, message)
            }
            ReplayError::GlobalInbox => AppError::permission_denied(message),
            ReplayError::InvalidFilter(_) => AppError::validation(message),
        }
    }
}

fn location_name(location: FieldLocation) -> &'static str {
    match location {
        FieldLocation::Body => "body",
        FieldLocation::Query => "query",
        FieldLocation::Path => "path",
    }
}

/// Capture and replay policy
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Keys whose values never reach storage
    pub redact_fields: Vec<String>,
    /// Path prefixes a replay may target
    pub allowed_paths: Vec<String>,
    pub token_ttl_seconds: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            redact_fields: [
                "password",
                "pin",
                "iban",
                "card_number",
                "cvv",
                "email",
                "phone",
                "ssn",
                "token",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allowed_paths: ["/api/pos", "/api/inventory", "/api/kds"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            token_ttl_seconds: 60,
        }
    }
}

fn load_record(txn: &WriteTransaction, error_id: &str) -> ReplayResult<ErrorRecord> {
    let table = txn.open_table(ERROR_RECORDS)?;
    get_doc(&table, error_id)?.ok_or_else(|| ReplayError::RecordNotFound(error_id.to_string()))
}

fn save_record(txn: &WriteTransaction, record: &ErrorRecord) -> ReplayResult<()> {
    let mut table = txn.open_table(ERROR_RECORDS)?;
    put_doc(&mut table, &record.id, record)?;
    Ok(())
}

fn step(kind: StepKind, actor: Option<&str>) -> StepStatus {
    StepStatus {
        kind,
        at: shared::util::now(),
        actor: actor.map(str::to_string),
        status_code: None,
        message: None,
    }
}

/// Comma separated filter values parsed as their wire names
fn parse_list<T: DeserializeOwned>(raw: Option<&str>) -> ReplayResult<Option<Vec<T>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let value = serde_json::from_value(Value::String(part.to_ascii_uppercase()))
            .map_err(|_| ReplayError::InvalidFilter(part.to_string()))?;
        out.push(value);
    }
    Ok(Some(out))
}

fn split_list(raw: Option<&str>) -> Option<Vec<String>> {
    raw.map(|r| {
        r.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
}

#[derive(Clone)]
pub struct ErrorInbox {
    storage: Storage,
    config: Arc<ReplayConfig>,
    replayer: Arc<dyn Replayer>,
    /// Records with a replay between token redemption and outcome
    in_flight: Arc<DashMap<String, ()>>,
}

/// Claim on a record's replay slot, released on drop
struct ReplayClaim<'a> {
    in_flight: &'a DashMap<String, ()>,
    error_id: String,
}

impl Drop for ReplayClaim<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.error_id);
    }
}

impl ErrorInbox {
    pub fn new(storage: Storage, config: ReplayConfig, replayer: Arc<dyn Replayer>) -> Self {
        Self {
            storage,
            config: Arc::new(config),
            replayer,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    fn claim_replay(&self, record: &ErrorRecord) -> ReplayResult<ReplayClaim<'_>> {
        match self.in_flight.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(ReplayError::RetryInFlight(record.display_id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(ReplayClaim {
                    in_flight: &self.in_flight,
                    error_id: record.id.clone(),
                })
            }
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Record a failed request, merging it into an existing record with the
    /// same fingerprint in the venue
    pub fn capture(&self, failed: FailedRequest) -> ReplayResult<ErrorRecord> {
        let (template, _) = capture::normalize_path(&failed.path);
        let code = failed.error_code();
        let fingerprint = capture::fingerprint(&failed.method, &template, &code);

        let body = capture::redact(&failed.body, &self.config.redact_fields);
        let query = capture::redact_query(&failed.query, &self.config.redact_fields);
        let response = capture::redact(&failed.response, &self.config.redact_fields);
        let plan = capture::retry_plan(&failed, &body, &query, self.config.token_ttl_seconds);
        let source = RequestSource {
            method: failed.method.clone(),
            path: failed.path.clone(),
            body,
            query,
            status_code: failed.status_code,
            response,
        };
        let now = shared::util::now();

        let txn = self.storage.begin_write()?;
        let existing_id = {
            let table = txn.open_table(ERROR_FINGERPRINTS)?;
            table
                .get((failed.venue_id.as_str(), fingerprint.as_str()))?
                .map(|g| g.value().to_string())
        };

        let record = match existing_id {
            Some(id) => {
                let mut record = load_record(&txn, &id)?;
                record.occurrence_count += 1;
                record.last_seen_at = now;
                record.severity = record.severity.max(failed.severity());
                record.error.message = failed.error_message();
                record.source = source;
                record.retry_plan = Some(plan);
                if record.status == ErrorStatus::Resolved {
                    record.status = ErrorStatus::Open;
                    record.resolved_by = None;
                    record.resolved_at = None;
                }
                let mut recurred = step(StepKind::Recurred, None);
                recurred.status_code = Some(failed.status_code);
                record.steps.push(recurred);
                record
            }
            None => {
                let n = next_counter(&txn, "error_records")?;
                let mut captured = step(StepKind::Captured, None);
                captured.status_code = Some(failed.status_code);
                let record = ErrorRecord {
                    id: shared::util::new_id(),
                    display_id: shared::util::display_id("ERR", n),
                    venue_id: failed.venue_id.clone(),
                    fingerprint: fingerprint.clone(),
                    domain: capture::domain_of(&failed.path),
                    severity: failed.severity(),
                    error: ErrorInfo {
                        code,
                        message: failed.error_message(),
                    },
                    source,
                    retry_plan: Some(plan),
                    steps: vec![captured],
                    occurrence_count: 1,
                    retry_attempts: 0,
                    status: ErrorStatus::Open,
                    first_seen_at: now,
                    last_seen_at: now,
                    resolved_by: None,
                    resolved_at: None,
                };
                {
                    let mut fingerprints = txn.open_table(ERROR_FINGERPRINTS)?;
                    fingerprints.insert(
                        (failed.venue_id.as_str(), fingerprint.as_str()),
                        record.id.as_str(),
                    )?;
                    let mut by_venue = txn.open_table(ERRORS_BY_VENUE)?;
                    by_venue.insert((failed.venue_id.as_str(), record.id.as_str()), ())?;
                }
                record
            }
        };
        save_record(&txn, &record)?;
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(
            error_id = %record.id,
            display_id = %record.display_id,
            occurrences = record.occurrence_count,
            code = %record.error.code,
            "Failure captured"
        );
        Ok(record)
    }

    pub fn get(&self, error_id: &str) -> ReplayResult<ErrorRecord> {
        self.storage
            .get(ERROR_RECORDS, error_id)?
            .ok_or_else(|| ReplayError::RecordNotFound(error_id.to_string()))
    }

    /// Filtered, sorted, paged view of a venue's records
    pub fn list(&self, query: &InboxQuery) -> ReplayResult<InboxPage> {
        if query.venue_id.eq_ignore_ascii_case(GLOBAL_VENUE) {
            return Err(ReplayError::GlobalInbox);
        }
        let statuses: Option<Vec<ErrorStatus>> = parse_list(query.statuses.as_deref())?;
        let severities: Option<Vec<Severity>> = parse_list(query.severities.as_deref())?;
        let domains = split_list(query.domains.as_deref());
        let codes = split_list(query.error_codes.as_deref());
        let needle = query.q.as_ref().map(|q| q.to_lowercase());

        let read_txn = self.storage.begin_read()?;
        let index = read_txn.open_table(ERRORS_BY_VENUE)?;
        let docs = read_txn.open_table(ERROR_RECORDS)?;
        let records: Vec<ErrorRecord> = load_indexed(&index, &docs, &query.venue_id)?;

        let mut matched: Vec<ErrorRecord> = records
            .into_iter()
            .filter(|r| statuses.as_ref().is_none_or(|s| s.contains(&r.status)))
            .filter(|r| severities.as_ref().is_none_or(|s| s.contains(&r.severity)))
            .filter(|r| domains.as_ref().is_none_or(|d| d.contains(&r.domain)))
            .filter(|r| codes.as_ref().is_none_or(|c| c.contains(&r.error.code)))
            .filter(|r| query.from.is_none_or(|from| r.last_seen_at >= from))
            .filter(|r| query.to.is_none_or(|to| r.last_seen_at <= to))
            .filter(|r| {
                needle.as_ref().is_none_or(|n| {
                    [
                        r.display_id.as_str(),
                        r.error.code.as_str(),
                        r.error.message.as_str(),
                        r.source.path.as_str(),
                    ]
                    .iter()
                    .any(|field| field.to_lowercase().contains(n))
                })
            })
            .collect();

        match query.sort {
            InboxSort::LastSeenDesc => matched.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at)),
            InboxSort::FirstSeenDesc => {
                matched.sort_by(|a, b| b.first_seen_at.cmp(&a.first_seen_at))
            }
            InboxSort::OccurrencesDesc => matched.sort_by(|a, b| {
                b.occurrence_count
                    .cmp(&a.occurrence_count)
                    .then(b.last_seen_at.cmp(&a.last_seen_at))
            }),
            InboxSort::SeverityDesc => matched.sort_by(|a, b| {
                b.severity
                    .cmp(&a.severity)
                    .then(b.last_seen_at.cmp(&a.last_seen_at))
            }),
        }

        let total = matched.len() as u64;
        let page = query.page.max(1);
        let page_size = query.page_size.max(1);
        let items = matched
            .into_iter()
            .skip(((page - 1) * page_size) as usize)
            .take(page_size as usize)
            .collect();

        Ok(InboxPage {
            items,
            total,
            page,
            page_size,
        })
    }

    fn update<F>(&self, error_id: &str, f: F) -> ReplayResult<ErrorRecord>
    where
        F: FnOnce(&mut ErrorRecord) -> ReplayResult<()>,
    {
        let txn = self.storage.begin_write()?;
        let mut record = load_record(&txn, error_id)?;
        f(&mut record)?;
        save_record(&txn, &record)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(record)
    }

    /// OPEN → ACKED
    pub fn acknowledge(&self, error_id: &str, actor: &str) -> ReplayResult<ErrorRecord> {
        self.update(error_id, |record| match record.status {
            ErrorStatus::Open => {
                record.status = ErrorStatus::Acked;
                record.steps.push(step(StepKind::Acknowledged, Some(actor)));
                Ok(())
            }
            ErrorStatus::Acked => Ok(()),
            status => Err(ReplayError::InvalidState {
                display_id: record.display_id.clone(),
                status,
            }),
        })
    }

    /// Any status → SUPPRESSED; later occurrences keep counting silently
    pub fn suppress(&self, error_id: &str, actor: &str) -> ReplayResult<ErrorRecord> {
        self.update(error_id, |record| {
            if record.status != ErrorStatus::Suppressed {
                record.status = ErrorStatus::Suppressed;
                record.steps.push(step(StepKind::Suppressed, Some(actor)));
            }
            Ok(())
        })
    }

    /// Mint a one-time token authorizing `user_id` to retry the record
    pub fn mint_token(&self, error_id: &str, user_id: &str) -> ReplayResult<ActionToken> {
        let txn = self.storage.begin_write()?;
        let mut record = load_record(&txn, error_id)?;
        let plan = record
            .retry_plan
            .as_ref()
            .filter(|p| p.allowed)
            .ok_or_else(|| ReplayError::RetryNotAllowed(record.display_id.clone()))?;
        if matches!(record.status, ErrorStatus::Resolved | ErrorStatus::Suppressed) {
            return Err(ReplayError::InvalidState {
                display_id: record.display_id.clone(),
                status: record.status,
            });
        }
        let ttl = plan.action_token_ttl_seconds;

        let token = tokens::mint(&txn, error_id, user_id, ttl, shared::util::now())?;
        record.steps.push(step(StepKind::TokenIssued, Some(user_id)));
        save_record(&txn, &record)?;
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(error_id = %error_id, user_id = %user_id, ttl, "Action token issued");
        Ok(token)
    }

    /// Redeem a token and replay the captured request
    ///
    /// The token is consumed before the patch is checked; a rejected patch
    /// needs a fresh token. A record that is resolved, suppressed or already
    /// being replayed refuses the retry without consuming the token.
    pub async fn retry(
        &self,
        error_id: &str,
        request: &RetryRequest,
        user_id: &str,
        authorization: Option<String>,
    ) -> ReplayResult<RetryOutcome> {
        let (record, _claim) = {
            let txn = self.storage.begin_write()?;
            let record = load_record(&txn, error_id)?;
            if matches!(record.status, ErrorStatus::Resolved | ErrorStatus::Suppressed) {
                return Err(ReplayError::InvalidState {
                    display_id: record.display_id.clone(),
                    status: record.status,
                });
            }
            let claim = self.claim_replay(&record)?;
            tokens::redeem(&txn, &request.token, error_id, user_id, shared::util::now())?;
            txn.commit().map_err(StorageError::from)?;
            (record, claim)
        };
        let plan = record
            .retry_plan
            .clone()
            .filter(|p| p.allowed)
            .ok_or_else(|| ReplayError::RetryNotAllowed(record.display_id.clone()))?;

        let mut call = self.build_call(&record, &plan, request)?;
        let attempt = record.retry_attempts + 1;
        call.idempotency_key =
            capture::idempotency_key(&plan.idempotency_key_template, &record.id, attempt);
        call.authorization = authorization;

        tracing::info!(
            error_id = %record.id,
            attempt,
            method = %call.method,
            path = %call.path,
            "Replaying captured request"
        );
        let reply = match self.replayer.replay(&call).await {
            Ok(reply) => reply,
            Err(reason) => {
                tracing::warn!(error_id = %record.id, %reason, "Replay transport failed");
                ReplayReply {
                    status_code: 502,
                    body: serde_json::json!({ "ok": false, "message": reason }),
                }
            }
        };
        let resolved = reply.status_code < 400;

        self.update(error_id, |record| {
            let mut outcome = step(
                if resolved {
                    StepKind::RetrySucceeded
                } else {
                    StepKind::RetryFailed
                },
                Some(user_id),
            );
            outcome.status_code = Some(reply.status_code);
            outcome.message = reply
                .body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string);
            record.steps.push(outcome);
            if resolved {
                record.status = ErrorStatus::Resolved;
                record.resolved_by = Some(user_id.to_string());
                record.resolved_at = Some(shared::util::now());
            } else {
                record.retry_attempts += 1;
            }
            Ok(())
        })?;

        Ok(RetryOutcome {
            error_id: error_id.to_string(),
            attempt,
            idempotency_key: call.idempotency_key,
            status_code: reply.status_code,
            resolved,
            response: reply.body,
        })
    }

    /// Apply the operator's patch to the captured request
    fn build_call(
        &self,
        record: &ErrorRecord,
        plan: &RetryPlan,
        request: &RetryRequest,
    ) -> ReplayResult<ReplayCall> {
        let patch = &request.patch;
        let editable = |location: FieldLocation, key: &String| {
            if plan.is_editable(location, key) {
                Ok(())
            } else {
                Err(ReplayError::FieldNotEditable {
                    location,
                    key: key.clone(),
                })
            }
        };
        if let Some(body) = &patch.body {
            body.keys().try_for_each(|k| editable(FieldLocation::Body, k))?;
        }
        if let Some(query) = &patch.query {
            query.keys().try_for_each(|k| editable(FieldLocation::Query, k))?;
        }
        if let Some(path) = &patch.path {
            path.keys().try_for_each(|k| editable(FieldLocation::Path, k))?;
        }

        let mut body = plan.base_body_redacted.clone();
        if let (Value::Object(base), Some(edits)) = (&mut body, &patch.body) {
            for (k, v) in edits {
                base.insert(k.clone(), v.clone());
            }
        }
        // Values still redacted were never re-entered by the operator
        if let Value::Object(base) = &mut body {
            base.retain(|_, v| v.as_str() != Some(capture::REDACTED));
        }

        let mut query = plan.base_query.clone();
        if let Some(edits) = &patch.query {
            query.extend(edits.clone());
        }
        query.retain(|_, v| v != capture::REDACTED);

        let mut params = plan.path_params.clone();
        if let Some(edits) = &patch.path {
            params.extend(edits.clone());
        }
        let path = self.allowed_path(&plan.target.path, &params)?;

        Ok(ReplayCall {
            error_id: record.id.clone(),
            method: plan.target.method.clone(),
            path,
            query,
            body,
            idempotency_key: String::new(),
            authorization: None,
        })
    }

    /// Render the target and check it against the allow-list
    fn allowed_path(
        &self,
        template: &str,
        params: &std::collections::BTreeMap<String, String>,
    ) -> ReplayResult<String> {
        let unsafe_value = params
            .values()
            .any(|v| v.is_empty() || v.contains(['/', '?', '#', '%', '\\']) || v == "..");
        let rendered = capture::render_path(template, params)
            .filter(|_| !unsafe_value)
            .ok_or_else(|| ReplayError::PathNotAllowed(template.to_string()))?;

        let clean = rendered.starts_with('/')
            && !rendered.contains("://")
            && !rendered.split('/').any(|s| s == ".." || s == ".");
        let listed = self.config.allowed_paths.iter().any(|prefix| {
            rendered == *prefix
                || rendered
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        });
        if clean && listed {
            Ok(rendered)
        } else {
            Err(ReplayError::PathNotAllowed(rendered))
        }
    }
}
