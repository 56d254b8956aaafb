use super::*;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;

use crate::db::Storage;

/// Records calls and answers with a fixed status
struct RecordingReplayer {
    status: Mutex<u16>,
    calls: Mutex<Vec<ReplayCall>>,
}

impl RecordingReplayer {
    fn new(status: u16) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(status),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl Replayer for RecordingReplayer {
    async fn replay(&self, call: &ReplayCall) -> Result<ReplayReply, String> {
        self.calls.lock().push(call.clone());
        let status_code = *self.status.lock();
        Ok(ReplayReply {
            status_code,
            body: json!({ "ok": status_code < 400 }),
        })
    }
}

fn inbox(replayer: Arc<RecordingReplayer>) -> ErrorInbox {
    let storage = Storage::open_in_memory().unwrap();
    ErrorInbox::new(storage, ReplayConfig::default(), replayer)
}

fn payment_failure(venue: &str, order_id: &str) -> FailedRequest {
    FailedRequest {
        venue_id: venue.into(),
        method: "POST".into(),
        path: format!("/api/pos/orders/{order_id}/payments"),
        query: BTreeMap::new(),
        body: json!({"amount": 5000, "method": "CARD", "card_number": "4111111111111111"}),
        status_code: 422,
        response: json!({"ok": false, "code": "PAYMENT_INVALID_AMOUNT", "message": "Amount exceeds balance"}),
    }
}

#[test]
fn test_capture_redacts_and_merges() {
    let inbox = inbox(RecordingReplayer::new(200));
    let first = inbox.capture(payment_failure("v1", "ORD-000001")).unwrap();
    assert_eq!(first.display_id, "ERR-000001");
    assert_eq!(first.domain, "pos");
    assert_eq!(first.severity, Severity::Medium);
    assert_eq!(first.source.body["card_number"], capture::REDACTED);
    assert_eq!(first.error.code, "PAYMENT_INVALID_AMOUNT");

    // Same route and code on another order: one record, two occurrences
    let second = inbox.capture(payment_failure("v1", "ORD-000002")).unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.occurrence_count, 2);
    assert!(second.last_seen_at >= first.last_seen_at);

    // Another venue gets its own record
    let other = inbox.capture(payment_failure("v2", "ORD-000001")).unwrap();
    assert_ne!(other.id, first.id);
    assert_eq!(other.display_id, "ERR-000002");
}

#[tokio::test]
async fn test_retry_with_editable_patch_resolves() {
    let replayer = RecordingReplayer::new(200);
    let inbox = inbox(replayer.clone());
    let record = inbox.capture(payment_failure("v1", "ORD-000001")).unwrap();

    let token = inbox.mint_token(&record.id, "alice").unwrap();
    let request = RetryRequest {
        token: token.token.clone(),
        patch: shared::models::RetryPatch {
            body: Some(serde_json::from_value(json!({"amount": 4000})).unwrap()),
            ..Default::default()
        },
    };
    let outcome = inbox
        .retry(&record.id, &request, "alice", Some("Bearer t".into()))
        .await
        .unwrap();

    assert!(outcome.resolved);
    assert_eq!(outcome.attempt, 1);
    assert_eq!(outcome.idempotency_key, format!("OBS-RETRY-{}-1", record.id));

    let calls = replayer.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, "/api/pos/orders/ORD-000001/payments");
    assert_eq!(calls[0].body["amount"], 4000);
    assert_eq!(calls[0].body["method"], "CARD");
    // The redacted card number is not replayed
    assert!(calls[0].body.get("card_number").is_none());
    assert_eq!(calls[0].authorization.as_deref(), Some("Bearer t"));
    drop(calls);

    let stored = inbox.get(&record.id).unwrap();
    assert_eq!(stored.status, ErrorStatus::Resolved);
    assert_eq!(stored.resolved_by.as_deref(), Some("alice"));
    assert_eq!(stored.steps.last().unwrap().kind, StepKind::RetrySucceeded);
}

#[tokio::test]
async fn test_token_is_single_use_and_patch_is_checked() {
    let replayer = RecordingReplayer::new(500);
    let inbox = inbox(replayer.clone());
    let record = inbox.capture(payment_failure("v1", "ORD-000001")).unwrap();

    // Unknown field: token is spent, nothing replayed
    let token = inbox.mint_token(&record.id, "alice").unwrap();
    let bad = RetryRequest {
        token: token.token.clone(),
        patch: shared::models::RetryPatch {
            body: Some(serde_json::from_value(json!({"tip": 100})).unwrap()),
            ..Default::default()
        },
    };
    let err = inbox.retry(&record.id, &bad, "alice", None).await.unwrap_err();
    assert!(matches!(err, ReplayError::FieldNotEditable { .. }));
    let app: AppError = err.into();
    assert_eq!(app.code, ErrorCode::FieldNotEditable);

    let err = inbox.retry(&record.id, &bad, "alice", None).await.unwrap_err();
    assert!(matches!(err, ReplayError::TokenUsed));
    assert!(replayer.calls.lock().is_empty());

    // Another user's token
    let token = inbox.mint_token(&record.id, "alice").unwrap();
    let req = RetryRequest {
        token: token.token,
        patch: Default::default(),
    };
    let err = inbox.retry(&record.id, &req, "bob", None).await.unwrap_err();
    assert!(matches!(err, ReplayError::TokenUserMismatch));

    // Failing replay counts an attempt and keeps the record open
    let token = inbox.mint_token(&record.id, "alice").unwrap();
    let req = RetryRequest {
        token: token.token,
        patch: Default::default(),
    };
    let outcome = inbox.retry(&record.id, &req, "alice", None).await.unwrap();
    assert!(!outcome.resolved);
    let stored = inbox.get(&record.id).unwrap();
    assert_eq!(stored.retry_attempts, 1);
    assert_eq!(stored.status, ErrorStatus::Open);

    // Next attempt carries the next key
    *replayer.status.lock() = 201;
    let token = inbox.mint_token(&record.id, "alice").unwrap();
    let req = RetryRequest {
        token: token.token,
        patch: Default::default(),
    };
    let outcome = inbox.retry(&record.id, &req, "alice", None).await.unwrap();
    assert_eq!(outcome.idempotency_key, format!("OBS-RETRY-{}-2", record.id));
    assert!(outcome.resolved);
}

#[tokio::test]
async fn test_outstanding_token_cannot_replay_a_closed_record() {
    let replayer = RecordingReplayer::new(200);
    let inbox = inbox(replayer.clone());
    let record = inbox.capture(payment_failure("v1", "ORD-000001")).unwrap();

    let first = inbox.mint_token(&record.id, "alice").unwrap();
    let second = inbox.mint_token(&record.id, "bob").unwrap();
    let req = |token: String| RetryRequest {
        token,
        patch: Default::default(),
    };

    let outcome = inbox.retry(&record.id, &req(first.token), "alice", None).await.unwrap();
    assert!(outcome.resolved);

    let err = inbox
        .retry(&record.id, &req(second.token), "bob", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReplayError::InvalidState {
            status: ErrorStatus::Resolved,
            ..
        }
    ));
    assert_eq!(replayer.calls.lock().len(), 1);
    let stored = inbox.get(&record.id).unwrap();
    assert_eq!(stored.resolved_by.as_deref(), Some("alice"));

    // Suppressed records refuse too
    let other = inbox.capture(payment_failure("v2", "ORD-000001")).unwrap();
    let token = inbox.mint_token(&other.id, "alice").unwrap();
    inbox.suppress(&other.id, "manager").unwrap();
    let err = inbox.retry(&other.id, &req(token.token), "alice", None).await.unwrap_err();
    assert!(matches!(
        err,
        ReplayError::InvalidState {
            status: ErrorStatus::Suppressed,
            ..
        }
    ));
    assert_eq!(replayer.calls.lock().len(), 1);
}

/// Holds each replay until released
struct GatedReplayer {
    entered: tokio::sync::Notify,
    release: tokio::sync::Notify,
    calls: Mutex<u32>,
}

#[async_trait::async_trait]
impl Replayer for GatedReplayer {
    async fn replay(&self, _call: &ReplayCall) -> Result<ReplayReply, String> {
        *self.calls.lock() += 1;
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ReplayReply {
            status_code: 200,
            body: json!({ "ok": true }),
        })
    }
}

#[tokio::test]
async fn test_concurrent_retries_replay_once() {
    let replayer = Arc::new(GatedReplayer {
        entered: tokio::sync::Notify::new(),
        release: tokio::sync::Notify::new(),
        calls: Mutex::new(0),
    });
    let storage = Storage::open_in_memory().unwrap();
    let inbox = ErrorInbox::new(storage, ReplayConfig::default(), replayer.clone());
    let record = inbox.capture(payment_failure("v1", "ORD-000001")).unwrap();

    let first = inbox.mint_token(&record.id, "alice").unwrap();
    let second = inbox.mint_token(&record.id, "bob").unwrap();

    let running = {
        let inbox = inbox.clone();
        let id = record.id.clone();
        tokio::spawn(async move {
            let req = RetryRequest {
                token: first.token,
                patch: Default::default(),
            };
            inbox.retry(&id, &req, "alice", None).await
        })
    };
    replayer.entered.notified().await;

    let req = RetryRequest {
        token: second.token.clone(),
        patch: Default::default(),
    };
    let err = inbox.retry(&record.id, &req, "bob", None).await.unwrap_err();
    assert!(matches!(err, ReplayError::RetryInFlight(_)));

    replayer.release.notify_one();
    assert!(running.await.unwrap().unwrap().resolved);
    assert_eq!(*replayer.calls.lock(), 1);

    // The refused token was not spent, but the record is closed now
    let err = inbox.retry(&record.id, &req, "bob", None).await.unwrap_err();
    assert!(matches!(err, ReplayError::InvalidState { .. }));
}

#[tokio::test]
async fn test_replay_refuses_paths_off_the_allow_list() {
    let replayer = RecordingReplayer::new(200);
    let inbox = inbox(replayer.clone());
    let mut failed = payment_failure("v1", "ORD-000001");
    failed.path = "/api/payroll/compute-9".into();
    let record = inbox.capture(failed).unwrap();

    let token = inbox.mint_token(&record.id, "alice").unwrap();
    let req = RetryRequest {
        token: token.token,
        patch: Default::default(),
    };
    let err = inbox.retry(&record.id, &req, "alice", None).await.unwrap_err();
    assert!(matches!(err, ReplayError::PathNotAllowed(_)));

    // Path variables cannot climb out of the allowed prefix
    let record = inbox.capture(payment_failure("v1", "ORD-000001")).unwrap();
    let token = inbox.mint_token(&record.id, "alice").unwrap();
    let req = RetryRequest {
        token: token.token,
        patch: shared::models::RetryPatch {
            path: Some(BTreeMap::from([("id".to_string(), "..".to_string())])),
            ..Default::default()
        },
    };
    let err = inbox.retry(&record.id, &req, "alice", None).await.unwrap_err();
    assert!(matches!(err, ReplayError::PathNotAllowed(_)));
    assert!(replayer.calls.lock().is_empty());
}

#[test]
fn test_inbox_filters_sort_and_scope() {
    let inbox = inbox(RecordingReplayer::new(200));
    let pay = inbox.capture(payment_failure("v1", "ORD-000001")).unwrap();
    inbox.capture(payment_failure("v1", "ORD-000002")).unwrap();
    let kds = inbox
        .capture(FailedRequest {
            venue_id: "v1".into(),
            method: "POST".into(),
            path: "/api/kds/tickets/T1/bump".into(),
            query: BTreeMap::new(),
            body: json!({"target": "READY"}),
            status_code: 500,
            response: json!({"ok": false, "code": "INTERNAL_ERROR", "message": "boom"}),
        })
        .unwrap();

    let query = |f: fn(&mut InboxQuery)| {
        let mut q = InboxQuery {
            venue_id: "v1".into(),
            page: 1,
            page_size: 25,
            ..Default::default()
        };
        f(&mut q);
        inbox.list(&q).unwrap()
    };

    assert_eq!(query(|_| {}).total, 2);
    let by_domain = query(|q| q.domains = Some("kds".into()));
    assert_eq!(by_domain.items[0].id, kds.id);
    let by_severity = query(|q| q.severities = Some("high".into()));
    assert_eq!(by_severity.total, 1);
    let by_text = query(|q| q.q = Some("exceeds".into()));
    assert_eq!(by_text.items[0].id, pay.id);
    let by_count = query(|q| q.sort = InboxSort::OccurrencesDesc);
    assert_eq!(by_count.items[0].id, pay.id);
    let paged = query(|q| q.page_size = 1);
    assert_eq!(paged.items.len(), 1);
    assert_eq!(paged.total, 2);

    let mut global = InboxQuery {
        venue_id: "GLOBAL".into(),
        page: 1,
        page_size: 25,
        ..Default::default()
    };
    let err = inbox.list(&global).unwrap_err();
    assert_eq!(AppError::from(err).code, ErrorCode::PermissionDenied);

    global.venue_id = "v1".into();
    global.statuses = Some("BOGUS".into());
    assert!(matches!(inbox.list(&global), Err(ReplayError::InvalidFilter(_))));
}

#[test]
fn test_acknowledge_and_suppress() {
    let inbox = inbox(RecordingReplayer::new(200));
    let record = inbox.capture(payment_failure("v1", "ORD-000001")).unwrap();

    let acked = inbox.acknowledge(&record.id, "alice").unwrap();
    assert_eq!(acked.status, ErrorStatus::Acked);
    let suppressed = inbox.suppress(&record.id, "alice").unwrap();
    assert_eq!(suppressed.status, ErrorStatus::Suppressed);
    assert!(matches!(
        inbox.acknowledge(&record.id, "alice"),
        Err(ReplayError::InvalidState { .. })
    ));
    assert!(matches!(
        inbox.mint_token(&record.id, "alice"),
        Err(ReplayError::InvalidState { .. })
    ));
    assert!(matches!(inbox.get("missing"), Err(ReplayError::RecordNotFound(_))));
}
