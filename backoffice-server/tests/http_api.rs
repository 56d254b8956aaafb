//! HTTP surface: auth, scoping, envelopes, capture and replay

mod common;

use axum::body::Body;
use backoffice_server::build_app;
use common::{add_line, bearer, dish, harness, harness_with, open_order, stock_item};
use http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use shared::models::{ErrorStatus, OrderStatus};
use tower::ServiceExt;

async fn call(
    state: &backoffice_server::ServerState,
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    let body = match body {
        Some(v) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    send(state, builder.body(body).unwrap()).await
}

async fn send(state: &backoffice_server::ServerState, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_app(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn health_is_public_and_api_needs_a_token() {
    let h = harness();

    let (status, body) = call(&h.state, "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");

    let (status, body) = call(&h.state, "GET", "/api/inventory/items", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["ok"], false);
    assert_eq!(body["code"], "NOT_AUTHENTICATED");

    let (status, _) = call(
        &h.state,
        "GET",
        "/api/inventory/items",
        Some("Bearer not-a-jwt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn other_venue_is_forbidden() {
    let h = harness();
    let auth = bearer(&h.state, "u1", "v1");
    stock_item(&h.state, "v1", "Flour");

    let (status, body) = call(&h.state, "GET", "/api/inventory/items", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let (status, body) = call(
        &h.state,
        "GET",
        "/api/inventory/items?venue_id=v2",
        Some(&auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "PERMISSION_DENIED");
}

#[tokio::test]
async fn disabled_module_is_refused() {
    let h = harness_with(|cfg| cfg.disabled_modules = "v1:payroll".into());
    let auth = bearer(&h.state, "u1", "v1");

    let (status, body) = call(
        &h.state,
        "POST",
        "/api/payroll/compute",
        Some(&auth),
        Some(json!({"gross_annual": "20000", "category": "Single"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FEATURE_DISABLED");

    // Another venue keeps the module
    let auth = bearer(&h.state, "u2", "v2");
    let (_, body) = call(
        &h.state,
        "POST",
        "/api/payroll/compute",
        Some(&auth),
        Some(json!({"gross_annual": "20000", "category": "Single"})),
    )
    .await;
    assert_ne!(body["code"], "FEATURE_DISABLED");
}

#[tokio::test]
async fn malformed_body_gets_the_error_envelope() {
    let h = harness();
    let auth = bearer(&h.state, "u1", "v1");

    let request = Request::builder()
        .method("POST")
        .uri("/api/inventory/suppliers")
        .header(header::AUTHORIZATION, &auth)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&h.state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (status, body) = call(
        &h.state,
        "POST",
        "/api/inventory/suppliers",
        Some(&auth),
        Some(json!({"venue_id": "v1", "name": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert_eq!(body["details"][0]["path"], "name");
}

#[tokio::test]
async fn payment_idempotency_key_from_header() {
    let h = harness();
    let auth = bearer(&h.state, "u1", "v1");
    let x = stock_item(&h.state, "v1", "Lemonade");
    let m = dish(&h.state, "v1", &x.id, dec!(1), 5000);
    let order = open_order(&h.state, "v1");
    add_line(&h.state, &order.id, &m.id, 1);
    h.state.orders.send(&order.id).unwrap();

    let pay = || {
        Request::builder()
            .method("POST")
            .uri(format!("/api/pos/orders/{}/payments", order.id))
            .header(header::AUTHORIZATION, &auth)
            .header(header::CONTENT_TYPE, "application/json")
            .header("Idempotency-Key", "till-7-0001")
            .body(Body::from(json!({"tender_type": "CASH", "amount": 5000}).to_string()))
            .unwrap()
    };

    let (status, first) = send(&h.state, pay()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["result"]["payment"]["idempotency_key"], "till-7-0001");
    assert_eq!(first["result"]["order"]["status"], "PAID");

    let (status, again) = send(&h.state, pay()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["result"]["payment"]["id"], first["result"]["payment"]["id"]);
    assert_eq!(h.state.tender.list_payments(&order.id).unwrap().len(), 1);
    assert_eq!(h.state.orders.get_order(&order.id).unwrap().status, OrderStatus::Paid);
}

#[tokio::test]
async fn captured_failure_is_retried_with_a_patch() {
    let h = harness();
    let auth = bearer(&h.state, "u1", "v1");

    let (status, body) = call(
        &h.state,
        "POST",
        "/api/pos/orders",
        Some(&auth),
        Some(json!({"session_id": "", "table_id": "table-4"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");

    let (status, body) = call(
        &h.state,
        "GET",
        "/api/observability/errors?venue_id=v1",
        Some(&auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page"]["total"], 1);
    let record = &body["page"]["items"][0];
    assert_eq!(record["display_id"], "ERR-000001");
    assert_eq!(record["domain"], "pos");
    assert_eq!(record["retry_plan"]["allowed"], true);
    let error_id = record["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &h.state,
        "POST",
        &format!("/api/observability/errors/{error_id}/token"),
        Some(&auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"]["token"].as_str().unwrap().to_string();

    let retry = json!({"token": token, "patch": {"body": {"table_id": "table-42"}}});
    let (status, body) = call(
        &h.state,
        "POST",
        &format!("/api/observability/errors/{error_id}/retry"),
        Some(&auth),
        Some(retry.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["resolved"], true);
    assert_eq!(body["outcome"]["status_code"], 201);
    assert_eq!(
        body["outcome"]["idempotency_key"],
        format!("OBS-RETRY-{error_id}-1")
    );

    {
        let calls = h.replayer.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "POST");
        assert_eq!(calls[0].path, "/api/pos/orders");
        assert_eq!(calls[0].body["table_id"], "table-42");
        assert_eq!(calls[0].body["session_id"], "");
        assert_eq!(calls[0].authorization.as_deref(), Some(auth.as_str()));
    }
    assert_eq!(h.state.inbox.get(&error_id).unwrap().status, ErrorStatus::Resolved);

    let (status, body) = call(
        &h.state,
        "POST",
        &format!("/api/observability/errors/{error_id}/retry"),
        Some(&auth),
        Some(retry),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "TOKEN_USED");
    assert_eq!(h.replayer.calls.lock().len(), 1);
}
