use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use revenue_ledger::adapters::InMemoryTransactionStore;
use revenue_ledger::config::{Config, StoreBackend};
use revenue_ledger::domain::MAX_AMOUNT_CENTS;
use revenue_ledger::handlers::auth::{sign, SIGNATURE_HEADER};
use revenue_ledger::{create_app, AppState};

const SECRET: &str = "collaborator-secret";

fn app_with(config: Config) -> Router {
    let state = AppState::new(Arc::new(InMemoryTransactionStore::new()), config).unwrap();
    create_app(state)
}

fn app() -> Router {
    app_with(Config {
        store_backend: StoreBackend::Memory,
        ..Config::default()
    })
}

fn signed_app() -> Router {
    app_with(Config {
        store_backend: StoreBackend::Memory,
        collaborator_webhook_secret: Some(SECRET.to_string()),
        ..Config::default()
    })
}

async fn send(
    app: &Router,
    request: Request<Body>,
) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, headers, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(app, request).await;
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn payout(key: &str, teacher_ref: &str, amount_cents: i64) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/payouts")
        .header(header::CONTENT_TYPE, "application/json")
        .header("Idempotency-Key", key)
        .body(Body::from(
            json!({ "teacher_ref": teacher_ref, "amount_cents": amount_cents }).to_string(),
        ))
        .unwrap()
}

async fn record_payment(app: &Router, teacher_ref: &str, gross_amount: i64) -> Value {
    let (status, body) = send_json(
        app,
        post_json(
            "/payments",
            json!({
                "gross_amount": gross_amount,
                "teacher_ref": teacher_ref,
                "course_ref": "course-1",
                "student_ref": "student-1",
                "course_title": "Intro to Rust",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

#[tokio::test]
async fn test_record_payment_splits_gross_amount() {
    let app = app();
    let tx = record_payment(&app, "teacher-1", 10_000).await;

    assert_eq!(tx["type"], "payment");
    assert_eq!(tx["status"], "completed");
    assert_eq!(tx["gross_amount"], 10_000);
    assert_eq!(tx["admin_amount"], 1_000);
    assert_eq!(tx["teacher_amount"], 9_000);
    assert_eq!(tx["fee_rate_bps"], 1_000);
}

#[tokio::test]
async fn test_record_payment_rejects_negative_amount() {
    let app = app();
    let (status, body) = send_json(
        &app,
        post_json("/payments", json!({ "gross_amount": -1, "teacher_ref": "teacher-1" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_amount");
}

#[tokio::test]
async fn test_record_payment_rejects_amount_over_limit() {
    let app = app();
    let (status, body) = send_json(
        &app,
        post_json(
            "/payments",
            json!({ "gross_amount": MAX_AMOUNT_CENTS + 1, "teacher_ref": "teacher-1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_amount");

    record_payment(&app, "teacher-1", MAX_AMOUNT_CENTS).await;
    record_payment(&app, "teacher-1", MAX_AMOUNT_CENTS).await;

    let (status, balance) = send_json(&app, get("/teachers/teacher-1/balance")).await;
    assert_eq!(status, StatusCode::OK, "{}", balance);
    assert_eq!(balance["lifetime_earned"], 2 * (MAX_AMOUNT_CENTS - MAX_AMOUNT_CENTS / 10));

    let (status, summary) = send_json(&app, get("/summary")).await;
    assert_eq!(status, StatusCode::OK, "{}", summary);
    assert_eq!(summary["total_gross_revenue"], 2 * MAX_AMOUNT_CENTS);
}

#[tokio::test]
async fn test_record_payment_rejects_unknown_fields() {
    let app = app();
    let (status, _) = send_json(
        &app,
        post_json(
            "/payments",
            json!({ "gross_amount": 100, "teacher_ref": "teacher-1", "admin_amount": 0 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signed_writes_require_signature() {
    let app = signed_app();
    let body = json!({ "gross_amount": 5_000, "teacher_ref": "teacher-1" }).to_string();

    let (status, _) =
        send_json(&app, post_json("/payments", serde_json::from_str(&body).unwrap())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/payments")
        .header(header::CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, "deadbeef")
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, _) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/payments")
        .header(header::CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, sign(SECRET, body.as_bytes()).unwrap())
        .body(Body::from(body))
        .unwrap();
    let (status, tx) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(tx["teacher_amount"], 4_500);
}

#[tokio::test]
async fn test_status_update_only_leaves_pending_once() {
    let app = app();
    let (status, tx) = send_json(
        &app,
        post_json(
            "/payments",
            json!({ "gross_amount": 2_000, "teacher_ref": "teacher-1", "status": "pending" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = tx["id"].as_str().unwrap().to_string();

    let patch = |status: &str| {
        Request::builder()
            .method("PATCH")
            .uri(format!("/transactions/{}/status", id))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "status": status }).to_string()))
            .unwrap()
    };

    let (status, updated) = send_json(&app, patch("completed")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "completed");
    assert!(updated["completed_at"].is_string());

    let (status, body) = send_json(&app, patch("failed")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_state_transition");
}

#[tokio::test]
async fn test_get_unknown_transaction_is_not_found() {
    let app = app();
    let (status, body) = send_json(
        &app,
        get("/transactions/00000000-0000-0000-0000-000000000000"),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_refund_reduces_teacher_balance() {
    let app = app();
    let payment = record_payment(&app, "teacher-1", 10_000).await;

    let (status, refund) = send_json(
        &app,
        post_json(
            "/refunds",
            json!({ "original_transaction_id": payment["id"], "description": "student request" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(refund["type"], "refund");
    assert_eq!(refund["teacher_amount"], 9_000);

    let (status, body) = send_json(
        &app,
        post_json("/refunds", json!({ "original_transaction_id": payment["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

    let (status, balance) = send_json(&app, get("/teachers/teacher-1/balance")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(balance["pending_amount"], 0);
    assert_eq!(balance["lifetime_refunded"], 9_000);
}

#[tokio::test]
async fn test_list_transactions_paginates_and_filters() {
    let app = app();
    for i in 0..5 {
        record_payment(&app, "teacher-1", 1_000 + i).await;
    }
    record_payment(&app, "teacher-2", 3_000).await;

    let (status, page) = send_json(
        &app,
        get(concat!(
            "/transactions?teacher_ref=teacher-1&limit=2&page=2",
            "&sort_by=gross_amount&direction=asc"
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 5);
    assert_eq!(page["pages"], 3);
    let amounts: Vec<i64> = page["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tx| tx["gross_amount"].as_i64().unwrap())
        .collect();
    assert_eq!(amounts, vec![1_002, 1_003]);

    let (status, page) = send_json(&app, get("/transactions?type=withdrawal")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 0);

    let (status, _) = send_json(&app, get("/transactions?type=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_export_transactions_as_csv() {
    let app = app();
    record_payment(&app, "teacher-1", 10_000).await;
    record_payment(&app, "teacher-2", 7_500).await;

    let (status, headers, body) =
        send(&app, get("/transactions/export?teacher_ref=teacher-2")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));

    let csv = String::from_utf8(body).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("id,type,status,gross_amount"));
    assert!(lines[1].contains("teacher-2"));
    assert!(lines[1].contains("7500"));
}

#[tokio::test]
async fn test_platform_summary_totals() {
    let app = app();
    record_payment(&app, "teacher-1", 10_000).await;
    record_payment(&app, "teacher-2", 7_500).await;

    let (status, summary) = send_json(&app, get("/summary?granularity=day&top=1")).await;
    assert_eq!(status, StatusCode::OK, "{}", summary);
    assert_eq!(summary["total_gross_revenue"], 17_500);
    assert_eq!(summary["total_admin_revenue"], 1_750);
    assert_eq!(summary["total_teacher_payouts"], 15_750);
    assert_eq!(summary["payment_count"], 2);

    let top = summary["top_teachers"].as_array().unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0]["teacher_ref"], "teacher-1");
}

#[tokio::test]
async fn test_summary_rejects_inverted_range() {
    let app = app();
    let (status, _) = send_json(
        &app,
        get("/summary?from=2026-02-01T00:00:00Z&to=2026-01-01T00:00:00Z"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_summary_rejects_timestamps_outside_supported_years() {
    let app = app();
    for query in [
        "/summary?from=1969-12-31T00:00:00Z",
        "/summary?to=1900-01-01T00:00:00Z",
        "/summary?as_of=1969-07-20T20:17:00Z",
    ] {
        let (status, body) = send_json(&app, get(query)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}: {}", query, body);
    }
}

#[tokio::test]
async fn test_payout_lifecycle() {
    let app = app();
    record_payment(&app, "teacher-1", 10_000).await;

    let (status, body) = send_json(&app, payout("key-too-much", "teacher-1", 9_001)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "insufficient_balance");

    let (status, headers, body) = send(&app, payout("key-1", "teacher-1", 6_000)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(headers.get("idempotent-replayed").is_none());
    let created: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(created["type"], "withdrawal");
    assert_eq!(created["status"], "pending");

    let (status, headers, body) = send(&app, payout("key-1", "teacher-1", 6_000)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["idempotent-replayed"], "true");
    let replayed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(replayed["id"], created["id"]);

    let (status, headers, body) = send(&app, payout("key-2", "teacher-1", 1_000)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(headers[header::RETRY_AFTER], "5");
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["code"], "concurrent_payout");

    let (_, balance) = send_json(&app, get("/teachers/teacher-1/balance")).await;
    assert_eq!(balance["pending_amount"], 9_000);
    assert_eq!(balance["in_flight_amount"], 6_000);
}

#[tokio::test]
async fn test_payout_requires_idempotency_key() {
    let app = app();
    let (status, body) = send_json(
        &app,
        post_json("/payouts", json!({ "teacher_ref": "teacher-1", "amount_cents": 100 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn test_health_and_integrity_alerts() {
    let app = app();

    let (status, health) = send_json(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");

    let (status, alerts) = send_json(&app, get("/integrity/alerts")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alerts, json!([]));
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = app();
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "trace-42")
        .body(Body::empty())
        .unwrap();

    let (_, headers, _) = send(&app, request).await;
    assert_eq!(headers["x-request-id"], "trace-42");
}
