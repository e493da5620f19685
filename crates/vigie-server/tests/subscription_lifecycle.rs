use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use vigie_broadcast::{Broadcaster, DemoChannel};
use vigie_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use vigie_payments::{IntentHandle, IntentStatus, PaymentError, PaymentGate, PaymentGateway};
use vigie_server::{app, AppState};
use vigie_types::Plan;

/// Gateway that refuses everything; these tests never reach the gateway.
struct UnusedGateway;

#[async_trait]
impl PaymentGateway for UnusedGateway {
    async fn create_intent(
        &self,
        _plan: Plan,
        _reference: &str,
    ) -> Result<IntentHandle, PaymentError> {
        Err(PaymentError::Gateway("gateway not configured".into()))
    }

    async fn retrieve_intent(&self, _intent_id: &str) -> Result<IntentStatus, PaymentError> {
        Err(PaymentError::Gateway("gateway not configured".into()))
    }
}

fn setup_app() -> (axum::Router, DbPool) {
    let pool = create_pool(
        ":memory:",
        DbRuntimeSettings {
            busy_timeout_ms: 5_000,
            pool_max_size: 1,
        },
    )
    .unwrap();
    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
    }

    let state = AppState {
        pool: pool.clone(),
        broadcaster: Broadcaster::new(pool.clone(), Arc::new(DemoChannel::new())),
        gate: PaymentGate::new(pool.clone(), Arc::new(UnusedGateway)),
        webhook_secret: "whsec_test".to_string(),
    };
    (app(state), pool)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn create_subscription_returns_pending_with_checkout_details() {
    let (app, _pool) = setup_app();

    let response = app
        .oneshot(post_json(
            "/api/subscriptions",
            json!({ "contact": "0696123456", "channel": "sms", "profile": "nautical" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["status"], "pending_payment");
    assert_eq!(body["channel"], "sms");
    // Normalized to the Martinique E.164 form.
    assert_eq!(body["contact"], "+596696123456");
    assert!(body["reference"].as_str().unwrap().starts_with("VG-"));
    assert_eq!(body["checkout"]["plan"], "sms_monthly");
    assert_eq!(body["checkout"]["amount_cents"], 499);
    assert_eq!(body["checkout"]["currency"], "eur");
}

#[tokio::test]
async fn invalid_contact_is_rejected() {
    let (app, _pool) = setup_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/subscriptions",
            json!({ "contact": "not-a-phone", "channel": "sms", "profile": "tourism" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json(
            "/api/subscriptions",
            json!({ "contact": "missing-at-sign.com", "channel": "email", "profile": "tourism" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn active_contact_cannot_enroll_twice() {
    let (app, pool) = setup_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/subscriptions",
            json!({ "contact": "0696123456", "channel": "sms", "profile": "general_public" }),
        ))
        .await
        .unwrap();
    let reference = body_json(response).await["reference"]
        .as_str()
        .unwrap()
        .to_string();

    {
        let conn = pool.get().unwrap();
        vigie_store::activate(&conn, &reference, "pi_test", Plan::SmsMonthly, chrono::Utc::now())
            .unwrap();
    }

    let response = app
        .oneshot(post_json(
            "/api/subscriptions",
            json!({ "contact": "0696123456", "channel": "sms", "profile": "general_public" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_subscription_by_reference() {
    let (app, _pool) = setup_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/subscriptions",
            json!({ "contact": "user@example.com", "channel": "email", "profile": "tourism" }),
        ))
        .await
        .unwrap();
    let reference = body_json(response).await["reference"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/subscriptions/{reference}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["reference"], reference.as_str());
    assert_eq!(body["status"], "pending_payment");
    assert_eq!(body["next_renewal"], Value::Null);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/subscriptions/VG-DOESNOTEXIST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn profile_changes_require_an_active_subscription() {
    let (app, pool) = setup_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/subscriptions",
            json!({ "contact": "0696555555", "channel": "sms", "profile": "general_public" }),
        ))
        .await
        .unwrap();
    let reference = body_json(response).await["reference"]
        .as_str()
        .unwrap()
        .to_string();

    let put_profile = |app: axum::Router, reference: String, profile: &'static str| async move {
        app.oneshot(
            Request::builder()
                .uri(format!("/api/subscriptions/{reference}"))
                .method("PUT")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "profile": profile }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
    };

    // Still pending payment: no profile changes yet.
    let response = put_profile(app.clone(), reference.clone(), "nautical").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    {
        let conn = pool.get().unwrap();
        vigie_store::activate(&conn, &reference, "pi_test", Plan::SmsMonthly, chrono::Utc::now())
            .unwrap();
    }

    let response = put_profile(app.clone(), reference.clone(), "nautical").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["reference"], reference.as_str());
    assert_eq!(body["profile"], "nautical");

    let response = put_profile(app, "VG-DOESNOTEXIST".to_string(), "tourism").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unsubscribe_is_idempotent_over_http() {
    let (app, pool) = setup_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/subscriptions",
            json!({ "contact": "0696777777", "channel": "sms", "profile": "general_public" }),
        ))
        .await
        .unwrap();
    let reference = body_json(response).await["reference"]
        .as_str()
        .unwrap()
        .to_string();

    {
        let conn = pool.get().unwrap();
        vigie_store::activate(&conn, &reference, "pi_test", Plan::SmsMonthly, chrono::Utc::now())
            .unwrap();
    }

    let delete = |app: axum::Router, reference: String| async move {
        app.oneshot(
            Request::builder()
                .uri(format!("/api/subscriptions/{reference}"))
                .method("DELETE")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
    };

    let first = delete(app.clone(), reference.clone()).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body_json(first).await["status"], "unsubscribed");

    // Clicking the unsubscribe link twice is not an error.
    let second = delete(app.clone(), reference.clone()).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(body_json(second).await["status"], "unsubscribed");

    let missing = delete(app, "VG-DOESNOTEXIST".to_string()).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let (app, _pool) = setup_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}
