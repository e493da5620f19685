use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use vigie_broadcast::{Broadcaster, DemoChannel};
use vigie_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use vigie_payments::{
    signature_header, IntentHandle, IntentStatus, PaymentError, PaymentGate, PaymentGateway,
};
use vigie_server::api_payments::SIGNATURE_HEADER;
use vigie_server::{app, AppState};
use vigie_store::SubscriptionStatus;
use vigie_types::Plan;

const WEBHOOK_SECRET: &str = "whsec_test";

#[derive(Default)]
struct MockGateway {
    intents: Mutex<HashMap<String, IntentStatus>>,
}

impl MockGateway {
    fn mark_succeeded(&self, intent_id: &str) {
        self.intents
            .lock()
            .unwrap()
            .get_mut(intent_id)
            .expect("intent was created")
            .succeeded = true;
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_intent(
        &self,
        _plan: Plan,
        reference: &str,
    ) -> Result<IntentHandle, PaymentError> {
        let mut intents = self.intents.lock().unwrap();
        let intent_id = format!("pi_mock_{}", intents.len() + 1);
        intents.insert(
            intent_id.clone(),
            IntentStatus {
                intent_id: intent_id.clone(),
                succeeded: false,
                reference: Some(reference.to_string()),
            },
        );
        Ok(IntentHandle {
            client_secret: format!("{intent_id}_secret"),
            intent_id,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentStatus, PaymentError> {
        self.intents
            .lock()
            .unwrap()
            .get(intent_id)
            .cloned()
            .ok_or_else(|| PaymentError::Gateway(format!("no such intent {intent_id}")))
    }
}

fn setup_app() -> (axum::Router, DbPool, Arc<MockGateway>) {
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

    let gateway = Arc::new(MockGateway::default());
    let state = AppState {
        pool: pool.clone(),
        broadcaster: Broadcaster::new(pool.clone(), Arc::new(DemoChannel::new())),
        gate: PaymentGate::new(pool.clone(), gateway.clone()),
        webhook_secret: WEBHOOK_SECRET.to_string(),
    };
    (app(state), pool, gateway)
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

async fn create_pending(app: &axum::Router, contact: &str, channel: &str) -> String {
    let profile = "general_public";
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/subscriptions",
            json!({ "contact": contact, "channel": channel, "profile": profile }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["reference"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn subscribe_intent_confirm_activates() {
    let (app, pool, gateway) = setup_app();
    let reference = create_pending(&app, "0696123456", "sms").await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/payments/intent",
            json!({ "reference": reference }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["plan"], "sms_monthly");
    assert_eq!(body["amount_cents"], 499);
    let intent_id = body["intent_id"].as_str().unwrap().to_string();
    assert!(!body["client_secret"].as_str().unwrap().is_empty());

    // Checkout completes out-of-band, then the client confirms.
    gateway.mark_succeeded(&intent_id);
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/payments/confirm",
            json!({ "payment_intent_id": intent_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "active");
    assert!(body["next_renewal"].is_string());

    let conn = pool.get().unwrap();
    let sub = vigie_store::get(&conn, &reference).unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn confirming_before_payment_is_a_conflict() {
    let (app, _pool, _gateway) = setup_app();
    let reference = create_pending(&app, "0696123456", "sms").await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/payments/intent",
            json!({ "reference": reference }),
        ))
        .await
        .unwrap();
    let intent_id = body_json(response).await["intent_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .oneshot(post_json(
            "/api/payments/confirm",
            json!({ "payment_intent_id": intent_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn intent_for_unknown_or_active_subscription_is_rejected() {
    let (app, pool, _gateway) = setup_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/payments/intent",
            json!({ "reference": "VG-DOESNOTEXIST" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let reference = create_pending(&app, "0696123456", "sms").await;
    {
        let conn = pool.get().unwrap();
        vigie_store::activate(&conn, &reference, "pi_done", Plan::SmsMonthly, Utc::now()).unwrap();
    }
    let response = app
        .oneshot(post_json(
            "/api/payments/intent",
            json!({ "reference": reference }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

fn webhook_request(payload: &Value, header: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri("/api/webhooks/payment")
        .method("POST")
        .header("content-type", "application/json");
    if let Some(h) = header {
        builder = builder.header(SIGNATURE_HEADER, h);
    }
    builder.body(Body::from(payload.to_string())).unwrap()
}

#[tokio::test]
async fn signed_webhook_activates_and_replays_safely() {
    let (app, pool, _gateway) = setup_app();
    let reference = create_pending(&app, "user@example.com", "email").await;

    let payload = json!({
        "type": "payment.succeeded",
        "payment_reference": "pi_hook_1",
        "reference": reference,
        "plan": "email_yearly",
    });
    let header = signature_header(
        WEBHOOK_SECRET,
        payload.to_string().as_bytes(),
        Utc::now().timestamp(),
    );

    let response = app
        .clone()
        .oneshot(webhook_request(&payload, Some(header.clone())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["handled"], true);
    assert_eq!(body["status"], "active");

    // Gateways redeliver; the replay must succeed without changing state.
    let response = app
        .oneshot(webhook_request(&payload, Some(header)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let conn = pool.get().unwrap();
    let sub = vigie_store::get(&conn, &reference).unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.payment_reference.as_deref(), Some("pi_hook_1"));
}

#[tokio::test]
async fn webhook_with_bad_or_missing_signature_changes_nothing() {
    let (app, pool, _gateway) = setup_app();
    let reference = create_pending(&app, "user@example.com", "email").await;

    let payload = json!({
        "type": "payment.succeeded",
        "payment_reference": "pi_forged",
        "reference": reference,
        "plan": "email_yearly",
    });

    let response = app
        .clone()
        .oneshot(webhook_request(&payload, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let forged = signature_header(
        "whsec_wrong",
        payload.to_string().as_bytes(),
        Utc::now().timestamp(),
    );
    let response = app
        .clone()
        .oneshot(webhook_request(&payload, Some(forged)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stale = signature_header(
        WEBHOOK_SECRET,
        payload.to_string().as_bytes(),
        Utc::now().timestamp() - 3_600,
    );
    let response = app
        .clone()
        .oneshot(webhook_request(&payload, Some(stale)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let conn = pool.get().unwrap();
    let sub = vigie_store::get(&conn, &reference).unwrap();
    assert_eq!(sub.status, SubscriptionStatus::PendingPayment);
}

#[tokio::test]
async fn webhook_ignores_other_event_types() {
    let (app, pool, _gateway) = setup_app();
    let reference = create_pending(&app, "user@example.com", "email").await;

    let payload = json!({
        "type": "payment.created",
        "payment_reference": "pi_hook_1",
        "reference": reference,
        "plan": "email_yearly",
    });
    let header = signature_header(
        WEBHOOK_SECRET,
        payload.to_string().as_bytes(),
        Utc::now().timestamp(),
    );

    let response = app
        .oneshot(webhook_request(&payload, Some(header)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["handled"], false);

    let conn = pool.get().unwrap();
    let sub = vigie_store::get(&conn, &reference).unwrap();
    assert_eq!(sub.status, SubscriptionStatus::PendingPayment);
}
