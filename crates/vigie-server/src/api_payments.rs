//! Payment endpoints: checkout intents, synchronous confirms, webhooks.

use crate::{
    api_error, payment_err_to_response, ApiError, AppState,
};
use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use vigie_payments::{verify_signature, ConfirmationEvent};

/// Header carrying the webhook signature (`t=<unix>,v1=<hex>`).
pub const SIGNATURE_HEADER: &str = "payment-signature";

#[derive(Deserialize)]
pub struct CreateIntentRequest {
    pub reference: String,
}

#[derive(Deserialize)]
pub struct ConfirmRequest {
    pub payment_intent_id: String,
}

/// Webhook event payload, verified before it is trusted.
#[derive(Deserialize)]
pub struct WebhookEvent {
    /// Event type; anything but a succeeded payment is acknowledged and
    /// ignored.
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub confirmation: ConfirmationEvent,
}

/// POST /api/payments/intent
///
/// Creates a gateway intent for a pending subscription and returns the
/// client-side checkout handle. Subscription state is not touched.
pub async fn create_intent_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<CreateIntentRequest>,
) -> Result<Json<Value>, ApiError> {
    let (handle, plan) = state
        .gate
        .create_intent(&payload.reference)
        .await
        .map_err(payment_err_to_response)?;

    Ok(Json(json!({
        "intent_id": handle.intent_id,
        "client_secret": handle.client_secret,
        "plan": plan,
        "amount_cents": plan.amount_cents(),
        "currency": plan.currency(),
    })))
}

/// POST /api/payments/confirm
///
/// Synchronous confirmation path: the client reports a completed checkout
/// and the gate verifies the intent's status with the gateway before
/// activating.
pub async fn confirm_payment_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<ConfirmRequest>,
) -> Result<Json<Value>, ApiError> {
    let subscription = state
        .gate
        .confirm_intent(&payload.payment_intent_id)
        .await
        .map_err(payment_err_to_response)?;

    Ok(Json(crate::api_subscriptions::subscription_view(
        &subscription,
    )))
}

/// POST /api/webhooks/payment
///
/// Gateway-driven confirmation path. The signature is verified against the
/// raw body before anything is parsed; an invalid signature changes no
/// state and returns 400 so the gateway retries nothing it shouldn't.
pub async fn payment_webhook_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing signature header"))?;

    verify_signature(
        &state.webhook_secret,
        &body,
        header,
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "webhook signature rejected");
        api_error(StatusCode::BAD_REQUEST, e.to_string())
    })?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("invalid payload: {e}")))?;

    if event.event_type != "payment.succeeded" {
        tracing::debug!(event_type = %event.event_type, "ignoring webhook event type");
        return Ok(Json(json!({ "received": true, "handled": false })));
    }

    let subscription = state
        .gate
        .handle_confirmation(event.confirmation)
        .await
        .map_err(payment_err_to_response)?;

    Ok(Json(json!({
        "received": true,
        "handled": true,
        "reference": subscription.reference,
        "status": subscription.status,
    })))
}
