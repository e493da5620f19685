//! Subscription lifecycle endpoints.

use crate::{with_conn, ApiError, AppState};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use vigie_payments::plan_for_channel;
use vigie_store::Subscription;
use vigie_types::{ChannelKind, Profile};

/// Maximum accepted contact length.
const MAX_CONTACT_LEN: usize = 254;

/// Records returned per delivery-history request.
const DELIVERY_HISTORY_LIMIT: u32 = 50;

#[derive(Deserialize)]
pub struct CreateSubscriptionRequest {
    pub contact: String,
    pub channel: ChannelKind,
    pub profile: Profile,
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub profile: Profile,
}

/// JSON view of a subscription.
pub(crate) fn subscription_view(sub: &Subscription) -> Value {
    json!({
        "reference": sub.reference,
        "contact": sub.contact,
        "channel": sub.channel,
        "profile": sub.profile,
        "status": sub.status,
        "plan": sub.plan,
        "period_start": sub.period_start,
        "next_renewal": sub.next_renewal().map(|d| d.to_rfc3339()),
        "created_at": sub.created_at,
        "activated_at": sub.activated_at,
        "unsubscribed_at": sub.unsubscribed_at,
        "last_notified_at": sub.last_notified_at,
    })
}

/// POST /api/subscriptions
///
/// Creates a pending subscription. Nothing is billed and no alert will be
/// sent until a payment confirmation activates it.
pub async fn create_subscription_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if payload.contact.is_empty() || payload.contact.len() > MAX_CONTACT_LEN {
        return Err(crate::api_error(
            StatusCode::BAD_REQUEST,
            "contact must be non-empty and reasonably sized",
        ));
    }

    let channel = payload.channel;
    let subscription = with_conn(&state.pool, move |conn| {
        vigie_store::create_subscription(conn, &payload.contact, payload.channel, payload.profile)
    })
    .await?;

    tracing::info!(reference = %subscription.reference, "subscription created");

    let plan = plan_for_channel(channel);
    let mut view = subscription_view(&subscription);
    view["checkout"] = json!({
        "plan": plan,
        "amount_cents": plan.amount_cents(),
        "currency": plan.currency(),
    });
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/subscriptions/{reference}
pub async fn get_subscription_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let subscription =
        with_conn(&state.pool, move |conn| vigie_store::get(conn, &reference)).await?;
    Ok(Json(subscription_view(&subscription)))
}

/// PUT /api/subscriptions/{reference}
///
/// Retargets the advice profile of an active subscription.
pub async fn update_profile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(reference): Path<String>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<Value>, ApiError> {
    let subscription = with_conn(&state.pool, move |conn| {
        vigie_store::update_profile(conn, &reference, payload.profile)
    })
    .await?;

    tracing::info!(reference = %subscription.reference, "profile updated");
    Ok(Json(subscription_view(&subscription)))
}

/// GET /api/subscriptions/{reference}/deliveries
///
/// Recent alert history for one subscription, newest first.
pub async fn delivery_history_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (reference, deliveries) = with_conn(&state.pool, move |conn| {
        // Unknown references are 404, not an empty list.
        let sub = vigie_store::get(conn, &reference)?;
        let records =
            vigie_store::list_deliveries(conn, Some(&sub.reference), DELIVERY_HISTORY_LIMIT)?;
        Ok((sub.reference, records))
    })
    .await?;

    Ok(Json(json!({
        "reference": reference,
        "deliveries": deliveries,
    })))
}

/// DELETE /api/subscriptions/{reference}
///
/// Idempotent: unsubscribing an already-unsubscribed reference is 200.
pub async fn unsubscribe_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let subscription = with_conn(&state.pool, move |conn| {
        vigie_store::unsubscribe(conn, &reference)?;
        vigie_store::get(conn, &reference)
    })
    .await?;

    tracing::info!(reference = %subscription.reference, "unsubscribed");
    Ok(Json(subscription_view(&subscription)))
}
