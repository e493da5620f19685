//! Vigie server library logic.

pub mod api_alerts;
pub mod api_payments;
pub mod api_status;
pub mod api_subscriptions;
pub mod config;
pub mod feed;
pub mod scheduler;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use vigie_broadcast::{BroadcastError, Broadcaster};
use vigie_db::DbPool;
use vigie_payments::{PaymentError, PaymentGate};
use vigie_store::StoreError;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Alert broadcaster (also serves manual test sends).
    pub broadcaster: Broadcaster,
    /// Payment gate for intent creation and confirmation.
    pub gate: PaymentGate,
    /// Shared secret for webhook signature verification.
    pub webhook_secret: String,
}

/// Maximum request body size (64 KiB). All accepted payloads are small JSON.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// A JSON error response paired with its status code.
pub(crate) type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Maps a [`StoreError`] to the correct HTTP response, logging 500s.
///
/// `Validation` → 400, `NotFound` → 404, `InvalidState` → 409,
/// `Database` → 500 (with error logged).
pub(crate) fn store_err_to_response(e: StoreError) -> ApiError {
    match e {
        StoreError::Validation(msg) => api_error(StatusCode::BAD_REQUEST, msg),
        StoreError::NotFound(reference) => api_error(
            StatusCode::NOT_FOUND,
            format!("no subscription {reference}"),
        ),
        StoreError::InvalidState(msg) => api_error(StatusCode::CONFLICT, msg),
        StoreError::Database(ref err) => {
            tracing::error!(error = %err, "store operation failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// Maps a [`PaymentError`] to the correct HTTP response.
///
/// Gateway failures are the gateway's fault, not the client's: 502.
pub(crate) fn payment_err_to_response(e: PaymentError) -> ApiError {
    match e {
        PaymentError::Store(inner) => store_err_to_response(inner),
        PaymentError::Gateway(msg) => {
            tracing::error!(error = %msg, "payment gateway call failed");
            api_error(StatusCode::BAD_GATEWAY, "payment gateway unavailable")
        }
        PaymentError::Incomplete(msg) => api_error(StatusCode::CONFLICT, msg),
        PaymentError::Webhook(err) => api_error(StatusCode::BAD_REQUEST, err.to_string()),
        PaymentError::Pool(ref err) => {
            tracing::error!(error = %err, "connection pool exhausted");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
        PaymentError::Join(ref err) => {
            tracing::error!(error = %err, "payment task join error");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

pub(crate) fn broadcast_err_to_response(e: BroadcastError) -> ApiError {
    match e {
        BroadcastError::Store(inner) => store_err_to_response(inner),
        BroadcastError::Pool(ref err) => {
            tracing::error!(error = %err, "connection pool exhausted");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
        BroadcastError::Join(ref err) => {
            tracing::error!(error = %err, "broadcast task join error");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// Runs a blocking store closure on the pool, off the async runtime.
pub(crate) async fn with_conn<T, F>(pool: &DbPool, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!(error = %e, "connection pool exhausted");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        })?;
        f(&conn).map_err(store_err_to_response)
    })
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "blocking task join error");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    })?
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/subscriptions",
            post(api_subscriptions::create_subscription_handler),
        )
        .route(
            "/api/subscriptions/{reference}",
            get(api_subscriptions::get_subscription_handler)
                .put(api_subscriptions::update_profile_handler)
                .delete(api_subscriptions::unsubscribe_handler),
        )
        .route(
            "/api/subscriptions/{reference}/deliveries",
            get(api_subscriptions::delivery_history_handler),
        )
        .route(
            "/api/payments/intent",
            post(api_payments::create_intent_handler),
        )
        .route(
            "/api/payments/confirm",
            post(api_payments::confirm_payment_handler),
        )
        .route(
            "/api/webhooks/payment",
            post(api_payments::payment_webhook_handler),
        )
        .route("/api/alerts/test", post(api_alerts::test_alert_handler))
        .route("/api/vigilance", get(api_status::vigilance_handler))
        .route("/api/stats", get(api_status::stats_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
