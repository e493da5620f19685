//! Manual test alert endpoint.

use crate::{broadcast_err_to_response, ApiError, AppState};
use axum::{extract::Extension, response::Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct TestAlertRequest {
    pub reference: String,
}

/// POST /api/alerts/test
///
/// Sends a marked test alert to one active subscriber through the real
/// dispatch path. A provider failure is reported in the outcome, not as an
/// HTTP error; the attempt itself was valid and was recorded.
pub async fn test_alert_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<TestAlertRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .broadcaster
        .send_test_alert(&payload.reference)
        .await
        .map_err(broadcast_err_to_response)?;

    Ok(Json(json!({
        "reference": payload.reference,
        "outcome": outcome,
    })))
}
