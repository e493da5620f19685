//! Read-only status surfaces: tracked vigilance state and statistics.

use crate::{api_error, ApiError, AppState};
use axum::{extract::Extension, http::StatusCode, response::Json};
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /api/vigilance
///
/// Returns the tracked per-phenomenon state. Phenomena never observed are
/// absent from the list.
pub async fn vigilance_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let pool = state.pool.clone();
    let phenomena = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let conn = pool.get().map_err(|e| {
            tracing::error!(error = %e, "connection pool exhausted");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        })?;
        vigie_watch::current_state(&conn).map_err(|e| {
            tracing::error!(error = %e, "vigilance state query failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        })
    })
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "blocking task join error");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    })??;

    Ok(Json(json!({ "phenomena": phenomena })))
}

/// GET /api/stats
pub async fn stats_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let stats = crate::with_conn(&state.pool, vigie_store::stats).await?;
    Ok(Json(json!({ "stats": stats })))
}
