use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::services::EmitRequest;
use crate::AppState;

/// Largest batch accepted by `emit-batch`.
const MAX_BATCH: usize = 500;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/emit", post(emit))
        .route("/emit-batch", post(emit_batch))
}

#[derive(Debug, Serialize)]
pub struct EmitAccepted {
    pub accepted: usize,
}

/// Queue one emission for background processing.
async fn emit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EmitRequest>,
) -> AppResult<(StatusCode, Json<EmitAccepted>)> {
    if request.event_key.trim().is_empty() {
        return Err(AppError::BadRequest("eventKey is required".to_string()));
    }

    state.emitter.submit(request);
    Ok((StatusCode::ACCEPTED, Json(EmitAccepted { accepted: 1 })))
}

async fn emit_batch(
    State(state): State<Arc<AppState>>,
    Json(requests): Json<Vec<EmitRequest>>,
) -> AppResult<(StatusCode, Json<EmitAccepted>)> {
    if requests.len() > MAX_BATCH {
        return Err(AppError::BadRequest(format!(
            "batch too large: {} emissions (max {})",
            requests.len(),
            MAX_BATCH
        )));
    }
    if requests.iter().any(|r| r.event_key.trim().is_empty()) {
        return Err(AppError::BadRequest("eventKey is required".to_string()));
    }

    let accepted = requests.len();
    state.emitter.emit_batch(requests);
    Ok((StatusCode::ACCEPTED, Json(EmitAccepted { accepted })))
}
