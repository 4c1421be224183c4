//! Operational view of the delivery queue.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::{NotificationQueueRepository, QueueEntry, QueueStatus};
use crate::error::{AppError, AppResult};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_entries))
        .route("/:id", get(get_entry))
        .route("/:id/cancel", post(cancel_entry))
}

#[derive(Debug, Deserialize)]
pub struct ListQueueQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
    pub status: QueueStatus,
}

/// Rows in one state, newest first. Defaults to FAILED rows.
async fn list_entries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQueueQuery>,
) -> AppResult<Json<Vec<QueueEntry>>> {
    let status = match query.status.as_deref() {
        Some(raw) => QueueStatus::from_str(raw)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid queue status: {}", raw)))?,
        None => QueueStatus::Failed,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    let entries = NotificationQueueRepository::list_by_status(&state.db, status, limit).await?;
    Ok(Json(entries))
}

async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<QueueEntry>> {
    NotificationQueueRepository::find_by_id(&state.db, &id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Queue entry {} not found", id)))
}

/// Cancel a row that has not been claimed yet. Other states are left unchanged.
async fn cancel_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> AppResult<Json<CancelResponse>> {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "superseded".to_string());

    let cancelled =
        NotificationQueueRepository::cancel(&state.db, &id, &reason, Utc::now().naive_utc())
            .await?;
    let entry = NotificationQueueRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Queue entry {} not found", id)))?;

    if cancelled {
        tracing::info!("Cancelled queue entry {}: {}", id, reason);
    }

    Ok(Json(CancelResponse {
        cancelled,
        status: entry.status,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{call, test_app};
    use http::StatusCode;
    use serde_json::json;

    async fn enqueue_email(router: &axum::Router) -> String {
        let (_, body) = call(
            router,
            "POST",
            "/api/notifications/send",
            None,
            Some(json!({
                "eventKey": "ORDER_CREATED",
                "channel": ["EMAIL"],
                "data": { "recipientEmail": "a@b.c", "message": "hi" }
            })),
        )
        .await;
        body["queueIds"][0].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn cancel_pending_row_once() {
        let app = test_app().await;
        let id = enqueue_email(&app.router).await;
        let uri = format!("/api/queue/{}/cancel", id);

        let (status, body) = call(
            &app.router,
            "POST",
            &uri,
            None,
            Some(json!({ "reason": "order amended" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], true);
        assert_eq!(body["status"], "CANCELLED");

        let (_, again) = call(&app.router, "POST", &uri, None, None).await;
        assert_eq!(again["cancelled"], false);

        let (_, row) = call(&app.router, "GET", &format!("/api/queue/{}", id), None, None).await;
        assert_eq!(row["status"], "CANCELLED");
        assert_eq!(row["error"], "cancelled: order amended");
        assert_eq!(row["attempts"], 0);
    }

    #[tokio::test]
    async fn listing_filters_by_status() {
        let app = test_app().await;
        let id = enqueue_email(&app.router).await;

        let (status, pending) = call(&app.router, "GET", "/api/queue?status=pending", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pending[0]["id"], id.as_str());

        let (_, failed) = call(&app.router, "GET", "/api/queue", None, None).await;
        assert!(failed.as_array().unwrap().is_empty());

        let (status, _) = call(&app.router, "GET", "/api/queue?status=LOST", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_row_is_not_found() {
        let app = test_app().await;
        let (status, _) = call(&app.router, "GET", "/api/queue/missing", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app.router, "POST", "/api/queue/missing/cancel", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
