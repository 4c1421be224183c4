use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::{HistoryEntry, NotificationHistoryRepository};
use crate::error::{AppError, AppResult};
use crate::routes::CurrentUser;
use crate::services::{SendRequest, SendResult};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/send", post(send_notification))
        .route("/unread", get(list_unread))
        .route("/unread/count", get(unread_count))
        .route("/read-all", post(mark_all_as_read))
        .route("/:id/read", post(mark_as_read))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UnreadQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: u64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Enqueue a notification with caller-supplied content.
///
/// Unknown or inactive events answer 422 with the same result shape.
async fn send_notification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendRequest>,
) -> AppResult<(StatusCode, Json<SendResult>)> {
    match state.notifications.enqueue(request, Utc::now()).await {
        Ok(result) => Ok((StatusCode::OK, Json(result))),
        Err(e @ (AppError::EventNotFound(_) | AppError::EventInactive(_))) => Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(SendResult::failure(&e)),
        )),
        Err(e) => Err(e),
    }
}

async fn list_unread(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<UnreadQuery>,
) -> AppResult<Json<Vec<HistoryEntry>>> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let entries = NotificationHistoryRepository::get_unread(&state.db, &user_id, limit).await?;
    Ok(Json(entries))
}

async fn unread_count(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<UnreadCountResponse>> {
    let count = NotificationHistoryRepository::unread_count(&state.db, &user_id).await?;
    Ok(Json(UnreadCountResponse { count }))
}

/// Mark one notification read. Someone else's id is a silent no-op.
async fn mark_as_read(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<MarkReadResponse>> {
    let updated =
        NotificationHistoryRepository::mark_as_read(&state.db, &id, &user_id, Utc::now().naive_utc())
            .await?;
    Ok(Json(MarkReadResponse { updated }))
}

async fn mark_all_as_read(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<MarkReadResponse>> {
    let updated =
        NotificationHistoryRepository::mark_all_as_read(&state.db, &user_id, Utc::now().naive_utc())
            .await?;
    Ok(Json(MarkReadResponse { updated }))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{call, test_app};
    use http::StatusCode;
    use serde_json::{json, Value};

    fn kyc_send(user: &str) -> Value {
        json!({
            "eventKey": "KYC_SUBMITTED",
            "channel": "IN_APP",
            "data": {
                "userId": user,
                "subject": "KYC received",
                "message": "We are reviewing your documents",
                "actionUrl": "/kyc"
            }
        })
    }

    #[tokio::test]
    async fn send_then_read_flow() {
        let app = test_app().await;

        let (status, body) = call(
            &app.router,
            "POST",
            "/api/notifications/send",
            None,
            Some(kyc_send("u1")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["queueIds"].as_array().unwrap().len(), 1);

        let (_, count) = call(&app.router, "GET", "/api/notifications/unread/count", Some("u1"), None).await;
        assert_eq!(count["count"], 1);

        let (status, unread) = call(&app.router, "GET", "/api/notifications/unread", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        let entry = &unread.as_array().unwrap()[0];
        assert_eq!(entry["title"], "KYC received");
        assert_eq!(entry["actionUrl"], "/kyc");
        assert_eq!(entry["isRead"], false);
        let id = entry["id"].as_str().unwrap().to_string();

        let uri = format!("/api/notifications/{}/read", id);
        let (_, other) = call(&app.router, "POST", &uri, Some("u2"), None).await;
        assert_eq!(other["updated"], 0);
        let (_, mine) = call(&app.router, "POST", &uri, Some("u1"), None).await;
        assert_eq!(mine["updated"], 1);

        let (_, count) = call(&app.router, "GET", "/api/notifications/unread/count", Some("u1"), None).await;
        assert_eq!(count["count"], 0);
    }

    #[tokio::test]
    async fn read_all_is_idempotent() {
        let app = test_app().await;
        for _ in 0..2 {
            call(&app.router, "POST", "/api/notifications/send", None, Some(kyc_send("u1"))).await;
        }

        let (_, first) = call(&app.router, "POST", "/api/notifications/read-all", Some("u1"), None).await;
        assert_eq!(first["updated"], 2);
        let (_, second) = call(&app.router, "POST", "/api/notifications/read-all", Some("u1"), None).await;
        assert_eq!(second["updated"], 0);
    }

    #[tokio::test]
    async fn unknown_event_returns_failed_result() {
        let app = test_app().await;
        let (status, body) = call(
            &app.router,
            "POST",
            "/api/notifications/send",
            None,
            Some(json!({ "eventKey": "NOPE", "data": { "message": "hi" } })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Event not found: NOPE");
    }

    #[tokio::test]
    async fn history_requires_user_header() {
        let app = test_app().await;
        let (status, body) = call(&app.router, "GET", "/api/notifications/unread", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }
}
