use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub timestamp: String,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();

    let response = HealthResponse {
        status: if database_ok { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if database_ok { "ok" } else { "unreachable" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{call, test_app};
    use http::StatusCode;

    #[tokio::test]
    async fn reports_healthy_with_database() {
        let app = test_app().await;
        let (status, body) = call(&app.router, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"], "ok");
    }
}
