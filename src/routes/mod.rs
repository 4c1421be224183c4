pub mod events;
pub mod health;
pub mod notifications;
pub mod queue;
pub mod subscriptions;

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts, routing::get, Router};

use crate::error::AppError;
use crate::AppState;

/// Header carrying the caller's user id, set by the upstream auth gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity of the calling user.
pub struct CurrentUser(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                tracing::debug!("Missing or invalid {} header", USER_ID_HEADER);
                AppError::Unauthorized
            })?;

        Ok(CurrentUser(user_id.to_string()))
    }
}

/// All HTTP routes with state applied. Middleware is layered on in `main`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/events", events::router())
        .nest("/api/notifications", notifications::router())
        .nest("/api/subscriptions", subscriptions::router())
        .nest("/api/queue", queue::router())
        .with_state(state)
}
