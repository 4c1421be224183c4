use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;

use crate::db::{
    EventRepository, Frequency, QuietHoursSetting, Subscription, SubscriptionRepository,
    UpsertSubscription,
};
use crate::error::{AppError, AppResult};
use crate::routes::CurrentUser;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/:event_key", get(get_subscription).put(upsert_subscription))
}

/// Subscription as seen by API clients.
///
/// Without a stored row the defaults that routing applies are returned with
/// `persisted = false`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub event_key: String,
    pub email_enabled: bool,
    pub in_app_enabled: bool,
    pub sms_enabled: bool,
    pub push_enabled: bool,
    pub quiet_hours: Option<QuietHoursSetting>,
    pub frequency: Frequency,
    pub is_active: bool,
    pub persisted: bool,
    pub updated_at: Option<NaiveDateTime>,
}

impl SubscriptionResponse {
    fn default_for(event_key: &str) -> Self {
        Self {
            event_key: event_key.to_string(),
            email_enabled: true,
            in_app_enabled: true,
            sms_enabled: true,
            push_enabled: true,
            quiet_hours: None,
            frequency: Frequency::Instant,
            is_active: true,
            persisted: false,
            updated_at: None,
        }
    }
}

impl From<Subscription> for SubscriptionResponse {
    fn from(s: Subscription) -> Self {
        let quiet_hours = match (s.quiet_hours_start, s.quiet_hours_end) {
            (Some(start), Some(end)) => Some(QuietHoursSetting {
                start,
                end,
                timezone: s.quiet_hours_timezone,
            }),
            _ => None,
        };

        Self {
            event_key: s.event_key,
            email_enabled: s.email_enabled,
            in_app_enabled: s.in_app_enabled,
            sms_enabled: s.sms_enabled,
            push_enabled: s.push_enabled,
            quiet_hours,
            frequency: s.frequency,
            is_active: s.is_active,
            persisted: true,
            updated_at: Some(s.updated_at),
        }
    }
}

async fn ensure_event(state: &AppState, event_key: &str) -> AppResult<()> {
    EventRepository::find_by_key(&state.db, event_key)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound(format!("Unknown event: {}", event_key)))
}

async fn get_subscription(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(event_key): Path<String>,
) -> AppResult<Json<SubscriptionResponse>> {
    ensure_event(&state, &event_key).await?;

    let response = match SubscriptionRepository::find(&state.db, &user_id, &event_key).await? {
        Some(subscription) => subscription.into(),
        None => SubscriptionResponse::default_for(&event_key),
    };
    Ok(Json(response))
}

async fn upsert_subscription(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(event_key): Path<String>,
    Json(update): Json<UpsertSubscription>,
) -> AppResult<Json<SubscriptionResponse>> {
    ensure_event(&state, &event_key).await?;

    let subscription =
        SubscriptionRepository::upsert(&state.db, &user_id, &event_key, update, Utc::now().naive_utc())
            .await?;
    tracing::info!("Updated {} subscription for user {}", event_key, user_id);

    Ok(Json(subscription.into()))
}
