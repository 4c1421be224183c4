use sqlx::SqlitePool;

use crate::db::models::NotificationEvent;
use crate::error::{AppError, AppResult};

// ============================================================================
// Event Catalog Repository (read-only)
// ============================================================================

pub struct EventRepository;

impl EventRepository {
    pub async fn find_by_key(
        pool: &SqlitePool,
        event_key: &str,
    ) -> AppResult<Option<NotificationEvent>> {
        sqlx::query_as::<_, NotificationEvent>(
            r#"
            SELECT event_key, name, channels, is_active, created_at, updated_at
            FROM notification_events
            WHERE event_key = ?
            "#,
        )
        .bind(event_key)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn list_active(pool: &SqlitePool) -> AppResult<Vec<NotificationEvent>> {
        sqlx::query_as::<_, NotificationEvent>(
            r#"
            SELECT event_key, name, channels, is_active, created_at, updated_at
            FROM notification_events
            WHERE is_active = 1
            ORDER BY event_key
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}
