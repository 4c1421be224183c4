use chrono::NaiveDateTime;
use sqlx::types::Json;
use sqlx::{SqliteExecutor, SqlitePool};
use uuid::Uuid;

use crate::db::models::{Channel, CreateHistoryEntry, HistoryEntry};
use crate::error::{AppError, AppResult};

// ============================================================================
// In-App Notification History Repository
// ============================================================================

const HISTORY_COLUMNS: &str = r#"
    id, user_id, event_key, channel, title, message, data,
    action_url, is_read, read_at, created_at
"#;

pub struct NotificationHistoryRepository;

impl NotificationHistoryRepository {
    pub async fn create<'e, E>(
        executor: E,
        entry: CreateHistoryEntry,
        now: NaiveDateTime,
    ) -> AppResult<HistoryEntry>
    where
        E: SqliteExecutor<'e>,
    {
        let id = Uuid::new_v4().to_string();
        let sql = format!(
            r#"
            INSERT INTO notification_history (
                id, user_id, event_key, channel, title, message, data,
                action_url, is_read, read_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, ?)
            RETURNING {HISTORY_COLUMNS}
            "#
        );

        sqlx::query_as::<_, HistoryEntry>(&sql)
            .bind(id)
            .bind(entry.user_id)
            .bind(entry.event_key)
            .bind(Channel::InApp.as_str())
            .bind(entry.title)
            .bind(entry.message)
            .bind(Json(entry.data))
            .bind(entry.action_url)
            .bind(now)
            .fetch_one(executor)
            .await
            .map_err(AppError::Database)
    }

    /// Unread notifications for a user, newest first.
    pub async fn get_unread(
        pool: &SqlitePool,
        user_id: &str,
        limit: i64,
    ) -> AppResult<Vec<HistoryEntry>> {
        let sql = format!(
            r#"
            SELECT {HISTORY_COLUMNS}
            FROM notification_history
            WHERE user_id = ? AND is_read = 0
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#
        );

        sqlx::query_as::<_, HistoryEntry>(&sql)
            .bind(user_id)
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Mark one notification as read. Rows owned by other users are left alone.
    ///
    /// Returns the number of rows changed (0 or 1).
    pub async fn mark_as_read(
        pool: &SqlitePool,
        id: &str,
        user_id: &str,
        now: NaiveDateTime,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notification_history
            SET is_read = 1, read_at = ?
            WHERE id = ? AND user_id = ? AND is_read = 0
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Mark every unread notification of a user as read. Returns rows changed.
    pub async fn mark_all_as_read(
        pool: &SqlitePool,
        user_id: &str,
        now: NaiveDateTime,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notification_history
            SET is_read = 1, read_at = ?
            WHERE user_id = ? AND is_read = 0
            "#,
        )
        .bind(now)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Badge count; served by `idx_notification_history_user_read`.
    pub async fn unread_count(pool: &SqlitePool, user_id: &str) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notification_history WHERE user_id = ? AND is_read = 0",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(count)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<HistoryEntry>> {
        let sql = format!("SELECT {HISTORY_COLUMNS} FROM notification_history WHERE id = ?");

        sqlx::query_as::<_, HistoryEntry>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use chrono::{Duration, Utc};

    fn entry(user_id: &str, title: &str) -> CreateHistoryEntry {
        CreateHistoryEntry {
            user_id: user_id.to_string(),
            event_key: "KYC_APPROVED".to_string(),
            title: title.to_string(),
            message: "body".to_string(),
            data: serde_json::json!({}),
            action_url: Some("/kyc".to_string()),
        }
    }

    #[tokio::test]
    async fn unread_is_newest_first_and_limited() {
        let pool = test_pool().await;
        let t0 = Utc::now().naive_utc();
        NotificationHistoryRepository::create(&pool, entry("u1", "first"), t0)
            .await
            .unwrap();
        NotificationHistoryRepository::create(&pool, entry("u1", "second"), t0 + Duration::seconds(1))
            .await
            .unwrap();
        NotificationHistoryRepository::create(&pool, entry("u2", "other"), t0)
            .await
            .unwrap();

        let unread = NotificationHistoryRepository::get_unread(&pool, "u1", 10)
            .await
            .unwrap();
        let titles: Vec<&str> = unread.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["second", "first"]);
        assert!(unread.iter().all(|h| h.channel == Channel::InApp && !h.is_read));

        let limited = NotificationHistoryRepository::get_unread(&pool, "u1", 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].title, "second");
    }

    #[tokio::test]
    async fn mark_as_read_checks_ownership() {
        let pool = test_pool().await;
        let now = Utc::now().naive_utc();
        let row = NotificationHistoryRepository::create(&pool, entry("u1", "hello"), now)
            .await
            .unwrap();

        let changed = NotificationHistoryRepository::mark_as_read(&pool, &row.id, "intruder", now)
            .await
            .unwrap();
        assert_eq!(changed, 0);
        let untouched = NotificationHistoryRepository::find_by_id(&pool, &row.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!untouched.is_read);
        assert!(untouched.read_at.is_none());

        let changed = NotificationHistoryRepository::mark_as_read(&pool, &row.id, "u1", now)
            .await
            .unwrap();
        assert_eq!(changed, 1);
        let read = NotificationHistoryRepository::find_by_id(&pool, &row.id)
            .await
            .unwrap()
            .unwrap();
        assert!(read.is_read);
        assert!(read.read_at.is_some());
    }

    #[tokio::test]
    async fn mark_all_as_read_is_idempotent() {
        let pool = test_pool().await;
        let now = Utc::now().naive_utc();
        for title in ["a", "b", "c"] {
            NotificationHistoryRepository::create(&pool, entry("u1", title), now)
                .await
                .unwrap();
        }
        NotificationHistoryRepository::create(&pool, entry("u2", "d"), now)
            .await
            .unwrap();

        assert_eq!(NotificationHistoryRepository::unread_count(&pool, "u1").await.unwrap(), 3);
        assert_eq!(
            NotificationHistoryRepository::mark_all_as_read(&pool, "u1", now)
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            NotificationHistoryRepository::mark_all_as_read(&pool, "u1", now)
                .await
                .unwrap(),
            0
        );
        assert_eq!(NotificationHistoryRepository::unread_count(&pool, "u1").await.unwrap(), 0);
        assert_eq!(NotificationHistoryRepository::unread_count(&pool, "u2").await.unwrap(), 1);
    }
}
