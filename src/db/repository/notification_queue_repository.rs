use chrono::NaiveDateTime;
use sqlx::types::Json;
use sqlx::{SqliteExecutor, SqlitePool};
use uuid::Uuid;

use crate::db::models::{CreateQueueEntry, QueueEntry, QueueStatus};
use crate::error::{AppError, AppResult};

const QUEUE_COLUMNS: &str = r#"
    id,
    event_key,
    user_id,
    recipient_email,
    recipient_phone,
    channel,
    subject,
    message,
    data,
    status,
    scheduled_for,
    attempts,
    max_attempts,
    sent_at,
    failed_at,
    error,
    message_id,
    created_at,
    updated_at
"#;

/// Repository for the durable notification queue.
///
/// Implementation notes:
/// - Claiming uses an atomic single-statement UPDATE with a subselect:
///   `UPDATE ... WHERE id = (SELECT id ... LIMIT 1) AND status = 'PENDING' RETURNING ...`.
///   Two processors racing for the same row cannot both match the outer
///   guard, so at most one of them gets it back.
/// - A PROCESSING row whose `updated_at` is at or before `stale_before` has lost
///   its worker. It is claimable again like a PENDING row, and the abandoned
///   attempt stays counted.
/// - Every finalizing update is conditional on `status = 'PROCESSING'`, so a
///   terminal row is never moved again.
pub struct NotificationQueueRepository;

impl NotificationQueueRepository {
    /// Insert a new PENDING row. Accepts a pool or an open transaction.
    pub async fn create<'e, E>(
        executor: E,
        entry: CreateQueueEntry,
        now: NaiveDateTime,
    ) -> AppResult<QueueEntry>
    where
        E: SqliteExecutor<'e>,
    {
        let id = Uuid::new_v4().to_string();
        let sql = format!(
            r#"
            INSERT INTO notification_queue (
                id, event_key, user_id, recipient_email, recipient_phone,
                channel, subject, message, data, status, scheduled_for,
                attempts, max_attempts, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
            RETURNING {QUEUE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, QueueEntry>(&sql)
            .bind(id)
            .bind(entry.event_key)
            .bind(entry.user_id)
            .bind(entry.recipient_email)
            .bind(entry.recipient_phone)
            .bind(entry.channel.as_str())
            .bind(entry.subject)
            .bind(entry.message)
            .bind(Json(entry.data))
            .bind(QueueStatus::Pending.as_str())
            .bind(entry.scheduled_for)
            .bind(entry.max_attempts)
            .bind(now)
            .bind(now)
            .fetch_one(executor)
            .await
            .map_err(AppError::Database)
    }

    /// Claim a single due row: `PENDING -> PROCESSING` and `attempts + 1`.
    ///
    /// PROCESSING rows last touched at or before `stale_before` are claimed the
    /// same way. Returns `None` when nothing is due or another processor won
    /// the race.
    pub async fn claim_next_due(
        pool: &SqlitePool,
        now: NaiveDateTime,
        stale_before: NaiveDateTime,
    ) -> AppResult<Option<QueueEntry>> {
        let sql = format!(
            r#"
            UPDATE notification_queue
            SET status = 'PROCESSING', attempts = attempts + 1, updated_at = ?
            WHERE id = (
                SELECT id FROM notification_queue
                WHERE attempts < max_attempts
                  AND (
                    (status = 'PENDING' AND scheduled_for <= ?)
                    OR (status = 'PROCESSING' AND updated_at <= ?)
                  )
                ORDER BY scheduled_for ASC, created_at ASC
                LIMIT 1
            )
            AND (status = 'PENDING' OR (status = 'PROCESSING' AND updated_at <= ?))
            RETURNING {QUEUE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, QueueEntry>(&sql)
            .bind(now)
            .bind(now)
            .bind(stale_before)
            .bind(stale_before)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Claim up to `limit` due rows, oldest `scheduled_for` first.
    ///
    /// Each row is claimed by its own atomic statement so no long transaction
    /// blocks other writers.
    pub async fn claim_due(
        pool: &SqlitePool,
        limit: i64,
        now: NaiveDateTime,
        stale_before: NaiveDateTime,
    ) -> AppResult<Vec<QueueEntry>> {
        let mut entries: Vec<QueueEntry> = Vec::new();
        if limit <= 0 {
            return Ok(entries);
        }

        for _ in 0..(limit as usize) {
            match Self::claim_next_due(pool, now, stale_before).await? {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }

        Ok(entries)
    }

    /// Finalize abandoned PROCESSING rows that have no attempts left.
    ///
    /// Returns the rows moved to FAILED.
    pub async fn fail_expired(
        pool: &SqlitePool,
        stale_before: NaiveDateTime,
        now: NaiveDateTime,
    ) -> AppResult<Vec<QueueEntry>> {
        let sql = format!(
            r#"
            UPDATE notification_queue
            SET status = 'FAILED',
                failed_at = ?,
                error = COALESCE(error, 'processing lease expired'),
                updated_at = ?
            WHERE status = 'PROCESSING'
              AND updated_at <= ?
              AND attempts >= max_attempts
            RETURNING {QUEUE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, QueueEntry>(&sql)
            .bind(now)
            .bind(now)
            .bind(stale_before)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    /// `PROCESSING -> SENT`. Returns `None` if the row was not in PROCESSING.
    pub async fn mark_sent(
        pool: &SqlitePool,
        id: &str,
        message_id: Option<String>,
        now: NaiveDateTime,
    ) -> AppResult<Option<QueueEntry>> {
        let sql = format!(
            r#"
            UPDATE notification_queue
            SET status = 'SENT', sent_at = ?, message_id = ?, error = NULL, updated_at = ?
            WHERE id = ? AND status = 'PROCESSING'
            RETURNING {QUEUE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, QueueEntry>(&sql)
            .bind(now)
            .bind(message_id)
            .bind(now)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Record a failed attempt on a PROCESSING row.
    ///
    /// The row goes back to PENDING while attempts remain, otherwise it becomes
    /// FAILED with `failed_at` set. Returns `None` if the row was not in PROCESSING.
    pub async fn record_failure(
        pool: &SqlitePool,
        id: &str,
        error: &str,
        now: NaiveDateTime,
    ) -> AppResult<Option<QueueEntry>> {
        let sql = format!(
            r#"
            UPDATE notification_queue
            SET
                status = CASE WHEN attempts >= max_attempts THEN 'FAILED' ELSE 'PENDING' END,
                failed_at = CASE WHEN attempts >= max_attempts THEN ? ELSE failed_at END,
                error = ?,
                updated_at = ?
            WHERE id = ? AND status = 'PROCESSING'
            RETURNING {QUEUE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, QueueEntry>(&sql)
            .bind(now)
            .bind(error)
            .bind(now)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// `PENDING -> CANCELLED`. Returns whether a row changed.
    pub async fn cancel(
        pool: &SqlitePool,
        id: &str,
        reason: &str,
        now: NaiveDateTime,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notification_queue
            SET status = 'CANCELLED', error = ?, updated_at = ?
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(format!("cancelled: {}", reason))
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<QueueEntry>> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM notification_queue WHERE id = ?");

        sqlx::query_as::<_, QueueEntry>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Rows in a given state, most recently updated first.
    pub async fn list_by_status(
        pool: &SqlitePool,
        status: QueueStatus,
        limit: i64,
    ) -> AppResult<Vec<QueueEntry>> {
        let sql = format!(
            r#"
            SELECT {QUEUE_COLUMNS}
            FROM notification_queue
            WHERE status = ?
            ORDER BY updated_at DESC
            LIMIT ?
            "#
        );

        sqlx::query_as::<_, QueueEntry>(&sql)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }
}
