use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// Subscription Repository
// ============================================================================

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, user_id, event_key,
    email_enabled, in_app_enabled, sms_enabled, push_enabled,
    quiet_hours_start, quiet_hours_end, quiet_hours_timezone,
    frequency, is_active, created_at, updated_at
"#;

pub struct SubscriptionRepository;

impl SubscriptionRepository {
    pub async fn find(
        pool: &SqlitePool,
        user_id: &str,
        event_key: &str,
    ) -> AppResult<Option<Subscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM notification_subscriptions WHERE user_id = ? AND event_key = ?"
        );

        sqlx::query_as::<_, Subscription>(&sql)
            .bind(user_id)
            .bind(event_key)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Create or update the `(user_id, event_key)` subscription.
    ///
    /// Fields left `None` in `update` keep their current value; a new row starts
    /// with every channel enabled, instant frequency, active and no quiet hours.
    /// The merge happens inside one statement, so concurrent partial updates
    /// never overwrite each other's fields.
    pub async fn upsert(
        pool: &SqlitePool,
        user_id: &str,
        event_key: &str,
        update: UpsertSubscription,
        now: NaiveDateTime,
    ) -> AppResult<Subscription> {
        let replace_quiet_hours = update.quiet_hours.is_some();
        let (quiet_start, quiet_end, quiet_tz) = match update.quiet_hours {
            None | Some(None) => (None, None, None),
            Some(Some(setting)) => {
                QuietHours::parse(&setting.start, &setting.end, setting.timezone.as_deref())
                    .map_err(AppError::Validation)?;
                (Some(setting.start), Some(setting.end), setting.timezone)
            }
        };
        let frequency = update.frequency.map(Frequency::as_str);

        let sql = format!(
            r#"
            INSERT INTO notification_subscriptions (
                id, user_id, event_key,
                email_enabled, in_app_enabled, sms_enabled, push_enabled,
                quiet_hours_start, quiet_hours_end, quiet_hours_timezone,
                frequency, is_active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, event_key) DO UPDATE SET
                email_enabled = COALESCE(?, email_enabled),
                in_app_enabled = COALESCE(?, in_app_enabled),
                sms_enabled = COALESCE(?, sms_enabled),
                push_enabled = COALESCE(?, push_enabled),
                quiet_hours_start = CASE WHEN ? THEN excluded.quiet_hours_start ELSE quiet_hours_start END,
                quiet_hours_end = CASE WHEN ? THEN excluded.quiet_hours_end ELSE quiet_hours_end END,
                quiet_hours_timezone = CASE WHEN ? THEN excluded.quiet_hours_timezone ELSE quiet_hours_timezone END,
                frequency = COALESCE(?, frequency),
                is_active = COALESCE(?, is_active),
                updated_at = excluded.updated_at
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Subscription>(&sql)
            // New row
            .bind(Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(event_key)
            .bind(update.email_enabled.unwrap_or(true))
            .bind(update.in_app_enabled.unwrap_or(true))
            .bind(update.sms_enabled.unwrap_or(true))
            .bind(update.push_enabled.unwrap_or(true))
            .bind(quiet_start)
            .bind(quiet_end)
            .bind(quiet_tz)
            .bind(frequency.unwrap_or(Frequency::Instant.as_str()))
            .bind(update.is_active.unwrap_or(true))
            .bind(now)
            .bind(now)
            // Existing row
            .bind(update.email_enabled)
            .bind(update.in_app_enabled)
            .bind(update.sms_enabled)
            .bind(update.push_enabled)
            .bind(replace_quiet_hours)
            .bind(replace_quiet_hours)
            .bind(replace_quiet_hours)
            .bind(frequency)
            .bind(update.is_active)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }
}
