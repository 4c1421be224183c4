pub mod models;
pub mod repository;

pub use models::*;
pub use repository::*;

#[cfg(test)]
pub mod test_support {
    //! In-memory database helpers shared by the test modules.

    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::types::Json;
    use sqlx::SqlitePool;
    use std::str::FromStr;

    use super::models::Channel;

    /// Fresh in-memory database with all migrations applied.
    ///
    /// A single connection is used so every query sees the same in-memory file.
    pub async fn test_pool() -> SqlitePool {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    pub async fn put_event(pool: &SqlitePool, event_key: &str, channels: &[Channel], active: bool) {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO notification_events (event_key, name, channels, is_active)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(event_key)
        .bind(event_key.to_lowercase())
        .bind(Json(channels.to_vec()))
        .bind(active)
        .execute(pool)
        .await
        .unwrap();
    }

    pub async fn put_user(
        pool: &SqlitePool,
        id: &str,
        email: Option<&str>,
        phone: Option<&str>,
        push_token: Option<&str>,
    ) {
        sqlx::query(
            "INSERT OR REPLACE INTO users (id, email, phone, push_token, display_name) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(email)
        .bind(phone)
        .bind(push_token)
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
    }
}
