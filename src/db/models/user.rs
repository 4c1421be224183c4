use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Contact details the senders need to reach a user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Device token registered with the push gateway.
    pub push_token: Option<String>,
    pub display_name: Option<String>,
    pub created_at: NaiveDateTime,
}
