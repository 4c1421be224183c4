use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use super::Channel;

/// In-app notification as seen by the end user.
///
/// Lives independently from the sibling IN_APP queue row, so read state and
/// delivery state never interfere.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub user_id: String,
    pub event_key: String,
    #[sqlx(try_from = "String")]
    pub channel: Channel,
    pub title: String,
    pub message: String,
    pub data: Json<serde_json::Value>,
    pub action_url: Option<String>,
    pub is_read: bool,
    pub read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct CreateHistoryEntry {
    pub user_id: String,
    pub event_key: String,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub action_url: Option<String>,
}
