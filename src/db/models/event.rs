use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use super::Channel;

/// Catalog entry describing a business event and the channels it may use.
///
/// Rows are maintained by administrators; this service only reads them.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_key: String,
    pub name: String,
    /// Maximum channel set for the event, stored as a JSON array.
    pub channels: Json<Vec<Channel>>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NotificationEvent {
    pub fn supports(&self, channel: Channel) -> bool {
        self.channels.0.contains(&channel)
    }
}
