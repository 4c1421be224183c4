use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use super::Channel;

/// Delivery state of a queue row.
///
/// `PENDING -> PROCESSING -> SENT | PENDING | FAILED`, plus `PENDING -> CANCELLED`.
/// `SENT`, `FAILED` and `CANCELLED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(QueueStatus::Pending),
            "PROCESSING" => Some(QueueStatus::Processing),
            "SENT" => Some(QueueStatus::Sent),
            "FAILED" => Some(QueueStatus::Failed),
            "CANCELLED" => Some(QueueStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::Processing => "PROCESSING",
            QueueStatus::Sent => "SENT",
            QueueStatus::Failed => "FAILED",
            QueueStatus::Cancelled => "CANCELLED",
        }
    }
}

impl TryFrom<String> for QueueStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value).ok_or_else(|| format!("Invalid queue status: {}", value))
    }
}

/// One (event, channel, recipient) delivery unit.
///
/// Content fields (`event_key` through `data`) never change after insert; the
/// queue processor only touches status, attempts, timestamps, `error` and
/// `message_id`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: String,
    pub event_key: String,
    pub user_id: Option<String>,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    #[sqlx(try_from = "String")]
    pub channel: Channel,
    pub subject: Option<String>,
    pub message: String,
    pub data: Json<serde_json::Value>,
    #[sqlx(try_from = "String")]
    pub status: QueueStatus,
    pub scheduled_for: NaiveDateTime,
    pub attempts: i32,
    pub max_attempts: i32,
    pub sent_at: Option<NaiveDateTime>,
    pub failed_at: Option<NaiveDateTime>,
    /// Last error observed for this row (send failure, timeout or cancellation reason).
    pub error: Option<String>,
    /// Transport-assigned identifier of the delivered message.
    pub message_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Data required to enqueue a row. The repository assigns id, status and counters.
#[derive(Debug, Clone)]
pub struct CreateQueueEntry {
    pub event_key: String,
    pub user_id: Option<String>,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    pub channel: Channel,
    pub subject: Option<String>,
    pub message: String,
    pub data: serde_json::Value,
    pub scheduled_for: NaiveDateTime,
    pub max_attempts: i32,
}
