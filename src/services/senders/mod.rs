//! Per-channel delivery adapters.
//!
//! A sender turns a claimed queue row into one transport call. Senders resolve
//! their own recipient and report every problem through [`SendOutcome`]; they
//! never touch queue rows, which is the processor's job.

pub mod email;
pub mod push;
pub mod sms;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::{Channel, QueueEntry, User, UserRepository};
use crate::error::AppResult;

pub use email::{EmailMessage, EmailSender, EmailTransport, SmtpEmailTransport};
pub use push::{HttpPushGateway, PushMessage, PushSender, PushTransport};
pub use sms::{HttpSmsGateway, SmsMessage, SmsSender, SmsTransport};

/// Result of a single send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn sent(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Failure reported by a transport client.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("gateway error ({status}): {body}")]
    Gateway { status: u16, body: String },

    #[error("SMTP error: {0}")]
    Smtp(String),
}

#[async_trait]
pub trait ChannelSender: Send + Sync + 'static {
    fn channel(&self) -> Channel;

    async fn send(&self, entry: &QueueEntry) -> SendOutcome;
}

/// Looks up contact details for a user id.
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    async fn find_contact(&self, user_id: &str) -> AppResult<Option<User>>;
}

/// User directory backed by the `users` table.
#[derive(Clone)]
pub struct SqliteUserDirectory {
    pool: SqlitePool,
}

impl SqliteUserDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn find_contact(&self, user_id: &str) -> AppResult<Option<User>> {
        UserRepository::find_by_id(&self.pool, user_id).await
    }
}

/// Resolve a recipient address: the explicit value on the row wins, otherwise
/// the directory entry for `user_id` is consulted through `pick`.
pub(crate) async fn resolve_recipient(
    directory: &dyn UserDirectory,
    explicit: Option<&str>,
    user_id: Option<&str>,
    what: &str,
    pick: fn(&User) -> Option<String>,
) -> Result<String, String> {
    if let Some(address) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        return Ok(address.to_string());
    }

    let user_id = user_id.ok_or_else(|| format!("no {} recipient and no user id", what))?;
    let user = directory
        .find_contact(user_id)
        .await
        .map_err(|e| format!("failed to look up user {}: {}", user_id, e))?
        .ok_or_else(|| format!("user {} not found", user_id))?;

    pick(&user)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| format!("user {} has no {}", user_id, what))
}

/// Pull a message id out of a gateway response body (`id` or `messageId`).
fn parse_message_id(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    ["messageId", "message_id", "id"]
        .iter()
        .find_map(|key| match json.get(*key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// POST a JSON body to an HTTP gateway with bearer auth.
pub(crate) async fn post_to_gateway<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &T,
) -> Result<Option<String>, TransportError> {
    let response = client
        .post(url)
        .header("Authorization", format!("Bearer {}", api_key))
        .json(body)
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(TransportError::Gateway {
            status: status.as_u16(),
            body: text,
        });
    }

    Ok(parse_message_id(&text))
}

pub(crate) fn gateway_client() -> Result<reqwest::Client, TransportError> {
    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?)
}

/// Channel -> sender lookup used by the queue processor.
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) {
        self.senders.insert(sender.channel(), sender);
    }

    pub fn with(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.register(sender);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelSender>> {
        self.senders.get(&channel).cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.senders.keys().copied().collect();
        channels.sort();
        channels
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::db::test_support::{put_user, test_pool};

    #[tokio::test]
    async fn explicit_recipient_wins_over_directory() {
        let dir = StaticDirectory(vec![user("u1", Some("dir@example.com"), None, None)]);
        let resolved = resolve_recipient(
            &dir,
            Some("explicit@example.com"),
            Some("u1"),
            "email address",
            |u| u.email.clone(),
        )
        .await;
        assert_eq!(resolved.unwrap(), "explicit@example.com");
    }

    #[tokio::test]
    async fn directory_lookup_failures_are_descriptive() {
        let dir = StaticDirectory(vec![user("u1", None, None, None)]);
        let pick: fn(&User) -> Option<String> = |u| u.email.clone();

        let err = resolve_recipient(&dir, None, None, "email address", pick)
            .await
            .unwrap_err();
        assert_eq!(err, "no email address recipient and no user id");

        let err = resolve_recipient(&dir, None, Some("ghost"), "email address", pick)
            .await
            .unwrap_err();
        assert_eq!(err, "user ghost not found");

        let err = resolve_recipient(&dir, Some("  "), Some("u1"), "email address", pick)
            .await
            .unwrap_err();
        assert_eq!(err, "user u1 has no email address");
    }

    #[test]
    fn message_id_is_read_from_common_response_shapes() {
        assert_eq!(parse_message_id(r#"{"id":"sms-1"}"#).as_deref(), Some("sms-1"));
        assert_eq!(parse_message_id(r#"{"messageId":42}"#).as_deref(), Some("42"));
        assert_eq!(parse_message_id(r#"{"status":"queued"}"#), None);
        assert_eq!(parse_message_id("OK"), None);
    }

    #[tokio::test]
    async fn sqlite_directory_reads_users_table() {
        let pool = test_pool().await;
        put_user(&pool, "u7", Some("u7@example.com"), Some("+15550007"), None).await;
        let dir = SqliteUserDirectory::new(pool);

        let found = dir.find_contact("u7").await.unwrap().unwrap();
        assert_eq!(found.email.as_deref(), Some("u7@example.com"));
        assert_eq!(found.phone.as_deref(), Some("+15550007"));
        assert!(dir.find_contact("nobody").await.unwrap().is_none());
    }
}
