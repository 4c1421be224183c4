//! Event emission and enqueueing.
//!
//! [`NotificationService::enqueue`] is the transactional core: it validates the
//! event, resolves channels and writes queue (and history) rows in one
//! transaction. [`NotificationService::emit`] wraps it for business code and
//! never surfaces an error. [`EventEmitter`] makes `emit` fire-and-forget by
//! handing work to a background consumer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use crate::db::{
    Channel, CreateHistoryEntry, CreateQueueEntry, EventRepository, NotificationHistoryRepository,
    NotificationQueueRepository, SubscriptionRepository,
};
use crate::error::{AppError, AppResult};
use crate::services::content::ContentRegistry;
use crate::services::preferences::resolve_channels;

/// `channel` in a send request: one channel or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelSelection {
    One(Channel),
    Many(Vec<Channel>),
}

impl ChannelSelection {
    pub fn into_vec(self) -> Vec<Channel> {
        match self {
            ChannelSelection::One(channel) => vec![channel],
            ChannelSelection::Many(channels) => channels,
        }
    }
}

/// Recipient and content of a send request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendData {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub recipient_email: Option<String>,
    #[serde(default)]
    pub recipient_phone: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub action_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub event_key: String,
    #[serde(default)]
    pub channel: Option<ChannelSelection>,
    pub data: SendData,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub success: bool,
    pub queue_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub skipped_channels: Vec<Channel>,
}

impl SendResult {
    pub fn failure(error: &AppError) -> Self {
        Self {
            success: false,
            queue_ids: Vec::new(),
            error: Some(error.to_string()),
            skipped_channels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitOptions {
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skip_notification: bool,
}

/// One emission as accepted by the emitter and the HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitRequest {
    pub event_key: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(flatten)]
    pub options: EmitOptions,
}

/// First non-empty value among `keys`. Numeric ids are accepted as strings.
fn payload_str(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match payload.get(*key)? {
        Value::String(s) => Some(s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Clone)]
pub struct NotificationService {
    pool: SqlitePool,
    content: Arc<ContentRegistry>,
    default_max_attempts: i32,
}

impl NotificationService {
    pub fn new(pool: SqlitePool, content: ContentRegistry, default_max_attempts: u32) -> Self {
        Self {
            pool,
            content: Arc::new(content),
            default_max_attempts: default_max_attempts.clamp(1, i32::MAX as u32) as i32,
        }
    }

    /// Enqueue a notification. Errors are reported in the result, never raised.
    pub async fn send(&self, request: SendRequest) -> SendResult {
        let event_key = request.event_key.clone();
        match self.enqueue(request, Utc::now()).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Failed to enqueue notification for {}: {}", event_key, e);
                SendResult::failure(&e)
            }
        }
    }

    /// Validate the event, resolve channels and write all rows atomically.
    ///
    /// Event lookup failures are returned before anything is written.
    pub async fn enqueue(&self, request: SendRequest, now: DateTime<Utc>) -> AppResult<SendResult> {
        let SendRequest {
            event_key,
            channel,
            data,
            scheduled_for,
        } = request;

        let event = EventRepository::find_by_key(&self.pool, &event_key)
            .await?
            .ok_or_else(|| AppError::EventNotFound(event_key.clone()))?;
        if !event.is_active {
            return Err(AppError::EventInactive(event_key));
        }

        let user_id = data
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let subscription = match &user_id {
            Some(user_id) => SubscriptionRepository::find(&self.pool, user_id, &event_key).await?,
            None => None,
        };

        let requested = channel.map(ChannelSelection::into_vec);
        let mut resolution = resolve_channels(
            &event.channels.0,
            requested.as_deref(),
            user_id.is_some(),
            subscription.as_ref(),
            now,
        );

        // History rows need an owner.
        if user_id.is_none() && resolution.channels.contains(&Channel::InApp) {
            resolution.channels.retain(|c| *c != Channel::InApp);
            if !resolution.skipped.contains(&Channel::InApp) {
                resolution.skipped.push(Channel::InApp);
            }
        }

        if resolution.channels.is_empty() {
            let reason = if resolution.quiet_hours {
                "quiet_hours"
            } else {
                "empty_channels"
            };
            tracing::info!(
                event_key = %event_key,
                user_id = ?user_id,
                outcome = "noop",
                reason,
                skipped = ?resolution.skipped,
                "Nothing to deliver"
            );
            return Ok(SendResult {
                success: true,
                queue_ids: Vec::new(),
                error: None,
                skipped_channels: resolution.skipped,
            });
        }

        let mut row_data = data.data.unwrap_or_else(|| Value::Object(Default::default()));
        if let (Some(url), Value::Object(map)) = (&data.action_url, &mut row_data) {
            map.entry("actionUrl")
                .or_insert_with(|| Value::String(url.clone()));
        }

        let now_naive = now.naive_utc();
        let scheduled_for = scheduled_for.unwrap_or(now).naive_utc();
        let mut queue_ids = Vec::with_capacity(resolution.channels.len());

        let mut tx = self.pool.begin().await?;
        for &channel in &resolution.channels {
            let entry = NotificationQueueRepository::create(
                &mut *tx,
                CreateQueueEntry {
                    event_key: event_key.clone(),
                    user_id: user_id.clone(),
                    recipient_email: data.recipient_email.clone(),
                    recipient_phone: data.recipient_phone.clone(),
                    channel,
                    subject: data.subject.clone(),
                    message: data.message.clone(),
                    data: row_data.clone(),
                    scheduled_for,
                    max_attempts: self.default_max_attempts,
                },
                now_naive,
            )
            .await?;
            queue_ids.push(entry.id);

            if channel == Channel::InApp {
                if let Some(user_id) = &user_id {
                    NotificationHistoryRepository::create(
                        &mut *tx,
                        CreateHistoryEntry {
                            user_id: user_id.clone(),
                            event_key: event_key.clone(),
                            title: data.subject.clone().unwrap_or_else(|| event.name.clone()),
                            message: data.message.clone(),
                            data: row_data.clone(),
                            action_url: data.action_url.clone(),
                        },
                        now_naive,
                    )
                    .await?;
                }
            }
        }
        tx.commit().await?;

        tracing::info!(
            event_key = %event_key,
            user_id = ?user_id,
            channels = ?resolution.channels,
            "Enqueued {} notification(s)",
            queue_ids.len()
        );

        Ok(SendResult {
            success: true,
            queue_ids,
            error: None,
            skipped_channels: resolution.skipped,
        })
    }

    /// Render content for a business event and enqueue it.
    ///
    /// Never fails: unknown keys and enqueue errors are logged. Returns the send
    /// result when an enqueue was attempted.
    pub async fn emit(
        &self,
        event_key: &str,
        payload: &Value,
        options: EmitOptions,
    ) -> Option<SendResult> {
        if options.skip_notification {
            tracing::debug!(
                event_key = %event_key,
                outcome = "noop",
                reason = "skip_notification",
                "Notification skipped by caller"
            );
            return None;
        }

        let Some(content) = self.content.generate(event_key, payload) else {
            tracing::warn!(
                event_key = %event_key,
                outcome = "noop",
                reason = "unknown_event",
                "No content handler registered for event"
            );
            return None;
        };

        let request = SendRequest {
            event_key: event_key.to_string(),
            channel: options.channels.map(ChannelSelection::Many),
            data: SendData {
                user_id: payload_str(payload, &["userId"]),
                recipient_email: payload_str(payload, &["recipientEmail", "email"]),
                recipient_phone: payload_str(payload, &["recipientPhone", "phone"]),
                subject: Some(content.subject),
                message: content.message,
                data: Some(content.data),
                action_url: content.action_url,
            },
            scheduled_for: options.scheduled_for,
        };

        let result = self.send(request).await;
        if !result.success {
            tracing::warn!(
                event_key = %event_key,
                "Event emission did not enqueue: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        Some(result)
    }

    /// Emit every request concurrently; each one succeeds or fails on its own.
    pub async fn emit_batch(&self, requests: Vec<EmitRequest>) -> Vec<Option<SendResult>> {
        let emissions = requests
            .iter()
            .map(|r| self.emit(&r.event_key, &r.payload, r.options.clone()));
        futures::future::join_all(emissions).await
    }
}

/// Fire-and-forget handle for business code.
///
/// Sending never blocks; emissions are processed by the task started with
/// [`spawn_emit_consumer`].
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<EmitRequest>,
}

impl EventEmitter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EmitRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event_key: impl Into<String>, payload: Value, options: EmitOptions) {
        self.submit(EmitRequest {
            event_key: event_key.into(),
            payload,
            options,
        });
    }

    pub fn emit_batch(&self, requests: Vec<EmitRequest>) {
        for request in requests {
            self.submit(request);
        }
    }

    pub fn submit(&self, request: EmitRequest) {
        if let Err(e) = self.tx.send(request) {
            tracing::warn!(
                "Event emitter is closed, dropping emission for {}",
                e.0.event_key
            );
        }
    }
}

/// Drain emissions in the background, one task per emission.
///
/// On shutdown, queued emissions are still processed before the task exits.
pub fn spawn_emit_consumer(
    service: NotificationService,
    mut rx: mpsc::UnboundedReceiver<EmitRequest>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Event emitter consumer shutting down");
                    rx.close();
                    break;
                }
                request = rx.recv() => match request {
                    Some(request) => {
                        let service = service.clone();
                        in_flight.spawn(async move {
                            service
                                .emit(&request.event_key, &request.payload, request.options)
                                .await;
                        });
                    }
                    None => break,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Emission task failed: {}", e);
                    }
                }
            }
        }

        while let Some(request) = rx.recv().await {
            service
                .emit(&request.event_key, &request.payload, request.options)
                .await;
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Emission task failed: {}", e);
            }
        }
    })
}
