use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::{
    gateway_client, post_to_gateway, resolve_recipient, ChannelSender, SendOutcome,
    TransportError, UserDirectory,
};
use crate::config::PushGatewayConfig;
use crate::db::{Channel, QueueEntry};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn send_push(&self, push: &PushMessage) -> Result<Option<String>, TransportError>;
}

pub struct PushSender {
    transport: Arc<dyn PushTransport>,
    directory: Arc<dyn UserDirectory>,
}

impl PushSender {
    pub fn new(transport: Arc<dyn PushTransport>, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            transport,
            directory,
        }
    }
}

#[async_trait]
impl ChannelSender for PushSender {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(&self, entry: &QueueEntry) -> SendOutcome {
        // Push is always addressed through the user's registered device token.
        let token = match resolve_recipient(
            self.directory.as_ref(),
            None,
            entry.user_id.as_deref(),
            "push token",
            |u| u.push_token.clone(),
        )
        .await
        {
            Ok(token) => token,
            Err(e) => return SendOutcome::failed(e),
        };

        let push = PushMessage {
            token,
            title: entry
                .subject
                .clone()
                .unwrap_or_else(|| entry.event_key.replace('_', " ")),
            body: entry.message.clone(),
            data: entry.data.0.clone(),
        };

        match self.transport.send_push(&push).await {
            Ok(message_id) => SendOutcome::sent(message_id),
            Err(e) => SendOutcome::failed(e.to_string()),
        }
    }
}

pub struct HttpPushGateway {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpPushGateway {
    pub fn new(config: &PushGatewayConfig) -> Result<Self, TransportError> {
        Ok(Self {
            client: gateway_client()?,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl PushTransport for HttpPushGateway {
    async fn send_push(&self, push: &PushMessage) -> Result<Option<String>, TransportError> {
        post_to_gateway(&self.client, &self.url, &self.api_key, push).await
    }
}
