use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::{
    gateway_client, post_to_gateway, resolve_recipient, ChannelSender, SendOutcome,
    TransportError, UserDirectory,
};
use crate::config::SmsGatewayConfig;
use crate::db::{Channel, QueueEntry};

/// Longest text sent in a single SMS request; longer messages are cut.
pub const MAX_SMS_LENGTH: usize = 480;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmsMessage {
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub body: String,
}

#[async_trait]
pub trait SmsTransport: Send + Sync + 'static {
    async fn send_sms(&self, sms: &SmsMessage) -> Result<Option<String>, TransportError>;
}

pub struct SmsSender {
    transport: Arc<dyn SmsTransport>,
    directory: Arc<dyn UserDirectory>,
    sender_id: Option<String>,
}

impl SmsSender {
    pub fn new(
        transport: Arc<dyn SmsTransport>,
        directory: Arc<dyn UserDirectory>,
        sender_id: Option<String>,
    ) -> Self {
        Self {
            transport,
            directory,
            sender_id,
        }
    }
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_SMS_LENGTH {
        return message.to_string();
    }
    let mut cut: String = message.chars().take(MAX_SMS_LENGTH - 3).collect();
    cut.push_str("...");
    cut
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, entry: &QueueEntry) -> SendOutcome {
        let to = match resolve_recipient(
            self.directory.as_ref(),
            entry.recipient_phone.as_deref(),
            entry.user_id.as_deref(),
            "phone number",
            |u| u.phone.clone(),
        )
        .await
        {
            Ok(to) => to,
            Err(e) => return SendOutcome::failed(e),
        };

        let sms = SmsMessage {
            to,
            from: self.sender_id.clone(),
            body: truncate(&entry.message),
        };

        match self.transport.send_sms(&sms).await {
            Ok(message_id) => SendOutcome::sent(message_id),
            Err(e) => SendOutcome::failed(e.to_string()),
        }
    }
}

/// SMS gateway speaking a plain JSON-over-HTTP API.
pub struct HttpSmsGateway {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpSmsGateway {
    pub fn new(config: &SmsGatewayConfig) -> Result<Self, TransportError> {
        Ok(Self {
            client: gateway_client()?,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl SmsTransport for HttpSmsGateway {
    async fn send_sms(&self, sms: &SmsMessage) -> Result<Option<String>, TransportError> {
        post_to_gateway(&self.client, &self.url, &self.api_key, sms).await
    }
}
