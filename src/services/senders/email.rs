//! Email delivery: recipient resolution plus an SMTP transport built on lettre.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use uuid::Uuid;

use super::{resolve_recipient, ChannelSender, SendOutcome, TransportError, UserDirectory};
use crate::config::SmtpConfig;
use crate::db::{Channel, QueueEntry};

/// Email ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text_body: String,
}

#[async_trait]
pub trait EmailTransport: Send + Sync + 'static {
    /// Deliver the email, returning the transport message id if one is known.
    async fn send_email(&self, email: &EmailMessage) -> Result<Option<String>, TransportError>;
}

pub struct EmailSender {
    transport: Arc<dyn EmailTransport>,
    directory: Arc<dyn UserDirectory>,
}

impl EmailSender {
    pub fn new(transport: Arc<dyn EmailTransport>, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            transport,
            directory,
        }
    }
}

fn text_body(entry: &QueueEntry) -> String {
    match entry.data.0.get("actionUrl").and_then(|v| v.as_str()) {
        Some(url) => format!("{}\n\n{}", entry.message, url),
        None => entry.message.clone(),
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, entry: &QueueEntry) -> SendOutcome {
        let to = match resolve_recipient(
            self.directory.as_ref(),
            entry.recipient_email.as_deref(),
            entry.user_id.as_deref(),
            "email address",
            |u| u.email.clone(),
        )
        .await
        {
            Ok(to) => to,
            Err(e) => return SendOutcome::failed(e),
        };

        let email = EmailMessage {
            to,
            subject: entry
                .subject
                .clone()
                .unwrap_or_else(|| entry.event_key.replace('_', " ")),
            text_body: text_body(entry),
        };

        match self.transport.send_email(&email).await {
            Ok(message_id) => {
                tracing::debug!("Email for queue entry {} accepted by transport", entry.id);
                SendOutcome::sent(message_id)
            }
            Err(e) => SendOutcome::failed(e.to_string()),
        }
    }
}

/// SMTP transport using lettre's async Tokio transport.
pub struct SmtpEmailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    message_id_domain: String,
}

impl SmtpEmailTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self, TransportError> {
        let transport = if config.use_tls {
            let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| TransportError::Smtp(format!("failed to create SMTP relay: {}", e)))?
                .port(config.port);
            if let (Some(username), Some(password)) = (&config.username, &config.password) {
                builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
            }
            builder.build()
        } else {
            let mut builder =
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                    .port(config.port);
            if let (Some(username), Some(password)) = (&config.username, &config.password) {
                builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
            }
            builder.build()
        };

        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_email)
            .parse()
            .map_err(|e| TransportError::Smtp(format!("invalid from address: {}", e)))?;
        let message_id_domain = config
            .from_email
            .rsplit_once('@')
            .map(|(_, domain)| domain.to_string())
            .unwrap_or_else(|| "localhost".to_string());

        tracing::info!(
            "SMTP transport configured for {}:{} (tls={})",
            config.host,
            config.port,
            config.use_tls
        );

        Ok(Self {
            transport,
            from,
            message_id_domain,
        })
    }
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn send_email(&self, email: &EmailMessage) -> Result<Option<String>, TransportError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|_| TransportError::InvalidRecipient(email.to.clone()))?;
        let message_id = format!("<{}@{}>", Uuid::new_v4(), self.message_id_domain);

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .message_id(Some(message_id.clone()))
            .header(ContentType::TEXT_PLAIN)
            .body(email.text_body.clone())
            .map_err(|e| TransportError::Smtp(format!("failed to build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| TransportError::Smtp(e.to_string()))?;

        Ok(Some(message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<EmailMessage>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl EmailTransport for RecordingTransport {
        async fn send_email(&self, email: &EmailMessage) -> Result<Option<String>, TransportError> {
            if let Some(err) = &self.fail_with {
                return Err(TransportError::Smtp(err.clone()));
            }
            self.sent.lock().await.push(email.clone());
            Ok(Some("<m1@example.com>".to_string()))
        }
    }

    #[tokio::test]
    async fn sends_to_directory_address_with_action_url() {
        let transport = Arc::new(RecordingTransport::default());
        let directory = Arc::new(StaticDirectory(vec![user(
            "u1",
            Some("u1@example.com"),
            None,
            None,
        )]));
        let sender = EmailSender::new(transport.clone(), directory);

        let mut entry = queue_entry(Channel::Email, Some("u1"));
        entry.data.0["actionUrl"] = serde_json::json!("/security");
        let outcome = sender.send(&entry).await;

        assert_eq!(outcome, SendOutcome::sent(Some("<m1@example.com>".to_string())));
        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "u1@example.com");
        assert_eq!(sent[0].subject, "Security alert");
        assert!(sent[0].text_body.ends_with("/security"));
    }

    #[tokio::test]
    async fn missing_recipient_is_a_plain_failure() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = EmailSender::new(transport.clone(), Arc::new(StaticDirectory(vec![])));

        let outcome = sender.send(&queue_entry(Channel::Email, Some("u404"))).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("user u404 not found"));
        assert!(transport.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn transport_errors_become_failures() {
        let transport = Arc::new(RecordingTransport {
            fail_with: Some("connection refused".to_string()),
            ..Default::default()
        });
        let sender = EmailSender::new(transport, Arc::new(StaticDirectory(vec![])));

        let mut entry = queue_entry(Channel::Email, None);
        entry.recipient_email = Some("anon@example.com".to_string());
        let outcome = sender.send(&entry).await;
        assert_eq!(
            outcome,
            SendOutcome::failed("SMTP error: connection refused")
        );
    }
}
