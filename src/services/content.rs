//! Content generation for business events.
//!
//! Every known event key maps to a handler that parses the raw JSON payload
//! into a typed schema and renders `{subject, message, data, action_url}`.
//! Parsing is lenient: missing or mistyped fields fall back to defaults, so
//! generation never fails for a known key. Unknown keys produce no content.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::NotificationEvent;

/// Rendered notification content, channel-agnostic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationContent {
    pub subject: String,
    pub message: String,
    pub data: Value,
    pub action_url: Option<String>,
}

const UNKNOWN: &str = "unknown";

/// Lenient field deserializers. A field of the wrong JSON type becomes `None`
/// instead of failing the whole payload.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) if !s.trim().is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub order_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub crypto_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub crypto_currency: Option<String>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub fiat_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub fiat_currency: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalPayload {
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub withdrawal_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub destination_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KycPayload {
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminInvitePayload {
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub invitee_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub inviter_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub invite_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub expires_in_hours: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPayload {
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub alert_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<String>,
}

/// Typed payload of a known event, one variant per event key.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    OrderCreated(OrderPayload),
    OrderCompleted(OrderPayload),
    OrderCancelled(OrderPayload),
    OrderFailed(OrderPayload),
    PaymentReceived(PaymentPayload),
    WithdrawalRequested(WithdrawalPayload),
    KycSubmitted(KycPayload),
    KycApproved(KycPayload),
    KycRejected(KycPayload),
    AdminInvited(AdminInvitePayload),
    SecurityAlert(SecurityPayload),
    PasswordChanged(SecurityPayload),
}

fn parse<T>(event_key: &str, payload: &Value) -> T
where
    T: for<'de> Deserialize<'de> + Default,
{
    match serde_json::from_value::<T>(payload.clone()) {
        Ok(parsed) => parsed,
        Err(e) => {
            // Only reachable when the payload is not a JSON object at all.
            tracing::warn!(
                "Payload for {} is malformed ({}); rendering with defaults",
                event_key,
                e
            );
            T::default()
        }
    }
}

/// Format an amount with up to 8 fractional digits, trailing zeros trimmed.
fn fmt_amount(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => {
            let s = format!("{:.8}", v);
            let s = s.trim_end_matches('0').trim_end_matches('.');
            if s.is_empty() || s == "-0" {
                "0".to_string()
            } else {
                s.to_string()
            }
        }
        _ => "0".to_string(),
    }
}

fn or<'a>(value: &'a Option<String>, fallback: &'a str) -> &'a str {
    value.as_deref().unwrap_or(fallback)
}

fn money(amount: Option<f64>, currency: &Option<String>) -> String {
    match currency.as_deref() {
        Some(c) => format!("{} {}", fmt_amount(amount), c),
        None => fmt_amount(amount),
    }
}

fn order_url(p: &OrderPayload) -> Option<String> {
    p.order_id.as_ref().map(|id| format!("/orders/{}", id))
}

fn to_data<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or_else(|_| Value::Object(Default::default()))
}

impl EventPayload {
    pub fn event_key(&self) -> &'static str {
        match self {
            EventPayload::OrderCreated(_) => "ORDER_CREATED",
            EventPayload::OrderCompleted(_) => "ORDER_COMPLETED",
            EventPayload::OrderCancelled(_) => "ORDER_CANCELLED",
            EventPayload::OrderFailed(_) => "ORDER_FAILED",
            EventPayload::PaymentReceived(_) => "PAYMENT_RECEIVED",
            EventPayload::WithdrawalRequested(_) => "WITHDRAWAL_REQUESTED",
            EventPayload::KycSubmitted(_) => "KYC_SUBMITTED",
            EventPayload::KycApproved(_) => "KYC_APPROVED",
            EventPayload::KycRejected(_) => "KYC_REJECTED",
            EventPayload::AdminInvited(_) => "ADMIN_INVITED",
            EventPayload::SecurityAlert(_) => "SECURITY_ALERT",
            EventPayload::PasswordChanged(_) => "PASSWORD_CHANGED",
        }
    }

    pub fn render(&self) -> NotificationContent {
        match self {
            EventPayload::OrderCreated(p) => {
                let side = or(&p.order_type, "BUY").to_uppercase();
                NotificationContent {
                    subject: format!("Order {} created", or(&p.order_id, UNKNOWN)),
                    message: format!(
                        "Your {} order {} for {} ({}) has been created and is awaiting payment.",
                        side,
                        or(&p.order_id, UNKNOWN),
                        money(p.crypto_amount, &p.crypto_currency),
                        money(p.fiat_amount, &p.fiat_currency),
                    ),
                    data: to_data(p),
                    action_url: order_url(p),
                }
            }
            EventPayload::OrderCompleted(p) => NotificationContent {
                subject: format!("Order {} completed", or(&p.order_id, UNKNOWN)),
                message: format!(
                    "Your order {} is complete. {} has been sent to {}. Transaction hash: {}.",
                    or(&p.order_id, UNKNOWN),
                    money(p.crypto_amount, &p.crypto_currency),
                    or(&p.wallet_address, "your wallet"),
                    or(&p.tx_hash, "pending"),
                ),
                data: to_data(p),
                action_url: order_url(p),
            },
            EventPayload::OrderCancelled(p) => NotificationContent {
                subject: format!("Order {} cancelled", or(&p.order_id, UNKNOWN)),
                message: format!(
                    "Your order {} has been cancelled. Reason: {}.",
                    or(&p.order_id, UNKNOWN),
                    or(&p.reason, "not specified"),
                ),
                data: to_data(p),
                action_url: order_url(p),
            },
            EventPayload::OrderFailed(p) => NotificationContent {
                subject: format!("Order {} failed", or(&p.order_id, UNKNOWN)),
                message: format!(
                    "We could not complete your order {}. Reason: {}. Please contact support if funds were debited.",
                    or(&p.order_id, UNKNOWN),
                    or(&p.reason, "not specified"),
                ),
                data: to_data(p),
                action_url: order_url(p),
            },
            EventPayload::PaymentReceived(p) => NotificationContent {
                subject: format!("Payment received for order {}", or(&p.order_id, UNKNOWN)),
                message: format!(
                    "We received your payment of {} via {} (reference {}).",
                    money(p.amount, &p.currency),
                    or(&p.payment_method, "bank transfer"),
                    or(&p.reference, "n/a"),
                ),
                data: to_data(p),
                action_url: p.order_id.as_ref().map(|id| format!("/orders/{}", id)),
            },
            EventPayload::WithdrawalRequested(p) => NotificationContent {
                subject: "Withdrawal requested".to_string(),
                message: format!(
                    "A withdrawal of {} to {} was requested. If this wasn't you, lock your account immediately.",
                    money(p.amount, &p.currency),
                    or(&p.destination_address, "an external address"),
                ),
                data: to_data(p),
                action_url: p
                    .withdrawal_id
                    .as_ref()
                    .map(|id| format!("/withdrawals/{}", id)),
            },
            EventPayload::KycSubmitted(p) => NotificationContent {
                subject: "KYC documents received".to_string(),
                message: format!(
                    "Thanks {}, your verification documents were received and are under review.",
                    or(&p.user_name, "there"),
                ),
                data: to_data(p),
                action_url: Some("/kyc".to_string()),
            },
            EventPayload::KycApproved(p) => NotificationContent {
                subject: "Identity verification approved".to_string(),
                message: format!(
                    "Congratulations {}, your identity has been verified (level {}).",
                    or(&p.user_name, "there"),
                    or(&p.level, "basic"),
                ),
                data: to_data(p),
                action_url: Some("/kyc".to_string()),
            },
            EventPayload::KycRejected(p) => NotificationContent {
                subject: "Identity verification rejected".to_string(),
                message: format!(
                    "Sorry {}, we could not verify your identity. Reason: {}. You can resubmit your documents.",
                    or(&p.user_name, "there"),
                    or(&p.reason, "not specified"),
                ),
                data: to_data(p),
                action_url: Some("/kyc".to_string()),
            },
            EventPayload::AdminInvited(p) => NotificationContent {
                subject: "You have been invited to the admin console".to_string(),
                message: format!(
                    "Hello {}, {} invited you to join the admin console as {}. The invitation expires in {} hours.",
                    or(&p.invitee_name, "there"),
                    or(&p.inviter_name, "An administrator"),
                    or(&p.role, "admin"),
                    or(&p.expires_in_hours, "48"),
                ),
                data: to_data(p),
                action_url: p.invite_url.clone(),
            },
            EventPayload::SecurityAlert(p) => NotificationContent {
                subject: format!("Security alert: {}", or(&p.alert_type, "account activity")),
                message: format!(
                    "We detected {} from IP {} ({}) on {} at {}. If this wasn't you, change your password now.",
                    or(&p.alert_type, "unusual activity"),
                    or(&p.ip_address, UNKNOWN),
                    or(&p.location, "unknown location"),
                    or(&p.device, "an unknown device"),
                    or(&p.occurred_at, "an unknown time"),
                ),
                data: to_data(p),
                action_url: Some("/security".to_string()),
            },
            EventPayload::PasswordChanged(p) => NotificationContent {
                subject: "Your password was changed".to_string(),
                message: format!(
                    "Your password was changed from IP {} on {}. If this wasn't you, contact support immediately.",
                    or(&p.ip_address, UNKNOWN),
                    or(&p.device, "an unknown device"),
                ),
                data: to_data(p),
                action_url: Some("/security".to_string()),
            },
        }
    }
}

type Handler = fn(&Value) -> EventPayload;

/// Maps event keys to typed payload handlers.
#[derive(Clone)]
pub struct ContentRegistry {
    handlers: HashMap<String, Handler>,
}

impl Default for ContentRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ContentRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with a handler for every built-in event key.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("ORDER_CREATED", |v| {
            EventPayload::OrderCreated(parse("ORDER_CREATED", v))
        });
        registry.register("ORDER_COMPLETED", |v| {
            EventPayload::OrderCompleted(parse("ORDER_COMPLETED", v))
        });
        registry.register("ORDER_CANCELLED", |v| {
            EventPayload::OrderCancelled(parse("ORDER_CANCELLED", v))
        });
        registry.register("ORDER_FAILED", |v| {
            EventPayload::OrderFailed(parse("ORDER_FAILED", v))
        });
        registry.register("PAYMENT_RECEIVED", |v| {
            EventPayload::PaymentReceived(parse("PAYMENT_RECEIVED", v))
        });
        registry.register("WITHDRAWAL_REQUESTED", |v| {
            EventPayload::WithdrawalRequested(parse("WITHDRAWAL_REQUESTED", v))
        });
        registry.register("KYC_SUBMITTED", |v| {
            EventPayload::KycSubmitted(parse("KYC_SUBMITTED", v))
        });
        registry.register("KYC_APPROVED", |v| {
            EventPayload::KycApproved(parse("KYC_APPROVED", v))
        });
        registry.register("KYC_REJECTED", |v| {
            EventPayload::KycRejected(parse("KYC_REJECTED", v))
        });
        registry.register("ADMIN_INVITED", |v| {
            EventPayload::AdminInvited(parse("ADMIN_INVITED", v))
        });
        registry.register("SECURITY_ALERT", |v| {
            EventPayload::SecurityAlert(parse("SECURITY_ALERT", v))
        });
        registry.register("PASSWORD_CHANGED", |v| {
            EventPayload::PasswordChanged(parse("PASSWORD_CHANGED", v))
        });
        registry
    }

    pub fn register(&mut self, event_key: &str, handler: Handler) {
        self.handlers.insert(event_key.to_string(), handler);
    }

    pub fn handles(&self, event_key: &str) -> bool {
        self.handlers.contains_key(event_key)
    }

    pub fn parse(&self, event_key: &str, payload: &Value) -> Option<EventPayload> {
        self.handlers.get(event_key).map(|handler| handler(payload))
    }

    /// Render content for `event_key`, or `None` if no handler is registered.
    pub fn generate(&self, event_key: &str, payload: &Value) -> Option<NotificationContent> {
        self.parse(event_key, payload).map(|p| p.render())
    }

    /// Active catalog entries that have no handler.
    pub fn missing_handlers<'a>(&self, events: &'a [NotificationEvent]) -> Vec<&'a str> {
        events
            .iter()
            .filter(|e| e.is_active && !self.handles(&e.event_key))
            .map(|e| e.event_key.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_completed_mentions_order_id() {
        let registry = ContentRegistry::with_defaults();
        let content = registry
            .generate(
                "ORDER_COMPLETED",
                &json!({
                    "userId": "u1",
                    "orderId": "o1",
                    "cryptoAmount": 0.5,
                    "cryptoCurrency": "BTC",
                    "walletAddress": "bc1q...",
                    "txHash": "0xabc"
                }),
            )
            .unwrap();

        assert!(content.subject.contains("o1"));
        assert!(content.message.contains("0.5 BTC"));
        assert!(content.message.contains("0xabc"));
        assert_eq!(content.action_url.as_deref(), Some("/orders/o1"));
        assert_eq!(content.data["orderId"], "o1");
        // Recipient fields are not part of the event schema.
        assert!(content.data.get("userId").is_none());
    }

    #[test]
    fn unknown_event_key_yields_no_content() {
        let registry = ContentRegistry::with_defaults();
        assert!(registry.generate("MOON_LANDING", &json!({})).is_none());
        assert!(!registry.handles("MOON_LANDING"));
    }

    #[test]
    fn every_known_key_renders_with_empty_or_garbage_payload() {
        let registry = ContentRegistry::with_defaults();
        let keys = [
            "ORDER_CREATED",
            "ORDER_COMPLETED",
            "ORDER_CANCELLED",
            "ORDER_FAILED",
            "PAYMENT_RECEIVED",
            "WITHDRAWAL_REQUESTED",
            "KYC_SUBMITTED",
            "KYC_APPROVED",
            "KYC_REJECTED",
            "ADMIN_INVITED",
            "SECURITY_ALERT",
            "PASSWORD_CHANGED",
        ];
        for key in keys {
            for payload in [json!({}), json!(null), json!([1, 2]), json!("text")] {
                let content = registry.generate(key, &payload).unwrap();
                assert!(!content.subject.is_empty(), "{key}");
                assert!(!content.message.is_empty(), "{key}");
            }
            assert_eq!(registry.parse(key, &json!({})).unwrap().event_key(), key);
        }
    }

    #[test]
    fn mistyped_fields_degrade_individually() {
        let registry = ContentRegistry::with_defaults();
        let content = registry
            .generate(
                "ORDER_CANCELLED",
                &json!({ "orderId": 42, "reason": { "nested": true } }),
            )
            .unwrap();
        assert_eq!(content.subject, "Order 42 cancelled");
        assert!(content.message.contains("not specified"));
    }

    #[test]
    fn generation_is_deterministic() {
        let registry = ContentRegistry::with_defaults();
        let payload = json!({ "orderId": "o9", "amount": "12.50", "currency": "EUR" });
        let a = registry.generate("PAYMENT_RECEIVED", &payload).unwrap();
        let b = registry.generate("PAYMENT_RECEIVED", &payload).unwrap();
        assert_eq!(a, b);
        assert!(a.message.contains("12.5 EUR"));
    }

    #[test]
    fn amounts_are_trimmed() {
        assert_eq!(fmt_amount(Some(0.50000000)), "0.5");
        assert_eq!(fmt_amount(Some(100.0)), "100");
        assert_eq!(fmt_amount(Some(0.000000012)), "0.00000001");
        assert_eq!(fmt_amount(None), "0");
        assert_eq!(fmt_amount(Some(f64::NAN)), "0");
    }

    #[test]
    fn missing_handlers_reports_only_active_unhandled_events() {
        use crate::db::models::{Channel, NotificationEvent};
        use sqlx::types::Json;

        let now = chrono::Utc::now().naive_utc();
        let event = |key: &str, active: bool| NotificationEvent {
            event_key: key.to_string(),
            name: key.to_string(),
            channels: Json(vec![Channel::Email]),
            is_active: active,
            created_at: now,
            updated_at: now,
        };
        let events = vec![
            event("ORDER_CREATED", true),
            event("LEGACY_PROMO", true),
            event("RETIRED_EVENT", false),
        ];
        let registry = ContentRegistry::with_defaults();
        assert_eq!(registry.missing_handlers(&events), vec!["LEGACY_PROMO"]);
    }
}
