use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub smtp: Option<SmtpConfig>,
    pub sms: Option<SmsGatewayConfig>,
    pub push: Option<PushGatewayConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin allowed by CORS (the admin web application).
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Whether the queue processor worker runs in this process.
    pub enabled: bool,
    /// How often (seconds) the worker polls for due rows.
    pub poll_interval_seconds: u64,
    /// Maximum rows claimed per poll.
    pub batch_size: u32,
    /// Attempts granted to newly enqueued rows.
    pub default_max_attempts: u32,
    /// Upper bound for a single sender invocation.
    pub send_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_email: String,
    pub from_name: String,
    pub use_tls: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsGatewayConfig {
    pub url: String,
    pub api_key: String,
    pub sender_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushGatewayConfig {
    pub url: String,
    pub api_key: String,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let smtp = match env::var("SMTP_HOST") {
            Ok(host) => Some(SmtpConfig {
                host,
                port: env::var("SMTP_PORT")
                    .unwrap_or_else(|_| "587".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("SMTP_PORT".to_string()))?,
                username: env::var("SMTP_USERNAME").ok(),
                password: env::var("SMTP_PASSWORD").ok(),
                from_email: env::var("SMTP_FROM_EMAIL")
                    .map_err(|_| ConfigError::MissingEnv("SMTP_FROM_EMAIL".to_string()))?,
                from_name: env::var("SMTP_FROM_NAME")
                    .unwrap_or_else(|_| "Exchange Notifications".to_string()),
                use_tls: env::var("SMTP_USE_TLS")
                    .ok()
                    .and_then(|v| parse_bool(&v))
                    .unwrap_or(true),
            }),
            Err(_) => None,
        };

        let sms = match env::var("SMS_GATEWAY_URL") {
            Ok(url) => Some(SmsGatewayConfig {
                url,
                api_key: env::var("SMS_GATEWAY_API_KEY")
                    .map_err(|_| ConfigError::MissingEnv("SMS_GATEWAY_API_KEY".to_string()))?,
                sender_id: env::var("SMS_SENDER_ID").ok(),
            }),
            Err(_) => None,
        };

        let push = match env::var("PUSH_GATEWAY_URL") {
            Ok(url) => Some(PushGatewayConfig {
                url,
                api_key: env::var("PUSH_GATEWAY_API_KEY")
                    .map_err(|_| ConfigError::MissingEnv("PUSH_GATEWAY_API_KEY".to_string()))?,
            }),
            Err(_) => None,
        };

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/notifications.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            queue: QueueConfig {
                enabled: env::var("NOTIFICATION_QUEUE_ENABLED")
                    .ok()
                    .and_then(|v| parse_bool(&v))
                    .unwrap_or(true),
                poll_interval_seconds: env::var("NOTIFICATION_QUEUE_POLL_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5u64),
                batch_size: env::var("NOTIFICATION_QUEUE_BATCH_SIZE")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .unwrap_or(100u32),
                default_max_attempts: env::var("NOTIFICATION_QUEUE_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse::<u32>()
                    .map_err(|_| {
                        ConfigError::InvalidValue("NOTIFICATION_QUEUE_MAX_ATTEMPTS".to_string())
                    })?
                    .max(1),
                send_timeout_seconds: env::var("NOTIFICATION_SEND_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30u64),
            },
            smtp,
            sms,
            push,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            enabled: true,
            poll_interval_seconds: 5,
            batch_size: 100,
            default_max_attempts: 3,
            send_timeout_seconds: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/notifications.db".to_string(),
                max_connections: 5,
            },
            queue: QueueConfig::default(),
            smtp: None,
            sms: None,
            push: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn default_queue_config_matches_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.queue.batch_size, 100);
        assert_eq!(cfg.queue.default_max_attempts, 3);
        assert!(cfg.smtp.is_none());
    }
}
