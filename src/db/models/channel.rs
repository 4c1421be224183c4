use serde::{Deserialize, Serialize};

/// Delivery mechanism for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Email,
    Sms,
    Push,
    InApp,
}

impl Channel {
    /// Convert from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "EMAIL" => Some(Channel::Email),
            "SMS" => Some(Channel::Sms),
            "PUSH" => Some(Channel::Push),
            "IN_APP" => Some(Channel::InApp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "EMAIL",
            Channel::Sms => "SMS",
            Channel::Push => "PUSH",
            Channel::InApp => "IN_APP",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.as_str().to_string()
    }
}

impl TryFrom<String> for Channel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value).ok_or_else(|| format!("Invalid channel: {}", value))
    }
}

impl TryFrom<&str> for Channel {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value).ok_or_else(|| format!("Invalid channel: {}", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_string_roundtrip_is_case_insensitive() {
        assert_eq!(Channel::from_str("in_app"), Some(Channel::InApp));
        assert_eq!(Channel::from_str("Email"), Some(Channel::Email));
        assert_eq!(Channel::from_str("fax"), None);
        assert_eq!(Channel::Push.as_str(), "PUSH");
    }

    #[test]
    fn channel_serializes_in_screaming_snake_case() {
        let json = serde_json::to_string(&vec![Channel::InApp, Channel::Sms]).unwrap();
        assert_eq!(json, r#"["IN_APP","SMS"]"#);
    }
}
