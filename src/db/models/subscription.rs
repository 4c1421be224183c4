use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

use super::Channel;

/// Advisory delivery cadence. Stored and exposed, not enforced by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    #[default]
    Instant,
    Hourly,
    Daily,
    Weekly,
}

impl Frequency {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "INSTANT" => Some(Frequency::Instant),
            "HOURLY" => Some(Frequency::Hourly),
            "DAILY" => Some(Frequency::Daily),
            "WEEKLY" => Some(Frequency::Weekly),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Instant => "INSTANT",
            Frequency::Hourly => "HOURLY",
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
        }
    }
}

impl TryFrom<String> for Frequency {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value).ok_or_else(|| format!("Invalid frequency: {}", value))
    }
}

/// Per-user, per-event notification preferences.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub event_key: String,
    pub email_enabled: bool,
    pub in_app_enabled: bool,
    pub sms_enabled: bool,
    pub push_enabled: bool,
    /// Local wall-clock start of the quiet window, `HH:MM`.
    pub quiet_hours_start: Option<String>,
    /// Local wall-clock end of the quiet window, `HH:MM` (exclusive).
    pub quiet_hours_end: Option<String>,
    /// IANA timezone name the window is expressed in. UTC when absent.
    pub quiet_hours_timezone: Option<String>,
    #[sqlx(try_from = "String")]
    pub frequency: Frequency,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Subscription {
    /// Whether the per-channel flag lets `channel` through.
    pub fn allows(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email_enabled,
            Channel::InApp => self.in_app_enabled,
            Channel::Sms => self.sms_enabled,
            Channel::Push => self.push_enabled,
        }
    }

    /// Parsed quiet-hours window, if both bounds are configured and valid.
    pub fn quiet_hours(&self) -> Option<QuietHours> {
        let start = self.quiet_hours_start.as_deref()?;
        let end = self.quiet_hours_end.as_deref()?;
        match QuietHours::parse(start, end, self.quiet_hours_timezone.as_deref()) {
            Ok(window) => Some(window),
            Err(e) => {
                tracing::warn!(
                    "Ignoring invalid quiet hours on subscription {} (user {}): {}",
                    self.id,
                    self.user_id,
                    e
                );
                None
            }
        }
    }
}

/// Daily recurring quiet window in a fixed timezone.
///
/// The window is `[start, end)` in local time. When `start > end` it wraps past
/// midnight; when `start == end` it is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub timezone: Tz,
}

impl QuietHours {
    pub fn parse(start: &str, end: &str, timezone: Option<&str>) -> Result<Self, String> {
        let start = parse_clock(start)?;
        let end = parse_clock(end)?;
        let timezone = match timezone.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| format!("unknown timezone '{}'", name))?,
            None => Tz::UTC,
        };
        Ok(Self {
            start,
            end,
            timezone,
        })
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone).time();
        if self.start == self.end {
            false
        } else if self.start < self.end {
            local >= self.start && local < self.end
        } else {
            local >= self.start || local < self.end
        }
    }
}

fn parse_clock(value: &str) -> Result<NaiveTime, String> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| format!("invalid time '{}', expected HH:MM", value))
}

/// Quiet-hours bounds as supplied by API callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHoursSetting {
    pub start: String,
    pub end: String,
    pub timezone: Option<String>,
}

/// Partial update applied by the subscription upsert. `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSubscription {
    pub email_enabled: Option<bool>,
    pub in_app_enabled: Option<bool>,
    pub sms_enabled: Option<bool>,
    pub push_enabled: Option<bool>,
    /// `Some(None)` clears the window, `None` leaves it untouched.
    #[serde(default, deserialize_with = "double_option")]
    pub quiet_hours: Option<Option<QuietHoursSetting>>,
    pub frequency: Option<Frequency>,
    pub is_active: Option<bool>,
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
