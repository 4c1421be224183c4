//! Channel routing: which of an event's channels a given emission goes out on.

use chrono::{DateTime, Utc};

use crate::db::models::{Channel, Subscription};

/// Outcome of channel resolution for one emission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Channels to enqueue, in event/request order without duplicates.
    pub channels: Vec<Channel>,
    /// Channels that were asked for (explicitly or via the catalog) but dropped.
    pub skipped: Vec<Channel>,
    /// Set when an active subscription's quiet window suppressed everything.
    pub quiet_hours: bool,
}

fn push_unique(list: &mut Vec<Channel>, channel: Channel) {
    if !list.contains(&channel) {
        list.push(channel);
    }
}

/// Resolve the final channel set.
///
/// 1. Candidates are the event channels, or the explicit request intersected with them.
/// 2. Without a user, or without an active subscription, candidates pass unchanged.
/// 3. An active subscription inside its quiet window suppresses every candidate.
/// 4. Otherwise candidates are filtered by the per-channel flags.
pub fn resolve_channels(
    event_channels: &[Channel],
    requested: Option<&[Channel]>,
    has_user: bool,
    subscription: Option<&Subscription>,
    now: DateTime<Utc>,
) -> Resolution {
    let mut resolution = Resolution::default();

    let mut candidates: Vec<Channel> = Vec::new();
    match requested {
        Some(requested) => {
            for &channel in requested {
                if event_channels.contains(&channel) {
                    push_unique(&mut candidates, channel);
                } else {
                    push_unique(&mut resolution.skipped, channel);
                }
            }
        }
        None => {
            for &channel in event_channels {
                push_unique(&mut candidates, channel);
            }
        }
    }

    let subscription = match subscription {
        Some(s) if has_user && s.is_active => s,
        _ => {
            resolution.channels = candidates;
            return resolution;
        }
    };

    if subscription
        .quiet_hours()
        .is_some_and(|window| window.contains(now))
    {
        resolution.quiet_hours = true;
        for channel in candidates {
            push_unique(&mut resolution.skipped, channel);
        }
        return resolution;
    }

    for channel in candidates {
        if subscription.allows(channel) {
            resolution.channels.push(channel);
        } else {
            push_unique(&mut resolution.skipped, channel);
        }
    }

    resolution
}
