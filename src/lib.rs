//! Notification dispatch for exchange business events.
//!
//! Business code emits events; they are rendered, routed through user
//! preferences and written to a durable queue, which a background processor
//! delivers over email, SMS and push. In-app notifications land in a
//! per-user history immediately.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod services;

use services::{EventEmitter, NotificationService};

/// Shared state handed to every HTTP handler.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub notifications: NotificationService,
    pub emitter: EventEmitter,
}
