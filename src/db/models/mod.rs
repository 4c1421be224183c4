//! Database models split into separate files.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` work.

pub mod channel;
pub mod event;
pub mod notification_history;
pub mod notification_queue;
pub mod subscription;
pub mod user;

pub use self::channel::*;
pub use self::event::*;
pub use self::notification_history::*;
pub use self::notification_queue::*;
pub use self::subscription::*;
pub use self::user::*;
