pub mod content;
pub mod init;
pub mod notifications;
pub mod preferences;
pub mod processor;
pub mod senders;

pub use content::ContentRegistry;
pub use notifications::{EmitOptions, EmitRequest, EventEmitter, NotificationService, SendRequest, SendResult};
pub use processor::{BatchSummary, QueueProcessor};
pub use senders::SenderRegistry;
