pub mod event_repository;
pub mod notification_history_repository;
pub mod notification_queue_repository;
pub mod subscription_repository;
pub mod user;

pub use event_repository::EventRepository;
pub use notification_history_repository::NotificationHistoryRepository;
pub use notification_queue_repository::NotificationQueueRepository;
pub use subscription_repository::SubscriptionRepository;
pub use user::UserRepository;
