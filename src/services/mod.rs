// Services - engagement mutations and notification fan-out

pub mod engagement_service;
pub mod notification_service;

pub use engagement_service::EngagementService;
pub use notification_service::{EngagementNotice, ListNotifications, NotificationService};
