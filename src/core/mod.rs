// Core types - identifiers, timestamps and the engagement data model

pub mod models;
pub mod strong_types;

// Re-export commonly used types
pub use models::*;
pub use strong_types::{
    current_time_millis, millis_to_datetime, EntityId, NotificationId, ShareId, TenantId, UserId,
};
