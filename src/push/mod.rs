// Push Transport - delivery of invalidation signals to live client sessions

pub mod event;
pub mod hub;
pub mod websocket;

pub use event::{PushEvent, PushEventKind};
pub use hub::{DeliveryError, PushHub, PushSubscription};
