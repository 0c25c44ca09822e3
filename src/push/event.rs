// Push events - "something changed, go look" signals
// Payloads name the thing that changed and nothing else; receivers re-pull authoritative state

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::{EntityId, NotificationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushEventKind {
    Like,
    Comment,
    Share,
    Notification,
}

impl PushEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushEventKind::Like => "like",
            PushEventKind::Comment => "comment",
            PushEventKind::Share => "share",
            PushEventKind::Notification => "notification",
        }
    }
}

/// Wire shape: `{"type": "like", "entityId": "123"}`.
///
/// For `notification` events `entityId` carries the notification id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PushEvent {
    #[serde(rename = "type")]
    pub kind: PushEventKind,
    pub entity_id: EntityId,
}

impl PushEvent {
    pub fn engagement(kind: PushEventKind, entity_id: EntityId) -> Self {
        Self { kind, entity_id }
    }

    pub fn notification(notification_id: NotificationId) -> Self {
        Self {
            kind: PushEventKind::Notification,
            entity_id: EntityId(notification_id.value()),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.kind == PushEventKind::Notification
    }
}

impl fmt::Display for PushEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.entity_id)
    }
}
