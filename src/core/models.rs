// Engagement data model - rows owned by the engagement layer and the values returned to callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::strong_types::{EntityId, NotificationId, ShareId, TenantId, UserId};
use crate::error::AppError;

/// Counter columns kept per engageable entity (and per user for unread notifications)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterField {
    Likes,
    Shares,
    Comments,
    UnreadNotifications,
}

impl CounterField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterField::Likes => "likes",
            CounterField::Shares => "shares",
            CounterField::Comments => "comments",
            CounterField::UnreadNotifications => "unread_notifications",
        }
    }
}

/// Cached aggregates of an engageable entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub likes: i64,
    pub shares: i64,
    pub comments: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Post,
    Comment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Post => "post",
            EntityKind::Comment => "comment",
        }
    }
}

impl FromStr for EntityKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(EntityKind::Post),
            "comment" => Ok(EntityKind::Comment),
            other => Err(AppError::Validation(format!("Unknown entity kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngageableEntity {
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub kind: EntityKind,
    pub owner_id: UserId,
    pub counters: Counters,
    pub created_at: DateTime<Utc>,
}

/// Authoritative view of an entity as seen by one user, returned by re-pulls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityState {
    pub entity_id: EntityId,
    pub counters: Counters,
    pub liked_by_viewer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResult {
    pub liked: bool,
    pub like_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareResult {
    pub share_id: ShareId,
    pub share_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentStatus {
    Active,
    Hidden,
    Deleted,
}

impl CommentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentStatus::Active => "active",
            CommentStatus::Hidden => "hidden",
            CommentStatus::Deleted => "deleted",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, CommentStatus::Active)
    }
}

impl fmt::Display for CommentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CommentStatus::Active),
            "hidden" => Ok(CommentStatus::Hidden),
            "deleted" => Ok(CommentStatus::Deleted),
            other => Err(AppError::Internal(format!("Unknown comment status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub post_id: EntityId,
    pub author_id: UserId,
    pub parent_id: Option<EntityId>,
    pub content: String,
    pub status: CommentStatus,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub likes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a hide/delete request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentTransition {
    pub comment: Comment,
    pub post_comment_count: i64,
    /// False when the comment had already left `active` and nothing changed
    pub changed: bool,
}

/// A root comment with its flattened replies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentThread {
    pub root: Comment,
    pub replies: Vec<Comment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Like,
    Comment,
    Reply,
    Share,
    Mention,
    Message,
    Mentorship,
    Connection,
    Event,
    Job,
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Like => "like",
            NotificationType::Comment => "comment",
            NotificationType::Reply => "reply",
            NotificationType::Share => "share",
            NotificationType::Mention => "mention",
            NotificationType::Message => "message",
            NotificationType::Mentorship => "mentorship",
            NotificationType::Connection => "connection",
            NotificationType::Event => "event",
            NotificationType::Job => "job",
            NotificationType::System => "system",
        }
    }
}

impl FromStr for NotificationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "like" => NotificationType::Like,
            "comment" => NotificationType::Comment,
            "reply" => NotificationType::Reply,
            "share" => NotificationType::Share,
            "mention" => NotificationType::Mention,
            "message" => NotificationType::Message,
            "mentorship" => NotificationType::Mentorship,
            "connection" => NotificationType::Connection,
            "event" => NotificationType::Event,
            "job" => NotificationType::Job,
            "system" => NotificationType::System,
            other => {
                return Err(AppError::Internal(format!(
                    "Unknown notification type: {}",
                    other
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Social,
    Mentorship,
    Career,
    Events,
    System,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::Social => "social",
            NotificationCategory::Mentorship => "mentorship",
            NotificationCategory::Career => "career",
            NotificationCategory::Events => "events",
            NotificationCategory::System => "system",
        }
    }
}

impl FromStr for NotificationCategory {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "social" => NotificationCategory::Social,
            "mentorship" => NotificationCategory::Mentorship,
            "career" => NotificationCategory::Career,
            "events" => NotificationCategory::Events,
            "system" => NotificationCategory::System,
            other => {
                return Err(AppError::Internal(format!(
                    "Unknown notification category: {}",
                    other
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
            NotificationPriority::Urgent => "urgent",
        }
    }
}

impl FromStr for NotificationPriority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "low" => NotificationPriority::Low,
            "normal" => NotificationPriority::Normal,
            "high" => NotificationPriority::High,
            "urgent" => NotificationPriority::Urgent,
            other => {
                return Err(AppError::Internal(format!(
                    "Unknown notification priority: {}",
                    other
                )))
            }
        })
    }
}

/// What a domain event wants to tell a recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub category: NotificationCategory,
    #[serde(default)]
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,
    pub actor_id: Option<UserId>,
    pub entity_id: Option<EntityId>,
    pub action_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,
    pub actor_id: Option<UserId>,
    pub entity_id: Option<EntityId>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub action_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub unread_count: i64,
    pub next_cursor: Option<String>,
}

/// Difference between cached counters and the live detail-row counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterDrift {
    pub likes: i64,
    pub shares: i64,
    pub comments: i64,
}

impl CounterDrift {
    pub fn is_zero(&self) -> bool {
        self.likes == 0 && self.shares == 0 && self.comments == 0
    }
}
