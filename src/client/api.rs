// Client API - the calls a coordinator makes against the engagement server
// One implementation per transport; the in-process adapter drives the services directly

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::{Comment, CommentTransition, EntityId, EntityState, LikeResult, ShareResult};
use crate::error::AppResult;
use crate::infrastructure::viewer::ViewerContext;
use crate::services::{EngagementService, NotificationService};

/// Server operations available to one signed-in user
#[async_trait]
pub trait EngagementApi: Send + Sync {
    async fn toggle_like(&self, entity_id: EntityId) -> AppResult<LikeResult>;

    async fn track_share(&self, entity_id: EntityId, platform: &str) -> AppResult<ShareResult>;

    async fn create_comment(
        &self,
        post_id: EntityId,
        content: &str,
        parent_id: Option<EntityId>,
    ) -> AppResult<Comment>;

    async fn hide_comment(&self, comment_id: EntityId) -> AppResult<CommentTransition>;

    async fn delete_comment(&self, comment_id: EntityId) -> AppResult<CommentTransition>;

    /// Authoritative counters plus the caller's own like flag
    async fn entity_state(&self, entity_id: EntityId) -> AppResult<EntityState>;

    async fn unread_count(&self) -> AppResult<i64>;
}

/// Calls the services in the same process on behalf of a fixed viewer
#[derive(Debug, Clone)]
pub struct InProcessApi {
    engagement: Arc<EngagementService>,
    notifications: Arc<NotificationService>,
    viewer: ViewerContext,
}

impl InProcessApi {
    pub fn new(
        engagement: Arc<EngagementService>,
        notifications: Arc<NotificationService>,
        viewer: ViewerContext,
    ) -> Self {
        Self {
            engagement,
            notifications,
            viewer,
        }
    }

    pub fn viewer(&self) -> &ViewerContext {
        &self.viewer
    }
}

#[async_trait]
impl EngagementApi for InProcessApi {
    async fn toggle_like(&self, entity_id: EntityId) -> AppResult<LikeResult> {
        self.engagement.toggle_like(&self.viewer, entity_id).await
    }

    async fn track_share(&self, entity_id: EntityId, platform: &str) -> AppResult<ShareResult> {
        self.engagement.track_share(&self.viewer, entity_id, platform).await
    }

    async fn create_comment(
        &self,
        post_id: EntityId,
        content: &str,
        parent_id: Option<EntityId>,
    ) -> AppResult<Comment> {
        self.engagement
            .create_comment(&self.viewer, post_id, content, parent_id)
            .await
    }

    async fn hide_comment(&self, comment_id: EntityId) -> AppResult<CommentTransition> {
        self.engagement.hide_comment(&self.viewer, comment_id).await
    }

    async fn delete_comment(&self, comment_id: EntityId) -> AppResult<CommentTransition> {
        self.engagement.delete_comment(&self.viewer, comment_id).await
    }

    async fn entity_state(&self, entity_id: EntityId) -> AppResult<EntityState> {
        self.engagement.entity_state(&self.viewer, entity_id).await
    }

    async fn unread_count(&self) -> AppResult<i64> {
        self.notifications.unread_count(&self.viewer).await
    }
}
