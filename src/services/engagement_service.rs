// EngagementService - server-authoritative likes, shares and comments
// Detail rows and the counters derived from them are written in the same transaction

use regex::Regex;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::core::{
    current_time_millis, millis_to_datetime, Comment, CommentStatus, CommentThread, CommentTransition,
    CounterDrift, CounterField, EngageableEntity, EntityId, EntityKind, EntityState, LikeResult,
    NotificationType, ShareId, ShareResult, TenantId, UserId,
};
use crate::error::{AppError, AppResult};
use crate::infrastructure::counter_store::CounterStore;
use crate::infrastructure::database::SqliteDatabase;
use crate::infrastructure::id_generator::IdGenerator;
use crate::infrastructure::monitoring::MetricsCollector;
use crate::infrastructure::viewer::ViewerContext;
use crate::push::PushEventKind;
use crate::services::notification_service::{EngagementNotice, NotificationService};

pub const MAX_COMMENT_CHARS: usize = 2000;

static PLATFORM_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,31}$").expect("platform slug pattern is valid"));

const SELECT_COMMENT: &str = "SELECT c.id, c.tenant_id, c.post_id, c.author_id, c.parent_id, c.content, c.status, \
     c.is_edited, c.edited_at, c.created_at, c.updated_at, COALESCE(k.count, 0) AS likes \
     FROM comments c LEFT JOIN engagement_counters k \
     ON k.tenant_id = c.tenant_id AND k.entity_id = c.id AND k.field = 'likes'";

/// Registered engageable entity without its counters
#[derive(Debug, Clone, Copy)]
struct EntityRecord {
    id: EntityId,
    tenant_id: TenantId,
    kind: EntityKind,
    owner_id: UserId,
    created_at: i64,
}

#[derive(Debug, Clone)]
pub struct EngagementService {
    db: SqliteDatabase,
    counters: CounterStore,
    ids: Arc<IdGenerator>,
    notifications: Arc<NotificationService>,
    metrics: Arc<MetricsCollector>,
}

impl EngagementService {
    pub fn new(
        db: SqliteDatabase,
        ids: Arc<IdGenerator>,
        notifications: Arc<NotificationService>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            counters: CounterStore::new(db.clone()),
            db,
            ids,
            notifications,
            metrics,
        }
    }

    pub fn counters(&self) -> &CounterStore {
        &self.counters
    }

    /// Register a post owned by the viewer so it can accumulate engagement.
    ///
    /// Re-registering an existing id in the same tenant returns the existing entity.
    #[instrument(skip(self, viewer), fields(request_id = %viewer.request_id))]
    pub async fn register_post(&self, viewer: &ViewerContext, id: Option<EntityId>) -> AppResult<EngageableEntity> {
        let id = id.unwrap_or_else(|| EntityId(self.ids.next_id()));
        if let Some(existing) = self.find_entity(id).await? {
            if existing.tenant_id != viewer.tenant_id {
                return Err(AppError::Conflict(format!("Entity {} already exists", id)));
            }
            return self.get_entity(viewer, id).await;
        }

        let now = current_time_millis();
        let mut tx = self.db.begin().await?;
        insert_entity(tx.conn(), id, viewer.tenant_id, EntityKind::Post, viewer.user_id, now).await?;
        self.counters.initialize_entity(&mut tx, viewer.tenant_id, id).await?;
        tx.commit().await?;

        info!(tenant_id = %viewer.tenant_id, entity_id = %id, "Post registered");
        Ok(EngageableEntity {
            id,
            tenant_id: viewer.tenant_id,
            kind: EntityKind::Post,
            owner_id: viewer.user_id,
            counters: Default::default(),
            created_at: millis_to_datetime(now),
        })
    }

    pub async fn get_entity(&self, viewer: &ViewerContext, id: EntityId) -> AppResult<EngageableEntity> {
        let record = self.load_entity(viewer.tenant_id, id).await?;
        let counters = self.counters.read(viewer.tenant_id, id).await?;
        Ok(EngageableEntity {
            id: record.id,
            tenant_id: record.tenant_id,
            kind: record.kind,
            owner_id: record.owner_id,
            counters,
            created_at: millis_to_datetime(record.created_at),
        })
    }

    /// Authoritative counters plus whether the viewer currently likes the entity
    pub async fn entity_state(&self, viewer: &ViewerContext, id: EntityId) -> AppResult<EntityState> {
        self.load_entity(viewer.tenant_id, id).await?;
        let counters = self.counters.read(viewer.tenant_id, id).await?;
        let liked_by_viewer = sqlx::query("SELECT 1 FROM likes WHERE entity_id = ? AND user_id = ?")
            .bind(id.value())
            .bind(viewer.user_id.value())
            .fetch_optional(self.db.pool())
            .await?
            .is_some();

        Ok(EntityState {
            entity_id: id,
            counters,
            liked_by_viewer,
        })
    }

    /// Flip the viewer's like on an entity.
    ///
    /// A concurrent duplicate insert is absorbed by the `(entity_id, user_id)` key and
    /// reported as "already liked" without a second increment.
    #[instrument(skip(self, viewer), fields(request_id = %viewer.request_id))]
    pub async fn toggle_like(&self, viewer: &ViewerContext, entity_id: EntityId) -> AppResult<LikeResult> {
        let entity = self.load_entity(viewer.tenant_id, entity_id).await?;

        let result = self
            .measured(async {
                let mut tx = self.db.begin().await?;
                let already_liked = sqlx::query("SELECT 1 FROM likes WHERE entity_id = ? AND user_id = ?")
                    .bind(entity_id.value())
                    .bind(viewer.user_id.value())
                    .fetch_optional(tx.conn())
                    .await?
                    .is_some();

                let (liked, changed) = if already_liked {
                    let removed = sqlx::query("DELETE FROM likes WHERE entity_id = ? AND user_id = ?")
                        .bind(entity_id.value())
                        .bind(viewer.user_id.value())
                        .execute(tx.conn())
                        .await?
                        .rows_affected();
                    (false, removed == 1)
                } else {
                    let inserted = sqlx::query(
                        "INSERT OR IGNORE INTO likes (entity_id, user_id, tenant_id, created_at) VALUES (?, ?, ?, ?)",
                    )
                    .bind(entity_id.value())
                    .bind(viewer.user_id.value())
                    .bind(viewer.tenant_id.value())
                    .bind(current_time_millis())
                    .execute(tx.conn())
                    .await?
                    .rows_affected();
                    (true, inserted == 1)
                };

                let like_count = if changed {
                    let delta = if liked { 1 } else { -1 };
                    self.counters
                        .apply_delta(&mut tx, viewer.tenant_id, entity_id, CounterField::Likes, delta)
                        .await?
                } else {
                    self.counters.read_in(&mut tx, viewer.tenant_id, entity_id).await?.likes
                };
                tx.commit().await?;

                Ok::<_, AppError>(LikeResult { liked, like_count })
            })
            .await?;

        debug!(entity_id = %entity_id, liked = result.liked, like_count = result.like_count, "Like toggled");
        self.notifications
            .publish_invalidation(viewer.tenant_id, PushEventKind::Like, entity_id)
            .await;
        if result.liked {
            self.notifications
                .notify_engagement(EngagementNotice {
                    tenant_id: viewer.tenant_id,
                    actor_id: viewer.user_id,
                    recipient_id: entity.owner_id,
                    notification_type: NotificationType::Like,
                    entity_id,
                    entity_kind: entity.kind,
                    post_id: self.post_of(&entity).await.unwrap_or(entity_id),
                })
                .await;
        }
        Ok(result)
    }

    /// Append a share record and increment the share counter. Every call counts.
    #[instrument(skip(self, viewer), fields(request_id = %viewer.request_id))]
    pub async fn track_share(&self, viewer: &ViewerContext, entity_id: EntityId, platform: &str) -> AppResult<ShareResult> {
        let platform = platform.trim().to_ascii_lowercase();
        if !PLATFORM_SLUG.is_match(&platform) {
            return Err(AppError::Validation(format!("Invalid share platform: {:?}", platform)));
        }
        let entity = self.load_entity(viewer.tenant_id, entity_id).await?;
        let share_id = ShareId(self.ids.next_id());

        let share_count = self
            .measured(async {
                let mut tx = self.db.begin().await?;
                sqlx::query(
                    "INSERT INTO shares (id, tenant_id, entity_id, user_id, platform, created_at) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(share_id.value())
                .bind(viewer.tenant_id.value())
                .bind(entity_id.value())
                .bind(viewer.user_id.value())
                .bind(&platform)
                .bind(current_time_millis())
                .execute(tx.conn())
                .await?;
                let count = self
                    .counters
                    .apply_delta(&mut tx, viewer.tenant_id, entity_id, CounterField::Shares, 1)
                    .await?;
                tx.commit().await?;
                Ok::<_, AppError>(count)
            })
            .await?;

        self.notifications
            .publish_invalidation(viewer.tenant_id, PushEventKind::Share, entity_id)
            .await;
        self.notifications
            .notify_engagement(EngagementNotice {
                tenant_id: viewer.tenant_id,
                actor_id: viewer.user_id,
                recipient_id: entity.owner_id,
                notification_type: NotificationType::Share,
                entity_id,
                entity_kind: entity.kind,
                post_id: self.post_of(&entity).await.unwrap_or(entity_id),
            })
            .await;

        Ok(ShareResult { share_id, share_count })
    }

    /// Create an active comment (or reply) and bump the post's comment counter.
    ///
    /// Replies to replies are attached to the thread's root comment.
    #[instrument(skip(self, viewer, content), fields(request_id = %viewer.request_id))]
    pub async fn create_comment(
        &self,
        viewer: &ViewerContext,
        post_id: EntityId,
        content: &str,
        parent_id: Option<EntityId>,
    ) -> AppResult<Comment> {
        let content = validate_content(content)?;
        let post = self.load_entity(viewer.tenant_id, post_id).await?;
        if post.kind != EntityKind::Post {
            return Err(AppError::Validation("Comments can only be attached to posts".to_string()));
        }

        let id = EntityId(self.ids.next_id());
        let now = current_time_millis();

        let (parent, thread_root) = self.measured(async {
            let mut tx = self.db.begin().await?;
            // Read under the write lock so a concurrent hide or delete cannot slip in between
            let parent = match parent_id {
                Some(parent_id) => {
                    let parent = fetch_comment(tx.conn(), viewer.tenant_id, parent_id)
                        .await?
                        .ok_or_else(|| AppError::NotFound(format!("Comment {} not found", parent_id)))?;
                    if parent.post_id != post_id {
                        return Err(AppError::Validation("Parent comment belongs to another post".to_string()));
                    }
                    if !parent.status.is_active() {
                        return Err(AppError::Conflict("Cannot reply to a removed comment".to_string()));
                    }
                    Some(parent)
                }
                None => None,
            };
            let thread_root = parent.as_ref().map(|p| p.parent_id.unwrap_or(p.id));

            sqlx::query(
                "INSERT INTO comments (id, tenant_id, post_id, author_id, parent_id, content, status, is_edited, edited_at, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, 'active', 0, NULL, ?, ?)",
            )
            .bind(id.value())
            .bind(viewer.tenant_id.value())
            .bind(post_id.value())
            .bind(viewer.user_id.value())
            .bind(thread_root.map(EntityId::value))
            .bind(&content)
            .bind(now)
            .bind(now)
            .execute(tx.conn())
            .await?;
            insert_entity(tx.conn(), id, viewer.tenant_id, EntityKind::Comment, viewer.user_id, now).await?;
            self.counters.initialize_entity(&mut tx, viewer.tenant_id, id).await?;
            let comments = self
                .counters
                .apply_delta(&mut tx, viewer.tenant_id, post_id, CounterField::Comments, 1)
                .await?;
            tx.commit().await?;
            debug!(comment_id = %id, post_id = %post_id, comments, "Comment created");
            Ok::<_, AppError>((parent, thread_root))
        })
        .await?;

        self.notifications
            .publish_invalidation(viewer.tenant_id, PushEventKind::Comment, post_id)
            .await;
        self.notifications
            .notify_engagement(EngagementNotice {
                tenant_id: viewer.tenant_id,
                actor_id: viewer.user_id,
                recipient_id: post.owner_id,
                notification_type: NotificationType::Comment,
                entity_id: id,
                entity_kind: EntityKind::Comment,
                post_id,
            })
            .await;
        if let Some(parent) = &parent {
            if parent.author_id != post.owner_id {
                self.notifications
                    .notify_engagement(EngagementNotice {
                        tenant_id: viewer.tenant_id,
                        actor_id: viewer.user_id,
                        recipient_id: parent.author_id,
                        notification_type: NotificationType::Reply,
                        entity_id: id,
                        entity_kind: EntityKind::Comment,
                        post_id,
                    })
                    .await;
            }
        }

        Ok(Comment {
            id,
            tenant_id: viewer.tenant_id,
            post_id,
            author_id: viewer.user_id,
            parent_id: thread_root,
            content,
            status: CommentStatus::Active,
            is_edited: false,
            edited_at: None,
            likes: 0,
            created_at: millis_to_datetime(now),
            updated_at: millis_to_datetime(now),
        })
    }

    /// Replace the content of an active comment. Author only; counters never move.
    #[instrument(skip(self, viewer, content), fields(request_id = %viewer.request_id))]
    pub async fn edit_comment(&self, viewer: &ViewerContext, comment_id: EntityId, content: &str) -> AppResult<Comment> {
        let content = validate_content(content)?;

        let comment = self
            .measured(async {
                let mut tx = self.db.begin().await?;
                let comment = fetch_comment(tx.conn(), viewer.tenant_id, comment_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Comment {} not found", comment_id)))?;
                if comment.author_id != viewer.user_id {
                    return Err(AppError::Forbidden("Only the author can edit a comment".to_string()));
                }
                if !comment.status.is_active() {
                    return Err(AppError::Conflict(format!("Comment is {}", comment.status)));
                }

                let now = current_time_millis();
                sqlx::query(
                    "UPDATE comments SET content = ?, is_edited = 1, edited_at = ?, updated_at = ? WHERE id = ? AND status = 'active'",
                )
                .bind(&content)
                .bind(now)
                .bind(now)
                .bind(comment_id.value())
                .execute(tx.conn())
                .await?;
                tx.commit().await?;

                Ok::<_, AppError>(Comment {
                    content: content.clone(),
                    is_edited: true,
                    edited_at: Some(millis_to_datetime(now)),
                    updated_at: millis_to_datetime(now),
                    ..comment
                })
            })
            .await?;

        self.notifications
            .publish_invalidation(viewer.tenant_id, PushEventKind::Comment, comment.post_id)
            .await;
        Ok(comment)
    }

    /// Moderator removal. Decrements the post's comment count only on the first transition.
    pub async fn hide_comment(&self, viewer: &ViewerContext, comment_id: EntityId) -> AppResult<CommentTransition> {
        if !viewer.can_moderate() {
            return Err(AppError::Forbidden("Only moderators can hide comments".to_string()));
        }
        self.leave_active(viewer, comment_id, CommentStatus::Hidden).await
    }

    /// Author or moderator removal, same counter semantics as hiding
    pub async fn delete_comment(&self, viewer: &ViewerContext, comment_id: EntityId) -> AppResult<CommentTransition> {
        self.leave_active(viewer, comment_id, CommentStatus::Deleted).await
    }

    #[instrument(skip(self, viewer), fields(request_id = %viewer.request_id))]
    async fn leave_active(
        &self,
        viewer: &ViewerContext,
        comment_id: EntityId,
        target: CommentStatus,
    ) -> AppResult<CommentTransition> {
        let transition = self
            .measured(async {
                let mut tx = self.db.begin().await?;
                let comment = fetch_comment(tx.conn(), viewer.tenant_id, comment_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Comment {} not found", comment_id)))?;
                if target == CommentStatus::Deleted && comment.author_id != viewer.user_id && !viewer.can_moderate() {
                    return Err(AppError::Forbidden(
                        "Only the author or a moderator can delete a comment".to_string(),
                    ));
                }

                if !comment.status.is_active() {
                    let post_comment_count = self.counters.read_in(&mut tx, viewer.tenant_id, comment.post_id).await?.comments;
                    tx.commit().await?;
                    return Ok(CommentTransition {
                        comment,
                        post_comment_count,
                        changed: false,
                    });
                }

                let now = current_time_millis();
                let updated = sqlx::query("UPDATE comments SET status = ?, updated_at = ? WHERE id = ? AND status = 'active'")
                    .bind(target.as_str())
                    .bind(now)
                    .bind(comment_id.value())
                    .execute(tx.conn())
                    .await?
                    .rows_affected();

                let post_comment_count = if updated == 1 {
                    self.counters
                        .apply_delta(&mut tx, viewer.tenant_id, comment.post_id, CounterField::Comments, -1)
                        .await?
                } else {
                    self.counters.read_in(&mut tx, viewer.tenant_id, comment.post_id).await?.comments
                };
                tx.commit().await?;

                Ok::<_, AppError>(CommentTransition {
                    comment: Comment {
                        status: target,
                        updated_at: millis_to_datetime(now),
                        ..comment
                    },
                    post_comment_count,
                    changed: updated == 1,
                })
            })
            .await?;

        if transition.changed {
            debug!(comment_id = %comment_id, status = %target, "Comment left active");
            self.notifications
                .publish_invalidation(viewer.tenant_id, PushEventKind::Comment, transition.comment.post_id)
                .await;
        }
        Ok(transition)
    }

    /// A single comment. Removed comments are visible to their author and to moderators only.
    pub async fn get_comment(&self, viewer: &ViewerContext, comment_id: EntityId) -> AppResult<Comment> {
        let comment = self
            .find_comment(viewer.tenant_id, comment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Comment {} not found", comment_id)))?;
        if !comment.status.is_active() && comment.author_id != viewer.user_id && !viewer.can_moderate() {
            return Err(AppError::NotFound(format!("Comment {} not found", comment_id)));
        }
        Ok(comment)
    }

    /// Threads of a post, oldest first.
    ///
    /// A removed root that still has active replies is kept as a tombstone with empty
    /// content so the replies stay attached to something.
    pub async fn list_comments(&self, viewer: &ViewerContext, post_id: EntityId) -> AppResult<Vec<CommentThread>> {
        self.load_entity(viewer.tenant_id, post_id).await?;

        let sql = format!(
            "{} WHERE c.tenant_id = ? AND c.post_id = ? ORDER BY c.created_at ASC, c.id ASC",
            SELECT_COMMENT
        );
        let rows = sqlx::query(&sql)
            .bind(viewer.tenant_id.value())
            .bind(post_id.value())
            .fetch_all(self.db.pool())
            .await?;
        let comments = rows.iter().map(row_to_comment).collect::<AppResult<Vec<_>>>()?;

        Ok(build_threads(comments))
    }

    /// Recount the entity's counters from detail rows, repairing any drift
    #[instrument(skip(self, viewer), fields(request_id = %viewer.request_id))]
    pub async fn reconcile(&self, viewer: &ViewerContext, entity_id: EntityId) -> AppResult<CounterDrift> {
        if !viewer.can_moderate() {
            return Err(AppError::Forbidden("Only moderators can reconcile counters".to_string()));
        }
        self.load_entity(viewer.tenant_id, entity_id).await?;
        self.counters.reconcile(viewer.tenant_id, entity_id).await
    }

    async fn measured<T, F>(&self, operation: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        let started = Instant::now();
        let result = operation.await;
        self.metrics.record_mutation(started.elapsed(), result.is_ok());
        result
    }

    async fn find_entity(&self, id: EntityId) -> AppResult<Option<EntityRecord>> {
        let row = sqlx::query("SELECT id, tenant_id, kind, owner_id, created_at FROM engageable_entities WHERE id = ?")
            .bind(id.value())
            .fetch_optional(self.db.pool())
            .await?;

        row.map(|row| {
            Ok(EntityRecord {
                id: EntityId(row.get("id")),
                tenant_id: TenantId(row.get("tenant_id")),
                kind: row.get::<String, _>("kind").parse()?,
                owner_id: UserId(row.get("owner_id")),
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }

    /// Entities outside the caller's tenant are reported as missing
    async fn load_entity(&self, tenant_id: TenantId, id: EntityId) -> AppResult<EntityRecord> {
        match self.find_entity(id).await? {
            Some(entity) if entity.tenant_id == tenant_id => Ok(entity),
            _ => Err(AppError::NotFound(format!("Entity {} not found", id))),
        }
    }

    async fn find_comment(&self, tenant_id: TenantId, id: EntityId) -> AppResult<Option<Comment>> {
        let mut conn = self.db.pool().acquire().await?;
        fetch_comment(&mut conn, tenant_id, id).await
    }

    /// Post a liked or shared entity lives under
    async fn post_of(&self, entity: &EntityRecord) -> AppResult<EntityId> {
        match entity.kind {
            EntityKind::Post => Ok(entity.id),
            EntityKind::Comment => Ok(self
                .find_comment(entity.tenant_id, entity.id)
                .await?
                .map_or(entity.id, |comment| comment.post_id)),
        }
    }
}

fn validate_content(content: &str) -> AppResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("Comment content is required".to_string()));
    }
    if content.chars().count() > MAX_COMMENT_CHARS {
        return Err(AppError::Validation(format!(
            "Comment exceeds {} characters",
            MAX_COMMENT_CHARS
        )));
    }
    Ok(content.to_string())
}

async fn insert_entity(
    conn: &mut SqliteConnection,
    id: EntityId,
    tenant_id: TenantId,
    kind: EntityKind,
    owner_id: UserId,
    now: i64,
) -> AppResult<()> {
    sqlx::query("INSERT INTO engageable_entities (id, tenant_id, kind, owner_id, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(id.value())
        .bind(tenant_id.value())
        .bind(kind.as_str())
        .bind(owner_id.value())
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn fetch_comment(conn: &mut SqliteConnection, tenant_id: TenantId, id: EntityId) -> AppResult<Option<Comment>> {
    let sql = format!("{} WHERE c.id = ? AND c.tenant_id = ?", SELECT_COMMENT);
    let row = sqlx::query(&sql)
        .bind(id.value())
        .bind(tenant_id.value())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(row_to_comment).transpose()
}

fn row_to_comment(row: &SqliteRow) -> AppResult<Comment> {
    Ok(Comment {
        id: EntityId(row.get("id")),
        tenant_id: TenantId(row.get("tenant_id")),
        post_id: EntityId(row.get("post_id")),
        author_id: UserId(row.get("author_id")),
        parent_id: row.get::<Option<i64>, _>("parent_id").map(EntityId),
        content: row.get("content"),
        status: row.get::<String, _>("status").parse()?,
        is_edited: row.get("is_edited"),
        edited_at: row.get::<Option<i64>, _>("edited_at").map(millis_to_datetime),
        likes: row.get("likes"),
        created_at: millis_to_datetime(row.get("created_at")),
        updated_at: millis_to_datetime(row.get("updated_at")),
    })
}

fn build_threads(comments: Vec<Comment>) -> Vec<CommentThread> {
    let mut replies: HashMap<EntityId, Vec<Comment>> = HashMap::new();
    let mut roots = Vec::new();
    for comment in comments {
        match comment.parent_id {
            Some(parent) if comment.status.is_active() => replies.entry(parent).or_default().push(comment),
            Some(_) => {}
            None => roots.push(comment),
        }
    }

    roots
        .into_iter()
        .filter_map(|mut root| {
            let thread_replies = replies.remove(&root.id).unwrap_or_default();
            if !root.status.is_active() {
                if thread_replies.is_empty() {
                    return None;
                }
                root.content.clear();
            }
            Some(CommentThread {
                root,
                replies: thread_replies,
            })
        })
        .collect()
}
