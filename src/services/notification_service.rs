// NotificationService - durable per-recipient notifications plus a best-effort push
// The notification row and the recipient's unread counter commit together; the push only says "look again"

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::core::{
    current_time_millis, millis_to_datetime, EntityId, EntityKind, Notification, NotificationCategory,
    NotificationId, NotificationPage, NotificationPayload, NotificationPriority, NotificationType, TenantId,
    UserId,
};
use crate::error::{AppError, AppResult};
use crate::infrastructure::counter_store::CounterStore;
use crate::infrastructure::database::SqliteDatabase;
use crate::infrastructure::id_generator::IdGenerator;
use crate::infrastructure::monitoring::MetricsCollector;
use crate::infrastructure::viewer::ViewerContext;
use crate::push::{PushEvent, PushEventKind, PushHub};

const MAX_TITLE_CHARS: usize = 200;
const MAX_MESSAGE_CHARS: usize = 1000;
const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

const SELECT_NOTIFICATION: &str = "SELECT id, tenant_id, user_id, notification_type, category, priority, title, message, \
     actor_id, entity_id, is_read, read_at, action_url, created_at FROM notifications";

/// Something a user did that the owner of the touched content should hear about
#[derive(Debug, Clone)]
pub struct EngagementNotice {
    pub tenant_id: TenantId,
    pub actor_id: UserId,
    pub recipient_id: UserId,
    pub notification_type: NotificationType,
    /// Entity the action touched (post or comment)
    pub entity_id: EntityId,
    pub entity_kind: EntityKind,
    /// Post the action belongs to, used for the deep link
    pub post_id: EntityId,
}

#[derive(Debug, Clone, Default)]
pub struct ListNotifications {
    pub unread_only: bool,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct NotificationService {
    db: SqliteDatabase,
    counters: CounterStore,
    ids: Arc<IdGenerator>,
    hub: Arc<PushHub>,
    metrics: Arc<MetricsCollector>,
}

impl NotificationService {
    pub fn new(
        db: SqliteDatabase,
        ids: Arc<IdGenerator>,
        hub: Arc<PushHub>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            counters: CounterStore::new(db.clone()),
            db,
            ids,
            hub,
            metrics,
        }
    }

    /// Persist a notification for `recipient_id` and bump their unread count in one
    /// transaction, then push a `notification` event to their live sessions.
    #[instrument(skip(self, payload), fields(kind = payload.notification_type.as_str()))]
    pub async fn notify(
        &self,
        tenant_id: TenantId,
        recipient_id: UserId,
        payload: NotificationPayload,
    ) -> AppResult<Notification> {
        validate_payload(&payload)?;

        let id = NotificationId(self.ids.next_id());
        let now = current_time_millis();

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO notifications (id, tenant_id, user_id, notification_type, category, priority, title, message, \
             actor_id, entity_id, is_read, read_at, action_url, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, ?, ?)",
        )
        .bind(id.value())
        .bind(tenant_id.value())
        .bind(recipient_id.value())
        .bind(payload.notification_type.as_str())
        .bind(payload.category.as_str())
        .bind(payload.priority.as_str())
        .bind(&payload.title)
        .bind(&payload.message)
        .bind(payload.actor_id.map(UserId::value))
        .bind(payload.entity_id.map(EntityId::value))
        .bind(&payload.action_url)
        .bind(now)
        .execute(tx.conn())
        .await?;
        let unread = self
            .counters
            .apply_unread_delta(&mut tx, tenant_id, recipient_id, 1)
            .await?;
        tx.commit().await?;

        self.metrics.record_notification_created();
        debug!(%tenant_id, %recipient_id, notification_id = %id, unread, "Notification stored");

        self.hub
            .send_to_user(tenant_id, recipient_id, PushEvent::notification(id))
            .await;

        Ok(Notification {
            id,
            tenant_id,
            user_id: recipient_id,
            notification_type: payload.notification_type,
            category: payload.category,
            priority: payload.priority,
            title: payload.title,
            message: payload.message,
            actor_id: payload.actor_id,
            entity_id: payload.entity_id,
            is_read: false,
            read_at: None,
            action_url: payload.action_url,
            created_at: millis_to_datetime(now),
        })
    }

    /// Tell every session of the tenant that an entity's engagement changed
    pub async fn publish_invalidation(&self, tenant_id: TenantId, kind: PushEventKind, entity_id: EntityId) {
        let reached = self
            .hub
            .publish_to_tenant(tenant_id, PushEvent::engagement(kind, entity_id))
            .await;
        debug!(%tenant_id, %entity_id, kind = kind.as_str(), reached, "Invalidation published");
    }

    /// Record a notification for an engagement action. Self-actions are skipped.
    ///
    /// Runs after the engagement transaction has committed, so a failure here is logged
    /// and never undoes the action itself.
    pub async fn notify_engagement(&self, notice: EngagementNotice) -> Option<Notification> {
        if notice.actor_id == notice.recipient_id {
            return None;
        }

        let payload = engagement_payload(&notice);
        match self.notify(notice.tenant_id, notice.recipient_id, payload).await {
            Ok(notification) => Some(notification),
            Err(err) => {
                error!(
                    tenant_id = %notice.tenant_id,
                    recipient_id = %notice.recipient_id,
                    entity_id = %notice.entity_id,
                    "Failed to record engagement notification: {}", err
                );
                None
            }
        }
    }

    /// Mark one notification read. Already-read notifications are returned unchanged.
    #[instrument(skip(self, viewer), fields(request_id = %viewer.request_id))]
    pub async fn mark_read(&self, viewer: &ViewerContext, id: NotificationId) -> AppResult<Notification> {
        let mut tx = self.db.begin().await?;
        let mut notification = fetch_owned(tx.conn(), viewer, id).await?;

        if notification.is_read {
            tx.commit().await?;
            return Ok(notification);
        }

        let now = current_time_millis();
        let updated = sqlx::query(
            "UPDATE notifications SET is_read = 1, read_at = ? WHERE id = ? AND tenant_id = ? AND is_read = 0",
        )
        .bind(now)
        .bind(id.value())
        .bind(viewer.tenant_id.value())
        .execute(tx.conn())
        .await?
        .rows_affected();

        if updated == 1 {
            self.counters
                .apply_unread_delta(&mut tx, viewer.tenant_id, viewer.user_id, -1)
                .await?;
        }
        tx.commit().await?;

        notification.is_read = true;
        notification.read_at = Some(millis_to_datetime(now));

        self.hub
            .send_to_user(viewer.tenant_id, viewer.user_id, PushEvent::notification(id))
            .await;
        Ok(notification)
    }

    /// Mark every unread notification of the viewer read, returns how many changed
    #[instrument(skip(self, viewer), fields(request_id = %viewer.request_id))]
    pub async fn mark_all_read(&self, viewer: &ViewerContext) -> AppResult<u64> {
        let mut tx = self.db.begin().await?;
        let latest: Option<i64> = sqlx::query(
            "SELECT MAX(id) AS latest FROM notifications WHERE tenant_id = ? AND user_id = ? AND is_read = 0",
        )
        .bind(viewer.tenant_id.value())
        .bind(viewer.user_id.value())
        .fetch_one(tx.conn())
        .await?
        .get("latest");

        let Some(latest) = latest else {
            tx.commit().await?;
            return Ok(0);
        };

        let updated = sqlx::query(
            "UPDATE notifications SET is_read = 1, read_at = ? WHERE tenant_id = ? AND user_id = ? AND is_read = 0",
        )
        .bind(current_time_millis())
        .bind(viewer.tenant_id.value())
        .bind(viewer.user_id.value())
        .execute(tx.conn())
        .await?
        .rows_affected();

        self.counters
            .apply_unread_delta(&mut tx, viewer.tenant_id, viewer.user_id, -(updated as i64))
            .await?;
        tx.commit().await?;

        self.hub
            .send_to_user(
                viewer.tenant_id,
                viewer.user_id,
                PushEvent::notification(NotificationId(latest)),
            )
            .await;
        Ok(updated)
    }

    /// Newest-first page of the viewer's notifications
    pub async fn list(&self, viewer: &ViewerContext, query: ListNotifications) -> AppResult<NotificationPage> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let before = match query.cursor.as_deref() {
            Some(cursor) => decode_cursor(cursor)?,
            None => i64::MAX,
        };

        let sql = format!(
            "{} WHERE tenant_id = ? AND user_id = ? AND (? = 0 OR is_read = 0) AND id < ? ORDER BY id DESC LIMIT ?",
            SELECT_NOTIFICATION
        );
        let rows = sqlx::query(&sql)
            .bind(viewer.tenant_id.value())
            .bind(viewer.user_id.value())
            .bind(query.unread_only)
            .bind(before)
            .bind(limit as i64 + 1)
            .fetch_all(self.db.pool())
            .await?;

        let mut notifications = rows.iter().map(row_to_notification).collect::<AppResult<Vec<_>>>()?;
        let next_cursor = if notifications.len() > limit as usize {
            notifications.truncate(limit as usize);
            notifications.last().map(|n| encode_cursor(n.id.value()))
        } else {
            None
        };

        Ok(NotificationPage {
            notifications,
            unread_count: self.unread_count(viewer).await?,
            next_cursor,
        })
    }

    pub async fn unread_count(&self, viewer: &ViewerContext) -> AppResult<i64> {
        self.counters.unread_count(viewer.tenant_id, viewer.user_id).await
    }

    #[instrument(skip(self, viewer), fields(request_id = %viewer.request_id))]
    pub async fn delete(&self, viewer: &ViewerContext, id: NotificationId) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let notification = fetch_owned(tx.conn(), viewer, id).await?;

        sqlx::query("DELETE FROM notifications WHERE id = ? AND tenant_id = ?")
            .bind(id.value())
            .bind(viewer.tenant_id.value())
            .execute(tx.conn())
            .await?;
        if !notification.is_read {
            self.counters
                .apply_unread_delta(&mut tx, viewer.tenant_id, viewer.user_id, -1)
                .await?;
        }
        tx.commit().await?;

        if !notification.is_read {
            self.hub
                .send_to_user(viewer.tenant_id, viewer.user_id, PushEvent::notification(id))
                .await;
        }
        Ok(())
    }

    /// Delete notifications created before `cutoff_millis`, keeping unread counters exact
    #[instrument(skip(self))]
    pub async fn purge_older_than(&self, cutoff_millis: i64) -> AppResult<u64> {
        let mut tx = self.db.begin().await?;

        let unread_groups = sqlx::query(
            "SELECT tenant_id, user_id, COUNT(*) AS n FROM notifications WHERE created_at < ? AND is_read = 0 GROUP BY tenant_id, user_id",
        )
        .bind(cutoff_millis)
        .fetch_all(tx.conn())
        .await?;

        let removed = sqlx::query("DELETE FROM notifications WHERE created_at < ?")
            .bind(cutoff_millis)
            .execute(tx.conn())
            .await?
            .rows_affected();

        for row in unread_groups {
            let tenant_id = TenantId(row.get("tenant_id"));
            let user_id = UserId(row.get("user_id"));
            let n: i64 = row.get("n");
            self.counters
                .apply_unread_delta(&mut tx, tenant_id, user_id, -n)
                .await?;
        }
        tx.commit().await?;

        self.metrics.record_notifications_purged(removed);
        Ok(removed)
    }

    /// Background task deleting notifications older than `retention` every `every`
    pub fn spawn_retention_sweeper(self: Arc<Self>, retention: Duration, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick fires immediately; skip it so startup is not slowed by a sweep
            interval.tick().await;

            loop {
                interval.tick().await;
                let cutoff = current_time_millis() - retention.as_millis() as i64;
                match self.purge_older_than(cutoff).await {
                    Ok(0) => debug!("Retention sweep found nothing to purge"),
                    Ok(removed) => info!(removed, "Retention sweep purged notifications"),
                    Err(err) => warn!("Retention sweep failed: {}", err),
                }
            }
        })
    }
}

fn validate_payload(payload: &NotificationPayload) -> AppResult<()> {
    if payload.title.trim().is_empty() {
        return Err(AppError::Validation("Notification title is required".to_string()));
    }
    if payload.title.chars().count() > MAX_TITLE_CHARS {
        return Err(AppError::Validation(format!(
            "Notification title exceeds {} characters",
            MAX_TITLE_CHARS
        )));
    }
    if payload.message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::Validation(format!(
            "Notification message exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(())
}

fn engagement_payload(notice: &EngagementNotice) -> NotificationPayload {
    let target = notice.entity_kind.as_str();
    let (title, message) = match notice.notification_type {
        NotificationType::Like => (
            "New like".to_string(),
            format!("User {} liked your {}", notice.actor_id, target),
        ),
        NotificationType::Comment => (
            "New comment".to_string(),
            format!("User {} commented on your post", notice.actor_id),
        ),
        NotificationType::Reply => (
            "New reply".to_string(),
            format!("User {} replied to your comment", notice.actor_id),
        ),
        NotificationType::Share => (
            "New share".to_string(),
            format!("User {} shared your {}", notice.actor_id, target),
        ),
        other => (
            "New activity".to_string(),
            format!("User {} interacted with your {} ({})", notice.actor_id, target, other.as_str()),
        ),
    };

    NotificationPayload {
        notification_type: notice.notification_type,
        category: NotificationCategory::Social,
        priority: NotificationPriority::Normal,
        title,
        message,
        actor_id: Some(notice.actor_id),
        entity_id: Some(notice.entity_id),
        action_url: Some(format!("/posts/{}", notice.post_id)),
    }
}

async fn fetch_owned(
    conn: &mut sqlx::SqliteConnection,
    viewer: &ViewerContext,
    id: NotificationId,
) -> AppResult<Notification> {
    let sql = format!("{} WHERE id = ? AND tenant_id = ? AND user_id = ?", SELECT_NOTIFICATION);
    let row = sqlx::query(&sql)
        .bind(id.value())
        .bind(viewer.tenant_id.value())
        .bind(viewer.user_id.value())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;
    row_to_notification(&row)
}

fn row_to_notification(row: &SqliteRow) -> AppResult<Notification> {
    Ok(Notification {
        id: NotificationId(row.get("id")),
        tenant_id: TenantId(row.get("tenant_id")),
        user_id: UserId(row.get("user_id")),
        notification_type: row.get::<String, _>("notification_type").parse()?,
        category: row.get::<String, _>("category").parse()?,
        priority: row.get::<String, _>("priority").parse()?,
        title: row.get("title"),
        message: row.get("message"),
        actor_id: row.get::<Option<i64>, _>("actor_id").map(UserId),
        entity_id: row.get::<Option<i64>, _>("entity_id").map(EntityId),
        is_read: row.get("is_read"),
        read_at: row.get::<Option<i64>, _>("read_at").map(millis_to_datetime),
        action_url: row.get("action_url"),
        created_at: millis_to_datetime(row.get("created_at")),
    })
}

fn encode_cursor(id: i64) -> String {
    URL_SAFE_NO_PAD.encode(id.to_string())
}

fn decode_cursor(cursor: &str) -> AppResult<i64> {
    URL_SAFE_NO_PAD
        .decode(cursor)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| AppError::Validation("Invalid cursor".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        db: SqliteDatabase,
        service: NotificationService,
        hub: Arc<PushHub>,
    }

    async fn fixture() -> Fixture {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let metrics = Arc::new(MetricsCollector::new());
        let hub = Arc::new(PushHub::new(16, metrics.clone()));
        let service = NotificationService::new(db.clone(), Arc::new(IdGenerator::new(1)), hub.clone(), metrics);
        Fixture { db, service, hub }
    }

    fn payload(title: &str) -> NotificationPayload {
        NotificationPayload {
            notification_type: NotificationType::System,
            category: NotificationCategory::System,
            priority: NotificationPriority::Normal,
            title: title.to_string(),
            message: "hello".to_string(),
            actor_id: None,
            entity_id: None,
            action_url: None,
        }
    }

    async fn live_unread(db: &SqliteDatabase, tenant: i64, user: i64) -> i64 {
        sqlx::query("SELECT COUNT(*) AS n FROM notifications WHERE tenant_id = ? AND user_id = ? AND is_read = 0")
            .bind(tenant)
            .bind(user)
            .fetch_one(db.pool())
            .await
            .unwrap()
            .get("n")
    }

    #[tokio::test]
    async fn test_notify_increments_unread_and_pushes_id_only() {
        let f = fixture().await;
        let mut session = f.hub.subscribe(TenantId(1), UserId(2)).await;

        let notification = f.service.notify(TenantId(1), UserId(2), payload("Hi")).await.unwrap();

        let viewer = ViewerContext::member(1, 2);
        assert_eq!(f.service.unread_count(&viewer).await.unwrap(), 1);
        let event = session.receiver.recv().await.unwrap();
        assert_eq!(event, PushEvent::notification(notification.id));
    }

    #[tokio::test]
    async fn test_mark_read_decrements_once() {
        let f = fixture().await;
        let viewer = ViewerContext::member(1, 2);
        let n = f.service.notify(TenantId(1), UserId(2), payload("Hi")).await.unwrap();

        let first = f.service.mark_read(&viewer, n.id).await.unwrap();
        assert!(first.is_read && first.read_at.is_some());
        f.service.mark_read(&viewer, n.id).await.unwrap();

        assert_eq!(f.service.unread_count(&viewer).await.unwrap(), 0);
        assert_eq!(live_unread(&f.db, 1, 2).await, 0);
    }

    #[tokio::test]
    async fn test_other_users_cannot_touch_a_notification() {
        let f = fixture().await;
        let n = f.service.notify(TenantId(1), UserId(2), payload("Hi")).await.unwrap();

        let stranger = ViewerContext::member(1, 3);
        assert!(matches!(f.service.mark_read(&stranger, n.id).await, Err(AppError::NotFound(_))));
        let other_tenant = ViewerContext::member(9, 2);
        assert!(matches!(f.service.delete(&other_tenant, n.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_mark_all_read_and_delete_keep_counter_exact() {
        let f = fixture().await;
        let viewer = ViewerContext::member(1, 2);
        let first = f.service.notify(TenantId(1), UserId(2), payload("a")).await.unwrap();
        f.service.notify(TenantId(1), UserId(2), payload("b")).await.unwrap();
        f.service.notify(TenantId(1), UserId(2), payload("c")).await.unwrap();

        f.service.delete(&viewer, first.id).await.unwrap();
        assert_eq!(f.service.unread_count(&viewer).await.unwrap(), 2);

        assert_eq!(f.service.mark_all_read(&viewer).await.unwrap(), 2);
        assert_eq!(f.service.mark_all_read(&viewer).await.unwrap(), 0);
        assert_eq!(f.service.unread_count(&viewer).await.unwrap(), live_unread(&f.db, 1, 2).await);
    }

    #[tokio::test]
    async fn test_list_pages_newest_first() {
        let f = fixture().await;
        let viewer = ViewerContext::member(1, 2);
        for i in 0..5 {
            f.service.notify(TenantId(1), UserId(2), payload(&format!("n{}", i))).await.unwrap();
        }

        let page = f
            .service
            .list(&viewer, ListNotifications { limit: Some(3), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page.notifications.len(), 3);
        assert_eq!(page.notifications[0].title, "n4");
        assert_eq!(page.unread_count, 5);

        let rest = f
            .service
            .list(&viewer, ListNotifications { limit: Some(3), cursor: page.next_cursor, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(rest.notifications.len(), 2);
        assert_eq!(rest.notifications[1].title, "n0");
        assert!(rest.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_list_unread_only_and_bad_cursor() {
        let f = fixture().await;
        let viewer = ViewerContext::member(1, 2);
        let n = f.service.notify(TenantId(1), UserId(2), payload("a")).await.unwrap();
        f.service.notify(TenantId(1), UserId(2), payload("b")).await.unwrap();
        f.service.mark_read(&viewer, n.id).await.unwrap();

        let page = f
            .service
            .list(&viewer, ListNotifications { unread_only: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page.notifications.len(), 1);
        assert_eq!(page.notifications[0].title, "b");

        let bad = f
            .service
            .list(&viewer, ListNotifications { cursor: Some("!!".into()), ..Default::default() })
            .await;
        assert!(matches!(bad, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_purge_adjusts_unread_counters() {
        let f = fixture().await;
        let viewer = ViewerContext::member(1, 2);
        let read = f.service.notify(TenantId(1), UserId(2), payload("a")).await.unwrap();
        f.service.notify(TenantId(1), UserId(2), payload("b")).await.unwrap();
        f.service.notify(TenantId(1), UserId(3), payload("c")).await.unwrap();
        f.service.mark_read(&viewer, read.id).await.unwrap();

        let removed = f.service.purge_older_than(current_time_millis() + 1).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(f.service.unread_count(&viewer).await.unwrap(), 0);
        assert_eq!(f.service.unread_count(&ViewerContext::member(1, 3)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_self_engagement_does_not_notify() {
        let f = fixture().await;
        let notice = EngagementNotice {
            tenant_id: TenantId(1),
            actor_id: UserId(2),
            recipient_id: UserId(2),
            notification_type: NotificationType::Like,
            entity_id: EntityId(10),
            entity_kind: EntityKind::Post,
            post_id: EntityId(10),
        };
        assert!(f.service.notify_engagement(notice.clone()).await.is_none());

        let liked = f
            .service
            .notify_engagement(EngagementNotice { actor_id: UserId(5), ..notice })
            .await
            .unwrap();
        assert_eq!(liked.action_url.as_deref(), Some("/posts/10"));
        assert_eq!(liked.actor_id, Some(UserId(5)));
    }

    #[tokio::test]
    async fn test_empty_title_is_rejected() {
        let f = fixture().await;
        let err = f.service.notify(TenantId(1), UserId(2), payload("  ")).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
