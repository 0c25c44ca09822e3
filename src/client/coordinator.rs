// Mutation Coordinator - optimistic apply, reconcile or roll back, and re-pull on push
//
// Each mutation runs as: claim (entity, action) -> snapshot -> optimistic edit -> server call
// under a deadline -> reconcile with the server's answer, or restore the snapshot on failure.
// A snapshot covers only the field its action edits, so overlapping mutations on one entity
// roll back independently.
// Push events are never applied as state; they only trigger a re-pull.

use std::collections::HashSet;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::api::EngagementApi;
use crate::client::local_view::{EntityView, LocalView, ViewField};
use crate::core::{Comment, CommentTransition, EntityId, LikeResult, ShareResult};
use crate::error::{AppError, AppResult};
use crate::push::PushEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Like,
    Share,
    Comment,
    Hide,
    Delete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Like => "like",
            ActionKind::Share => "share",
            ActionKind::Comment => "comment",
            ActionKind::Hide => "hide",
            ActionKind::Delete => "delete",
        }
    }

    /// Part of the displayed entity this action edits optimistically
    pub fn field(&self) -> ViewField {
        match self {
            ActionKind::Like => ViewField::Likes,
            ActionKind::Share => ViewField::Shares,
            ActionKind::Comment | ActionKind::Hide | ActionKind::Delete => ViewField::Comments,
        }
    }
}

/// Result of asking the coordinator to run a mutation
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<T> {
    /// The server accepted it and the view now shows the authoritative result
    Applied(T),
    /// The same action on the same entity was already pending; nothing was sent
    Coalesced,
}

impl<T> MutationOutcome<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            MutationOutcome::Applied(value) => Some(value),
            MutationOutcome::Coalesced => None,
        }
    }

    pub fn is_coalesced(&self) -> bool {
        matches!(self, MutationOutcome::Coalesced)
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub mutation_timeout: Duration,
    pub view_capacity: NonZeroUsize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mutation_timeout: Duration::from_secs(10),
            view_capacity: NonZeroUsize::new(512).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

type InFlight = Arc<StdMutex<HashSet<(EntityId, ActionKind)>>>;

/// Releases an in-flight claim however the mutation ends
struct InFlightClaim {
    key: (EntityId, ActionKind),
    in_flight: InFlight,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        let mut guard = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.remove(&self.key);
    }
}

/// Client-side state for one signed-in user
pub struct MutationCoordinator {
    api: Arc<dyn EngagementApi>,
    view: Mutex<LocalView>,
    in_flight: InFlight,
    config: CoordinatorConfig,
}

impl MutationCoordinator {
    pub fn new(api: Arc<dyn EngagementApi>, config: CoordinatorConfig) -> Self {
        Self {
            api,
            view: Mutex::new(LocalView::new(config.view_capacity)),
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
            config,
        }
    }

    /// Start displaying an entity with its authoritative counters
    pub async fn track(&self, entity_id: EntityId) -> AppResult<EntityView> {
        self.refresh(entity_id).await
    }

    pub async fn untrack(&self, entity_id: EntityId) {
        self.view.lock().await.forget(entity_id);
    }

    pub async fn view(&self, entity_id: EntityId) -> Option<EntityView> {
        self.view.lock().await.peek(entity_id)
    }

    pub async fn unread_count(&self) -> i64 {
        self.view.lock().await.unread()
    }

    pub async fn toggle_like(&self, entity_id: EntityId) -> AppResult<MutationOutcome<LikeResult>> {
        let api = self.api.clone();
        self.run(
            entity_id,
            ActionKind::Like,
            entity_id,
            |view| {
                view.liked = !view.liked;
                view.likes = if view.liked { view.likes + 1 } else { (view.likes - 1).max(0) };
            },
            async move { api.toggle_like(entity_id).await },
            |view, result: &LikeResult| {
                view.likes = result.like_count;
                view.liked = result.liked;
            },
        )
        .await
    }

    pub async fn track_share(&self, entity_id: EntityId, platform: &str) -> AppResult<MutationOutcome<ShareResult>> {
        let api = self.api.clone();
        let platform = platform.to_string();
        self.run(
            entity_id,
            ActionKind::Share,
            entity_id,
            |view| view.shares += 1,
            async move { api.track_share(entity_id, &platform).await },
            |view, result: &ShareResult| view.shares = result.share_count,
        )
        .await
    }

    /// The post's comment count rises immediately; after the server accepts, the post is re-pulled
    pub async fn create_comment(
        &self,
        post_id: EntityId,
        content: &str,
        parent_id: Option<EntityId>,
    ) -> AppResult<MutationOutcome<Comment>> {
        let api = self.api.clone();
        let content = content.to_string();
        let outcome = self
            .run(
                post_id,
                ActionKind::Comment,
                post_id,
                |view| view.comments += 1,
                async move { api.create_comment(post_id, &content, parent_id).await },
                |_, _: &Comment| {},
            )
            .await?;

        if let MutationOutcome::Applied(_) = &outcome {
            if let Err(err) = self.refresh(post_id).await {
                // The comment exists; the next push or resync corrects the count
                warn!(post_id = %post_id, "Re-pull after comment failed: {}", err);
            }
        }
        Ok(outcome)
    }

    pub async fn hide_comment(
        &self,
        post_id: EntityId,
        comment_id: EntityId,
    ) -> AppResult<MutationOutcome<CommentTransition>> {
        let api = self.api.clone();
        self.run(
            comment_id,
            ActionKind::Hide,
            post_id,
            |view| view.comments = (view.comments - 1).max(0),
            async move { api.hide_comment(comment_id).await },
            |view, transition: &CommentTransition| view.comments = transition.post_comment_count,
        )
        .await
    }

    pub async fn delete_comment(
        &self,
        post_id: EntityId,
        comment_id: EntityId,
    ) -> AppResult<MutationOutcome<CommentTransition>> {
        let api = self.api.clone();
        self.run(
            comment_id,
            ActionKind::Delete,
            post_id,
            |view| view.comments = (view.comments - 1).max(0),
            async move { api.delete_comment(comment_id).await },
            |view, transition: &CommentTransition| view.comments = transition.post_comment_count,
        )
        .await
    }

    /// React to a push event by re-pulling what it names. Events for entities this client
    /// does not display are ignored.
    pub async fn handle_push(&self, event: PushEvent) -> AppResult<()> {
        if event.is_notification() {
            self.refresh_unread().await?;
            return Ok(());
        }

        if !self.view.lock().await.contains(event.entity_id) {
            debug!(event = %event, "Push for an untracked entity ignored");
            return Ok(());
        }
        self.refresh(event.entity_id).await?;
        Ok(())
    }

    /// Re-pull every displayed entity and the unread count, typically after a (re)connect.
    /// Returns how many entities were refreshed; individual failures are logged and skipped.
    pub async fn resync_all(&self) -> AppResult<usize> {
        let tracked = self.view.lock().await.tracked();
        let mut refreshed = 0;
        for entity_id in tracked {
            match self.refresh(entity_id).await {
                Ok(_) => refreshed += 1,
                Err(AppError::NotFound(_)) => {
                    self.view.lock().await.forget(entity_id);
                }
                Err(err) => warn!(entity_id = %entity_id, "Resync failed: {}", err),
            }
        }
        self.refresh_unread().await?;
        info!(refreshed, "Local view resynchronized");
        Ok(refreshed)
    }

    pub async fn refresh_unread(&self) -> AppResult<i64> {
        let unread = self.api.unread_count().await?;
        self.view.lock().await.set_unread(unread);
        Ok(unread)
    }

    async fn refresh(&self, entity_id: EntityId) -> AppResult<EntityView> {
        let state = self.api.entity_state(entity_id).await?;
        let view = EntityView::from(state);
        self.view.lock().await.overwrite(entity_id, view);
        Ok(view)
    }

    fn claim(&self, key: (EntityId, ActionKind)) -> Option<InFlightClaim> {
        let mut guard = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !guard.insert(key) {
            return None;
        }
        Some(InFlightClaim {
            key,
            in_flight: self.in_flight.clone(),
        })
    }

    /// `subject` is what the action is keyed on; `displayed` is the entity whose counters move
    async fn run<T, F>(
        &self,
        subject: EntityId,
        action: ActionKind,
        displayed: EntityId,
        optimistic: impl FnOnce(&mut EntityView),
        call: F,
        reconcile: impl FnOnce(&mut EntityView, &T),
    ) -> AppResult<MutationOutcome<T>>
    where
        F: Future<Output = AppResult<T>>,
    {
        let Some(_claim) = self.claim((subject, action)) else {
            debug!(entity_id = %subject, action = action.as_str(), "Mutation already in flight");
            return Ok(MutationOutcome::Coalesced);
        };

        let snapshot = {
            let mut view = self.view.lock().await;
            let snapshot = view.snapshot(displayed, action.field());
            view.update(displayed, optimistic);
            snapshot
        };

        let result = match tokio::time::timeout(self.config.mutation_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "{} on {} did not complete within {:?}",
                action.as_str(),
                subject,
                self.config.mutation_timeout
            ))),
        };

        let mut view = self.view.lock().await;
        match result {
            Ok(value) => {
                view.update(displayed, |displayed_view| reconcile(displayed_view, &value));
                Ok(MutationOutcome::Applied(value))
            }
            Err(err) => {
                // A re-pull that landed meanwhile already shows the server's state
                let restored = view.restore(snapshot);
                warn!(
                    entity_id = %subject,
                    action = action.as_str(),
                    retryable = err.is_retryable(),
                    restored,
                    "Mutation rolled back: {}",
                    err
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Counters, EntityState, ShareId};
    use crate::push::PushEventKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Server stand-in holding one entity's counters
    #[derive(Default)]
    struct FakeApi {
        state: StdMutex<EntityView>,
        unread: StdMutex<i64>,
        fail: AtomicBool,
        delay: StdMutex<Option<Duration>>,
        share_delay: StdMutex<Option<Duration>>,
        calls: AtomicUsize,
        pulls: AtomicUsize,
    }

    impl FakeApi {
        fn with(view: EntityView) -> Arc<Self> {
            let api = FakeApi::default();
            *api.state.lock().unwrap() = view;
            Arc::new(api)
        }

        async fn gate(&self, action: ActionKind) -> AppResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let share_delay = *self.share_delay.lock().unwrap();
            let delay = match action {
                ActionKind::Share => share_delay.or(*self.delay.lock().unwrap()),
                _ => *self.delay.lock().unwrap(),
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::Storage("injected".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EngagementApi for FakeApi {
        async fn toggle_like(&self, _entity_id: EntityId) -> AppResult<LikeResult> {
            self.gate(ActionKind::Like).await?;
            let mut state = self.state.lock().unwrap();
            state.liked = !state.liked;
            state.likes += if state.liked { 1 } else { -1 };
            Ok(LikeResult {
                liked: state.liked,
                like_count: state.likes,
            })
        }

        async fn track_share(&self, _entity_id: EntityId, _platform: &str) -> AppResult<ShareResult> {
            self.gate(ActionKind::Share).await?;
            let mut state = self.state.lock().unwrap();
            state.shares += 1;
            Ok(ShareResult {
                share_id: ShareId(state.shares),
                share_count: state.shares,
            })
        }

        async fn create_comment(&self, _: EntityId, _: &str, _: Option<EntityId>) -> AppResult<Comment> {
            Err(AppError::Internal("not used".to_string()))
        }

        async fn hide_comment(&self, _: EntityId) -> AppResult<CommentTransition> {
            Err(AppError::Internal("not used".to_string()))
        }

        async fn delete_comment(&self, _: EntityId) -> AppResult<CommentTransition> {
            Err(AppError::Internal("not used".to_string()))
        }

        async fn entity_state(&self, entity_id: EntityId) -> AppResult<EntityState> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            let state = *self.state.lock().unwrap();
            Ok(EntityState {
                entity_id,
                counters: Counters {
                    likes: state.likes,
                    shares: state.shares,
                    comments: state.comments,
                },
                liked_by_viewer: state.liked,
            })
        }

        async fn unread_count(&self) -> AppResult<i64> {
            Ok(*self.unread.lock().unwrap())
        }
    }

    fn coordinator(api: Arc<FakeApi>, timeout: Duration) -> MutationCoordinator {
        MutationCoordinator::new(
            api,
            CoordinatorConfig {
                mutation_timeout: timeout,
                ..Default::default()
            },
        )
    }

    const POST: EntityId = EntityId(10);

    #[tokio::test]
    async fn test_like_reconciles_with_server_result() {
        let api = FakeApi::with(EntityView { likes: 4, ..Default::default() });
        let coordinator = coordinator(api.clone(), Duration::from_secs(1));
        coordinator.track(POST).await.unwrap();

        let outcome = coordinator.toggle_like(POST).await.unwrap();
        assert_eq!(
            outcome,
            MutationOutcome::Applied(LikeResult {
                liked: true,
                like_count: 5
            })
        );
        let view = coordinator.view(POST).await.unwrap();
        assert_eq!((view.likes, view.liked), (5, true));
    }

    #[tokio::test]
    async fn test_failed_mutation_restores_previous_counts() {
        let api = FakeApi::with(EntityView { likes: 7, shares: 2, ..Default::default() });
        let coordinator = coordinator(api.clone(), Duration::from_secs(1));
        coordinator.track(POST).await.unwrap();
        let before = coordinator.view(POST).await.unwrap();

        api.fail.store(true, Ordering::SeqCst);
        let err = coordinator.toggle_like(POST).await.unwrap_err();
        assert!(err.is_retryable());
        let err = coordinator.track_share(POST, "twitter").await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));

        assert_eq!(coordinator.view(POST).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_overlapping_failures_each_undo_only_their_own_change() {
        let api = FakeApi::with(EntityView { likes: 4, shares: 1, ..Default::default() });
        *api.delay.lock().unwrap() = Some(Duration::from_millis(50));
        *api.share_delay.lock().unwrap() = Some(Duration::from_millis(150));
        api.fail.store(true, Ordering::SeqCst);
        let coordinator = Arc::new(coordinator(api.clone(), Duration::from_secs(1)));
        coordinator.track(POST).await.unwrap();
        let before = coordinator.view(POST).await.unwrap();

        let like = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.toggle_like(POST).await })
        };
        let share = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.track_share(POST, "email").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let pending = coordinator.view(POST).await.unwrap();
        assert_eq!((pending.likes, pending.liked, pending.shares), (5, true, 2));

        // The like fails first; the share's later rollback must not bring its guess back
        assert!(like.await.unwrap().is_err());
        assert!(share.await.unwrap().is_err());
        assert_eq!(coordinator.view(POST).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_rollback_keeps_state_pulled_during_the_call() {
        let api = FakeApi::with(EntityView { likes: 4, ..Default::default() });
        *api.delay.lock().unwrap() = Some(Duration::from_millis(100));
        api.fail.store(true, Ordering::SeqCst);
        let coordinator = Arc::new(coordinator(api.clone(), Duration::from_secs(1)));
        coordinator.track(POST).await.unwrap();

        let like = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.toggle_like(POST).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Other users liked it meanwhile and the push arrives before the failure
        api.state.lock().unwrap().likes = 9;
        coordinator
            .handle_push(PushEvent::engagement(PushEventKind::Like, POST))
            .await
            .unwrap();

        assert!(like.await.unwrap().is_err());
        let view = coordinator.view(POST).await.unwrap();
        assert_eq!((view.likes, view.liked), (9, false));
    }

    #[tokio::test]
    async fn test_timeout_rolls_back_without_retry() {
        let api = FakeApi::with(EntityView::default());
        *api.delay.lock().unwrap() = Some(Duration::from_millis(200));
        let coordinator = coordinator(api.clone(), Duration::from_millis(20));
        coordinator.track(POST).await.unwrap();

        let err = coordinator.toggle_like(POST).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
        assert_eq!(coordinator.view(POST).await.unwrap(), EntityView::default());
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_call_while_pending_is_coalesced() {
        let api = FakeApi::with(EntityView::default());
        *api.delay.lock().unwrap() = Some(Duration::from_millis(100));
        let coordinator = Arc::new(coordinator(api.clone(), Duration::from_secs(1)));
        coordinator.track(POST).await.unwrap();

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.toggle_like(POST).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = coordinator.toggle_like(POST).await.unwrap();
        assert!(second.is_coalesced());
        // A different action on the same entity is not blocked
        let share = coordinator.track_share(POST, "email").await.unwrap();
        assert!(!share.is_coalesced());

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.applied().unwrap().like_count, 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);

        // The claim is released once the first call finishes
        let third = coordinator.toggle_like(POST).await.unwrap();
        assert_eq!(third.applied().unwrap().like_count, 0);
    }

    #[tokio::test]
    async fn test_push_triggers_repull_instead_of_applying_payload() {
        let api = FakeApi::with(EntityView { likes: 3, ..Default::default() });
        let coordinator = coordinator(api.clone(), Duration::from_secs(1));
        coordinator.track(POST).await.unwrap();
        let pulls = api.pulls.load(Ordering::SeqCst);

        // Someone else liked it on the server
        api.state.lock().unwrap().likes = 4;
        coordinator
            .handle_push(PushEvent::engagement(PushEventKind::Like, POST))
            .await
            .unwrap();
        assert_eq!(coordinator.view(POST).await.unwrap().likes, 4);
        assert_eq!(api.pulls.load(Ordering::SeqCst), pulls + 1);

        // An event naming an entity this client does not show changes nothing
        coordinator
            .handle_push(PushEvent::engagement(PushEventKind::Like, EntityId(999)))
            .await
            .unwrap();
        assert!(coordinator.view(EntityId(999)).await.is_none());
        assert_eq!(coordinator.view(POST).await.unwrap().likes, 4);
    }

    #[tokio::test]
    async fn test_notification_push_refreshes_unread_count() {
        let api = FakeApi::with(EntityView::default());
        *api.unread.lock().unwrap() = 2;
        let coordinator = coordinator(api.clone(), Duration::from_secs(1));

        coordinator
            .handle_push(PushEvent::notification(crate::core::NotificationId(5)))
            .await
            .unwrap();
        assert_eq!(coordinator.unread_count().await, 2);
    }

    #[tokio::test]
    async fn test_resync_all_overwrites_stale_views() {
        let api = FakeApi::with(EntityView::default());
        let coordinator = coordinator(api.clone(), Duration::from_secs(1));
        coordinator.track(POST).await.unwrap();
        coordinator.track(EntityId(11)).await.unwrap();

        api.state.lock().unwrap().shares = 6;
        *api.unread.lock().unwrap() = 1;
        let refreshed = coordinator.resync_all().await.unwrap();

        assert_eq!(refreshed, 2);
        assert_eq!(coordinator.view(POST).await.unwrap().shares, 6);
        assert_eq!(coordinator.view(EntityId(11)).await.unwrap().shares, 6);
        assert_eq!(coordinator.unread_count().await, 1);
    }
}
