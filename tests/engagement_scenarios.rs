use std::sync::Arc;
use std::time::Duration;

use engagement_core::{
    app_state::AppState,
    client::{
        run_push_loop, CoordinatorConfig, HubConnector, InProcessApi, MutationCoordinator, ReconnectPolicy,
    },
    config::Config,
    core::{EntityId, LikeResult, TenantId, UserId},
    infrastructure::{SqliteDatabase, ViewerContext},
    push::{PushEvent, PushEventKind},
    services::ListNotifications,
};
use sqlx::Row;
use tokio::sync::watch;

async fn state() -> AppState {
    let db = SqliteDatabase::new_in_memory().await.unwrap();
    AppState::with_database(Config::for_tests(), db)
}

/// File-backed state with a multi-connection pool, so transactions genuinely overlap
async fn pooled_state(dir: &tempfile::TempDir) -> AppState {
    let url = format!("sqlite://{}", dir.path().join("engagement.db").display());
    let db = SqliteDatabase::connect(&url, 8).await.unwrap();
    AppState::with_database(Config::for_tests(), db)
}

fn owner() -> ViewerContext {
    ViewerContext::member(1, 100)
}

async fn post(state: &AppState) -> EntityId {
    state.engagement.register_post(&owner(), None).await.unwrap().id
}

async fn count_rows(state: &AppState, table: &str, entity: EntityId) -> i64 {
    sqlx::query(&format!("SELECT COUNT(*) AS n FROM {} WHERE entity_id = ?", table))
        .bind(entity.value())
        .fetch_one(state.db.pool())
        .await
        .unwrap()
        .get("n")
}

fn coordinator_for(state: &AppState, viewer: ViewerContext) -> Arc<MutationCoordinator> {
    let api = InProcessApi::new(state.engagement.clone(), state.notifications.clone(), viewer);
    Arc::new(MutationCoordinator::new(Arc::new(api), CoordinatorConfig::default()))
}

#[tokio::test]
async fn test_like_then_unlike() {
    let state = state().await;
    let p = post(&state).await;
    let user_a = ViewerContext::member(1, 1);

    let first = state.engagement.toggle_like(&user_a, p).await.unwrap();
    assert_eq!(first, LikeResult { liked: true, like_count: 1 });

    let second = state.engagement.toggle_like(&user_a, p).await.unwrap();
    assert_eq!(second, LikeResult { liked: false, like_count: 0 });
    assert_eq!(count_rows(&state, "likes", p).await, 0);
}

#[tokio::test]
async fn test_comment_hide_and_hide_again() {
    let state = state().await;
    let p = post(&state).await;
    let user_b = ViewerContext::member(1, 2);
    let moderator = ViewerContext::moderator(1, 50);

    let comment = state.engagement.create_comment(&user_b, p, "Nice post", None).await.unwrap();
    assert_eq!(state.engagement.entity_state(&user_b, p).await.unwrap().counters.comments, 1);

    let hidden = state.engagement.hide_comment(&moderator, comment.id).await.unwrap();
    assert!(hidden.changed);
    assert_eq!(hidden.post_comment_count, 0);

    let again = state.engagement.hide_comment(&moderator, comment.id).await.unwrap();
    assert!(!again.changed);
    assert_eq!(again.post_comment_count, 0);

    // Deleting a hidden comment does not decrement a second time
    let deleted = state.engagement.delete_comment(&user_b, comment.id).await.unwrap();
    assert!(!deleted.changed);
    assert_eq!(state.engagement.entity_state(&user_b, p).await.unwrap().counters.comments, 0);
}

#[tokio::test]
async fn test_share_twice_logs_two_rows() {
    let state = state().await;
    let p = post(&state).await;
    let user_c = ViewerContext::member(1, 3);

    let first = state.engagement.track_share(&user_c, p, "twitter").await.unwrap();
    let second = state.engagement.track_share(&user_c, p, "twitter").await.unwrap();

    assert_eq!((first.share_count, second.share_count), (1, 2));
    assert_ne!(first.share_id, second.share_id);
    assert_eq!(count_rows(&state, "shares", p).await, 2);
}

#[tokio::test]
async fn test_offline_recipient_sees_notification_after_reconnect() {
    let state = state().await;
    let p = post(&state).await;
    let recipient = owner();
    let actor = ViewerContext::member(1, 7);

    // Nobody from the recipient is connected when the like lands
    assert_eq!(state.hub.session_count(TenantId(1), UserId(100)).await, 0);
    state.engagement.toggle_like(&actor, p).await.unwrap();

    let coordinator = coordinator_for(&state, recipient.clone());
    assert_eq!(coordinator.unread_count().await, 0);

    let connector = Arc::new(HubConnector::new(state.hub.clone(), TenantId(1), UserId(100)));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(run_push_loop(
        coordinator.clone(),
        connector,
        ReconnectPolicy::default(),
        shutdown_rx,
    ));

    for _ in 0..100 {
        if coordinator.unread_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(coordinator.unread_count().await, 1);

    let page = state
        .notifications
        .list(
            &recipient,
            ListNotifications {
                unread_only: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.notifications.len(), 1);
    assert_eq!(page.notifications[0].entity_id, Some(p));
    assert_eq!(page.notifications[0].actor_id, Some(UserId(7)));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_toggles_lose_no_update() {
    let dir = tempfile::tempdir().unwrap();
    let state = pooled_state(&dir).await;
    let p = post(&state).await;

    let mut tasks = Vec::new();
    for user in 1..=25 {
        let engagement = state.engagement.clone();
        tasks.push(tokio::spawn(async move {
            engagement.toggle_like(&ViewerContext::member(1, user), p).await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().unwrap().liked);
    }

    let counters = state.engagement.entity_state(&owner(), p).await.unwrap().counters;
    assert_eq!(counters.likes, 25);
    assert_eq!(count_rows(&state, "likes", p).await, 25);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_concurrent_toggles_keep_count_and_rows_equal() {
    let dir = tempfile::tempdir().unwrap();
    let state = pooled_state(&dir).await;
    let p = post(&state).await;

    // Users 1..=10 toggle three times at once and end up liking; 11..=20 toggle twice and do not
    let mut tasks = Vec::new();
    for user in 1..=20 {
        let toggles = if user <= 10 { 3 } else { 2 };
        for _ in 0..toggles {
            let engagement = state.engagement.clone();
            tasks.push(tokio::spawn(async move {
                engagement.toggle_like(&ViewerContext::member(1, user), p).await
            }));
        }
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let counters = state.engagement.entity_state(&owner(), p).await.unwrap().counters;
    assert_eq!(counters.likes, count_rows(&state, "likes", p).await);
    assert_eq!(counters.likes, 10);
    assert!(state.engagement.entity_state(&ViewerContext::member(1, 3), p).await.unwrap().liked_by_viewer);
    assert!(!state.engagement.entity_state(&ViewerContext::member(1, 13), p).await.unwrap().liked_by_viewer);
}

#[tokio::test]
async fn test_failed_mutation_leaves_displayed_counts_unchanged() {
    let state = state().await;
    let p = post(&state).await;
    state.engagement.toggle_like(&ViewerContext::member(1, 9), p).await.unwrap();

    let coordinator = coordinator_for(&state, ViewerContext::member(1, 1));
    let before = coordinator.track(p).await.unwrap();
    assert_eq!(before.likes, 1);

    sqlx::query(
        "CREATE TRIGGER fail_counter BEFORE UPDATE ON engagement_counters BEGIN SELECT RAISE(ABORT, 'injected'); END",
    )
    .execute(state.db.pool())
    .await
    .unwrap();

    let err = coordinator.toggle_like(p).await.unwrap_err();
    assert_eq!(err.kind(), "storage");
    assert!(coordinator.track_share(p, "email").await.is_err());
    assert!(coordinator.create_comment(p, "hello", None).await.is_err());
    assert_eq!(coordinator.view(p).await.unwrap(), before);

    // The server never saw a partial write either
    sqlx::query("DROP TRIGGER fail_counter").execute(state.db.pool()).await.unwrap();
    let server = state.engagement.entity_state(&owner(), p).await.unwrap().counters;
    assert_eq!((server.likes, server.shares, server.comments), (1, 0, 0));
}

#[tokio::test]
async fn test_coordinator_reconciles_and_other_clients_repull() {
    let state = state().await;
    let p = post(&state).await;

    let alice = coordinator_for(&state, ViewerContext::member(1, 1));
    let bob = coordinator_for(&state, ViewerContext::member(1, 2));
    alice.track(p).await.unwrap();
    bob.track(p).await.unwrap();

    let mut bob_events = state.hub.subscribe(TenantId(1), UserId(2)).await;
    alice.toggle_like(p).await.unwrap();
    let alice_view = alice.view(p).await.unwrap();
    assert_eq!((alice_view.likes, alice_view.liked), (1, true));

    // Bob still shows the old count until the push makes him look again
    assert_eq!(bob.view(p).await.unwrap().likes, 0);
    let event = bob_events.receiver.recv().await.unwrap();
    assert_eq!(event, PushEvent::engagement(PushEventKind::Like, p));
    bob.handle_push(event).await.unwrap();
    let bob_view = bob.view(p).await.unwrap();
    assert_eq!((bob_view.likes, bob_view.liked), (1, false));
}

#[tokio::test]
async fn test_push_with_wrong_entity_does_not_change_counts() {
    let state = state().await;
    let p = post(&state).await;
    let coordinator = coordinator_for(&state, ViewerContext::member(1, 1));
    let before = coordinator.track(p).await.unwrap();

    coordinator
        .handle_push(PushEvent::engagement(PushEventKind::Like, EntityId(123_456)))
        .await
        .unwrap();
    assert_eq!(coordinator.view(p).await.unwrap(), before);

    // Even an event naming the right entity only causes a re-pull of the unchanged truth
    coordinator
        .handle_push(PushEvent::engagement(PushEventKind::Share, p))
        .await
        .unwrap();
    assert_eq!(coordinator.view(p).await.unwrap(), before);
}

#[tokio::test]
async fn test_push_events_stay_inside_tenant() {
    let state = state().await;
    let p = post(&state).await;

    let mut same_tenant = state.hub.subscribe(TenantId(1), UserId(5)).await;
    let mut other_tenant = state.hub.subscribe(TenantId(2), UserId(5)).await;

    state.engagement.track_share(&ViewerContext::member(1, 5), p, "email").await.unwrap();

    let event = same_tenant.receiver.recv().await.unwrap();
    assert_eq!(event, PushEvent::engagement(PushEventKind::Share, p));
    assert!(other_tenant.receiver.try_recv().is_err());
}
