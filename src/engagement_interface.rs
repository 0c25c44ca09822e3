// Engagement Interface - HTTP surface of the engagement and notification core
// Every response uses the `{success, data}` / `{success, error}` envelope

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    app_state::AppState,
    core::{EntityId, NotificationId, TenantId, UserId},
    error::{AppError, AppResult},
    infrastructure::{
        middleware::{viewer_context_middleware, Vc},
        security::{parse_bearer, verify_issuer_secret, ISSUER_SECRET_HEADER},
        ViewerRole,
    },
    push::websocket::push_upgrade_handler,
    services::ListNotifications,
};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { success: true, data })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterEntityRequest {
    pub id: Option<EntityId>,
}

#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    pub platform: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub content: String,
    pub parent_id: Option<EntityId>,
}

#[derive(Debug, Deserialize)]
pub struct EditCommentRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSessionRequest {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    /// Defaults to `member`
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedSession {
    pub token: String,
    pub expires_in_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

// HTTP Handlers

/// Called by the upstream auth layer after it has logged someone in
pub async fn issue_session_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IssueSessionRequest>,
) -> AppResult<impl IntoResponse> {
    let presented = headers.get(ISSUER_SECRET_HEADER).and_then(|value| value.to_str().ok());
    verify_issuer_secret(state.config.auth.issuer_secret.as_deref(), presented)?;

    let role = match req.role.as_deref() {
        Some(role) => role.parse::<ViewerRole>()?,
        None => ViewerRole::Member,
    };
    let token = state.sessions.issue(req.tenant_id, req.user_id, role).await;
    let session = IssuedSession {
        token,
        expires_in_secs: state.config.auth.session_ttl_secs,
    };
    Ok((StatusCode::CREATED, ok(session)))
}

/// Sign out: the presented token stops authenticating
pub async fn revoke_session_handler(
    State(state): State<AppState>,
    _vc: Vc,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
    let revoked = state.sessions.revoke(token).await;
    Ok(ok(json!({ "revoked": revoked })))
}

pub async fn register_entity_handler(
    State(state): State<AppState>,
    vc: Vc,
    body: Option<Json<RegisterEntityRequest>>,
) -> AppResult<impl IntoResponse> {
    let request = body.map(|Json(req)| req).unwrap_or_default();
    let entity = state.engagement.register_post(&vc, request.id).await?;
    Ok((StatusCode::CREATED, ok(entity)))
}

pub async fn entity_state_handler(
    State(state): State<AppState>,
    vc: Vc,
    Path(id): Path<EntityId>,
) -> AppResult<impl IntoResponse> {
    Ok(ok(state.engagement.entity_state(&vc, id).await?))
}

pub async fn toggle_like_handler(
    State(state): State<AppState>,
    vc: Vc,
    Path(id): Path<EntityId>,
) -> AppResult<impl IntoResponse> {
    Ok(ok(state.engagement.toggle_like(&vc, id).await?))
}

pub async fn track_share_handler(
    State(state): State<AppState>,
    vc: Vc,
    Path(id): Path<EntityId>,
    Json(req): Json<ShareRequest>,
) -> AppResult<impl IntoResponse> {
    Ok(ok(state.engagement.track_share(&vc, id, &req.platform).await?))
}

pub async fn reconcile_handler(
    State(state): State<AppState>,
    vc: Vc,
    Path(id): Path<EntityId>,
) -> AppResult<impl IntoResponse> {
    Ok(ok(state.engagement.reconcile(&vc, id).await?))
}

pub async fn list_comments_handler(
    State(state): State<AppState>,
    vc: Vc,
    Path(post_id): Path<EntityId>,
) -> AppResult<impl IntoResponse> {
    Ok(ok(state.engagement.list_comments(&vc, post_id).await?))
}

pub async fn create_comment_handler(
    State(state): State<AppState>,
    vc: Vc,
    Path(post_id): Path<EntityId>,
    Json(req): Json<CreateCommentRequest>,
) -> AppResult<impl IntoResponse> {
    let comment = state
        .engagement
        .create_comment(&vc, post_id, &req.content, req.parent_id)
        .await?;
    Ok((StatusCode::CREATED, ok(comment)))
}

pub async fn get_comment_handler(
    State(state): State<AppState>,
    vc: Vc,
    Path(id): Path<EntityId>,
) -> AppResult<impl IntoResponse> {
    Ok(ok(state.engagement.get_comment(&vc, id).await?))
}

pub async fn edit_comment_handler(
    State(state): State<AppState>,
    vc: Vc,
    Path(id): Path<EntityId>,
    Json(req): Json<EditCommentRequest>,
) -> AppResult<impl IntoResponse> {
    Ok(ok(state.engagement.edit_comment(&vc, id, &req.content).await?))
}

pub async fn delete_comment_handler(
    State(state): State<AppState>,
    vc: Vc,
    Path(id): Path<EntityId>,
) -> AppResult<impl IntoResponse> {
    Ok(ok(state.engagement.delete_comment(&vc, id).await?))
}

pub async fn hide_comment_handler(
    State(state): State<AppState>,
    vc: Vc,
    Path(id): Path<EntityId>,
) -> AppResult<impl IntoResponse> {
    Ok(ok(state.engagement.hide_comment(&vc, id).await?))
}

pub async fn list_notifications_handler(
    State(state): State<AppState>,
    vc: Vc,
    Query(params): Query<ListNotificationsQuery>,
) -> AppResult<impl IntoResponse> {
    let query = ListNotifications {
        unread_only: params.unread_only,
        cursor: params.cursor,
        limit: params.limit,
    };
    Ok(ok(state.notifications.list(&vc, query).await?))
}

pub async fn unread_count_handler(State(state): State<AppState>, vc: Vc) -> AppResult<impl IntoResponse> {
    let unread = state.notifications.unread_count(&vc).await?;
    Ok(ok(json!({ "unreadCount": unread })))
}

pub async fn mark_read_handler(
    State(state): State<AppState>,
    vc: Vc,
    Path(id): Path<NotificationId>,
) -> AppResult<impl IntoResponse> {
    Ok(ok(state.notifications.mark_read(&vc, id).await?))
}

pub async fn mark_all_read_handler(State(state): State<AppState>, vc: Vc) -> AppResult<impl IntoResponse> {
    let updated = state.notifications.mark_all_read(&vc).await?;
    Ok(ok(json!({ "updated": updated })))
}

pub async fn delete_notification_handler(
    State(state): State<AppState>,
    vc: Vc,
    Path(id): Path<NotificationId>,
) -> AppResult<impl IntoResponse> {
    state.notifications.delete(&vc, id).await?;
    Ok(ok(json!({ "deleted": id })))
}

pub async fn health_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    state.db.health_check().await?;
    Ok(Json(json!({ "success": true, "data": { "status": "ok" } })))
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    ok(state.metrics.snapshot())
}

// Create engagement router; everything except session issuing, push, health and metrics requires a session
pub fn create_engagement_router(state: AppState) -> Router {
    let authenticated = Router::new()
        // Engageable entities
        .route("/entities", post(register_entity_handler))
        .route("/entities/{id}", get(entity_state_handler))
        .route("/entities/{id}/like", post(toggle_like_handler))
        .route("/entities/{id}/share", post(track_share_handler))
        .route("/entities/{id}/reconcile", post(reconcile_handler))

        // Comments
        .route("/posts/{id}/comments", get(list_comments_handler).post(create_comment_handler))
        .route(
            "/comments/{id}",
            get(get_comment_handler).patch(edit_comment_handler).delete(delete_comment_handler),
        )
        .route("/comments/{id}/hide", post(hide_comment_handler))

        // Notifications
        .route("/notifications", get(list_notifications_handler))
        .route("/notifications/unread-count", get(unread_count_handler))
        .route("/notifications/read-all", post(mark_all_read_handler))
        .route("/notifications/{id}/read", post(mark_read_handler))
        .route("/notifications/{id}", delete(delete_notification_handler))

        // Sessions
        .route("/sessions/current", delete(revoke_session_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            viewer_context_middleware::<AppState>,
        ));

    Router::new()
        .merge(authenticated)
        // Guarded by the issuer secret instead of a session
        .route("/sessions", post(issue_session_handler))
        // Push authenticates its own handshake
        .route("/push", get(push_upgrade_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Full application: the engagement router under `/api/v1` with tracing and CORS
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", create_engagement_router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
