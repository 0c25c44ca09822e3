// Push WebSocket - authenticated upgrade and per-connection delivery loop
//
// The token is checked before the upgrade (`?token=` or `Authorization: Bearer`), so an
// unauthenticated client gets a plain 401 and never reaches the hub.

use axum::{
    body::Bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::app_state::AppState;
use crate::error::AppError;
use crate::infrastructure::middleware::extract_bearer_token;
use crate::infrastructure::viewer::ViewerContext;
use crate::push::hub::PushHub;

#[derive(Debug, Default, Deserialize)]
pub struct PushQuery {
    pub token: Option<String>,
}

pub async fn push_upgrade_handler(
    State(state): State<AppState>,
    Query(query): Query<PushQuery>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = query
        .token
        .filter(|token| !token.is_empty())
        .or_else(|| extract_bearer_token(&headers).ok());
    let Some(token) = token else {
        return AppError::Unauthorized("Push connections require a token".to_string()).into_response();
    };

    let viewer = match state.authenticator.authenticate(&token).await {
        Ok(viewer) => viewer,
        Err(err) => {
            debug!("Push handshake rejected: {}", err);
            return err.into_response();
        }
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let hub = state.hub.clone();
    let heartbeat = state.config.heartbeat_interval();
    upgrade.on_upgrade(move |socket| serve_session(socket, hub, viewer, heartbeat))
}

/// Forward hub events to one socket until either side goes away
async fn serve_session(socket: WebSocket, hub: Arc<PushHub>, viewer: ViewerContext, heartbeat: Duration) {
    let mut subscription = hub.subscribe(viewer.tenant_id, viewer.user_id).await;
    let (mut sink, mut stream) = socket.split();

    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;

    loop {
        tokio::select! {
            event = subscription.receiver.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("Failed to encode push event {}: {}", event, err);
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // The channel is server-to-client; anything else the client sends is ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    hub.unsubscribe(subscription.tenant_id, subscription.user_id, subscription.session_id)
        .await;
    debug!(
        tenant_id = %viewer.tenant_id,
        user_id = %viewer.user_id,
        session_id = %subscription.session_id,
        "Push socket closed"
    );
}
