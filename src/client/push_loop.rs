// Push Loop - keep one push channel open and turn its events into re-pulls
//
// After every (re)connect the coordinator resyncs everything it displays, which covers
// events missed while disconnected.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::coordinator::MutationCoordinator;
use crate::client::reconnect::ReconnectPolicy;
use crate::core::{TenantId, UserId};
use crate::error::AppResult;
use crate::push::{PushEvent, PushHub};

/// Events from one live connection; the stream ends when the connection does
pub type PushStream = BoxStream<'static, PushEvent>;

#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self) -> AppResult<PushStream>;
}

/// Subscribes straight to an in-process hub
#[derive(Debug, Clone)]
pub struct HubConnector {
    hub: Arc<PushHub>,
    tenant_id: TenantId,
    user_id: UserId,
}

impl HubConnector {
    pub fn new(hub: Arc<PushHub>, tenant_id: TenantId, user_id: UserId) -> Self {
        Self { hub, tenant_id, user_id }
    }
}

#[async_trait]
impl PushConnector for HubConnector {
    async fn connect(&self) -> AppResult<PushStream> {
        let subscription = self.hub.subscribe(self.tenant_id, self.user_id).await;
        let events = stream::unfold(subscription.receiver, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        });
        Ok(events.boxed())
    }
}

/// Run until `shutdown` flips to true or its sender is dropped
pub async fn run_push_loop(
    coordinator: Arc<MutationCoordinator>,
    connector: Arc<dyn PushConnector>,
    policy: ReconnectPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        match connector.connect().await {
            Ok(mut events) => {
                attempt = 0;
                info!("Push channel connected");
                if let Err(err) = coordinator.resync_all().await {
                    warn!("Resync after connect failed: {}", err);
                }

                loop {
                    tokio::select! {
                        event = events.next() => {
                            let Some(event) = event else { break };
                            if let Err(err) = coordinator.handle_push(event).await {
                                warn!(event = %event, "Re-pull for push event failed: {}", err);
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                debug!("Push loop stopping");
                                return;
                            }
                        }
                    }
                }
                info!("Push channel disconnected");
            }
            Err(err) => warn!(attempt, "Push connect failed: {}", err),
        }

        let delay = policy.delay(attempt);
        attempt = attempt.saturating_add(1);
        debug!(?delay, attempt, "Reconnecting push channel");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
