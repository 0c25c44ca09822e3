// Push Hub - per-tenant, per-user session registry with bounded fan-out
// Delivery is at-most-once: a full session buffer drops the event, a closed session is pruned

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::core::{TenantId, UserId};
use crate::infrastructure::monitoring::{MetricsCollector, PushOutcome};
use crate::push::event::PushEvent;

/// Why a single session did not receive an event. Logged and counted, never returned to
/// the request that triggered the push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    BufferFull,
    SessionClosed,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::BufferFull => write!(f, "session buffer full"),
            DeliveryError::SessionClosed => write!(f, "session closed"),
        }
    }
}

impl std::error::Error for DeliveryError {}

type SessionMap = HashMap<Uuid, mpsc::Sender<PushEvent>>;

/// A live push session handed to the transport that owns the socket
#[derive(Debug)]
pub struct PushSubscription {
    pub session_id: Uuid,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub receiver: mpsc::Receiver<PushEvent>,
}

#[derive(Debug)]
pub struct PushHub {
    tenants: RwLock<HashMap<TenantId, HashMap<UserId, SessionMap>>>,
    session_buffer: usize,
    metrics: Arc<MetricsCollector>,
}

impl PushHub {
    pub fn new(session_buffer: usize, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            session_buffer: session_buffer.max(1),
            metrics,
        }
    }

    /// Register a new session for an authenticated user
    pub async fn subscribe(&self, tenant_id: TenantId, user_id: UserId) -> PushSubscription {
        let (sender, receiver) = mpsc::channel(self.session_buffer);
        let session_id = Uuid::new_v4();

        self.tenants
            .write()
            .await
            .entry(tenant_id)
            .or_default()
            .entry(user_id)
            .or_default()
            .insert(session_id, sender);
        self.metrics.record_session_opened();
        debug!(%tenant_id, %user_id, %session_id, "Push session opened");

        PushSubscription {
            session_id,
            tenant_id,
            user_id,
            receiver,
        }
    }

    pub async fn unsubscribe(&self, tenant_id: TenantId, user_id: UserId, session_id: Uuid) {
        let mut tenants = self.tenants.write().await;
        if remove_session(&mut tenants, tenant_id, user_id, session_id) {
            self.metrics.record_session_closed();
            debug!(%tenant_id, %user_id, %session_id, "Push session closed");
        }
    }

    /// Deliver to every live session of one user. Returns how many sessions accepted it.
    pub async fn send_to_user(&self, tenant_id: TenantId, user_id: UserId, event: PushEvent) -> usize {
        let (delivered, closed) = {
            let tenants = self.tenants.read().await;
            match tenants.get(&tenant_id).and_then(|users| users.get(&user_id)) {
                Some(sessions) => self.deliver_all(sessions.iter().map(|(id, tx)| (user_id, *id, tx)), event),
                None => (0, Vec::new()),
            }
        };
        self.prune(tenant_id, closed).await;
        delivered
    }

    /// Deliver to every live session in a tenant
    pub async fn publish_to_tenant(&self, tenant_id: TenantId, event: PushEvent) -> usize {
        let (delivered, closed) = {
            let tenants = self.tenants.read().await;
            match tenants.get(&tenant_id) {
                Some(users) => self.deliver_all(
                    users
                        .iter()
                        .flat_map(|(user, sessions)| sessions.iter().map(move |(id, tx)| (*user, *id, tx))),
                    event,
                ),
                None => (0, Vec::new()),
            }
        };
        self.prune(tenant_id, closed).await;
        delivered
    }

    pub async fn session_count(&self, tenant_id: TenantId, user_id: UserId) -> usize {
        self.tenants
            .read()
            .await
            .get(&tenant_id)
            .and_then(|users| users.get(&user_id))
            .map_or(0, |sessions| sessions.len())
    }

    fn deliver_all<'a>(
        &self,
        sessions: impl Iterator<Item = (UserId, Uuid, &'a mpsc::Sender<PushEvent>)>,
        event: PushEvent,
    ) -> (usize, Vec<(UserId, Uuid)>) {
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (user_id, session_id, sender) in sessions {
            match try_deliver(sender, event) {
                Ok(()) => {
                    delivered += 1;
                    self.metrics.record_push(PushOutcome::Delivered);
                }
                Err(err) => {
                    self.metrics.record_push(PushOutcome::Dropped);
                    debug!(%user_id, %session_id, %event, error = %err, "Push event dropped");
                    if err == DeliveryError::SessionClosed {
                        closed.push((user_id, session_id));
                    }
                }
            }
        }
        trace!(%event, delivered, "Push fan-out complete");
        (delivered, closed)
    }

    async fn prune(&self, tenant_id: TenantId, closed: Vec<(UserId, Uuid)>) {
        if closed.is_empty() {
            return;
        }
        let mut tenants = self.tenants.write().await;
        for (user_id, session_id) in closed {
            if remove_session(&mut tenants, tenant_id, user_id, session_id) {
                self.metrics.record_session_closed();
            }
        }
    }
}

fn try_deliver(sender: &mpsc::Sender<PushEvent>, event: PushEvent) -> Result<(), DeliveryError> {
    sender.try_send(event).map_err(|err| match err {
        mpsc::error::TrySendError::Full(_) => DeliveryError::BufferFull,
        mpsc::error::TrySendError::Closed(_) => DeliveryError::SessionClosed,
    })
}

fn remove_session(
    tenants: &mut HashMap<TenantId, HashMap<UserId, SessionMap>>,
    tenant_id: TenantId,
    user_id: UserId,
    session_id: Uuid,
) -> bool {
    let Some(users) = tenants.get_mut(&tenant_id) else {
        return false;
    };
    let Some(sessions) = users.get_mut(&user_id) else {
        return false;
    };
    let removed = sessions.remove(&session_id).is_some();
    if sessions.is_empty() {
        users.remove(&user_id);
    }
    if users.is_empty() {
        tenants.remove(&tenant_id);
    }
    removed
}
