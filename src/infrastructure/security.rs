// Security - bearer-token sessions that resolve to a ViewerContext
// The upstream auth layer logs people in; this registry only maps issued tokens to (tenant, user, role)
// Upstream obtains tokens through the issuing endpoint, which is guarded by a shared secret

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::core::{TenantId, UserId};
use crate::error::{AppError, AppResult};
use crate::infrastructure::viewer::{ViewerContext, ViewerRole};

/// Resolves a bearer token into the identity of the caller
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> AppResult<ViewerContext>;
}

#[derive(Debug, Clone)]
struct Session {
    tenant_id: TenantId,
    user_id: UserId,
    role: ViewerRole,
    expires_at: SystemTime,
}

/// In-memory token registry with expiry
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Issue a fresh opaque token for an already authenticated user
    #[instrument(skip(self))]
    pub async fn issue(&self, tenant_id: TenantId, user_id: UserId, role: ViewerRole) -> String {
        let token = generate_token();
        let session = Session {
            tenant_id,
            user_id,
            role,
            expires_at: SystemTime::now() + self.ttl,
        };
        self.sessions.write().await.insert(token.clone(), session);
        debug!(%tenant_id, %user_id, role = role.as_str(), "Session issued");
        token
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Drop expired sessions, returns how many were removed
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let now = SystemTime::now();
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);
        before - sessions.len()
    }
}

#[async_trait]
impl Authenticator for SessionRegistry {
    async fn authenticate(&self, token: &str) -> AppResult<ViewerContext> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(token)
            .ok_or_else(|| AppError::Unauthorized("Invalid session token".to_string()))?;

        if SystemTime::now() > session.expires_at {
            return Err(AppError::Unauthorized("Session expired".to_string()));
        }

        Ok(ViewerContext::new(session.tenant_id, session.user_id, session.role))
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Header carrying the shared secret of the upstream session issuer
pub const ISSUER_SECRET_HEADER: &str = "x-session-issuer-secret";

/// Check the secret presented by a session issuer against the configured one.
///
/// Issuing is disabled (`Forbidden`) when no secret is configured.
pub fn verify_issuer_secret(configured: Option<&str>, presented: Option<&str>) -> AppResult<()> {
    let Some(configured) = configured.filter(|secret| !secret.is_empty()) else {
        return Err(AppError::Forbidden("Session issuing is disabled".to_string()));
    };
    match presented {
        Some(presented) if constant_time_eq(presented.as_bytes(), configured.as_bytes()) => Ok(()),
        _ => Err(AppError::Unauthorized("Invalid issuer secret".to_string())),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

/// Pull the token out of an `Authorization: Bearer <token>` header value
pub fn parse_bearer(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issued_token_authenticates() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let token = registry.issue(TenantId(3), UserId(7), ViewerRole::Moderator).await;

        let viewer = registry.authenticate(&token).await.unwrap();
        assert_eq!(viewer.tenant_id, TenantId(3));
        assert_eq!(viewer.user_id, UserId(7));
        assert!(viewer.can_moderate());
    }

    #[tokio::test]
    async fn test_unknown_and_revoked_tokens_are_rejected() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        assert!(matches!(
            registry.authenticate("nope").await,
            Err(AppError::Unauthorized(_))
        ));

        let token = registry.issue(TenantId(1), UserId(1), ViewerRole::Member).await;
        assert!(registry.revoke(&token).await);
        assert!(registry.authenticate(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_rejected_and_cleaned() {
        let registry = SessionRegistry::new(Duration::ZERO);
        let token = registry.issue(TenantId(1), UserId(1), ViewerRole::Member).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(registry.authenticate(&token).await.is_err());
        assert_eq!(registry.cleanup_expired_sessions().await, 1);
    }

    #[test]
    fn test_issuer_secret_checks() {
        assert!(verify_issuer_secret(Some("s3cret"), Some("s3cret")).is_ok());
        assert!(matches!(
            verify_issuer_secret(Some("s3cret"), Some("s3cres")),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            verify_issuer_secret(Some("s3cret"), None),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            verify_issuer_secret(None, Some("anything")),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(verify_issuer_secret(Some(""), Some("")), Err(AppError::Forbidden(_))));
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("Basic abc"), None);
    }
}
