use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::core::{TenantId, UserId};
use crate::error::AppError;

/// Role granted by the upstream auth layer; the core only distinguishes moderation rights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerRole {
    Member,
    Moderator,
    Admin,
}

impl ViewerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewerRole::Member => "member",
            ViewerRole::Moderator => "moderator",
            ViewerRole::Admin => "admin",
        }
    }
}

impl FromStr for ViewerRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "member" | "user" | "alumni" | "student" => Ok(ViewerRole::Member),
            "moderator" => Ok(ViewerRole::Moderator),
            "admin" => Ok(ViewerRole::Admin),
            other => Err(AppError::Validation(format!("Unknown role: {}", other))),
        }
    }
}

/// Authenticated caller of a single request. Every core operation is scoped by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerContext {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: ViewerRole,
    pub request_id: String,
}

impl ViewerContext {
    pub fn new(tenant_id: TenantId, user_id: UserId, role: ViewerRole) -> Self {
        Self {
            tenant_id,
            user_id,
            role,
            request_id: format!("req-{}", Uuid::new_v4()),
        }
    }

    pub fn member(tenant_id: impl Into<TenantId>, user_id: impl Into<UserId>) -> Self {
        Self::new(tenant_id.into(), user_id.into(), ViewerRole::Member)
    }

    pub fn moderator(tenant_id: impl Into<TenantId>, user_id: impl Into<UserId>) -> Self {
        Self::new(tenant_id.into(), user_id.into(), ViewerRole::Moderator)
    }

    pub fn can_moderate(&self) -> bool {
        matches!(self.role, ViewerRole::Moderator | ViewerRole::Admin)
    }
}
