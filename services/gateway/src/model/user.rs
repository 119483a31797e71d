//! User records and the resolved caller identity.
use chrono::{DateTime, Utc};
use gatehouse_authz::Role;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A platform user as persisted by the identity store.
///
/// `role` is the administrator-assigned direct role. It is independent of
/// group membership; the effective role is always computed, never stored.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[schema(value_type = u32)]
    pub role: Role,
    pub auth_provider_namespace: String,
    pub auth_provider_name: String,
    pub provider_user_id: String,
    pub groups_last_checked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Builds a fresh record with a random id and both timestamps set to now.
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        role: Role,
        auth_provider_namespace: impl Into<String>,
        auth_provider_name: impl Into<String>,
        provider_user_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.into(),
            email: email.into(),
            role,
            auth_provider_namespace: auth_provider_namespace.into(),
            auth_provider_name: auth_provider_name.into(),
            provider_user_id: provider_user_id.into(),
            groups_last_checked: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of identity assertion for one request.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub user: User,
    pub group_ids: Vec<String>,
    #[schema(value_type = u32)]
    pub effective_role: Role,
}

impl AuthenticatedUser {
    pub fn is_owner(&self) -> bool {
        self.effective_role.has_role(Role::OWNER)
    }

    /// Admin or Owner tier.
    pub fn is_admin(&self) -> bool {
        self.effective_role.tier_rank() >= Role::ADMIN.tier_rank()
    }

    pub fn can_read_admin_views(&self) -> bool {
        self.is_admin() || self.effective_role.has_auditor_role()
    }
}
