//! Outbox events that drive workspace reconciliation.
//!
//! Rows are written in the same transaction as the mutation they describe and
//! deleted only after the reconcile controller has applied them.
use chrono::{DateTime, Utc};
use gatehouse_authz::Role;
use serde::{Deserialize, Serialize};

/// A user's role moved. `old_role`/`new_role` are informational; the
/// controller converges on the role it computes at apply time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RoleChangeEvent {
    pub id: i64,
    pub user_id: String,
    pub old_role: Role,
    pub new_role: Role,
    pub created_at: DateTime<Utc>,
}

/// An assignment for `group_name` was created, updated, or deleted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GroupRoleChangeEvent {
    pub id: i64,
    pub group_name: String,
    pub created_at: DateTime<Utc>,
}
