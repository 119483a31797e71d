//! Relational store for identity, group-role assignments, and outbox events.
//!
//! # Purpose
//! Defines the storage traits the gateway depends on and the error type every
//! backend maps into. Two backends exist: [`memory::InMemoryStore`] for local
//! runs and tests and [`postgres::PostgresStore`] for durable deployments.
//!
//! # Key invariants
//! - A direct-role mutation and its [`RoleChangeEvent`] commit together.
//! - An assignment mutation and its [`GroupRoleChangeEvent`] commit together.
//! - A membership sync (group upsert, membership diff, `groups_last_checked`)
//!   commits as one unit.
use crate::model::{
    Group, GroupRoleAssignment, GroupRoleChangeEvent, MembershipDiff, RoleChangeEvent, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatehouse_authz::Role;
use std::collections::HashMap;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unexpected(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a direct-role update.
#[derive(Debug, Clone)]
pub struct UserRoleUpdate {
    pub user: User,
    /// `None` when the stored role already matched.
    pub event: Option<RoleChangeEvent>,
}

/// The provider's current view of one user's groups.
#[derive(Debug, Clone)]
pub struct GroupSync<'a> {
    pub user_id: &'a str,
    pub auth_provider_namespace: &'a str,
    pub auth_provider_name: &'a str,
    pub groups: &'a [Group],
    pub checked_at: DateTime<Utc>,
}

/// Users, cached groups, and memberships.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> StoreResult<User>;
    async fn find_user_by_identity(
        &self,
        auth_provider_namespace: &str,
        auth_provider_name: &str,
        provider_user_id: &str,
    ) -> StoreResult<Option<User>>;
    /// Conflict when the provider identity triple already exists.
    ///
    /// A user inserted with a privileged role also gets a Basic -> role
    /// [`RoleChangeEvent`] in the same transaction, so its workspace is built
    /// like any other promotion.
    async fn create_user(&self, user: User) -> StoreResult<User>;
    async fn list_users(&self) -> StoreResult<Vec<User>>;
    /// Sets the direct role and records a [`RoleChangeEvent`] in the same
    /// transaction when the role moved.
    async fn update_user_role(&self, user_id: &str, role: Role) -> StoreResult<UserRoleUpdate>;

    /// Cached groups of one provider whose name contains `name_filter`
    /// (case-insensitive).
    async fn list_groups(
        &self,
        auth_provider_namespace: &str,
        auth_provider_name: &str,
        name_filter: &str,
    ) -> StoreResult<Vec<Group>>;
    async fn list_group_ids_for_user(&self, user_id: &str) -> StoreResult<Vec<String>>;
    /// `user id -> group ids`; users without memberships are absent.
    async fn list_group_ids_for_users(
        &self,
        user_ids: &[String],
    ) -> StoreResult<HashMap<String, Vec<String>>>;
    async fn list_user_ids_in_group(&self, group_id: &str) -> StoreResult<Vec<String>>;
    /// Upserts groups, applies the membership diff inside the provider scope,
    /// and stamps `groups_last_checked`, atomically.
    async fn sync_user_groups(&self, sync: GroupSync<'_>) -> StoreResult<MembershipDiff>;
}

/// Admin-authored group → role mappings.
#[async_trait]
pub trait RoleAssignmentStore: Send + Sync {
    async fn list_group_role_assignments(&self) -> StoreResult<Vec<GroupRoleAssignment>>;
    async fn get_group_role_assignment(&self, group_name: &str)
    -> StoreResult<GroupRoleAssignment>;
    /// Assignments whose `group_name` is one of `group_ids`.
    async fn list_group_role_assignments_for_groups(
        &self,
        group_ids: &[String],
    ) -> StoreResult<Vec<GroupRoleAssignment>>;
    async fn create_group_role_assignment(
        &self,
        assignment: GroupRoleAssignment,
    ) -> StoreResult<GroupRoleAssignment>;
    async fn update_group_role_assignment(
        &self,
        assignment: GroupRoleAssignment,
    ) -> StoreResult<GroupRoleAssignment>;
    async fn delete_group_role_assignment(&self, group_name: &str) -> StoreResult<()>;
}

/// Outbox rows consumed by the reconcile controller, oldest first.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn record_role_change(
        &self,
        user_id: &str,
        old_role: Role,
        new_role: Role,
    ) -> StoreResult<RoleChangeEvent>;
    /// Events with `id > after_id`, ascending.
    async fn list_role_change_events_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<RoleChangeEvent>>;
    async fn list_role_change_events(&self, limit: usize) -> StoreResult<Vec<RoleChangeEvent>> {
        self.list_role_change_events_after(0, limit).await
    }
    async fn delete_role_change_event(&self, id: i64) -> StoreResult<()>;
    /// Events with `id > after_id`, ascending.
    async fn list_group_role_change_events_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<GroupRoleChangeEvent>>;
    async fn list_group_role_change_events(
        &self,
        limit: usize,
    ) -> StoreResult<Vec<GroupRoleChangeEvent>> {
        self.list_group_role_change_events_after(0, limit).await
    }
    async fn delete_group_role_change_event(&self, id: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait GatewayStore: IdentityStore + RoleAssignmentStore + EventStore {
    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
