//! In-memory implementation of the gateway store.
//!
//! # Purpose
//! Implements [`IdentityStore`], [`RoleAssignmentStore`], and [`EventStore`]
//! with `HashMap`s guarded by `tokio::sync::RwLock`. It exists for:
//! - local development and tests (no external dependencies)
//! - single-process deployments where durability is not required
//!
//! # Durability and consistency
//! - **Not durable**: users, memberships, assignments, and pending outbox
//!   events are lost on restart.
//! - Operations that must be atomic (role update + event, assignment mutation +
//!   event, membership sync) hold every write lock they touch for the whole
//!   operation. Locks are always taken in declaration order of the fields
//!   below, so concurrent multi-lock operations cannot deadlock.
//!
//! # Outbox
//! Events live in an [`Outbox`] with a process-local id sequence. Listing
//! returns rows in id order, matching the creation-order contract of the
//! Postgres backend.
use super::{
    EventStore, GatewayStore, GroupSync, IdentityStore, RoleAssignmentStore, StoreError,
    StoreResult, UserRoleUpdate,
};
use crate::model::{
    Group, GroupRoleAssignment, GroupRoleChangeEvent, MembershipDiff, RoleChangeEvent, User,
};
use async_trait::async_trait;
use chrono::Utc;
use gatehouse_authz::Role;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Append-only event list with monotonically increasing ids.
///
/// Rows are removed individually once applied; ids are never reused.
#[derive(Debug)]
struct Outbox<T> {
    next_id: i64,
    items: Vec<T>,
}

impl<T> Outbox<T> {
    fn new() -> Self {
        Self {
            next_id: 1,
            items: Vec::new(),
        }
    }

    fn record(&mut self, item: impl FnOnce(i64) -> T) -> &T {
        let id = self.next_id;
        self.next_id += 1;
        self.items.push(item(id));
        &self.items[self.items.len() - 1]
    }
}

/// In-memory gateway store.
///
/// Clones share state, so a test can hand one clone to the app and keep
/// another for assertions.
#[derive(Clone)]
pub struct InMemoryStore {
    /// Users keyed by id.
    users: Arc<RwLock<HashMap<String, User>>>,
    /// Cached provider groups keyed by provider-qualified id.
    groups: Arc<RwLock<HashMap<String, Group>>>,
    /// `user id -> group ids`.
    memberships: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
    /// Group-role assignments keyed by group name.
    assignments: Arc<RwLock<HashMap<String, GroupRoleAssignment>>>,
    role_events: Arc<RwLock<Outbox<RoleChangeEvent>>>,
    group_role_events: Arc<RwLock<Outbox<GroupRoleChangeEvent>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            groups: Arc::new(RwLock::new(HashMap::new())),
            memberships: Arc::new(RwLock::new(HashMap::new())),
            assignments: Arc::new(RwLock::new(HashMap::new())),
            role_events: Arc::new(RwLock::new(Outbox::new())),
            group_role_events: Arc::new(RwLock::new(Outbox::new())),
        }
    }

    /// Seeds a membership pair directly. Callers normally go through
    /// [`IdentityStore::sync_user_groups`].
    pub async fn add_membership(&self, user_id: &str, group: Group) {
        let group_id = group.id.clone();
        self.groups.write().await.insert(group.id.clone(), group);
        self.memberships
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .insert(group_id);
    }

    fn record_group_event(outbox: &mut Outbox<GroupRoleChangeEvent>, group_name: &str) {
        outbox.record(|id| GroupRoleChangeEvent {
            id,
            group_name: group_name.to_string(),
            created_at: Utc::now(),
        });
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn get_user(&self, user_id: &str) -> StoreResult<User> {
        self.users
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("user".into()))
    }

    async fn find_user_by_identity(
        &self,
        auth_provider_namespace: &str,
        auth_provider_name: &str,
        provider_user_id: &str,
    ) -> StoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|user| {
                user.auth_provider_namespace == auth_provider_namespace
                    && user.auth_provider_name == auth_provider_name
                    && user.provider_user_id == provider_user_id
            })
            .cloned())
    }

    async fn create_user(&self, user: User) -> StoreResult<User> {
        let mut users = self.users.write().await;
        let duplicate = users.values().any(|existing| {
            existing.auth_provider_namespace == user.auth_provider_namespace
                && existing.auth_provider_name == user.auth_provider_name
                && existing.provider_user_id == user.provider_user_id
        });
        if duplicate || users.contains_key(&user.id) {
            return Err(StoreError::Conflict("user exists".into()));
        }
        if user.role.is_privileged() {
            let mut events = self.role_events.write().await;
            events.record(|id| RoleChangeEvent {
                id,
                user_id: user.id.clone(),
                old_role: Role::BASIC,
                new_role: user.role,
                created_at: Utc::now(),
            });
        }
        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let mut items: Vec<User> = self.users.read().await.values().cloned().collect();
        items.sort_by(|a, b| a.username.cmp(&b.username).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn update_user_role(&self, user_id: &str, role: Role) -> StoreResult<UserRoleUpdate> {
        let mut users = self.users.write().await;
        let mut events = self.role_events.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound("user".into()))?;
        let old_role = user.role;
        if old_role == role {
            return Ok(UserRoleUpdate {
                user: user.clone(),
                event: None,
            });
        }
        user.role = role;
        user.updated_at = Utc::now();
        let event = events
            .record(|id| RoleChangeEvent {
                id,
                user_id: user_id.to_string(),
                old_role,
                new_role: role,
                created_at: Utc::now(),
            })
            .clone();
        Ok(UserRoleUpdate {
            user: user.clone(),
            event: Some(event),
        })
    }

    async fn list_groups(
        &self,
        auth_provider_namespace: &str,
        auth_provider_name: &str,
        name_filter: &str,
    ) -> StoreResult<Vec<Group>> {
        let needle = name_filter.to_lowercase();
        let groups = self.groups.read().await;
        let mut items: Vec<Group> = groups
            .values()
            .filter(|group| {
                group.auth_provider_namespace == auth_provider_namespace
                    && group.auth_provider_name == auth_provider_name
                    && group.name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn list_group_ids_for_user(&self, user_id: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .memberships
            .read()
            .await
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_group_ids_for_users(
        &self,
        user_ids: &[String],
    ) -> StoreResult<HashMap<String, Vec<String>>> {
        let memberships = self.memberships.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|user_id| {
                memberships
                    .get(user_id)
                    .filter(|set| !set.is_empty())
                    .map(|set| (user_id.clone(), set.iter().cloned().collect()))
            })
            .collect())
    }

    async fn list_user_ids_in_group(&self, group_id: &str) -> StoreResult<Vec<String>> {
        let memberships = self.memberships.read().await;
        let mut items: Vec<String> = memberships
            .iter()
            .filter(|(_, set)| set.contains(group_id))
            .map(|(user_id, _)| user_id.clone())
            .collect();
        items.sort();
        Ok(items)
    }

    async fn sync_user_groups(&self, sync: GroupSync<'_>) -> StoreResult<MembershipDiff> {
        let mut users = self.users.write().await;
        let mut groups = self.groups.write().await;
        let mut memberships = self.memberships.write().await;

        let user = users
            .get_mut(sync.user_id)
            .ok_or_else(|| StoreError::NotFound("user".into()))?;

        for group in sync.groups {
            groups
                .entry(group.id.clone())
                .and_modify(|existing| {
                    existing.name = group.name.clone();
                    existing.icon_url = group.icon_url.clone();
                })
                .or_insert_with(|| group.clone());
        }

        let reported: BTreeSet<String> = sync.groups.iter().map(|g| g.id.clone()).collect();
        let current = memberships.entry(sync.user_id.to_string()).or_default();
        let in_scope = |group_id: &String| {
            groups.get(group_id).is_some_and(|group| {
                group.auth_provider_namespace == sync.auth_provider_namespace
                    && group.auth_provider_name == sync.auth_provider_name
            })
        };

        let removed: Vec<String> = current
            .iter()
            .filter(|group_id| in_scope(*group_id) && !reported.contains(*group_id))
            .cloned()
            .collect();
        let added: Vec<String> = reported
            .iter()
            .filter(|group_id| !current.contains(*group_id))
            .cloned()
            .collect();

        for group_id in &removed {
            current.remove(group_id);
        }
        current.extend(added.iter().cloned());
        user.groups_last_checked = Some(sync.checked_at);

        Ok(MembershipDiff { added, removed })
    }
}

#[async_trait]
impl RoleAssignmentStore for InMemoryStore {
    async fn list_group_role_assignments(&self) -> StoreResult<Vec<GroupRoleAssignment>> {
        let mut items: Vec<GroupRoleAssignment> =
            self.assignments.read().await.values().cloned().collect();
        items.sort_by(|a, b| a.group_name.cmp(&b.group_name));
        Ok(items)
    }

    async fn get_group_role_assignment(
        &self,
        group_name: &str,
    ) -> StoreResult<GroupRoleAssignment> {
        self.assignments
            .read()
            .await
            .get(group_name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("group role assignment".into()))
    }

    async fn list_group_role_assignments_for_groups(
        &self,
        group_ids: &[String],
    ) -> StoreResult<Vec<GroupRoleAssignment>> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let assignments = self.assignments.read().await;
        Ok(group_ids
            .iter()
            .filter_map(|group_id| assignments.get(group_id).cloned())
            .collect())
    }

    async fn create_group_role_assignment(
        &self,
        assignment: GroupRoleAssignment,
    ) -> StoreResult<GroupRoleAssignment> {
        let mut assignments = self.assignments.write().await;
        let mut events = self.group_role_events.write().await;
        if assignments.contains_key(&assignment.group_name) {
            return Err(StoreError::Conflict("group role assignment exists".into()));
        }
        assignments.insert(assignment.group_name.clone(), assignment.clone());
        Self::record_group_event(&mut events, &assignment.group_name);
        Ok(assignment)
    }

    async fn update_group_role_assignment(
        &self,
        assignment: GroupRoleAssignment,
    ) -> StoreResult<GroupRoleAssignment> {
        let mut assignments = self.assignments.write().await;
        let mut events = self.group_role_events.write().await;
        let existing = assignments
            .get_mut(&assignment.group_name)
            .ok_or_else(|| StoreError::NotFound("group role assignment".into()))?;
        *existing = assignment.clone();
        Self::record_group_event(&mut events, &assignment.group_name);
        Ok(assignment)
    }

    async fn delete_group_role_assignment(&self, group_name: &str) -> StoreResult<()> {
        let mut assignments = self.assignments.write().await;
        let mut events = self.group_role_events.write().await;
        if assignments.remove(group_name).is_none() {
            return Err(StoreError::NotFound("group role assignment".into()));
        }
        Self::record_group_event(&mut events, group_name);
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn record_role_change(
        &self,
        user_id: &str,
        old_role: Role,
        new_role: Role,
    ) -> StoreResult<RoleChangeEvent> {
        let mut events = self.role_events.write().await;
        Ok(events
            .record(|id| RoleChangeEvent {
                id,
                user_id: user_id.to_string(),
                old_role,
                new_role,
                created_at: Utc::now(),
            })
            .clone())
    }

    async fn list_role_change_events_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<RoleChangeEvent>> {
        let events = self.role_events.read().await;
        Ok(events
            .items
            .iter()
            .filter(|event| event.id > after_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_role_change_event(&self, id: i64) -> StoreResult<()> {
        let mut events = self.role_events.write().await;
        let before = events.items.len();
        events.items.retain(|event| event.id != id);
        if events.items.len() == before {
            return Err(StoreError::NotFound("role change event".into()));
        }
        Ok(())
    }

    async fn list_group_role_change_events_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<GroupRoleChangeEvent>> {
        let events = self.group_role_events.read().await;
        Ok(events
            .items
            .iter()
            .filter(|event| event.id > after_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_group_role_change_event(&self, id: i64) -> StoreResult<()> {
        let mut events = self.group_role_events.write().await;
        let before = events.items.len();
        events.items.retain(|event| event.id != id);
        if events.items.len() == before {
            return Err(StoreError::NotFound("group role change event".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayStore for InMemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
