//! Store-backed effective-role resolution.
//!
//! Loads the assignments that apply to one user (or many users at once) and
//! folds them with the pure resolver from `gatehouse_authz`.
use crate::model::User;
use crate::store::{GatewayStore, StoreResult};
use gatehouse_authz::{GroupRoleMap, Role, resolve_effective_role, resolve_effective_roles_bulk};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct EffectiveRoleResolver {
    store: Arc<dyn GatewayStore>,
}

impl EffectiveRoleResolver {
    pub fn new(store: Arc<dyn GatewayStore>) -> Self {
        Self { store }
    }

    /// Direct role merged with every assignment on `group_ids`.
    ///
    /// # Errors
    /// Propagates store failures; the caller decides whether to degrade.
    pub async fn resolve_user_effective_role(
        &self,
        user: &User,
        group_ids: &[String],
    ) -> StoreResult<Role> {
        if group_ids.is_empty() {
            return Ok(resolve_effective_role(user.role, []));
        }
        let assignments = self
            .store
            .list_group_role_assignments_for_groups(group_ids)
            .await?;
        Ok(resolve_effective_role(
            user.role,
            assignments.into_iter().map(|assignment| assignment.role),
        ))
    }

    /// Loads memberships itself and resolves one user.
    pub async fn resolve_for_user(&self, user: &User) -> StoreResult<Role> {
        let group_ids = self.store.list_group_ids_for_user(&user.id).await?;
        self.resolve_user_effective_role(user, &group_ids).await
    }

    /// One assignment query for the union of all groups, then a per-user
    /// fold. When that query fails every user gets their direct role.
    pub async fn resolve_user_effective_roles_bulk(
        &self,
        users: &[User],
        memberships: &HashMap<String, Vec<String>>,
    ) -> HashMap<String, Role> {
        let mut group_ids: Vec<String> = memberships.values().flatten().cloned().collect();
        group_ids.sort();
        group_ids.dedup();

        let group_roles: GroupRoleMap = match self
            .store
            .list_group_role_assignments_for_groups(&group_ids)
            .await
        {
            Ok(assignments) => assignments
                .into_iter()
                .map(|assignment| (assignment.group_name, assignment.role))
                .collect(),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    users = users.len(),
                    "failed to load group role assignments; using direct roles"
                );
                return users
                    .iter()
                    .map(|user| (user.id.clone(), user.role))
                    .collect();
            }
        };

        resolve_effective_roles_bulk(
            users.iter().map(|user| (user.id.as_str(), user.role)),
            memberships,
            &group_roles,
        )
    }
}
