//! Workspace and access-control-rule lifecycle.
//!
//! Every operation here is a sequence of independent resource-store calls,
//! ordered so that a failure part-way leaves state that the next attempt
//! repairs. Not-found on delete counts as success.
use super::{ReconcileResult, StoreContext};
use crate::model::{AccessControlRule, PowerUserWorkspace};
use crate::resources::ResourceStore;
use crate::store::{StoreError, StoreResult};
use gatehouse_authz::Role;
use std::sync::Arc;

#[derive(Clone)]
pub struct WorkspaceLifecycle {
    resources: Arc<dyn ResourceStore>,
    namespace: String,
}

impl WorkspaceLifecycle {
    pub fn new(resources: Arc<dyn ResourceStore>, namespace: impl Into<String>) -> Self {
        Self {
            resources,
            namespace: namespace.into(),
        }
    }

    pub async fn list_workspaces(&self, user_id: &str) -> ReconcileResult<Vec<PowerUserWorkspace>> {
        self.resources
            .list_workspaces_for_user(&self.namespace, user_id)
            .await
            .step(format!("list workspaces for user {user_id}"))
    }

    /// Returns the user's workspace, creating it at `role` when absent.
    ///
    /// Losing a create race to a concurrent creator surfaces as a conflict
    /// from the store's per-user uniqueness; the winner's workspace is then
    /// returned.
    pub async fn create_workspace(
        &self,
        user_id: &str,
        role: Role,
    ) -> ReconcileResult<PowerUserWorkspace> {
        if let Some(existing) = self.list_workspaces(user_id).await?.into_iter().next() {
            return Ok(existing);
        }
        let workspace = PowerUserWorkspace::new(self.namespace.clone(), user_id, role);
        match self.resources.create_workspace(workspace).await {
            Ok(created) => {
                tracing::info!(workspace = %created.name, role = %role, "created workspace");
                Ok(created)
            }
            Err(StoreError::Conflict(_)) => {
                tracing::debug!("workspace created concurrently; reusing it");
                self.list_workspaces(user_id)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| StoreError::NotFound("workspace".into()))
                    .step(format!("reload workspace for user {user_id}"))
            }
            Err(err) => Err(err).step(format!("create workspace for user {user_id}")),
        }
    }

    /// Moves an existing workspace to `role`.
    ///
    /// Crossing from PowerUserPlus or above down to exactly PowerUser strips
    /// the generated rule privileges first: owned rules and servers are
    /// deleted and the generated flag is cleared in the same write that
    /// lowers the role. Cleanup precedes the role write so a retry after a
    /// partial failure still sees the old role and repeats it.
    pub async fn update_workspace_role(
        &self,
        mut workspace: PowerUserWorkspace,
        role: Role,
    ) -> ReconcileResult<PowerUserWorkspace> {
        let demoted = workspace.role.tier_rank() >= Role::POWER_USER_PLUS.tier_rank()
            && role.is_exact_base_role(Role::POWER_USER);
        if demoted {
            self.demote_to_power_user(&workspace).await?;
            workspace.status.default_access_control_rule_generated = false;
        }
        let previous = workspace.role;
        workspace.role = role;
        let updated = self
            .resources
            .update_workspace(workspace)
            .await
            .step("update workspace role")?;
        tracing::info!(
            workspace = %updated.name,
            old_role = %previous,
            new_role = %role,
            demoted,
            "updated workspace role"
        );
        self.create_default_access_control_rule(updated).await
    }

    /// Deletes every rule and server owned by the workspace.
    pub async fn demote_to_power_user(&self, workspace: &PowerUserWorkspace) -> ReconcileResult<()> {
        let rules = self
            .resources
            .list_access_control_rules(&self.namespace, &workspace.name)
            .await
            .step(format!("list rules of workspace {}", workspace.name))?;
        for rule in rules {
            ignore_not_found(
                self.resources
                    .delete_access_control_rule(&self.namespace, &rule.name)
                    .await,
            )
            .step(format!("delete rule {}", rule.name))?;
        }
        let servers = self
            .resources
            .list_servers(&self.namespace, &workspace.name)
            .await
            .step(format!("list servers of workspace {}", workspace.name))?;
        for server in servers {
            ignore_not_found(
                self.resources
                    .delete_server(&self.namespace, &server.name)
                    .await,
            )
            .step(format!("delete server {}", server.name))?;
        }
        Ok(())
    }

    /// Removes all of the user's workspaces together with what they own.
    /// Returns the number of workspaces deleted.
    pub async fn delete_workspaces_for_user(&self, user_id: &str) -> ReconcileResult<usize> {
        let workspaces = self.list_workspaces(user_id).await?;
        let count = workspaces.len();
        for workspace in workspaces {
            self.demote_to_power_user(&workspace).await?;
            ignore_not_found(
                self.resources
                    .delete_workspace(&self.namespace, &workspace.name)
                    .await,
            )
            .step(format!("delete workspace {}", workspace.name))?;
            tracing::info!(workspace = %workspace.name, "deleted workspace");
        }
        Ok(count)
    }

    /// Ensures the wildcard rule exists for workspaces above PowerUser.
    ///
    /// No-op at PowerUser or when the status flag is already set. An existing
    /// generated rule (left by an attempt that failed before setting the
    /// flag) is adopted instead of duplicated.
    pub async fn create_default_access_control_rule(
        &self,
        mut workspace: PowerUserWorkspace,
    ) -> ReconcileResult<PowerUserWorkspace> {
        if !workspace.role.has_generated_acr_tier()
            || workspace.status.default_access_control_rule_generated
        {
            return Ok(workspace);
        }

        let rules = self
            .resources
            .list_access_control_rules(&self.namespace, &workspace.name)
            .await
            .step(format!("list rules of workspace {}", workspace.name))?;
        if !rules.iter().any(|rule| rule.generated) {
            let rule = AccessControlRule::default_for(&workspace);
            self.resources
                .create_access_control_rule(rule)
                .await
                .step(format!("create default rule for workspace {}", workspace.name))?;
        }

        workspace.status.default_access_control_rule_generated = true;
        self.resources
            .update_workspace(workspace)
            .await
            .step("mark default rule generated")
    }
}

fn ignore_not_found(result: StoreResult<()>) -> StoreResult<()> {
    match result {
        Err(StoreError::NotFound(_)) => Ok(()),
        other => other,
    }
}
