//! Converges users onto their effective role, one outbox event at a time or
//! as a full resync.
use super::lifecycle::WorkspaceLifecycle;
use super::{ReconcileResult, StoreContext};
use crate::model::{GroupRoleChangeEvent, RoleChangeEvent};
use crate::roles::EffectiveRoleResolver;
use crate::store::{GatewayStore, StoreError};
use gatehouse_authz::Role;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub attempted: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ReconcileDriver {
    store: Arc<dyn GatewayStore>,
    resolver: EffectiveRoleResolver,
    lifecycle: WorkspaceLifecycle,
}

impl ReconcileDriver {
    pub fn new(
        store: Arc<dyn GatewayStore>,
        resolver: EffectiveRoleResolver,
        lifecycle: WorkspaceLifecycle,
    ) -> Self {
        Self {
            store,
            resolver,
            lifecycle,
        }
    }

    /// Effective role as of now. A user that no longer exists resolves to
    /// Basic so that its workspaces are torn down.
    pub async fn current_effective_role(&self, user_id: &str) -> ReconcileResult<Role> {
        let user = match self.store.get_user(user_id).await {
            Ok(user) => user,
            Err(StoreError::NotFound(_)) => return Ok(Role::BASIC),
            Err(err) => return Err(err).step(format!("load user {user_id}")),
        };
        self.resolver
            .resolve_for_user(&user)
            .await
            .step(format!("resolve role of user {user_id}"))
    }

    /// Converges the user's workspaces onto `effective`.
    ///
    /// | effective          | workspace | action                       |
    /// |--------------------|-----------|------------------------------|
    /// | below PowerUser    | any       | delete all                   |
    /// | PowerUser or above | none      | create, then default rule    |
    /// | PowerUser or above | same role | ensure default rule          |
    /// | PowerUser or above | differs   | update role (demote cleanup) |
    pub async fn reconcile_to_effective_role(
        &self,
        user_id: &str,
        effective: Role,
    ) -> ReconcileResult<()> {
        if !effective.is_privileged() {
            let deleted = self.lifecycle.delete_workspaces_for_user(user_id).await?;
            if deleted > 0 {
                tracing::info!(user_id, deleted, "revoked workspaces");
            }
            return Ok(());
        }

        let workspaces = self.lifecycle.list_workspaces(user_id).await?;
        let Some(workspace) = workspaces.into_iter().next() else {
            let workspace = self.lifecycle.create_workspace(user_id, effective).await?;
            self.lifecycle
                .create_default_access_control_rule(workspace)
                .await?;
            return Ok(());
        };

        if workspace.role == effective {
            self.lifecycle
                .create_default_access_control_rule(workspace)
                .await?;
        } else {
            self.lifecycle
                .update_workspace_role(workspace, effective)
                .await?;
        }
        Ok(())
    }

    /// Recomputes the user's role, converges, then deletes the event.
    /// On error the event stays in the outbox for the next pass.
    #[tracing::instrument(
        skip_all,
        fields(event_id = event.id, user_id = %event.user_id, old_role = %event.old_role, new_role = %event.new_role)
    )]
    pub async fn handle_role_change(&self, event: &RoleChangeEvent) -> ReconcileResult<()> {
        let result = self.apply_role_change(event).await;
        record_event("role", &result);
        result
    }

    async fn apply_role_change(&self, event: &RoleChangeEvent) -> ReconcileResult<()> {
        let effective = self.current_effective_role(&event.user_id).await?;
        self.reconcile_to_effective_role(&event.user_id, effective)
            .await?;
        ignore_not_found(self.store.delete_role_change_event(event.id).await)
            .step(format!("delete role change event {}", event.id))?;
        tracing::debug!(effective = %effective, "applied role change");
        Ok(())
    }

    /// Reconciles every current member of the group.
    ///
    /// A failure for one member is logged and counted; the rest are still
    /// attempted and the event is consumed. Only failing to list the members
    /// (or to delete the event) keeps the event for retry.
    #[tracing::instrument(skip_all, fields(event_id = event.id, group = %event.group_name))]
    pub async fn handle_group_role_change(
        &self,
        event: &GroupRoleChangeEvent,
    ) -> ReconcileResult<ReconcileSummary> {
        let result = self.apply_group_role_change(event).await;
        record_event("group_role", &result);
        result
    }

    async fn apply_group_role_change(
        &self,
        event: &GroupRoleChangeEvent,
    ) -> ReconcileResult<ReconcileSummary> {
        let user_ids = self
            .store
            .list_user_ids_in_group(&event.group_name)
            .await
            .step(format!("list members of group {}", event.group_name))?;

        let summary = self.reconcile_users(&user_ids).await;

        ignore_not_found(self.store.delete_group_role_change_event(event.id).await)
            .step(format!("delete group role change event {}", event.id))?;
        tracing::debug!(
            attempted = summary.attempted,
            failed = summary.failed,
            "applied group role change"
        );
        Ok(summary)
    }
}

impl ReconcileDriver {
    /// Converges every stored user without consulting the outbox.
    ///
    /// Run once when the controller starts: the outbox only describes changes,
    /// so resources missing for a reason other than a pending event (a fresh
    /// resource store, a user created privileged) are rebuilt here.
    #[tracing::instrument(skip_all)]
    pub async fn resync_all(&self) -> ReconcileResult<ReconcileSummary> {
        let user_ids: Vec<String> = self
            .store
            .list_users()
            .await
            .step("list users")?
            .into_iter()
            .map(|user| user.id)
            .collect();
        let summary = self.reconcile_users(&user_ids).await;
        tracing::info!(
            attempted = summary.attempted,
            failed = summary.failed,
            "resynced all users"
        );
        Ok(summary)
    }

    async fn reconcile_users(&self, user_ids: &[String]) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        for user_id in user_ids {
            summary.attempted += 1;
            let outcome = match self.current_effective_role(user_id).await {
                Ok(effective) => self.reconcile_to_effective_role(user_id, effective).await,
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                summary.failed += 1;
                metrics::counter!("gatehouse_reconcile_user_failures_total").increment(1);
                tracing::warn!(user_id = %user_id, error = %err, "failed to reconcile user");
            }
        }
        summary
    }
}

fn record_event<T>(kind: &'static str, result: &ReconcileResult<T>) {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!("gatehouse_reconcile_events_total", "kind" => kind, "outcome" => outcome)
        .increment(1);
}

fn ignore_not_found(result: Result<(), StoreError>) -> Result<(), StoreError> {
    match result {
        Err(StoreError::NotFound(_)) => Ok(()),
        other => other,
    }
}
