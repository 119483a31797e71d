//! Declarative resource store for workspaces, access-control rules, and
//! MCP servers.
//!
//! # Purpose
//! Reconciliation writes derived objects here. The store is not
//! transactional, so every caller step must be idempotent and retry-safe.
//!
//! # Key invariants
//! - At most one [`PowerUserWorkspace`] per `(namespace, user_id)`; a second
//!   create fails with [`StoreError::Conflict`].
//! - Names are unique per namespace for every kind.
use crate::model::{AccessControlRule, McpServer, PowerUserWorkspace};
use crate::store::StoreResult;
use async_trait::async_trait;

pub mod memory;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn create_workspace(&self, workspace: PowerUserWorkspace)
    -> StoreResult<PowerUserWorkspace>;
    async fn list_workspaces_for_user(
        &self,
        namespace: &str,
        user_id: &str,
    ) -> StoreResult<Vec<PowerUserWorkspace>>;
    /// Replaces `role` and `status`; NotFound when the workspace is gone.
    async fn update_workspace(&self, workspace: PowerUserWorkspace)
    -> StoreResult<PowerUserWorkspace>;
    async fn delete_workspace(&self, namespace: &str, name: &str) -> StoreResult<()>;

    async fn create_access_control_rule(
        &self,
        rule: AccessControlRule,
    ) -> StoreResult<AccessControlRule>;
    async fn list_access_control_rules(
        &self,
        namespace: &str,
        workspace_id: &str,
    ) -> StoreResult<Vec<AccessControlRule>>;
    async fn delete_access_control_rule(&self, namespace: &str, name: &str) -> StoreResult<()>;

    async fn create_server(&self, server: McpServer) -> StoreResult<McpServer>;
    async fn list_servers(&self, namespace: &str, workspace_id: &str)
    -> StoreResult<Vec<McpServer>>;
    async fn delete_server(&self, namespace: &str, name: &str) -> StoreResult<()>;
}
