//! In-memory resource store.
//!
//! Objects are keyed by `(namespace, name)`. Workspaces additionally carry a
//! unique index on `(namespace, user_id)` so concurrent creators for the same
//! user race on the index, not on a list-then-create check.
use super::ResourceStore;
use crate::model::{AccessControlRule, McpServer, PowerUserWorkspace};
use crate::store::{StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type ObjectKey = (String, String);

#[derive(Default)]
struct Workspaces {
    by_name: HashMap<ObjectKey, PowerUserWorkspace>,
    /// `(namespace, user_id) -> name`.
    by_user: HashMap<ObjectKey, String>,
}

#[derive(Clone, Default)]
pub struct InMemoryResourceStore {
    workspaces: Arc<RwLock<Workspaces>>,
    rules: Arc<RwLock<HashMap<ObjectKey, AccessControlRule>>>,
    servers: Arc<RwLock<HashMap<ObjectKey, McpServer>>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn workspace_count(&self) -> usize {
        self.workspaces.read().await.by_name.len()
    }

    fn key(namespace: &str, name: &str) -> ObjectKey {
        (namespace.to_string(), name.to_string())
    }

    fn refresh_gauge(workspaces: &Workspaces) {
        metrics::gauge!("gatehouse_workspaces_total").set(workspaces.by_name.len() as f64);
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn create_workspace(
        &self,
        workspace: PowerUserWorkspace,
    ) -> StoreResult<PowerUserWorkspace> {
        let mut workspaces = self.workspaces.write().await;
        let name_key = Self::key(&workspace.namespace, &workspace.name);
        let user_key = Self::key(&workspace.namespace, &workspace.user_id);
        if workspaces.by_user.contains_key(&user_key) {
            return Err(StoreError::Conflict("workspace exists for user".into()));
        }
        if workspaces.by_name.contains_key(&name_key) {
            return Err(StoreError::Conflict("workspace name exists".into()));
        }
        workspaces.by_user.insert(user_key, workspace.name.clone());
        workspaces.by_name.insert(name_key, workspace.clone());
        Self::refresh_gauge(&workspaces);
        Ok(workspace)
    }

    async fn list_workspaces_for_user(
        &self,
        namespace: &str,
        user_id: &str,
    ) -> StoreResult<Vec<PowerUserWorkspace>> {
        let workspaces = self.workspaces.read().await;
        let mut items: Vec<PowerUserWorkspace> = workspaces
            .by_name
            .values()
            .filter(|ws| ws.namespace == namespace && ws.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn update_workspace(
        &self,
        workspace: PowerUserWorkspace,
    ) -> StoreResult<PowerUserWorkspace> {
        let mut workspaces = self.workspaces.write().await;
        let existing = workspaces
            .by_name
            .get_mut(&Self::key(&workspace.namespace, &workspace.name))
            .ok_or_else(|| StoreError::NotFound("workspace".into()))?;
        existing.role = workspace.role;
        existing.status = workspace.status.clone();
        Ok(existing.clone())
    }

    async fn delete_workspace(&self, namespace: &str, name: &str) -> StoreResult<()> {
        let mut workspaces = self.workspaces.write().await;
        let removed = workspaces
            .by_name
            .remove(&Self::key(namespace, name))
            .ok_or_else(|| StoreError::NotFound("workspace".into()))?;
        workspaces
            .by_user
            .remove(&Self::key(namespace, &removed.user_id));
        Self::refresh_gauge(&workspaces);
        Ok(())
    }

    async fn create_access_control_rule(
        &self,
        rule: AccessControlRule,
    ) -> StoreResult<AccessControlRule> {
        let mut rules = self.rules.write().await;
        let key = Self::key(&rule.namespace, &rule.name);
        if rules.contains_key(&key) {
            return Err(StoreError::Conflict("access control rule exists".into()));
        }
        rules.insert(key, rule.clone());
        Ok(rule)
    }

    async fn list_access_control_rules(
        &self,
        namespace: &str,
        workspace_id: &str,
    ) -> StoreResult<Vec<AccessControlRule>> {
        let rules = self.rules.read().await;
        let mut items: Vec<AccessControlRule> = rules
            .values()
            .filter(|rule| rule.namespace == namespace && rule.workspace_id == workspace_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn delete_access_control_rule(&self, namespace: &str, name: &str) -> StoreResult<()> {
        self.rules
            .write()
            .await
            .remove(&Self::key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound("access control rule".into()))
    }

    async fn create_server(&self, server: McpServer) -> StoreResult<McpServer> {
        let mut servers = self.servers.write().await;
        let key = Self::key(&server.namespace, &server.name);
        if servers.contains_key(&key) {
            return Err(StoreError::Conflict("server exists".into()));
        }
        servers.insert(key, server.clone());
        Ok(server)
    }

    async fn list_servers(&self, namespace: &str, workspace_id: &str) -> StoreResult<Vec<McpServer>> {
        let servers = self.servers.read().await;
        let mut items: Vec<McpServer> = servers
            .values()
            .filter(|server| server.namespace == namespace && server.workspace_id == workspace_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn delete_server(&self, namespace: &str, name: &str) -> StoreResult<()> {
        self.servers
            .write()
            .await
            .remove(&Self::key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound("server".into()))
    }
}
