#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use gatehouse_authz::Role;
use gateway::app::{assemble, build_router};
use gateway::auth::provider::HttpGroupProvider;
use gateway::config::GatewayConfig;
use gateway::model::{
    AccessControlRule, Group, GroupRoleAssignment, GroupRoleChangeEvent, McpServer,
    MembershipDiff, PowerUserWorkspace, RoleChangeEvent, User,
};
use gateway::reconcile::ReconcileController;
use gateway::resources::ResourceStore;
use gateway::resources::memory::InMemoryResourceStore;
use gateway::store::memory::InMemoryStore;
use gateway::store::{
    EventStore, GatewayStore, GroupSync, IdentityStore, RoleAssignmentStore, StoreError,
    StoreResult, UserRoleUpdate,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const OWNER_EMAIL: &str = "owner@example.com";
pub const ADMIN_EMAIL: &str = "admin@example.com";

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

/// Identity a request is sent as.
#[derive(Debug, Clone)]
pub struct TestCaller {
    pub user_id: String,
    pub email: String,
    pub provider_url: Option<String>,
    pub access_token: Option<String>,
}

impl TestCaller {
    pub fn new(user_id: &str, email: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            email: email.to_string(),
            provider_url: None,
            access_token: None,
        }
    }

    pub fn owner() -> Self {
        Self::new("sub-owner", OWNER_EMAIL)
    }

    pub fn admin() -> Self {
        Self::new("sub-admin", ADMIN_EMAIL)
    }

    pub fn basic(user_id: &str) -> Self {
        Self::new(user_id, &format!("{user_id}@example.com"))
    }

    pub fn with_provider(mut self, url: &str, token: &str) -> Self {
        self.provider_url = Some(url.to_string());
        self.access_token = Some(token.to_string());
        self
    }

    pub fn request(&self, method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-gatehouse-provider-namespace", "default")
            .header("x-gatehouse-provider-name", "okta")
            .header("x-gatehouse-user-id", &self.user_id)
            .header("x-gatehouse-username", &self.user_id)
            .header("x-gatehouse-email", &self.email)
            .header("x-request-id", format!("req-{}", self.user_id));
        if let Some(url) = &self.provider_url {
            builder = builder.header("x-gatehouse-provider-url", url);
        }
        if let Some(token) = &self.access_token {
            builder = builder.header("x-gatehouse-access-token", token);
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        }
    }
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        owner_emails: vec![OWNER_EMAIL.to_string()],
        admin_emails: vec![ADMIN_EMAIL.to_string()],
        group_refresh: Duration::from_secs(600),
        ..GatewayConfig::default()
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<FlakyStore>,
    pub resources: Arc<FlakyResources>,
    pub controller: ReconcileController,
}

pub fn test_app() -> TestApp {
    test_app_with(test_config())
}

pub fn test_app_with(config: GatewayConfig) -> TestApp {
    let store = Arc::new(FlakyStore::new(InMemoryStore::new()));
    let resources = Arc::new(FlakyResources::new(InMemoryResourceStore::new()));
    let provider = HttpGroupProvider::new(Duration::from_secs(2)).expect("provider client");
    let (state, controller) = assemble(
        &config,
        store.clone(),
        resources.clone(),
        Arc::new(provider),
    );
    TestApp {
        router: build_router(state),
        store,
        resources,
        controller,
    }
}

/// Starts a fake identity provider serving the two group endpoints.
pub async fn spawn_provider(
    search: Vec<serde_json::Value>,
    user_groups: Vec<serde_json::Value>,
) -> String {
    let app = Router::new()
        .route(
            "/obot-list-auth-groups",
            axum::routing::get(move || {
                let search = search.clone();
                async move { axum::Json(search) }
            }),
        )
        .route(
            "/obot-list-user-auth-groups",
            axum::routing::get(move || {
                let user_groups = user_groups.clone();
                async move { axum::Json(user_groups) }
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind provider");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    format!("http://{addr}")
}

/// A provider URL nothing listens on.
pub async fn dead_provider_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}

pub fn group(id: &str, name: &str) -> Group {
    Group {
        id: id.to_string(),
        auth_provider_namespace: "default".to_string(),
        auth_provider_name: "okta".to_string(),
        name: name.to_string(),
        icon_url: None,
    }
}

pub async fn seed_user(store: &FlakyStore, name: &str, role: Role) -> User {
    store
        .create_user(User::new(
            name,
            format!("{name}@example.com"),
            role,
            "default",
            "okta",
            format!("sub-{name}"),
        ))
        .await
        .expect("seed user")
}

fn injected() -> StoreError {
    StoreError::Unexpected(anyhow::anyhow!("injected failure"))
}

/// In-memory relational store with switchable failures.
pub struct FlakyStore {
    pub inner: InMemoryStore,
    fail_assignment_lookup: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            fail_assignment_lookup: AtomicBool::new(false),
        }
    }

    /// Makes `list_group_role_assignments_for_groups` fail.
    pub fn fail_assignment_lookup(&self, fail: bool) {
        self.fail_assignment_lookup.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityStore for FlakyStore {
    async fn get_user(&self, user_id: &str) -> StoreResult<User> {
        self.inner.get_user(user_id).await
    }

    async fn find_user_by_identity(
        &self,
        auth_provider_namespace: &str,
        auth_provider_name: &str,
        provider_user_id: &str,
    ) -> StoreResult<Option<User>> {
        self.inner
            .find_user_by_identity(auth_provider_namespace, auth_provider_name, provider_user_id)
            .await
    }

    async fn create_user(&self, user: User) -> StoreResult<User> {
        self.inner.create_user(user).await
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.inner.list_users().await
    }

    async fn update_user_role(&self, user_id: &str, role: Role) -> StoreResult<UserRoleUpdate> {
        self.inner.update_user_role(user_id, role).await
    }

    async fn list_groups(
        &self,
        auth_provider_namespace: &str,
        auth_provider_name: &str,
        name_filter: &str,
    ) -> StoreResult<Vec<Group>> {
        self.inner
            .list_groups(auth_provider_namespace, auth_provider_name, name_filter)
            .await
    }

    async fn list_group_ids_for_user(&self, user_id: &str) -> StoreResult<Vec<String>> {
        self.inner.list_group_ids_for_user(user_id).await
    }

    async fn list_group_ids_for_users(
        &self,
        user_ids: &[String],
    ) -> StoreResult<HashMap<String, Vec<String>>> {
        self.inner.list_group_ids_for_users(user_ids).await
    }

    async fn list_user_ids_in_group(&self, group_id: &str) -> StoreResult<Vec<String>> {
        self.inner.list_user_ids_in_group(group_id).await
    }

    async fn sync_user_groups(&self, sync: GroupSync<'_>) -> StoreResult<MembershipDiff> {
        self.inner.sync_user_groups(sync).await
    }
}

#[async_trait]
impl RoleAssignmentStore for FlakyStore {
    async fn list_group_role_assignments(&self) -> StoreResult<Vec<GroupRoleAssignment>> {
        self.inner.list_group_role_assignments().await
    }

    async fn get_group_role_assignment(
        &self,
        group_name: &str,
    ) -> StoreResult<GroupRoleAssignment> {
        self.inner.get_group_role_assignment(group_name).await
    }

    async fn list_group_role_assignments_for_groups(
        &self,
        group_ids: &[String],
    ) -> StoreResult<Vec<GroupRoleAssignment>> {
        if self.fail_assignment_lookup.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner
            .list_group_role_assignments_for_groups(group_ids)
            .await
    }

    async fn create_group_role_assignment(
        &self,
        assignment: GroupRoleAssignment,
    ) -> StoreResult<GroupRoleAssignment> {
        self.inner.create_group_role_assignment(assignment).await
    }

    async fn update_group_role_assignment(
        &self,
        assignment: GroupRoleAssignment,
    ) -> StoreResult<GroupRoleAssignment> {
        self.inner.update_group_role_assignment(assignment).await
    }

    async fn delete_group_role_assignment(&self, group_name: &str) -> StoreResult<()> {
        self.inner.delete_group_role_assignment(group_name).await
    }
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn record_role_change(
        &self,
        user_id: &str,
        old_role: Role,
        new_role: Role,
    ) -> StoreResult<RoleChangeEvent> {
        self.inner
            .record_role_change(user_id, old_role, new_role)
            .await
    }

    async fn list_role_change_events_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<RoleChangeEvent>> {
        self.inner.list_role_change_events_after(after_id, limit).await
    }

    async fn delete_role_change_event(&self, id: i64) -> StoreResult<()> {
        self.inner.delete_role_change_event(id).await
    }

    async fn list_group_role_change_events_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<GroupRoleChangeEvent>> {
        self.inner
            .list_group_role_change_events_after(after_id, limit)
            .await
    }

    async fn delete_group_role_change_event(&self, id: i64) -> StoreResult<()> {
        self.inner.delete_group_role_change_event(id).await
    }
}

#[async_trait]
impl GatewayStore for FlakyStore {
    async fn health_check(&self) -> StoreResult<()> {
        self.inner.health_check().await
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// In-memory resource store that fails every workspace call for chosen users.
pub struct FlakyResources {
    pub inner: InMemoryResourceStore,
    failing_users: Mutex<HashSet<String>>,
}

impl FlakyResources {
    pub fn new(inner: InMemoryResourceStore) -> Self {
        Self {
            inner,
            failing_users: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_user(&self, user_id: &str) {
        self.failing_users
            .lock()
            .expect("lock")
            .insert(user_id.to_string());
    }

    pub fn heal_user(&self, user_id: &str) {
        self.failing_users.lock().expect("lock").remove(user_id);
    }

    fn check(&self, user_id: &str) -> StoreResult<()> {
        if self.failing_users.lock().expect("lock").contains(user_id) {
            return Err(injected());
        }
        Ok(())
    }

    pub async fn workspace_for(&self, user_id: &str) -> Option<PowerUserWorkspace> {
        self.inner
            .list_workspaces_for_user("default", user_id)
            .await
            .expect("list workspaces")
            .into_iter()
            .next()
    }
}

#[async_trait]
impl ResourceStore for FlakyResources {
    async fn create_workspace(
        &self,
        workspace: PowerUserWorkspace,
    ) -> StoreResult<PowerUserWorkspace> {
        self.check(&workspace.user_id)?;
        self.inner.create_workspace(workspace).await
    }

    async fn list_workspaces_for_user(
        &self,
        namespace: &str,
        user_id: &str,
    ) -> StoreResult<Vec<PowerUserWorkspace>> {
        self.check(user_id)?;
        self.inner.list_workspaces_for_user(namespace, user_id).await
    }

    async fn update_workspace(
        &self,
        workspace: PowerUserWorkspace,
    ) -> StoreResult<PowerUserWorkspace> {
        self.check(&workspace.user_id)?;
        self.inner.update_workspace(workspace).await
    }

    async fn delete_workspace(&self, namespace: &str, name: &str) -> StoreResult<()> {
        self.inner.delete_workspace(namespace, name).await
    }

    async fn create_access_control_rule(
        &self,
        rule: AccessControlRule,
    ) -> StoreResult<AccessControlRule> {
        self.inner.create_access_control_rule(rule).await
    }

    async fn list_access_control_rules(
        &self,
        namespace: &str,
        workspace_id: &str,
    ) -> StoreResult<Vec<AccessControlRule>> {
        self.inner
            .list_access_control_rules(namespace, workspace_id)
            .await
    }

    async fn delete_access_control_rule(&self, namespace: &str, name: &str) -> StoreResult<()> {
        self.inner.delete_access_control_rule(namespace, name).await
    }

    async fn create_server(&self, server: McpServer) -> StoreResult<McpServer> {
        self.inner.create_server(server).await
    }

    async fn list_servers(
        &self,
        namespace: &str,
        workspace_id: &str,
    ) -> StoreResult<Vec<McpServer>> {
        self.inner.list_servers(namespace, workspace_id).await
    }

    async fn delete_server(&self, namespace: &str, name: &str) -> StoreResult<()> {
        self.inner.delete_server(namespace, name).await
    }
}
