//! Declarative resources owned by privileged users.
//!
//! Workspaces exist only for users whose effective tier is PowerUser or
//! higher. Access-control rules and MCP servers hang off a workspace through
//! `workspace_id` (the workspace's `name`).
use chrono::{DateTime, Utc};
use gatehouse_authz::Role;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceStatus {
    pub default_access_control_rule_generated: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PowerUserWorkspace {
    pub namespace: String,
    pub name: String,
    pub user_id: String,
    pub role: Role,
    pub status: WorkspaceStatus,
    pub created_at: DateTime<Utc>,
}

impl PowerUserWorkspace {
    pub fn new(namespace: impl Into<String>, user_id: impl Into<String>, role: Role) -> Self {
        Self {
            namespace: namespace.into(),
            name: format!("puw-{}", uuid::Uuid::new_v4().simple()),
            user_id: user_id.into(),
            role,
            status: WorkspaceStatus::default(),
            created_at: Utc::now(),
        }
    }
}

/// Subject or resource reference inside a rule.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RuleTarget {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl RuleTarget {
    pub fn wildcard_selector() -> Self {
        Self {
            kind: "selector".to_string(),
            id: "*".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AccessControlRule {
    pub namespace: String,
    pub name: String,
    pub workspace_id: String,
    pub generated: bool,
    pub subjects: Vec<RuleTarget>,
    pub resources: Vec<RuleTarget>,
}

impl AccessControlRule {
    /// The generated rule: every subject may reach every resource in the
    /// workspace.
    pub fn default_for(workspace: &PowerUserWorkspace) -> Self {
        Self {
            namespace: workspace.namespace.clone(),
            name: format!("acr-{}", uuid::Uuid::new_v4().simple()),
            workspace_id: workspace.name.clone(),
            generated: true,
            subjects: vec![RuleTarget::wildcard_selector()],
            resources: vec![RuleTarget::wildcard_selector()],
        }
    }
}

/// Multi-user MCP server published from a workspace.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct McpServer {
    pub namespace: String,
    pub name: String,
    pub workspace_id: String,
    pub display_name: String,
}
