//! HTTP API request/response types.
//!
//! # Purpose
//! Defines the payload shapes for the gateway REST API and OpenAPI schema
//! generation. Roles travel as their integer bit value.
use crate::model::{Group, GroupRoleAssignment, User};
use chrono::{DateTime, Utc};
use gatehouse_authz::Role;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
    pub storage: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

/// Role bits are validated by the handler, so unknown bits produce a 400
/// rather than a body rejection.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GroupRoleAssignmentCreateRequest {
    pub group_name: String,
    pub role: u32,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GroupRoleAssignmentUpdateRequest {
    pub role: u32,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct GroupRoleAssignmentListResponse {
    pub items: Vec<GroupRoleAssignment>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct GroupListResponse {
    pub items: Vec<Group>,
}

#[derive(Debug, Deserialize, Default)]
pub struct GroupSearchQuery {
    #[serde(default)]
    pub name: String,
}

/// A user record plus the role derived from its group memberships.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    #[schema(value_type = u32)]
    pub role: Role,
    #[schema(value_type = u32)]
    pub effective_role: Role,
    pub auth_provider_namespace: String,
    pub auth_provider_name: String,
    pub groups_last_checked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserResponse {
    pub fn from_user(user: User, effective_role: Role) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            effective_role,
            auth_provider_namespace: user.auth_provider_namespace,
            auth_provider_name: user.auth_provider_name,
            groups_last_checked: user.groups_last_checked,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserListResponse {
    pub items: Vec<UserResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserRoleUpdateRequest {
    pub role: u32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user: UserResponse,
    pub group_ids: Vec<String>,
}
