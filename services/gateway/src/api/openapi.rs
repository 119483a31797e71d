//! OpenAPI schema aggregation for the gateway API.
use crate::api::{
    assignments, groups, system,
    types::{
        ErrorResponse, GroupListResponse, GroupRoleAssignmentCreateRequest,
        GroupRoleAssignmentListResponse, GroupRoleAssignmentUpdateRequest, HealthStatus,
        MeResponse, UserListResponse, UserResponse, UserRoleUpdateRequest,
    },
    users,
};
use crate::model::{Group, GroupRoleAssignment};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "gatehouse-gateway",
        version = "v1",
        description = "Gatehouse gateway role and access API"
    ),
    paths(
        system::healthz,
        assignments::list_assignments,
        assignments::create_assignment,
        assignments::get_assignment,
        assignments::update_assignment,
        assignments::delete_assignment,
        groups::list_groups,
        users::list_users,
        users::get_user,
        users::update_user_role,
        users::me
    ),
    components(schemas(
        HealthStatus,
        ErrorResponse,
        Group,
        GroupListResponse,
        GroupRoleAssignment,
        GroupRoleAssignmentCreateRequest,
        GroupRoleAssignmentUpdateRequest,
        GroupRoleAssignmentListResponse,
        UserResponse,
        UserListResponse,
        UserRoleUpdateRequest,
        MeResponse
    )),
    tags(
        (name = "system", description = "Health endpoints"),
        (name = "assignments", description = "Group role assignments"),
        (name = "groups", description = "Identity provider group search"),
        (name = "users", description = "Users and effective roles")
    )
)]
pub struct ApiDoc;
