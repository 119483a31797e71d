//! Group-role assignment API handlers.
//!
//! # Purpose
//! CRUD over admin-authored group → role mappings. Every successful mutation
//! has already written a group outbox event in the same store transaction;
//! the handler then fires the reconcile trigger.
//!
//! # Security considerations
//! - Reads need Admin or Auditor; writes need Admin.
//! - Only Owners may create, change, or remove assignments that carry the
//!   Owner or Auditor bit, in either the old or the new value.
use crate::api::error::{ApiError, api_conflict, api_internal, api_not_found, api_validation_error};
use crate::api::types::{
    GroupRoleAssignmentCreateRequest, GroupRoleAssignmentListResponse,
    GroupRoleAssignmentUpdateRequest,
};
use crate::api::{ensure_can_grant, parse_assignable_role, require_admin, require_admin_reader};
use crate::app::AppState;
use crate::auth::context::Caller;
use crate::model::GroupRoleAssignment;
use crate::store::StoreError;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

#[utoipa::path(
    get,
    path = "/api/group-role-assignments",
    tag = "assignments",
    responses(
        (status = 200, description = "List group role assignments", body = GroupRoleAssignmentListResponse),
        (status = 401, description = "Missing identity", body = crate::api::types::ErrorResponse),
        (status = 403, description = "Caller is not an admin or auditor", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn list_assignments(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<GroupRoleAssignmentListResponse>, ApiError> {
    require_admin_reader(&caller)?;
    let items = state
        .store
        .list_group_role_assignments()
        .await
        .map_err(|err| api_internal("failed to list group role assignments", &err))?;
    Ok(Json(GroupRoleAssignmentListResponse { items }))
}

#[utoipa::path(
    post,
    path = "/api/group-role-assignments",
    tag = "assignments",
    request_body = GroupRoleAssignmentCreateRequest,
    responses(
        (status = 201, description = "Assignment created", body = GroupRoleAssignment),
        (status = 400, description = "Invalid role", body = crate::api::types::ErrorResponse),
        (status = 403, description = "Caller may not grant this role", body = crate::api::types::ErrorResponse),
        (status = 409, description = "Assignment already exists", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn create_assignment(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<GroupRoleAssignmentCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&caller)?;
    let group_name = body.group_name.trim().to_string();
    if group_name.is_empty() {
        return Err(api_validation_error("groupName is required")
            .with_request_id(caller.context.request_id.clone()));
    }
    let role = parse_assignable_role(&caller, body.role)?;
    ensure_can_grant(&caller, role)?;

    let assignment = GroupRoleAssignment {
        group_name,
        role,
        description: body.description,
    };
    match state.store.create_group_role_assignment(assignment).await {
        Ok(created) => {
            tracing::info!(group = %created.group_name, role = %created.role, "created group role assignment");
            state.trigger.fire();
            Ok((StatusCode::CREATED, Json(created)))
        }
        Err(StoreError::Conflict(_)) => Err(api_conflict(
            "already_exists",
            "group role assignment already exists",
        )
        .with_request_id(caller.context.request_id.clone())),
        Err(err) => Err(api_internal("failed to create group role assignment", &err)),
    }
}

#[utoipa::path(
    get,
    path = "/api/group-role-assignments/{group_name}",
    tag = "assignments",
    params(
        ("group_name" = String, Path, description = "Group id, percent-encoded")
    ),
    responses(
        (status = 200, description = "Assignment", body = GroupRoleAssignment),
        (status = 404, description = "Assignment not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_assignment(
    Path(group_name): Path<String>,
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<GroupRoleAssignment>, ApiError> {
    require_admin_reader(&caller)?;
    load(&state, &caller, &group_name).await.map(Json)
}

#[utoipa::path(
    put,
    path = "/api/group-role-assignments/{group_name}",
    tag = "assignments",
    params(
        ("group_name" = String, Path, description = "Group id, percent-encoded")
    ),
    request_body = GroupRoleAssignmentUpdateRequest,
    responses(
        (status = 200, description = "Assignment updated", body = GroupRoleAssignment),
        (status = 400, description = "Invalid role", body = crate::api::types::ErrorResponse),
        (status = 403, description = "Caller may not grant this role", body = crate::api::types::ErrorResponse),
        (status = 404, description = "Assignment not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn update_assignment(
    Path(group_name): Path<String>,
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<GroupRoleAssignmentUpdateRequest>,
) -> Result<Json<GroupRoleAssignment>, ApiError> {
    require_admin(&caller)?;
    let role = parse_assignable_role(&caller, body.role)?;
    ensure_can_grant(&caller, role)?;
    let existing = load(&state, &caller, &group_name).await?;
    ensure_can_grant(&caller, existing.role)?;

    let assignment = GroupRoleAssignment {
        group_name,
        role,
        description: body.description,
    };
    match state.store.update_group_role_assignment(assignment).await {
        Ok(updated) => {
            tracing::info!(
                group = %updated.group_name,
                old_role = %existing.role,
                new_role = %updated.role,
                "updated group role assignment"
            );
            state.trigger.fire();
            Ok(Json(updated))
        }
        Err(StoreError::NotFound(_)) => Err(not_found(&caller)),
        Err(err) => Err(api_internal("failed to update group role assignment", &err)),
    }
}

#[utoipa::path(
    delete,
    path = "/api/group-role-assignments/{group_name}",
    tag = "assignments",
    params(
        ("group_name" = String, Path, description = "Group id, percent-encoded")
    ),
    responses(
        (status = 204, description = "Assignment deleted"),
        (status = 403, description = "Caller may not revoke this role", body = crate::api::types::ErrorResponse),
        (status = 404, description = "Assignment not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn delete_assignment(
    Path(group_name): Path<String>,
    State(state): State<AppState>,
    caller: Caller,
) -> Result<StatusCode, ApiError> {
    require_admin(&caller)?;
    let existing = load(&state, &caller, &group_name).await?;
    ensure_can_grant(&caller, existing.role)?;

    match state.store.delete_group_role_assignment(&group_name).await {
        Ok(()) => {
            tracing::info!(group = %group_name, role = %existing.role, "deleted group role assignment");
            state.trigger.fire();
            Ok(StatusCode::NO_CONTENT)
        }
        Err(StoreError::NotFound(_)) => Err(not_found(&caller)),
        Err(err) => Err(api_internal("failed to delete group role assignment", &err)),
    }
}

async fn load(
    state: &AppState,
    caller: &Caller,
    group_name: &str,
) -> Result<GroupRoleAssignment, ApiError> {
    match state.store.get_group_role_assignment(group_name).await {
        Ok(assignment) => Ok(assignment),
        Err(StoreError::NotFound(_)) => Err(not_found(caller)),
        Err(err) => Err(api_internal("failed to load group role assignment", &err)),
    }
}

fn not_found(caller: &Caller) -> ApiError {
    api_not_found("group role assignment not found")
        .with_request_id(caller.context.request_id.clone())
}
