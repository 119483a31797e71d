//! User API handlers.
//!
//! # Purpose
//! Lists users with their effective roles, sets direct roles, and reports the
//! caller's own resolved identity.
//!
//! # Security considerations
//! - Listing and reading users needs Admin or Auditor.
//! - Setting a direct role needs Admin; Owner and Auditor on either side of
//!   the change need Owner.
use crate::api::error::{ApiError, api_internal, api_not_found};
use crate::api::types::{MeResponse, UserListResponse, UserResponse, UserRoleUpdateRequest};
use crate::api::{ensure_can_grant, parse_direct_role, require_admin, require_admin_reader};
use crate::app::AppState;
use crate::auth::context::Caller;
use crate::model::User;
use crate::store::StoreError;
use axum::Json;
use axum::extract::{Path, State};

#[utoipa::path(
    get,
    path = "/api/users",
    tag = "users",
    responses(
        (status = 200, description = "Users with effective roles", body = UserListResponse),
        (status = 403, description = "Caller is not an admin or auditor", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn list_users(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<UserListResponse>, ApiError> {
    require_admin_reader(&caller)?;
    let users = state
        .store
        .list_users()
        .await
        .map_err(|err| api_internal("failed to list users", &err))?;
    let user_ids: Vec<String> = users.iter().map(|user| user.id.clone()).collect();
    let memberships = match state.store.list_group_ids_for_users(&user_ids).await {
        Ok(memberships) => memberships,
        Err(err) => {
            tracing::warn!(error = %err, "failed to load memberships; using direct roles");
            Default::default()
        }
    };
    let mut effective = state
        .resolver
        .resolve_user_effective_roles_bulk(&users, &memberships)
        .await;

    let items = users
        .into_iter()
        .map(|user| {
            let role = effective
                .remove(&user.id)
                .unwrap_or_else(|| user.role.normalize_to_highest_role());
            UserResponse::from_user(user, role)
        })
        .collect();
    Ok(Json(UserListResponse { items }))
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}",
    tag = "users",
    params(
        ("user_id" = String, Path, description = "User identifier")
    ),
    responses(
        (status = 200, description = "User with effective role", body = UserResponse),
        (status = 404, description = "User not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_user(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<UserResponse>, ApiError> {
    require_admin_reader(&caller)?;
    let user = load(&state, &caller, &user_id).await?;
    respond(&state, user).await.map(Json)
}

#[utoipa::path(
    put,
    path = "/api/users/{user_id}/role",
    tag = "users",
    params(
        ("user_id" = String, Path, description = "User identifier")
    ),
    request_body = UserRoleUpdateRequest,
    responses(
        (status = 200, description = "Direct role updated", body = UserResponse),
        (status = 400, description = "Invalid role", body = crate::api::types::ErrorResponse),
        (status = 403, description = "Caller may not grant this role", body = crate::api::types::ErrorResponse),
        (status = 404, description = "User not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn update_user_role(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<UserRoleUpdateRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    require_admin(&caller)?;
    let role = parse_direct_role(&caller, body.role)?;
    ensure_can_grant(&caller, role)?;
    let target = load(&state, &caller, &user_id).await?;
    ensure_can_grant(&caller, target.role)?;

    let update = match state.store.update_user_role(&user_id, role).await {
        Ok(update) => update,
        Err(StoreError::NotFound(_)) => return Err(not_found(&caller)),
        Err(err) => return Err(api_internal("failed to update user role", &err)),
    };
    if let Some(event) = &update.event {
        tracing::info!(
            user_id = %event.user_id,
            old_role = %event.old_role,
            new_role = %event.new_role,
            "updated direct role"
        );
        state.trigger.fire();
    }
    respond(&state, update.user).await.map(Json)
}

#[utoipa::path(
    get,
    path = "/api/me",
    tag = "users",
    responses(
        (status = 200, description = "Caller identity", body = MeResponse),
        (status = 401, description = "Missing identity", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn me(caller: Caller) -> Json<MeResponse> {
    let identity = caller.identity;
    Json(MeResponse {
        user: UserResponse::from_user(identity.user, identity.effective_role),
        group_ids: identity.group_ids,
    })
}

async fn load(state: &AppState, caller: &Caller, user_id: &str) -> Result<User, ApiError> {
    match state.store.get_user(user_id).await {
        Ok(user) => Ok(user),
        Err(StoreError::NotFound(_)) => Err(not_found(caller)),
        Err(err) => Err(api_internal("failed to load user", &err)),
    }
}

async fn respond(state: &AppState, user: User) -> Result<UserResponse, ApiError> {
    let effective = state
        .resolver
        .resolve_for_user(&user)
        .await
        .map_err(|err| api_internal("failed to resolve effective role", &err))?;
    Ok(UserResponse::from_user(user, effective))
}

fn not_found(caller: &Caller) -> ApiError {
    api_not_found("user not found").with_request_id(caller.context.request_id.clone())
}
