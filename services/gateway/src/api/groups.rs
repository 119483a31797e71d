//! Group search over the caller's identity provider and the local cache.
use crate::api::error::{ApiError, api_internal};
use crate::api::require_admin_reader;
use crate::api::types::{GroupListResponse, GroupSearchQuery};
use crate::app::AppState;
use crate::auth::context::Caller;
use axum::Json;
use axum::extract::{Query, State};

#[utoipa::path(
    get,
    path = "/api/groups",
    tag = "groups",
    params(
        ("name" = Option<String>, Query, description = "Case-insensitive name filter")
    ),
    responses(
        (status = 200, description = "Matching groups", body = GroupListResponse),
        (status = 403, description = "Caller is not an admin or auditor", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn list_groups(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<GroupSearchQuery>,
) -> Result<Json<GroupListResponse>, ApiError> {
    require_admin_reader(&caller)?;
    let items = state
        .directory
        .list_auth_groups(&caller.context, &query.name)
        .await
        .map_err(|err| api_internal("failed to list groups", &err))?;
    Ok(Json(GroupListResponse { items }))
}
