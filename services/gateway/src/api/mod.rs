//! Gateway HTTP API module.
//!
//! # Purpose
//! Exposes route handler modules and the shared caller-authorization and
//! role-validation helpers they use.
pub mod assignments;
pub mod error;
pub mod groups;
pub mod openapi;
pub mod system;
pub mod types;
pub mod users;

use crate::api::error::{ApiError, api_forbidden, api_validation_error};
use crate::auth::context::Caller;
use gatehouse_authz::Role;

/// Admin tier or above.
pub(crate) fn require_admin(caller: &Caller) -> Result<(), ApiError> {
    if caller.identity.is_admin() {
        return Ok(());
    }
    Err(forbidden(caller, "admin role required"))
}

/// Admin tier or above, or any caller carrying the Auditor bit.
pub(crate) fn require_admin_reader(caller: &Caller) -> Result<(), ApiError> {
    if caller.identity.can_read_admin_views() {
        return Ok(());
    }
    Err(forbidden(caller, "admin or auditor role required"))
}

/// Owner and Auditor bits can only be handed out by an Owner.
pub(crate) fn ensure_can_grant(caller: &Caller, role: Role) -> Result<(), ApiError> {
    if role.requires_owner_to_grant() && !caller.identity.is_owner() {
        return Err(forbidden(caller, "only owners can grant owner or auditor"));
    }
    Ok(())
}

/// Decodes and validates a role for a group assignment.
pub(crate) fn parse_assignable_role(caller: &Caller, bits: u32) -> Result<Role, ApiError> {
    Role::try_from_bits(bits)
        .and_then(Role::ensure_assignable)
        .map_err(|err| {
            api_validation_error(&err.to_string()).with_request_id(caller.context.request_id.clone())
        })
}

/// Decodes a direct user role: exactly one tier, Basic included, plus an
/// optional Auditor bit.
pub(crate) fn parse_direct_role(caller: &Caller, bits: u32) -> Result<Role, ApiError> {
    let role = Role::try_from_bits(bits).map_err(|err| {
        api_validation_error(&err.to_string()).with_request_id(caller.context.request_id.clone())
    })?;
    if role.is_empty() || role != role.normalize_to_highest_role() {
        return Err(api_validation_error("role must contain exactly one tier")
            .with_request_id(caller.context.request_id.clone()));
    }
    Ok(role)
}

fn forbidden(caller: &Caller, message: &str) -> ApiError {
    tracing::debug!(
        user_id = %caller.identity.user.id,
        role = %caller.identity.effective_role,
        message,
        "forbidden"
    );
    api_forbidden(message).with_request_id(caller.context.request_id.clone())
}
