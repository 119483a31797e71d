//! Group-role assignment records.
use gatehouse_authz::Role;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Grants `role` to every member of the group whose id is `group_name`.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupRoleAssignment {
    pub group_name: String,
    #[schema(value_type = u32)]
    pub role: Role,
    #[serde(default)]
    pub description: String,
}
