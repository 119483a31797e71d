//! Pure effective-role resolution.
//!
//! Store-backed callers gather the direct role and the roles of every
//! assignment that applies, then fold them here.

use crate::Role;
use std::collections::HashMap;

/// `group id -> assigned role`, built once per bulk resolution.
pub type GroupRoleMap = HashMap<String, Role>;

/// Merges a direct role with assignment roles into one normalized role.
///
/// The result always carries exactly one base tier. A user without any
/// applicable assignment gets their direct role normalized, which is the
/// direct role itself for every well-formed value.
pub fn resolve_effective_role<I>(direct: Role, assignment_roles: I) -> Role
where
    I: IntoIterator<Item = Role>,
{
    assignment_roles
        .into_iter()
        .fold(direct, |acc, role| acc | role)
        .normalize_to_highest_role()
}

/// Resolves many users against a single `group -> role` map.
///
/// `users` pairs a user id with the direct role; `memberships` maps user ids
/// to the group ids they belong to. Groups without an assignment contribute
/// nothing.
pub fn resolve_effective_roles_bulk<'a, U>(
    users: U,
    memberships: &HashMap<String, Vec<String>>,
    group_roles: &GroupRoleMap,
) -> HashMap<String, Role>
where
    U: IntoIterator<Item = (&'a str, Role)>,
{
    users
        .into_iter()
        .map(|(user_id, direct)| {
            let roles = memberships
                .get(user_id)
                .into_iter()
                .flatten()
                .filter_map(|group_id| group_roles.get(group_id).copied());
            (user_id.to_string(), resolve_effective_role(direct, roles))
        })
        .collect()
}
