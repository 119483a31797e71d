//! Gateway data model module.
//!
//! # Purpose
//! Re-exports the identity records (users, groups, memberships), the
//! admin-authored group-role assignments, the outbox events, and the
//! derived resources that reconciliation manages.
mod assignment;
mod event;
mod group;
mod resource;
mod user;

pub use assignment::GroupRoleAssignment;
pub use event::{GroupRoleChangeEvent, RoleChangeEvent};
pub use group::{Group, MembershipDiff, ProviderGroup};
pub use resource::{
    AccessControlRule, McpServer, PowerUserWorkspace, RuleTarget, WorkspaceStatus,
};
pub use user::{AuthenticatedUser, User};
