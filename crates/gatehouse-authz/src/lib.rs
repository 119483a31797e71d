//! Gatehouse authorization primitives shared by the gateway services.
//!
//! # Purpose
//! Centralizes the privilege model (the [`Role`] bitset) and the pure
//! effective-role resolution used by the gateway when it merges a user's
//! direct role with every group-role assignment that applies to them.
//!
//! # How it fits
//! The gateway service loads users, memberships, and assignments from its
//! stores and hands plain values to this crate. Nothing here performs I/O, so
//! the merge rules can be tested exhaustively.
//!
//! # Key invariants
//! - A resolved role carries exactly one base tier, optionally with
//!   [`Role::AUDITOR`].
//! - Merging is associative, commutative, and idempotent, so discovery order
//!   of assignments never changes the outcome.
//!
//! # Examples
//! ```rust
//! use gatehouse_authz::{Role, resolve_effective_role};
//!
//! let role = resolve_effective_role(Role::BASIC, [Role::POWER_USER, Role::ADMIN]);
//! assert_eq!(role, Role::ADMIN);
//! ```
//!
//! # Common pitfalls
//! - Comparing raw unions of assignment roles; always normalize first.
//! - Treating [`Role::AUDITOR`] as a tier; it is a modifier that never
//!   grants workspace privileges on its own.

mod errors;
mod resolve;
mod role;

pub use errors::{AuthzError, AuthzResult};
pub use resolve::{GroupRoleMap, resolve_effective_role, resolve_effective_roles_bulk};
pub use role::Role;
