//! Gatehouse gateway library crate.
//!
//! # Purpose
//! Resolves each caller's effective role from direct and group-derived
//! grants, keeps group memberships in sync with the identity provider, and
//! reconciles per-user workspaces and access-control rules whenever roles
//! change.
//!
//! # Notes
//! The binary is a thin wrapper over [`app::build_state`] and
//! [`app::build_router`]; integration tests drive the same entry points.
pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod model;
pub mod observability;
pub mod reconcile;
pub mod resources;
pub mod roles;
pub mod store;
