//! Caller identity for the gateway.
//!
//! # Purpose
//! Turns the trusted proxy's identity headers into an [`AuthenticatedUser`]
//! (user record, current group ids, effective role) and keeps the group cache
//! fresh against the identity provider.
//!
//! # Modules
//! - [`context`]: header parsing and the `Caller` extractor.
//! - [`provider`]: HTTP client for provider group endpoints.
//! - [`directory`]: group search over provider and cache.
//! - [`membership`]: per-user membership sync.
//! - [`identity`]: user provisioning and identity assertion.
//!
//! [`AuthenticatedUser`]: crate::model::AuthenticatedUser
pub mod context;
pub mod directory;
pub mod identity;
pub mod membership;
pub mod provider;

#[cfg(test)]
pub(crate) mod test_support;
