//! Workspace reconciliation.
//!
//! # Purpose
//! Converges each user's derived resources (workspace, default access-control
//! rule, MCP servers) onto their *current* effective role.
//!
//! # How it fits
//! Mutations write outbox events ([`RoleChangeEvent`],
//! [`GroupRoleChangeEvent`]) in the same transaction as the change and fire a
//! [`ReconcileTrigger`]. The [`ReconcileController`] drains the outbox and
//! hands each event to the [`ReconcileDriver`], which recomputes the effective
//! role from the store and applies the difference through
//! [`WorkspaceLifecycle`].
//!
//! # Key invariants
//! - Events are deleted only after successful application (at-least-once).
//! - Every resource step is idempotent, so redelivery is safe.
//! - The driver never trusts the role carried by an event; it recomputes.
//!
//! [`RoleChangeEvent`]: crate::model::RoleChangeEvent
//! [`GroupRoleChangeEvent`]: crate::model::GroupRoleChangeEvent
use crate::store::StoreError;
use thiserror::Error;

pub mod controller;
pub mod driver;
pub mod lifecycle;
pub mod trigger;

pub use controller::{DrainStats, ReconcileController};
pub use driver::{ReconcileSummary, ReconcileDriver};
pub use lifecycle::WorkspaceLifecycle;
pub use trigger::{ReconcileSignal, ReconcileTrigger};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Attaches a description of the failed step to a store error.
pub(crate) trait StoreContext<T> {
    fn step(self, context: impl Into<String>) -> ReconcileResult<T>;
}

impl<T> StoreContext<T> for Result<T, StoreError> {
    fn step(self, context: impl Into<String>) -> ReconcileResult<T> {
        self.map_err(|source| ReconcileError::Store {
            context: context.into(),
            source,
        })
    }
}
