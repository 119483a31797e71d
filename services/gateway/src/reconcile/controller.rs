//! Background loop that drains the reconcile outbox.
//!
//! On startup every user is resynced once. After that a pass runs when the
//! trigger fires and on every interval tick. The tick makes delivery
//! level-triggered: events left behind by a failed pass or a lost trigger are
//! picked up without a new mutation.
use super::driver::ReconcileDriver;
use super::trigger::ReconcileSignal;
use crate::store::GatewayStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub role_applied: usize,
    pub role_failed: usize,
    pub group_applied: usize,
    pub group_failed: usize,
}

impl DrainStats {
    pub fn is_idle(&self) -> bool {
        *self == DrainStats::default()
    }
}

pub struct ReconcileController {
    store: Arc<dyn GatewayStore>,
    driver: ReconcileDriver,
    signal: ReconcileSignal,
    interval: Duration,
    batch_size: usize,
}

impl ReconcileController {
    pub fn new(
        store: Arc<dyn GatewayStore>,
        driver: ReconcileDriver,
        signal: ReconcileSignal,
        interval: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            driver,
            signal,
            interval,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut signal_open = true;
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "reconcile controller started");
        if let Err(err) = self.driver.resync_all().await {
            tracing::warn!(error = %err, "startup resync failed");
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
                received = self.signal.recv(), if signal_open => {
                    if received.is_none() {
                        signal_open = false;
                        continue;
                    }
                }
            }
            let stats = self.drain_once().await;
            if !stats.is_idle() {
                tracing::debug!(?stats, "reconcile pass finished");
            }
        }
        tracing::info!("reconcile controller stopped");
    }

    /// Applies pending role events, then group events, oldest first.
    ///
    /// Each queue is paged with an id cursor, so a failed event is left in
    /// place and skipped for the rest of the pass without holding back the
    /// events behind it. It is retried on the next pass.
    pub async fn drain_once(&self) -> DrainStats {
        let mut stats = DrainStats::default();

        let mut cursor = 0;
        loop {
            let events = match self
                .store
                .list_role_change_events_after(cursor, self.batch_size)
                .await
            {
                Ok(events) => events,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to list role change events");
                    break;
                }
            };
            let full = events.len() == self.batch_size;
            for event in &events {
                cursor = event.id;
                match self.driver.handle_role_change(event).await {
                    Ok(()) => stats.role_applied += 1,
                    Err(err) => {
                        stats.role_failed += 1;
                        tracing::warn!(event_id = event.id, user_id = %event.user_id, error = %err, "role change not applied; will retry");
                    }
                }
            }
            if !full {
                break;
            }
        }

        let mut cursor = 0;
        loop {
            let events = match self
                .store
                .list_group_role_change_events_after(cursor, self.batch_size)
                .await
            {
                Ok(events) => events,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to list group role change events");
                    break;
                }
            };
            let full = events.len() == self.batch_size;
            for event in &events {
                cursor = event.id;
                match self.driver.handle_group_role_change(event).await {
                    Ok(summary) => {
                        stats.group_applied += 1;
                        if summary.failed > 0 {
                            tracing::warn!(
                                event_id = event.id,
                                group = %event.group_name,
                                failed = summary.failed,
                                attempted = summary.attempted,
                                "group role change applied with member failures"
                            );
                        }
                    }
                    Err(err) => {
                        stats.group_failed += 1;
                        tracing::warn!(event_id = event.id, group = %event.group_name, error = %err, "group role change not applied; will retry");
                    }
                }
            }
            if !full {
                break;
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::User;
    use crate::reconcile::{ReconcileTrigger, WorkspaceLifecycle};
    use crate::resources::ResourceStore;
    use crate::resources::memory::InMemoryResourceStore;
    use crate::roles::EffectiveRoleResolver;
    use crate::store::memory::InMemoryStore;
    use crate::store::{EventStore, IdentityStore};
    use gatehouse_authz::Role;

    fn controller(
        store: &InMemoryStore,
        resources: &InMemoryResourceStore,
        batch_size: usize,
    ) -> (ReconcileController, ReconcileTrigger) {
        let shared: Arc<dyn GatewayStore> = Arc::new(store.clone());
        let driver = ReconcileDriver::new(
            shared.clone(),
            EffectiveRoleResolver::new(shared.clone()),
            WorkspaceLifecycle::new(Arc::new(resources.clone()), "default"),
        );
        let (trigger, signal) = ReconcileTrigger::channel();
        (
            ReconcileController::new(shared, driver, signal, Duration::from_secs(3600), batch_size),
            trigger,
        )
    }

    async fn promote(store: &InMemoryStore, name: &str, role: Role) -> User {
        let user = store
            .create_user(User::new(
                name,
                format!("{name}@example.com"),
                Role::BASIC,
                "default",
                "okta",
                format!("sub-{name}"),
            ))
            .await
            .expect("user");
        store
            .update_user_role(&user.id, role)
            .await
            .expect("update");
        user
    }

    #[tokio::test]
    async fn drain_applies_all_batches() {
        let store = InMemoryStore::new();
        let resources = InMemoryResourceStore::new();
        for name in ["a", "b", "c"] {
            promote(&store, name, Role::POWER_USER).await;
        }
        let (controller, _trigger) = controller(&store, &resources, 2);

        let stats = controller.drain_once().await;
        assert_eq!(stats.role_applied, 3);
        assert_eq!(stats.role_failed, 0);
        assert_eq!(resources.workspace_count().await, 3);
        assert!(store.list_role_change_events(10).await.expect("events").is_empty());
        assert!(controller.drain_once().await.is_idle());
    }

    #[tokio::test]
    async fn run_drains_on_trigger_and_stops_on_shutdown() {
        let store = InMemoryStore::new();
        let resources = InMemoryResourceStore::new();
        let (controller, trigger) = controller(&store, &resources, 10);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(controller.run(async move {
            let _ = stop_rx.await;
        }));

        let user = promote(&store, "alice", Role::ADMIN).await;
        trigger.fire();

        let mut created = false;
        for _ in 0..50 {
            if !resources
                .list_workspaces_for_user("default", &user.id)
                .await
                .expect("list")
                .is_empty()
            {
                created = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(created, "workspace not created after trigger");

        stop_tx.send(()).expect("send");
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("controller stops")
            .expect("join");
    }

    #[tokio::test]
    async fn run_resyncs_users_without_pending_events() {
        let store = InMemoryStore::new();
        let resources = InMemoryResourceStore::new();
        let owner = store
            .create_user(User::new(
                "root",
                "root@example.com",
                Role::OWNER,
                "default",
                "okta",
                "sub-root",
            ))
            .await
            .expect("user");
        // Simulates a restart: the outbox is already drained but the
        // resource store starts empty.
        for event in store.list_role_change_events(10).await.expect("events") {
            store.delete_role_change_event(event.id).await.expect("delete");
        }

        let (controller, _trigger) = controller(&store, &resources, 10);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(controller.run(async move {
            let _ = stop_rx.await;
        }));

        let mut created = false;
        for _ in 0..50 {
            let workspaces = resources
                .list_workspaces_for_user("default", &owner.id)
                .await
                .expect("list");
            if workspaces.first().map(|ws| ws.role) == Some(Role::OWNER) {
                created = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(created, "workspace not rebuilt on startup");

        stop_tx.send(()).expect("send");
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("controller stops")
            .expect("join");
    }
}
