//! Membership sync: keeps a user's cached group memberships in step with the
//! identity provider.
//!
//! # Refresh policy
//! The provider is consulted only when the stored memberships are older than
//! the refresh period and the request carries both an access token and a
//! provider URL. Otherwise the stored memberships are returned as-is.
//!
//! # Failure model
//! A provider failure never fails the request: stored memberships are used and
//! `groups_last_checked` is left untouched so the next request retries.
//!
//! # Privilege changes
//! When a successful sync changes the membership set and the user's effective
//! role moves as a result, a role-change event is recorded and the reconcile
//! controller is woken, so losing a group revokes workspace access without
//! waiting for an unrelated event.
use crate::auth::context::RequestContext;
use crate::auth::directory::GroupDirectory;
use crate::auth::provider::GroupProvider;
use crate::model::{Group, ProviderGroup, User};
use crate::reconcile::ReconcileTrigger;
use crate::roles::EffectiveRoleResolver;
use crate::store::{GatewayStore, GroupSync, StoreResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct MembershipSync {
    store: Arc<dyn GatewayStore>,
    directory: GroupDirectory,
    provider: Arc<dyn GroupProvider>,
    resolver: EffectiveRoleResolver,
    trigger: ReconcileTrigger,
    refresh_period: Duration,
}

impl MembershipSync {
    pub fn new(
        store: Arc<dyn GatewayStore>,
        provider: Arc<dyn GroupProvider>,
        resolver: EffectiveRoleResolver,
        trigger: ReconcileTrigger,
        refresh_period: Duration,
    ) -> Self {
        Self {
            directory: GroupDirectory::new(store.clone(), provider.clone()),
            store,
            provider,
            resolver,
            trigger,
            refresh_period,
        }
    }

    /// Returns the user's current group ids, refreshing them from the
    /// provider when due.
    ///
    /// # Errors
    /// Store failures only; provider failures degrade to stored memberships.
    #[tracing::instrument(skip_all, fields(user_id = %user.id))]
    pub async fn ensure_groups(&self, ctx: &RequestContext, user: &User) -> StoreResult<Vec<String>> {
        let (Some(token), Some(url)) = (ctx.access_token.as_deref(), ctx.provider_url.as_deref())
        else {
            return self.directory.list_group_ids_for_user(&user.id).await;
        };
        if !self.is_due(user) {
            return self.directory.list_group_ids_for_user(&user.id).await;
        }

        let reported = match self.provider.list_user_groups(url, token).await {
            Ok(groups) => groups,
            Err(err) => {
                tracing::warn!(error = %err, "provider membership lookup failed; using stored groups");
                metrics::counter!("gatehouse_group_sync_total", "outcome" => "provider_error")
                    .increment(1);
                return self.directory.list_group_ids_for_user(&user.id).await;
            }
        };

        let role_before = self.resolver.resolve_for_user(user).await?;
        let groups: Vec<Group> = reported
            .into_iter()
            .map(|group| cached_group(ctx, group))
            .collect();
        let diff = self
            .store
            .sync_user_groups(GroupSync {
                user_id: &user.id,
                auth_provider_namespace: &ctx.provider_namespace,
                auth_provider_name: &ctx.provider_name,
                groups: &groups,
                checked_at: Utc::now(),
            })
            .await?;
        let group_ids = self.directory.list_group_ids_for_user(&user.id).await?;

        if diff.is_empty() {
            metrics::counter!("gatehouse_group_sync_total", "outcome" => "unchanged").increment(1);
            return Ok(group_ids);
        }
        metrics::counter!("gatehouse_group_sync_total", "outcome" => "changed").increment(1);
        tracing::info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            "user group memberships changed"
        );

        let role_after = self
            .resolver
            .resolve_user_effective_role(user, &group_ids)
            .await?;
        if role_after != role_before {
            self.store
                .record_role_change(&user.id, role_before, role_after)
                .await?;
            tracing::info!(
                old_role = %role_before,
                new_role = %role_after,
                "effective role moved after membership sync"
            );
            self.trigger.fire();
        }
        Ok(group_ids)
    }

    fn is_due(&self, user: &User) -> bool {
        match user.groups_last_checked {
            None => true,
            Some(checked) => {
                let age = Utc::now().signed_duration_since(checked);
                age.to_std().map(|age| age >= self.refresh_period).unwrap_or(false)
            }
        }
    }
}

fn cached_group(ctx: &RequestContext, group: ProviderGroup) -> Group {
    Group {
        name: group
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| group.id.clone()),
        id: group.id,
        auth_provider_namespace: ctx.provider_namespace.clone(),
        auth_provider_name: ctx.provider_name.clone(),
        icon_url: group.icon_url.filter(|icon| !icon.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{StubProvider, context};
    use crate::model::GroupRoleAssignment;
    use crate::store::memory::InMemoryStore;
    use crate::store::{EventStore, IdentityStore, RoleAssignmentStore};
    use gatehouse_authz::Role;

    struct Fixture {
        store: InMemoryStore,
        provider: Arc<StubProvider>,
        sync: MembershipSync,
        signal: crate::reconcile::ReconcileSignal,
    }

    fn fixture(refresh: Duration) -> Fixture {
        let store = InMemoryStore::new();
        let provider = Arc::new(StubProvider::default());
        let shared: Arc<dyn GatewayStore> = Arc::new(store.clone());
        let (trigger, signal) = ReconcileTrigger::channel();
        let sync = MembershipSync::new(
            shared.clone(),
            provider.clone(),
            EffectiveRoleResolver::new(shared),
            trigger,
            refresh,
        );
        Fixture {
            store,
            provider,
            sync,
            signal,
        }
    }

    fn provider_group(id: &str) -> ProviderGroup {
        ProviderGroup {
            id: id.to_string(),
            name: Some(id.to_uppercase()),
            icon_url: None,
        }
    }

    async fn create_user(store: &InMemoryStore) -> User {
        store
            .create_user(User::new("alice", "a@x", Role::BASIC, "default", "okta", "u-1"))
            .await
            .expect("user")
    }

    #[tokio::test]
    async fn fresh_sync_stores_reported_groups() {
        let mut fx = fixture(Duration::from_secs(600));
        let user = create_user(&fx.store).await;
        fx.provider
            .set_user_groups(vec![provider_group("okta/a"), provider_group("okta/b")]);

        let ids = fx
            .sync
            .ensure_groups(&context(Some("tok")), &user)
            .await
            .expect("groups");
        assert_eq!(ids, vec!["okta/a".to_string(), "okta/b".to_string()]);
        let stored = fx.store.get_user(&user.id).await.expect("user");
        assert!(stored.groups_last_checked.is_some());
        // No assignments, so the effective role did not move.
        assert!(fx.signal.try_recv().is_none());
    }

    #[tokio::test]
    async fn recent_check_skips_provider() {
        let fx = fixture(Duration::from_secs(600));
        let user = create_user(&fx.store).await;
        fx.provider.set_user_groups(vec![provider_group("okta/a")]);
        fx.sync
            .ensure_groups(&context(Some("tok")), &user)
            .await
            .expect("first sync");
        let checked = fx.store.get_user(&user.id).await.expect("user");

        fx.provider.set_user_groups(vec![provider_group("okta/z")]);
        let ids = fx
            .sync
            .ensure_groups(&context(Some("tok")), &checked)
            .await
            .expect("cached");
        assert_eq!(ids, vec!["okta/a".to_string()]);
        assert_eq!(fx.provider.user_group_calls(), 1);
    }

    #[tokio::test]
    async fn missing_token_reads_store_only() {
        let fx = fixture(Duration::ZERO);
        let user = create_user(&fx.store).await;
        fx.provider.set_user_groups(vec![provider_group("okta/a")]);
        let ids = fx
            .sync
            .ensure_groups(&context(None), &user)
            .await
            .expect("groups");
        assert!(ids.is_empty());
        assert_eq!(fx.provider.user_group_calls(), 0);
    }

    #[tokio::test]
    async fn provider_outage_falls_back_without_stamping() {
        let fx = fixture(Duration::ZERO);
        let user = create_user(&fx.store).await;
        fx.provider.set_user_groups(vec![provider_group("okta/a")]);
        fx.sync
            .ensure_groups(&context(Some("tok")), &user)
            .await
            .expect("sync");
        let before = fx.store.get_user(&user.id).await.expect("user");

        fx.provider.fail_requests(true);
        let ids = fx
            .sync
            .ensure_groups(&context(Some("tok")), &before)
            .await
            .expect("fallback");
        assert_eq!(ids, vec!["okta/a".to_string()]);
        let after = fx.store.get_user(&user.id).await.expect("user");
        assert_eq!(after.groups_last_checked, before.groups_last_checked);
    }

    #[tokio::test]
    async fn losing_privileged_group_records_role_change() {
        let mut fx = fixture(Duration::ZERO);
        let user = create_user(&fx.store).await;
        fx.store
            .create_group_role_assignment(GroupRoleAssignment {
                group_name: "okta/admins".to_string(),
                role: Role::ADMIN,
                description: String::new(),
            })
            .await
            .expect("assignment");
        fx.provider
            .set_user_groups(vec![provider_group("okta/admins")]);
        fx.sync
            .ensure_groups(&context(Some("tok")), &user)
            .await
            .expect("join");
        assert!(fx.signal.try_recv().is_some());

        fx.provider.set_user_groups(Vec::new());
        fx.sync
            .ensure_groups(&context(Some("tok")), &user)
            .await
            .expect("leave");

        let events = fx.store.list_role_change_events(10).await.expect("events");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].old_role, Role::ADMIN);
        assert_eq!(events[1].new_role, Role::BASIC);
    }
}
