//! Identity assertion: from proxy headers to a resolved caller.
//!
//! Runs once per authenticated request:
//! 1. find or create the user record for the provider identity,
//! 2. refresh group memberships when due,
//! 3. compute the effective role.
use crate::auth::context::RequestContext;
use crate::auth::membership::MembershipSync;
use crate::model::{AuthenticatedUser, User};
use crate::reconcile::ReconcileTrigger;
use crate::roles::EffectiveRoleResolver;
use crate::store::{GatewayStore, StoreError, StoreResult};
use gatehouse_authz::Role;
use std::sync::Arc;

#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn GatewayStore>,
    memberships: MembershipSync,
    resolver: EffectiveRoleResolver,
    trigger: ReconcileTrigger,
    owner_emails: Arc<Vec<String>>,
    admin_emails: Arc<Vec<String>>,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn GatewayStore>,
        memberships: MembershipSync,
        resolver: EffectiveRoleResolver,
        trigger: ReconcileTrigger,
        owner_emails: Vec<String>,
        admin_emails: Vec<String>,
    ) -> Self {
        Self {
            store,
            memberships,
            resolver,
            trigger,
            owner_emails: Arc::new(owner_emails),
            admin_emails: Arc::new(admin_emails),
        }
    }

    #[tracing::instrument(
        skip_all,
        fields(provider = %ctx.provider_name, request_id = ctx.request_id.as_deref().unwrap_or(""))
    )]
    pub async fn assert_identity(&self, ctx: &RequestContext) -> StoreResult<AuthenticatedUser> {
        let user = self.ensure_user(ctx).await?;
        let group_ids = self.memberships.ensure_groups(ctx, &user).await?;
        let effective_role = self
            .resolver
            .resolve_user_effective_role(&user, &group_ids)
            .await?;
        Ok(AuthenticatedUser {
            user,
            group_ids,
            effective_role,
        })
    }

    /// Finds the user for the provider identity or creates it.
    ///
    /// A concurrent first request for the same identity loses the insert race
    /// with a conflict; the winner's row is then read back. Creating a user
    /// from the owner or admin list wakes the reconcile controller for the
    /// event the store recorded with it.
    pub async fn ensure_user(&self, ctx: &RequestContext) -> StoreResult<User> {
        if let Some(user) = self.find(ctx).await? {
            return Ok(user);
        }
        let role = self.initial_role(&ctx.email);
        let user = User::new(
            ctx.username.clone(),
            ctx.email.clone(),
            role,
            ctx.provider_namespace.clone(),
            ctx.provider_name.clone(),
            ctx.provider_user_id.clone(),
        );
        match self.store.create_user(user).await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, role = %user.role, "created user");
                if user.role.is_privileged() {
                    self.trigger.fire();
                }
                Ok(user)
            }
            Err(StoreError::Conflict(_)) => self
                .find(ctx)
                .await?
                .ok_or_else(|| StoreError::NotFound("user".into())),
            Err(err) => Err(err),
        }
    }

    async fn find(&self, ctx: &RequestContext) -> StoreResult<Option<User>> {
        self.store
            .find_user_by_identity(
                &ctx.provider_namespace,
                &ctx.provider_name,
                &ctx.provider_user_id,
            )
            .await
    }

    fn initial_role(&self, email: &str) -> Role {
        let email = email.trim().to_ascii_lowercase();
        if email.is_empty() {
            return Role::BASIC;
        }
        if self.owner_emails.iter().any(|owner| *owner == email) {
            Role::OWNER
        } else if self.admin_emails.iter().any(|admin| *admin == email) {
            Role::ADMIN
        } else {
            Role::BASIC
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{StubProvider, context};
    use crate::model::{GroupRoleAssignment, ProviderGroup};
    use crate::store::{EventStore, RoleAssignmentStore};
    use crate::store::memory::InMemoryStore;
    use std::time::Duration;

    fn service(store: &InMemoryStore, provider: Arc<StubProvider>) -> IdentityService {
        let shared: Arc<dyn GatewayStore> = Arc::new(store.clone());
        let resolver = EffectiveRoleResolver::new(shared.clone());
        let (trigger, _signal) = ReconcileTrigger::channel();
        let memberships = MembershipSync::new(
            shared.clone(),
            provider,
            resolver.clone(),
            trigger.clone(),
            Duration::from_secs(600),
        );
        IdentityService::new(
            shared,
            memberships,
            resolver,
            trigger,
            vec!["alice@example.com".to_string()],
            vec!["bob@example.com".to_string()],
        )
    }

    #[tokio::test]
    async fn first_request_creates_owner_from_email_list() {
        let store = InMemoryStore::new();
        let identity = service(&store, Arc::new(StubProvider::default()));
        let caller = identity
            .assert_identity(&context(None))
            .await
            .expect("identity");
        assert_eq!(caller.user.role, Role::OWNER);
        assert_eq!(caller.effective_role, Role::OWNER);

        let again = identity.ensure_user(&context(None)).await.expect("user");
        assert_eq!(again.id, caller.user.id);

        let events = store.list_role_change_events(10).await.expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, caller.user.id);
        assert_eq!(events[0].old_role, Role::BASIC);
        assert_eq!(events[0].new_role, Role::OWNER);
    }

    #[tokio::test]
    async fn admin_email_and_default_roles() {
        let store = InMemoryStore::new();
        let identity = service(&store, Arc::new(StubProvider::default()));
        assert_eq!(identity.initial_role("Bob@Example.com"), Role::ADMIN);
        assert_eq!(identity.initial_role("carol@example.com"), Role::BASIC);
        assert_eq!(identity.initial_role(""), Role::BASIC);
    }

    #[tokio::test]
    async fn effective_role_includes_synced_groups() {
        let store = InMemoryStore::new();
        store
            .create_group_role_assignment(GroupRoleAssignment {
                group_name: "okta/builders".to_string(),
                role: Role::POWER_USER_PLUS,
                description: String::new(),
            })
            .await
            .expect("assignment");
        let provider = Arc::new(StubProvider::default());
        provider.set_user_groups(vec![ProviderGroup {
            id: "okta/builders".to_string(),
            name: Some("Builders".to_string()),
            icon_url: None,
        }]);
        let identity = service(&store, provider);
        let mut ctx = context(Some("tok"));
        ctx.email = "carol@example.com".to_string();
        let caller = identity.assert_identity(&ctx).await.expect("identity");
        assert_eq!(caller.user.role, Role::BASIC);
        assert_eq!(caller.group_ids, vec!["okta/builders".to_string()]);
        assert_eq!(caller.effective_role, Role::POWER_USER_PLUS);
    }
}
