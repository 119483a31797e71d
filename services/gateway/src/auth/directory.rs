//! Group directory: search that blends the provider's live view with the
//! locally cached groups.
use crate::auth::context::RequestContext;
use crate::auth::provider::GroupProvider;
use crate::model::Group;
use crate::store::{GatewayStore, StoreResult};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct GroupDirectory {
    store: Arc<dyn GatewayStore>,
    provider: Arc<dyn GroupProvider>,
}

impl GroupDirectory {
    pub fn new(store: Arc<dyn GatewayStore>, provider: Arc<dyn GroupProvider>) -> Self {
        Self { store, provider }
    }

    /// Groups of the caller's provider whose name contains `name_filter`.
    ///
    /// The provider is asked best-effort; on failure only cached groups are
    /// returned. When both sources know a group, provider `name`/`icon_url`
    /// win unless the provider omitted them. Results are sorted by name, then
    /// id.
    ///
    /// # Errors
    /// Only a failing store read is an error.
    pub async fn list_auth_groups(
        &self,
        ctx: &RequestContext,
        name_filter: &str,
    ) -> StoreResult<Vec<Group>> {
        let provider_groups = match ctx.provider_url.as_deref() {
            Some(url) => match self
                .provider
                .search_groups(url, ctx.access_token.as_deref(), name_filter)
                .await
            {
                Ok(groups) => groups,
                Err(err) => {
                    tracing::debug!(error = %err, "provider group search failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let cached = self
            .store
            .list_groups(&ctx.provider_namespace, &ctx.provider_name, name_filter)
            .await?;

        let mut merged: BTreeMap<String, Group> = cached
            .into_iter()
            .map(|group| (group.id.clone(), group))
            .collect();
        for found in provider_groups {
            let entry = merged.entry(found.id.clone()).or_insert_with(|| Group {
                id: found.id.clone(),
                auth_provider_namespace: ctx.provider_namespace.clone(),
                auth_provider_name: ctx.provider_name.clone(),
                name: found.id.clone(),
                icon_url: None,
            });
            if let Some(name) = found.name.filter(|name| !name.is_empty()) {
                entry.name = name;
            }
            if let Some(icon) = found.icon_url.filter(|icon| !icon.is_empty()) {
                entry.icon_url = Some(icon);
            }
        }

        let mut items: Vec<Group> = merged.into_values().collect();
        items.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    pub async fn list_group_ids_for_user(&self, user_id: &str) -> StoreResult<Vec<String>> {
        self.store.list_group_ids_for_user(user_id).await
    }
}
