//! Cached provider groups and membership diffs.
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A group known to an external identity provider, cached locally.
///
/// `id` is provider-qualified (`<provider>/<group-key>`), so the same group
/// name under two providers never collides.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub auth_provider_namespace: String,
    pub auth_provider_name: String,
    pub name: String,
    pub icon_url: Option<String>,
}

/// Group payload returned by the provider endpoints.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderGroup {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "iconURL")]
    pub icon_url: Option<String>,
}

/// Membership pairs changed by one sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
