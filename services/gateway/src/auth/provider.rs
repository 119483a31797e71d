//! Identity-provider group lookups.
//!
//! # Purpose
//! Talks to the auth provider's group endpoints:
//! - `GET {providerURL}/obot-list-auth-groups?name=<filter>` for search
//! - `GET {providerURL}/obot-list-user-auth-groups` for the caller's groups
//!
//! Both return a JSON array of `{id, name, iconURL}` and are authenticated
//! with the caller's bearer token.
//!
//! # Failure model
//! Every failure is a [`ProviderError`]; callers treat it as "no data" and
//! fall back to cached state. Nothing here retries.
use crate::model::ProviderGroup;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

const SEARCH_PATH: &str = "obot-list-auth-groups";
const USER_GROUPS_PATH: &str = "obot-list-user-auth-groups";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {0}")]
    Status(StatusCode),
    #[error("invalid provider url: {0}")]
    InvalidUrl(String),
}

#[async_trait]
pub trait GroupProvider: Send + Sync {
    async fn search_groups(
        &self,
        provider_url: &str,
        access_token: Option<&str>,
        name_filter: &str,
    ) -> Result<Vec<ProviderGroup>, ProviderError>;

    async fn list_user_groups(
        &self,
        provider_url: &str,
        access_token: &str,
    ) -> Result<Vec<ProviderGroup>, ProviderError>;
}

/// `reqwest`-backed provider client with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpGroupProvider {
    client: reqwest::Client,
}

impl HttpGroupProvider {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    async fn get_groups(
        &self,
        endpoint: &'static str,
        provider_url: &str,
        access_token: Option<&str>,
        query: &[(&str, &str)],
    ) -> Result<Vec<ProviderGroup>, ProviderError> {
        let result = self
            .fetch(endpoint, provider_url, access_token, query)
            .await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            "gatehouse_provider_requests_total",
            "endpoint" => endpoint,
            "outcome" => outcome
        )
        .increment(1);
        result
    }

    async fn fetch(
        &self,
        endpoint: &str,
        provider_url: &str,
        access_token: Option<&str>,
        query: &[(&str, &str)],
    ) -> Result<Vec<ProviderGroup>, ProviderError> {
        let url = endpoint_url(provider_url, endpoint)?;
        let mut request = self.client.get(url).query(query);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(ProviderError::Status(response.status()));
        }
        Ok(response.json::<Vec<ProviderGroup>>().await?)
    }
}

#[async_trait]
impl GroupProvider for HttpGroupProvider {
    async fn search_groups(
        &self,
        provider_url: &str,
        access_token: Option<&str>,
        name_filter: &str,
    ) -> Result<Vec<ProviderGroup>, ProviderError> {
        self.get_groups(
            SEARCH_PATH,
            provider_url,
            access_token,
            &[("name", name_filter)],
        )
        .await
    }

    async fn list_user_groups(
        &self,
        provider_url: &str,
        access_token: &str,
    ) -> Result<Vec<ProviderGroup>, ProviderError> {
        self.get_groups(USER_GROUPS_PATH, provider_url, Some(access_token), &[])
            .await
    }
}

fn endpoint_url(provider_url: &str, endpoint: &str) -> Result<String, ProviderError> {
    let base = provider_url.trim_end_matches('/');
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(ProviderError::InvalidUrl(provider_url.to_string()));
    }
    Ok(format!("{base}/{endpoint}"))
}
