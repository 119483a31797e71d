//! Shared fakes for auth unit tests.
use crate::auth::context::RequestContext;
use crate::auth::provider::{GroupProvider, ProviderError};
use crate::model::ProviderGroup;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub(crate) struct StubProvider {
    user_groups: Mutex<Vec<ProviderGroup>>,
    search_results: Mutex<Vec<ProviderGroup>>,
    fail: AtomicBool,
    user_group_calls: AtomicUsize,
}

impl StubProvider {
    pub(crate) fn set_user_groups(&self, groups: Vec<ProviderGroup>) {
        *self.user_groups.lock().expect("lock") = groups;
    }

    pub(crate) fn set_search_results(&self, groups: Vec<ProviderGroup>) {
        *self.search_results.lock().expect("lock") = groups;
    }

    pub(crate) fn fail_requests(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn user_group_calls(&self) -> usize {
        self.user_group_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ProviderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        }
        Ok(())
    }
}

#[async_trait]
impl GroupProvider for StubProvider {
    async fn search_groups(
        &self,
        _provider_url: &str,
        _access_token: Option<&str>,
        _name_filter: &str,
    ) -> Result<Vec<ProviderGroup>, ProviderError> {
        self.check()?;
        Ok(self.search_results.lock().expect("lock").clone())
    }

    async fn list_user_groups(
        &self,
        _provider_url: &str,
        _access_token: &str,
    ) -> Result<Vec<ProviderGroup>, ProviderError> {
        self.user_group_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.user_groups.lock().expect("lock").clone())
    }
}

pub(crate) fn context(access_token: Option<&str>) -> RequestContext {
    RequestContext {
        provider_namespace: "default".to_string(),
        provider_name: "okta".to_string(),
        provider_url: Some("http://provider.test".to_string()),
        provider_user_id: "u-1".to_string(),
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
        access_token: access_token.map(str::to_string),
        request_id: None,
    }
}
