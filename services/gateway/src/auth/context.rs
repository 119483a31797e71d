//! Request-scoped caller context and the authenticated-caller extractor.
//!
//! # Purpose
//! The gateway sits behind a trusted auth proxy that has already
//! authenticated the caller. The proxy forwards the identity as
//! `X-Gatehouse-*` headers; [`RequestContext::from_headers`] turns them into
//! an explicit value that is passed to every identity operation.
//!
//! # Security considerations
//! These headers are only trustworthy when the proxy strips client-supplied
//! copies. The gateway must not be exposed directly.
use crate::api::error::{ApiError, api_internal, api_unauthorized};
use crate::app::AppState;
use crate::model::AuthenticatedUser;
use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use thiserror::Error;

pub const HEADER_PROVIDER_NAMESPACE: &str = "x-gatehouse-provider-namespace";
pub const HEADER_PROVIDER_NAME: &str = "x-gatehouse-provider-name";
pub const HEADER_PROVIDER_URL: &str = "x-gatehouse-provider-url";
pub const HEADER_USER_ID: &str = "x-gatehouse-user-id";
pub const HEADER_USERNAME: &str = "x-gatehouse-username";
pub const HEADER_EMAIL: &str = "x-gatehouse-email";
pub const HEADER_ACCESS_TOKEN: &str = "x-gatehouse-access-token";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("missing identity header {0}")]
    MissingHeader(&'static str),
}

/// Identity of the caller as asserted by the auth proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub provider_namespace: String,
    pub provider_name: String,
    pub provider_url: Option<String>,
    pub provider_user_id: String,
    pub username: String,
    pub email: String,
    pub access_token: Option<String>,
    pub request_id: Option<String>,
}

impl RequestContext {
    /// Namespace, provider name, and user id are required; username falls
    /// back to the user id and email to empty.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ContextError> {
        let required = |name: &'static str| {
            header_value(headers, name).ok_or(ContextError::MissingHeader(name))
        };
        let provider_namespace = required(HEADER_PROVIDER_NAMESPACE)?;
        let provider_name = required(HEADER_PROVIDER_NAME)?;
        let provider_user_id = required(HEADER_USER_ID)?;
        Ok(Self {
            username: header_value(headers, HEADER_USERNAME)
                .unwrap_or_else(|| provider_user_id.clone()),
            email: header_value(headers, HEADER_EMAIL).unwrap_or_default(),
            provider_url: header_value(headers, HEADER_PROVIDER_URL),
            access_token: header_value(headers, HEADER_ACCESS_TOKEN),
            request_id: header_value(headers, HEADER_REQUEST_ID),
            provider_namespace,
            provider_name,
            provider_user_id,
        })
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Extractor that runs identity assertion for the request.
///
/// Rejects with 401 when identity headers are missing and 500 when the
/// identity store fails.
#[derive(Debug, Clone)]
pub struct Caller {
    pub identity: AuthenticatedUser,
    pub context: RequestContext,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let context = RequestContext::from_headers(&parts.headers).map_err(|err| {
            tracing::debug!(error = %err, "rejecting request without identity");
            api_unauthorized("missing identity")
        })?;
        let identity = state
            .identity
            .assert_identity(&context)
            .await
            .map_err(|err| {
                api_internal("failed to resolve identity", &err)
                    .with_request_id(context.request_id.clone())
            })?;
        Ok(Self { identity, context })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().expect("header value"));
        }
        map
    }

    #[test]
    fn context_reads_all_headers() {
        let map = headers(&[
            (HEADER_PROVIDER_NAMESPACE, "default"),
            (HEADER_PROVIDER_NAME, "okta"),
            (HEADER_PROVIDER_URL, "http://okta.local"),
            (HEADER_USER_ID, "u-1"),
            (HEADER_USERNAME, "alice"),
            (HEADER_EMAIL, "alice@example.com"),
            (HEADER_ACCESS_TOKEN, "tok"),
            (HEADER_REQUEST_ID, "req-1"),
        ]);
        let ctx = RequestContext::from_headers(&map).expect("context");
        assert_eq!(ctx.provider_name, "okta");
        assert_eq!(ctx.provider_url.as_deref(), Some("http://okta.local"));
        assert_eq!(ctx.access_token.as_deref(), Some("tok"));
        assert_eq!(ctx.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn context_defaults_optional_headers() {
        let map = headers(&[
            (HEADER_PROVIDER_NAMESPACE, "default"),
            (HEADER_PROVIDER_NAME, "okta"),
            (HEADER_USER_ID, "u-1"),
            (HEADER_ACCESS_TOKEN, "  "),
        ]);
        let ctx = RequestContext::from_headers(&map).expect("context");
        assert_eq!(ctx.username, "u-1");
        assert_eq!(ctx.email, "");
        assert!(ctx.access_token.is_none());
        assert!(ctx.provider_url.is_none());
    }

    #[test]
    fn context_requires_user_id() {
        let map = headers(&[
            (HEADER_PROVIDER_NAMESPACE, "default"),
            (HEADER_PROVIDER_NAME, "okta"),
        ]);
        assert_eq!(
            RequestContext::from_headers(&map),
            Err(ContextError::MissingHeader(HEADER_USER_ID))
        );
    }
}
