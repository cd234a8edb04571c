//! SSO (authorization code) flow

use serde_json::json;
use url::Url;

use super::client::{ApidaeClient, SSO_TOKEN_OPERATION};
use crate::config::TokenRecord;
use crate::error::{ConfigError, Result};
use crate::operation::AuthScope;

/// SSO helpers bound to a client
pub struct SsoCapability<'a> {
    client: &'a ApidaeClient,
}

impl<'a> SsoCapability<'a> {
    pub(crate) fn new(client: &'a ApidaeClient) -> Self {
        Self { client }
    }

    /// URL the end user is sent to for authorizing the application
    pub fn authorize_url(&self) -> Result<Url> {
        let config = self.client.client_config();
        let client_id = config
            .sso_client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::MissingCredential {
                key: "ssoClientId",
                purpose: "SSO authorization",
            })?;

        let base = format!("{}/oauth/authorize/", config.sso_base_url.trim_end_matches('/'));
        let mut url = Url::parse(&base).map_err(|source| ConfigError::InvalidBaseUri {
            uri: base.clone(),
            source,
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("scope", AuthScope::Sso.wire_name())
            .append_pair("redirect_uri", &config.sso_redirect_url);
        Ok(url)
    }

    /// Exchange an authorization code and keep the token for SSO operations
    pub async fn exchange_code(&self, code: &str) -> Result<TokenRecord> {
        let inner = self.client.inner();
        let record = inner.grant(SSO_TOKEN_OPERATION, json!({ "code": code })).await?;
        inner.auth.store(AuthScope::Sso, &inner.store, record.clone()).await;
        tracing::info!("SSO token stored");
        Ok(record)
    }

    /// Refresh the SSO token now, whatever its remaining lifetime
    pub async fn refresh(&self) -> Result<TokenRecord> {
        let inner = self.client.inner();
        inner.auth.refresh(AuthScope::Sso, &inner.store, inner).await
    }

    /// Currently stored SSO token
    pub fn token(&self) -> Option<TokenRecord> {
        self.client.token(AuthScope::Sso)
    }

    /// Whether SSO operations can run without a new authorization
    pub fn is_authenticated(&self) -> bool {
        self.token()
            .is_some_and(|record| record.is_valid() || record.refresh_token.is_some())
    }
}
