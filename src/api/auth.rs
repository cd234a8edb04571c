//! Bearer token resolution
//!
//! Each protected scope (metadata, SSO, write) has its own token slot in the
//! [`ConfigStore`]. Resolving a scope reuses the stored token while it is
//! valid and otherwise runs one credential exchange, serialized per scope so
//! concurrent dispatches never race to acquire the same token.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::http::HttpRequest;
use crate::config::{ConfigStore, TokenRecord};
use crate::error::{Error, Failure};
use crate::operation::AuthScope;

/// Obtains a fresh token for one scope
#[async_trait]
pub(crate) trait CredentialExchange: Send + Sync {
    /// `current` is the token stored for the scope, expired or not
    async fn exchange(&self, scope: AuthScope, current: Option<TokenRecord>) -> Result<TokenRecord, Error>;
}

pub(crate) struct AuthInterceptor {
    gates: HashMap<AuthScope, Mutex<()>>,
}

impl AuthInterceptor {
    pub(crate) fn new() -> Self {
        Self {
            gates: AuthScope::TOKEN_SCOPES
                .iter()
                .map(|scope| (*scope, Mutex::new(())))
                .collect(),
        }
    }

    /// Token to send for `scope`, acquired through `exchange` when the
    /// stored one is missing or about to expire. `None` for public scopes.
    pub(crate) async fn resolve(
        &self,
        scope: AuthScope,
        store: &ConfigStore,
        exchange: &dyn CredentialExchange,
    ) -> Result<Option<TokenRecord>, Error> {
        let Some(gate) = self.gates.get(&scope) else {
            return Ok(None);
        };
        let _guard = gate.lock().await;

        let current = store.token(scope);
        if let Some(record) = &current {
            if record.is_valid() {
                return Ok(current);
            }
            tracing::debug!("Token for scope {} expired, fetching new token", scope);
        }

        let record = exchange.exchange(scope, current).await?;
        store.set_token(scope, record.clone());
        tracing::info!("Acquired token for scope {}", scope);
        Ok(Some(record))
    }

    /// Run an exchange even if the stored token is still valid
    pub(crate) async fn refresh(
        &self,
        scope: AuthScope,
        store: &ConfigStore,
        exchange: &dyn CredentialExchange,
    ) -> Result<TokenRecord, Error> {
        let _guard = match self.gates.get(&scope) {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        let record = exchange.exchange(scope, store.token(scope)).await?;
        store.set_token(scope, record.clone());
        tracing::info!("Refreshed token for scope {}", scope);
        Ok(record)
    }

    /// Store a token obtained outside of [`resolve`](Self::resolve)
    pub(crate) async fn store(&self, scope: AuthScope, store: &ConfigStore, record: TokenRecord) {
        let _guard = match self.gates.get(&scope) {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        store.set_token(scope, record);
    }

    /// Set the `Authorization: Bearer` header
    pub(crate) fn attach(request: &mut HttpRequest, record: &TokenRecord) -> Result<(), Failure> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", record.access_token))
            .map_err(|_| Failure::Format("access token contains invalid header characters".into()))?;
        value.set_sensitive(true);
        request.headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}
