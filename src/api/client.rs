//! Apidae client
//!
//! Single entry point for every remote operation: looks the command up in the
//! operation registry, resolves the bearer token its scope needs, builds and
//! sends the request, then decodes or classifies the response.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::runtime::RuntimeFlavor;
use tracing::Instrument;
use uuid::Uuid;

use super::auth::{AuthInterceptor, CredentialExchange};
use super::export::ExportCapability;
use super::http::{ReqwestTransport, Transport};
use super::sso::SsoCapability;
use crate::config::{ClientConfig, ConfigStore, TokenRecord};
use crate::error::{translate, Error, Failure, Result, TransportFailure, TransportFailureKind};
use crate::operation::{translator, AuthScope, CommandResult, OperationDescriptor, OperationRegistry};

/// Client-credentials exchange for the metadata and write scopes
pub(crate) const ACCESS_TOKEN_OPERATION: &str = "getAccessToken";
/// Authorization-code exchange for the SSO scope
pub(crate) const SSO_TOKEN_OPERATION: &str = "getSsoToken";
/// Refresh-token exchange for the SSO scope
pub(crate) const SSO_REFRESH_OPERATION: &str = "refreshSsoToken";

/// Main Apidae client
///
/// Cheap to clone; clones share the token map and the transport.
#[derive(Clone)]
pub struct ApidaeClient {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    registry: OperationRegistry,
    pub(crate) store: ConfigStore,
    transport: Arc<dyn Transport>,
    pub(crate) auth: AuthInterceptor,
}

impl ApidaeClient {
    /// Create a client from an options object (merged over the defaults)
    pub fn new(options: &Value) -> Result<Self> {
        let config = ClientConfig::from_options(options)?;
        let transport = ReqwestTransport::from_config(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client sending through a custom transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let registry = OperationRegistry::builtin()?;
        Ok(Self::from_parts(config, registry, transport))
    }

    /// Assemble a client from already built parts
    pub fn from_parts(
        config: ClientConfig,
        registry: OperationRegistry,
        transport: Arc<dyn Transport>,
    ) -> Self {
        tracing::debug!(
            "Apidae client ready: {} operations, base URI {}",
            registry.len(),
            config.base_uri
        );
        Self {
            inner: Arc::new(Inner {
                registry,
                store: ConfigStore::new(config),
                transport,
                auth: AuthInterceptor::new(),
            }),
        }
    }

    /// Execute one named operation.
    ///
    /// `params` must be a JSON object (or `null` for no parameters).
    pub async fn execute(&self, operation: &str, params: Value) -> Result<CommandResult> {
        let span = tracing::info_span!(
            "dispatch",
            operation,
            request_id = %Uuid::new_v4()
        );
        self.inner.run(operation, params).instrument(span).await
    }

    /// Execute several operations concurrently, results in input order
    pub async fn execute_all<I, S>(&self, commands: I) -> Vec<Result<CommandResult>>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let futures = commands
            .into_iter()
            .map(|(operation, params)| async move { self.execute(operation.as_ref(), params).await });
        futures::future::join_all(futures).await
    }

    /// Blocking version for sync contexts
    ///
    /// Reuses the current tokio runtime when it is multi-threaded. Inside a
    /// current-thread runtime, or outside any runtime, the call runs on a
    /// temporary runtime (on its own thread in the former case).
    pub fn execute_blocking(&self, operation: &str, params: Value) -> Result<CommandResult> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(self.execute(operation, params)))
            },
            // The current thread drives its runtime and cannot block on it
            Ok(_) => std::thread::scope(|scope| {
                scope
                    .spawn(|| self.execute_on_temporary_runtime(operation, params))
                    .join()
                    .unwrap_or_else(|_| {
                        Err(blocking_failure(
                            operation,
                            TransportFailure::new(
                                TransportFailureKind::Other,
                                "blocking worker thread panicked",
                            ),
                        ))
                    })
            }),
            Err(_) => self.execute_on_temporary_runtime(operation, params),
        }
    }

    fn execute_on_temporary_runtime(&self, operation: &str, params: Value) -> Result<CommandResult> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                blocking_failure(
                    operation,
                    TransportFailure::with_source(
                        TransportFailureKind::Other,
                        "failed to start a runtime",
                        e,
                    ),
                )
            })?;
        runtime.block_on(self.execute(operation, params))
    }

    /// Read one configuration option; `None` when it is absent or null
    pub fn config(&self, key: &str) -> Option<Value> {
        self.inner.store.get(key)
    }

    /// Effective options the client was built with
    pub fn client_config(&self) -> &ClientConfig {
        self.inner.store.config()
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.inner.registry
    }

    /// Token currently stored for a scope
    pub fn token(&self, scope: AuthScope) -> Option<TokenRecord> {
        self.inner.store.token(scope)
    }

    /// SSO helpers (authorization URL, code exchange, refresh)
    pub fn sso(&self) -> SsoCapability<'_> {
        SsoCapability::new(self)
    }

    /// Export notification helpers
    pub fn exports(&self) -> ExportCapability<'_> {
        ExportCapability::new(self)
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }
}

fn blocking_failure(operation: &str, source: TransportFailure) -> Error {
    Error::Transport {
        operation: operation.to_string(),
        source,
    }
}

impl std::fmt::Debug for ApidaeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApidaeClient")
            .field("operations", &self.inner.registry.len())
            .field("store", &self.inner.store)
            .finish()
    }
}

impl Inner {
    async fn run(&self, operation: &str, params: Value) -> Result<CommandResult> {
        let descriptor = self.registry.lookup(operation)?;
        let params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::validation(
                    operation,
                    format!("parameters must be an object, got {other}"),
                ))
            },
        };

        match self.dispatch(&descriptor, &params).await {
            Ok(result) => {
                tracing::debug!("{} returned {} fields", operation, result.len());
                Ok(result)
            },
            Err(failure) => {
                let err = translate(operation, failure);
                tracing::error!("{} failed: {}", operation, err);
                Err(err)
            },
        }
    }

    async fn dispatch(
        &self,
        descriptor: &OperationDescriptor,
        params: &Map<String, Value>,
    ) -> std::result::Result<CommandResult, Failure> {
        let mut request = translator::build_request(descriptor, params, self.store.config())?;

        if let Some(token) = self.auth.resolve(descriptor.scope, &self.store, self).await? {
            AuthInterceptor::attach(&mut request, &token)?;
        }

        let response = self.transport.send(request).await?;
        if let Some(failure) = Failure::from_status(response.status, &response.body) {
            return Err(failure);
        }
        translator::decode_response(descriptor, &response.body)
    }

    /// Run a token endpoint operation and turn its answer into a record
    pub(crate) async fn grant(&self, operation: &str, params: Value) -> Result<TokenRecord> {
        let result = self.run(operation, params).await?;
        TokenRecord::from_grant(&result, Utc::now())
            .ok_or_else(|| Error::validation(operation, "token response carries no access_token"))
    }
}

#[async_trait]
impl CredentialExchange for Inner {
    async fn exchange(&self, scope: AuthScope, current: Option<TokenRecord>) -> Result<TokenRecord> {
        match scope {
            AuthScope::Metadata | AuthScope::Write => {
                self.grant(ACCESS_TOKEN_OPERATION, json!({ "scope": scope.wire_name() }))
                    .await
            },
            AuthScope::Sso => {
                let Some(refresh_token) = current.and_then(|record| record.refresh_token) else {
                    return Err(Error::Client {
                        operation: SSO_REFRESH_OPERATION.to_string(),
                        status: reqwest::StatusCode::UNAUTHORIZED,
                        message: "no valid SSO token; exchange an authorization code first".into(),
                        body: String::new(),
                    });
                };
                let record = self
                    .grant(SSO_REFRESH_OPERATION, json!({ "refresh_token": refresh_token }))
                    .await?;
                Ok(match record.refresh_token {
                    Some(_) => record,
                    None => record.with_refresh_token(refresh_token),
                })
            },
            AuthScope::None => Err(Error::validation(
                ACCESS_TOKEN_OPERATION,
                "public operations carry no token",
            )),
        }
    }
}
