//! Configuration Management
//!
//! Client options (defaults merged with caller overrides) and the access
//! token map keyed by auth scope. Option keys keep the API's historical
//! camelCase names so option files written for other Apidae clients load
//! unchanged.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::error::ConfigError;
use crate::operation::AuthScope;

pub const DEFAULT_BASE_URI: &str = "https://api.apidae-tourisme.com/";
pub const DEFAULT_SSO_BASE_URL: &str = "https://base.apidae-tourisme.com";
pub const DEFAULT_SSO_REDIRECT_URL: &str = "http://localhost/";
pub const DEFAULT_EXPORT_DIR: &str = "/tmp/sitraExports/";
pub const DEFAULT_COUNT: u32 = 20;

const ACCESS_TOKENS_KEY: &str = "accessTokens";

/// Tokens are treated as expired this long before their actual expiry
const TOKEN_EXPIRY_BUFFER: ChronoDuration = ChronoDuration::seconds(60);

/// Bearer token for one scope
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TokenRecordRepr")]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Build a record from an OAuth token endpoint response.
    ///
    /// `expires_in` is relative to `now`. Returns `None` when the response
    /// carries no usable `access_token`.
    pub fn from_grant(grant: &Map<String, Value>, now: DateTime<Utc>) -> Option<Self> {
        let access_token = grant
            .get("access_token")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())?;

        let mut record = TokenRecord::new(access_token);
        if let Some(refresh) = grant.get("refresh_token").and_then(|v| v.as_str()) {
            record.refresh_token = Some(refresh.to_string());
        }
        if let Some(expires_in) = grant.get("expires_in").and_then(value_as_i64) {
            record.expires_at = Some(now + ChronoDuration::seconds(expires_in));
        }
        Some(record)
    }

    /// Check if this token can still be sent
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + TOKEN_EXPIRY_BUFFER < expires_at,
            None => true,
        }
    }
}

// Tokens must never end up in logs
impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"***")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Accepted shapes for a token in the options: a bare access token string
/// or a token endpoint response.
#[derive(Deserialize)]
#[serde(untagged)]
enum TokenRecordRepr {
    Bare(String),
    Grant {
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default)]
        expires_in: Option<i64>,
        #[serde(default)]
        expires_at: Option<DateTime<Utc>>,
    },
}

impl From<TokenRecordRepr> for TokenRecord {
    fn from(repr: TokenRecordRepr) -> Self {
        match repr {
            TokenRecordRepr::Bare(access_token) => TokenRecord::new(access_token),
            TokenRecordRepr::Grant {
                access_token,
                refresh_token,
                expires_in,
                expires_at,
            } => TokenRecord {
                access_token,
                refresh_token,
                expires_at: expires_at
                    .or_else(|| expires_in.map(|secs| Utc::now() + ChronoDuration::seconds(secs))),
            },
        }
    }
}

/// Scope → token mapping
pub type AccessTokenMap = HashMap<AuthScope, TokenRecord>;

/// Merged client options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub base_uri: String,
    #[serde(deserialize_with = "string_or_number")]
    pub api_key: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub projet_id: Option<String>,

    // Auth for metadata and write scopes
    #[serde(rename = "OAuthClientId", deserialize_with = "string_or_number")]
    pub oauth_client_id: Option<String>,
    #[serde(rename = "OAuthSecret")]
    pub oauth_secret: Option<String>,

    pub export_dir: PathBuf,

    // For object lists
    pub response_fields: Vec<String>,
    pub locales: Vec<String>,
    pub count: u32,

    // For the HTTP transport; timeouts in seconds, 0 = none
    pub timeout: f64,
    pub connect_timeout: f64,
    pub proxy: Option<String>,
    pub verify: bool,

    // For SSO authentication
    pub sso_base_url: String,
    pub sso_redirect_url: String,
    #[serde(deserialize_with = "string_or_number")]
    pub sso_client_id: Option<String>,
    pub sso_secret: Option<String>,

    pub access_tokens: AccessTokenMap,

    /// Options without a dedicated field
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_uri: DEFAULT_BASE_URI.to_string(),
            api_key: None,
            projet_id: None,
            oauth_client_id: None,
            oauth_secret: None,
            export_dir: PathBuf::from(DEFAULT_EXPORT_DIR),
            response_fields: Vec::new(),
            locales: Vec::new(),
            count: DEFAULT_COUNT,
            timeout: 0.0,
            connect_timeout: 0.0,
            proxy: None,
            verify: true,
            sso_base_url: DEFAULT_SSO_BASE_URL.to_string(),
            sso_redirect_url: DEFAULT_SSO_REDIRECT_URL.to_string(),
            sso_client_id: None,
            sso_secret: None,
            access_tokens: AccessTokenMap::new(),
            extra: Map::new(),
        }
    }
}

impl ClientConfig {
    /// Built-in defaults as an options map
    pub fn default_options() -> Value {
        serde_json::to_value(Self::default()).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Merge caller options over the built-in defaults
    pub fn from_options(overrides: &Value) -> Result<Self, ConfigError> {
        Self::merge(&Self::default_options(), overrides)
    }

    /// Merge two options maps, `overrides` winning on identical keys.
    ///
    /// `accessTokens` is merged per scope so that seeding one token keeps
    /// the others.
    pub fn merge(defaults: &Value, overrides: &Value) -> Result<Self, ConfigError> {
        let Value::Object(defaults) = defaults else {
            return Err(ConfigError::NotAnObject);
        };
        let Value::Object(overrides) = overrides else {
            return Err(ConfigError::NotAnObject);
        };

        let mut merged = defaults.clone();
        for (key, value) in apply_aliases(overrides.clone()) {
            if key == ACCESS_TOKENS_KEY {
                if let (Some(Value::Object(existing)), Value::Object(incoming)) =
                    (merged.get_mut(ACCESS_TOKENS_KEY), &value)
                {
                    existing.extend(incoming.clone());
                    continue;
                }
            }
            merged.insert(key, value);
        }
        normalize_access_tokens(&mut merged);

        serde_json::from_value(Value::Object(merged)).map_err(ConfigError::Invalid)
    }

    /// Read one option by its key.
    ///
    /// `None` means the key is not set; a stored `false`, `0` or `""` is
    /// returned as such.
    pub fn get(&self, key: &str) -> Option<Value> {
        let value = match key {
            "baseUri" => Value::from(self.base_uri.as_str()),
            "apiKey" => Value::from(self.api_key.clone()?),
            "projetId" => Value::from(self.projet_id.clone()?),
            "OAuthClientId" => Value::from(self.oauth_client_id.clone()?),
            "OAuthSecret" => Value::from(self.oauth_secret.clone()?),
            "exportDir" => Value::from(self.export_dir.to_string_lossy().into_owned()),
            "responseFields" => Value::from(self.response_fields.clone()),
            "locales" => Value::from(self.locales.clone()),
            "count" => Value::from(self.count),
            "timeout" => Value::from(self.timeout),
            "connectTimeout" => Value::from(self.connect_timeout),
            "proxy" => Value::from(self.proxy.clone()?),
            "verify" => Value::from(self.verify),
            "ssoBaseUrl" => Value::from(self.sso_base_url.as_str()),
            "ssoRedirectUrl" => Value::from(self.sso_redirect_url.as_str()),
            "ssoClientId" => Value::from(self.sso_client_id.clone()?),
            "ssoSecret" => Value::from(self.sso_secret.clone()?),
            ACCESS_TOKENS_KEY => serde_json::to_value(&self.access_tokens).ok()?,
            other => self.extra.get(other)?.clone(),
        };

        if value.is_null() {
            None
        } else {
            Some(value)
        }
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        seconds(self.timeout)
    }

    pub fn connect_timeout_duration(&self) -> Option<Duration> {
        seconds(self.connect_timeout)
    }
}

/// Rewrite historical option aliases before merging
fn apply_aliases(mut options: Map<String, Value>) -> Map<String, Value> {
    if let Some(project_id) = options.get("projectId").cloned() {
        options.insert("projetId".to_string(), project_id);
    }

    if let Some(sso_token) = options.remove("ssoToken") {
        let tokens = options
            .entry(ACCESS_TOKENS_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !tokens.is_object() {
            *tokens = Value::Object(Map::new());
        }
        if let Value::Object(tokens) = tokens {
            tokens.insert(AuthScope::Sso.wire_name().to_string(), sso_token);
        }
    }

    options
}

/// Keep only the tokens of known scopes; a null map counts as empty
fn normalize_access_tokens(options: &mut Map<String, Value>) {
    let Some(tokens) = options.get_mut(ACCESS_TOKENS_KEY) else {
        return;
    };
    if tokens.is_null() {
        *tokens = Value::Object(Map::new());
        return;
    }
    if let Value::Object(tokens) = tokens {
        tokens.retain(|scope, _| match AuthScope::from_wire_name(scope) {
            Some(scope) if scope != AuthScope::None => true,
            _ => {
                tracing::warn!("Ignoring access token for unknown scope {}", scope);
                false
            },
        });
    }
}

fn seconds(value: f64) -> Option<Duration> {
    if value.is_finite() && value > 0.0 {
        Some(Duration::from_secs_f64(value))
    } else {
        None
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or a number, got {other}"
        ))),
    }
}

/// Runtime configuration shared by every dispatch.
///
/// Options are read-only; the token map is the only mutable part.
pub struct ConfigStore {
    config: ClientConfig,
    tokens: RwLock<AccessTokenMap>,
}

impl ConfigStore {
    pub fn new(mut config: ClientConfig) -> Self {
        let mut tokens = std::mem::take(&mut config.access_tokens);
        tokens.remove(&AuthScope::None);
        Self {
            config,
            tokens: RwLock::new(tokens),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Read one option; `accessTokens` reflects the live token map
    pub fn get(&self, key: &str) -> Option<Value> {
        if key == ACCESS_TOKENS_KEY {
            let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
            return serde_json::to_value(&*tokens).ok();
        }
        self.config.get(key)
    }

    pub fn token(&self, scope: AuthScope) -> Option<TokenRecord> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        tokens.get(&scope).cloned()
    }

    pub fn set_token(&self, scope: AuthScope, record: TokenRecord) {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        tokens.insert(scope, record);
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scopes: Vec<AuthScope> = self
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        f.debug_struct("ConfigStore")
            .field("base_uri", &self.config.base_uri)
            .field("token_scopes", &scopes)
            .finish_non_exhaustive()
    }
}

/// Default location of the options file
pub fn default_options_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("apidae").join("config.yaml"))
}

/// Load an options file; `.json` files are read as JSON, anything else as YAML
pub fn load_options_file(path: &Path) -> Result<Value, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;

    let parse_error = |message: String| ConfigError::ParseFile {
        path: path.to_path_buf(),
        message,
    };

    let value: Value = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?
    } else {
        serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?
    };

    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Map::new())),
        _ => Err(ConfigError::NotAnObject),
    }
}
