//! HTTP transport for API calls
//!
//! The dispatcher only sees the [`Transport`] trait; [`ReqwestTransport`] is
//! the default implementation, tuned from the client options.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ConfigError, TransportFailure};

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| c.is_control() && c != ' ', "")
}

/// Request handed to a transport
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

/// Response returned by a transport, body fully buffered
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// Send one request and buffer the response.
///
/// Implementations report non-2xx statuses as ordinary responses; only
/// failures below HTTP (connect, TLS, timeout, body read) are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure>;
}

/// reqwest-backed transport
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport honouring timeout, proxy and TLS options
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let mut builder = Client::builder().user_agent(concat!("apidae/", env!("CARGO_PKG_VERSION")));

        if let Some(timeout) = config.timeout_duration() {
            builder = builder.timeout(timeout);
        }
        if let Some(connect_timeout) = config.connect_timeout_duration() {
            builder = builder.connect_timeout(connect_timeout);
        }
        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy).map_err(ConfigError::Transport)?);
        }
        if !config.verify {
            tracing::warn!("TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(ConfigError::Transport)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        // The query string carries the API key, keep it out of the logs
        tracing::debug!("{} {}", request.method, request.url.path());

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        if !status.is_success() {
            tracing::warn!(
                "API error: {} - {}",
                status,
                sanitize_for_log(&String::from_utf8_lossy(&body))
            );
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let body = "é".repeat(150);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.contains("[truncated, 300 bytes total]"));
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_for_log("a\nb\tc d"), "abc d");
    }

    #[test]
    fn test_transport_from_config() {
        let config = ClientConfig::from_options(&serde_json::json!({
            "timeout": 5,
            "connectTimeout": 1,
            "verify": false
        }))
        .unwrap();
        assert!(ReqwestTransport::from_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_proxy_is_config_error() {
        let config = ClientConfig::from_options(&serde_json::json!({"proxy": "::not a url::"})).unwrap();
        assert!(matches!(
            ReqwestTransport::from_config(&config),
            Err(ConfigError::Transport(_))
        ));
    }
}
