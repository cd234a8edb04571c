//! Error types and failure classification
//!
//! Every dispatch failure ends up as exactly one [`Error`] variant. The four
//! runtime kinds (`Validation`, `Client`, `Server`, `Transport`) come out of
//! [`translate`]; `Registry` and `Config` are construction or lookup defects.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Client,
    Server,
    Transport,
    Registry,
    Config,
}

/// Error returned by every client operation
#[derive(Debug, Error)]
pub enum Error {
    /// The command or the response body does not match its descriptor.
    #[error("invalid data for operation `{operation}`: {message}")]
    Validation { operation: String, message: String },

    /// The API rejected the request (4xx).
    #[error("operation `{operation}` rejected with {status}: {message}")]
    Client {
        operation: String,
        status: StatusCode,
        message: String,
        body: String,
    },

    /// The API failed internally (5xx).
    #[error("operation `{operation}` failed with {status}: {message}")]
    Server {
        operation: String,
        status: StatusCode,
        message: String,
        body: String,
    },

    /// The request never reliably reached the API or came back from it.
    #[error("transport failure during `{operation}`: {source}")]
    Transport {
        operation: String,
        #[source]
        source: TransportFailure,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Client { .. } => ErrorKind::Client,
            Error::Server { .. } => ErrorKind::Server,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Registry(_) => ErrorKind::Registry,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// HTTP status of a `Client` or `Server` error
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Client { status, .. } | Error::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn validation(operation: &str, message: impl Into<String>) -> Self {
        Error::Validation {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

/// Operation table defects, raised at construction or lookup time
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("operation `{name}` from group `{group}` is already registered by group `{existing}`")]
    DuplicateOperation {
        name: String,
        group: String,
        existing: String,
    },

    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    #[error("operation `{operation}` is invalid: {reason}")]
    InvalidDescriptor { operation: String, reason: String },

    #[error("failed to parse operation group `{group}`: {source}")]
    Parse {
        group: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Invalid construction options or missing credentials
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration options must be a JSON object")]
    NotAnObject,

    #[error("invalid configuration: {0}")]
    Invalid(#[source] serde_json::Error),

    #[error("invalid base URI `{uri}`: {source}")]
    InvalidBaseUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("`{key}` must be configured to {purpose}")]
    MissingCredential {
        key: &'static str,
        purpose: &'static str,
    },

    #[error("failed to build HTTP transport: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("failed to read options file {}: {source}", path.display())]
    ReadFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse options file {}: {message}", path.display())]
    ParseFile {
        path: std::path::PathBuf,
        message: String,
    },
}

/// What went wrong below the HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailureKind {
    Connect,
    Timeout,
    Request,
    Body,
    Other,
}

/// Failure reported by a [`crate::api::http::Transport`]
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportFailure {
    kind: TransportFailureKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportFailure {
    pub fn new(kind: TransportFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: TransportFailureKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> TransportFailureKind {
        self.kind
    }
}

impl From<reqwest::Error> for TransportFailure {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportFailureKind::Timeout
        } else if err.is_connect() {
            TransportFailureKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportFailureKind::Body
        } else if err.is_request() || err.is_builder() {
            TransportFailureKind::Request
        } else {
            TransportFailureKind::Other
        };
        let message = err.to_string();
        Self::with_source(kind, message, err)
    }
}

/// Unclassified failure collected while running one dispatch
#[derive(Debug)]
pub(crate) enum Failure {
    /// Malformed or unexpected body, or a command that does not fit its descriptor
    Format(String),
    ClientStatus { status: StatusCode, body: Vec<u8> },
    ServerStatus { status: StatusCode, body: Vec<u8> },
    Domain(Error),
    Transport(TransportFailure),
}

impl Failure {
    /// Failure for an error status; `None` for statuses that decode normally.
    pub(crate) fn from_status(status: StatusCode, body: &[u8]) -> Option<Self> {
        if status.is_client_error() {
            Some(Failure::ClientStatus {
                status,
                body: body.to_vec(),
            })
        } else if status.is_server_error() {
            Some(Failure::ServerStatus {
                status,
                body: body.to_vec(),
            })
        } else {
            None
        }
    }
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        Failure::Domain(err)
    }
}

impl From<TransportFailure> for Failure {
    fn from(err: TransportFailure) -> Self {
        Failure::Transport(err)
    }
}

/// Classify a dispatch failure.
///
/// Arms are listed in priority order: format problems first, then 4xx, 5xx,
/// already classified errors and finally transport failures.
pub(crate) fn translate(operation: &str, failure: Failure) -> Error {
    match failure {
        Failure::Format(message) => Error::validation(operation, message),
        Failure::ClientStatus { status, body } => Error::Client {
            operation: operation.to_string(),
            status,
            message: status_message(status, &body),
            body: String::from_utf8_lossy(&body).into_owned(),
        },
        Failure::ServerStatus { status, body } => Error::Server {
            operation: operation.to_string(),
            status,
            message: status_message(status, &body),
            body: String::from_utf8_lossy(&body).into_owned(),
        },
        Failure::Domain(err) => err,
        Failure::Transport(source) => Error::Transport {
            operation: operation.to_string(),
            source,
        },
    }
}

/// Best human-readable message from an error body.
///
/// The API answers errors with `{"errorType": .., "message": ..}`; the OAuth
/// endpoints with `{"error": .., "error_description": ..}`.
fn status_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) {
        for key in ["message", "error_description", "error", "errorType"] {
            if let Some(msg) = map.get(key).and_then(|v| v.as_str()) {
                if !msg.is_empty() {
                    return msg.to_string();
                }
            }
        }
    }
    status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_failure_is_validation() {
        let err = translate("getMetadata", Failure::Format("not JSON".into()));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("getMetadata"));
    }

    #[test]
    fn test_status_classification() {
        let not_found = Failure::from_status(StatusCode::NOT_FOUND, b"").unwrap();
        let err = translate("getObjectById", not_found);
        assert_eq!(err.kind(), ErrorKind::Client);
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));

        let unavailable = Failure::from_status(StatusCode::SERVICE_UNAVAILABLE, b"").unwrap();
        assert_eq!(translate("x", unavailable).kind(), ErrorKind::Server);
    }

    #[test]
    fn test_success_and_redirect_are_not_failures() {
        assert!(Failure::from_status(StatusCode::OK, b"{}").is_none());
        assert!(Failure::from_status(StatusCode::NOT_MODIFIED, b"").is_none());
    }

    #[test]
    fn test_domain_error_passes_through() {
        let original = Error::Registry(RegistryError::UnknownOperation("nope".into()));
        let err = translate("nope", Failure::Domain(original));
        assert!(matches!(
            err,
            Error::Registry(RegistryError::UnknownOperation(ref name)) if name == "nope"
        ));
    }

    #[test]
    fn test_transport_failure_keeps_source_kind() {
        let failure = TransportFailure::new(TransportFailureKind::Timeout, "timed out");
        let err = translate("searchObject", failure.into());
        match err {
            Error::Transport { source, .. } => {
                assert_eq!(source.kind(), TransportFailureKind::Timeout)
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_status_message_prefers_api_message() {
        let body = br#"{"errorType":"OBJET_TOURISTIQUE_NOT_FOUND","message":"Objet introuvable"}"#;
        assert_eq!(status_message(StatusCode::NOT_FOUND, body), "Objet introuvable");

        let oauth = br#"{"error":"invalid_client","error_description":"Bad client credentials"}"#;
        assert_eq!(
            status_message(StatusCode::UNAUTHORIZED, oauth),
            "Bad client credentials"
        );

        assert_eq!(status_message(StatusCode::BAD_GATEWAY, b"<html>"), "Bad Gateway");
    }
}
