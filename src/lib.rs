//! apidae - client for the Apidae tourism API
//!
//! Remote operations are described as data (see [`operation`]) and executed
//! by name through [`ApidaeClient::execute`]:
//!
//! ```no_run
//! # async fn run() -> apidae::Result<()> {
//! use serde_json::json;
//!
//! let client = apidae::ApidaeClient::new(&json!({"apiKey": "k1", "projetId": 42}))?;
//! let object = client.execute("getObjectById", json!({"id": 100})).await?;
//! println!("{}", object["nom"]);
//! # Ok(())
//! # }
//! ```
//!
//! Operations whose scope requires a bearer token (metadata, SSO, write) get
//! one transparently; failures come back as one [`Error`] variant.

pub mod api;
pub mod config;
pub mod error;
pub mod operation;

pub use api::{ApidaeClient, ExportNotification, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use config::{ClientConfig, TokenRecord};
pub use error::{ConfigError, Error, ErrorKind, RegistryError, Result, TransportFailure, TransportFailureKind};
pub use operation::{AuthScope, CommandResult, OperationDescriptor, OperationRegistry};
