//! Apidae API access
//!
//! - [`client`] - Dispatcher tying registry, auth and transport together
//! - [`auth`] - Per-scope bearer token resolution
//! - [`http`] - Transport trait and its reqwest implementation
//! - [`sso`] / [`export`] - Helpers for the SSO flow and export webhooks

pub(crate) mod auth;
pub mod client;
pub mod export;
pub mod http;
pub mod sso;

pub use client::ApidaeClient;
pub use export::{ExportCapability, ExportNotification};
pub use http::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use sso::SsoCapability;
