//! Operation abstraction layer
//!
//! Remote API calls are data: each one is an [`OperationDescriptor`] loaded
//! from JSON files embedded at compile time, so operations can be added
//! without code changes.
//!
//! # Architecture
//!
//! - [`descriptor`] - Descriptor types (method, URI template, parameters, scope)
//! - [`registry`] - Merges descriptor groups into one name → descriptor table
//! - [`translator`] - Builds transport requests and decodes response bodies
//!
//! # Operation Groups
//!
//! Groups live under `src/operations/`, one JSON file per resource family:
//! touristic objects, metadata, exports, search, agenda, reference, SSO,
//! user, member, edit and auth (credential exchange).

pub mod descriptor;
pub mod registry;
mod result;
pub mod translator;

pub use descriptor::{
    AuthScope, BasicAuth, HttpMethod, OperationDescriptor, ParamDef, ParamLocation, ParamType,
    ResponseMode,
};
pub use registry::OperationRegistry;
pub use result::CommandResult;
