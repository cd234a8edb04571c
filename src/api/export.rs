//! Export notifications
//!
//! When an export finishes, Apidae calls the project's webhook with a small
//! form-encoded payload. Once the archive has been processed the export must
//! be confirmed, otherwise the next export is not produced.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use url::Url;

use super::client::ApidaeClient;
use crate::error::{Error, Result};
use crate::operation::CommandResult;

const CONFIRM_OPERATION: &str = "confirmExport";
const STATUS_SUCCESS: &str = "SUCCESS";

/// Payload of the export-finished webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportNotification {
    #[serde(default, deserialize_with = "crate::config::string_or_number")]
    pub projet_id: Option<String>,
    /// `SUCCESS` or `ERROR`
    pub statut: String,
    /// One-shot export (as opposed to the periodic one)
    #[serde(default, deserialize_with = "lenient_bool")]
    pub ponctuel: bool,
    /// Full export replacing all previous data
    #[serde(default, deserialize_with = "lenient_bool")]
    pub reinitialisation: bool,
    #[serde(default)]
    pub url_confirmation_export: String,
    #[serde(default)]
    pub url_recuperation: String,
}

impl ExportNotification {
    /// Parse the webhook body as sent by Apidae (form-encoded)
    pub fn from_form(body: &str) -> Result<Self> {
        let fields: Map<String, Value> = url::form_urlencoded::parse(body.as_bytes())
            .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
            .collect();
        serde_json::from_value(Value::Object(fields))
            .map_err(|e| Error::validation(CONFIRM_OPERATION, format!("invalid export notification: {e}")))
    }

    /// Parse a JSON rendition of the webhook body
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|e| Error::validation(CONFIRM_OPERATION, format!("invalid export notification: {e}")))
    }

    pub fn is_success(&self) -> bool {
        self.statut.eq_ignore_ascii_case(STATUS_SUCCESS)
    }

    /// `hash` query parameter of the confirmation URL
    pub fn confirmation_hash(&self) -> Option<String> {
        let url = Url::parse(&self.url_confirmation_export).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == "hash")
            .map(|(_, value)| value.into_owned())
            .filter(|hash| !hash.is_empty())
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        Value::Number(n) => Ok(n.as_i64() == Some(1)),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!("expected a boolean, got `{other}`"))),
        },
        other => Err(serde::de::Error::custom(format!("expected a boolean, got {other}"))),
    }
}

/// Export helpers bound to a client
pub struct ExportCapability<'a> {
    client: &'a ApidaeClient,
}

impl<'a> ExportCapability<'a> {
    pub(crate) fn new(client: &'a ApidaeClient) -> Self {
        Self { client }
    }

    /// Directory export archives are downloaded into
    pub fn export_dir(&self) -> &Path {
        &self.client.client_config().export_dir
    }

    /// Acknowledge a processed export
    pub async fn confirm(&self, notification: &ExportNotification) -> Result<CommandResult> {
        let hash = notification.confirmation_hash().ok_or_else(|| {
            Error::validation(CONFIRM_OPERATION, "notification carries no confirmation hash")
        })?;
        tracing::info!("Confirming export {}", hash);
        self.client.execute(CONFIRM_OPERATION, json!({ "hash": hash })).await
    }
}
