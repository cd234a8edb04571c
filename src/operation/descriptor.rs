//! Operation descriptors
//!
//! Declarative metadata for one remote call. Descriptors are deserialized from
//! the embedded JSON catalog and are never mutated after registration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

use super::translator::template_placeholders;
use crate::error::RegistryError;

/// HTTP verb used by an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Permission category an operation needs a bearer token for.
///
/// Serialized with the API's own scope names, which are also the keys of the
/// `accessTokens` configuration map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AuthScope {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "api_metadonnees")]
    Metadata,
    #[serde(rename = "sso")]
    Sso,
    #[serde(rename = "api_ecriture")]
    Write,
}

impl AuthScope {
    /// Scopes that carry a token
    pub const TOKEN_SCOPES: [AuthScope; 3] = [AuthScope::Metadata, AuthScope::Sso, AuthScope::Write];

    pub fn wire_name(self) -> &'static str {
        match self {
            AuthScope::None => "none",
            AuthScope::Metadata => "api_metadonnees",
            AuthScope::Sso => "sso",
            AuthScope::Write => "api_ecriture",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(AuthScope::None),
            "api_metadonnees" => Some(AuthScope::Metadata),
            "sso" => Some(AuthScope::Sso),
            "api_ecriture" => Some(AuthScope::Write),
            _ => None,
        }
    }
}

impl fmt::Display for AuthScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Client credential pair sent as HTTP basic auth on credential exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BasicAuth {
    /// `OAuthClientId` / `OAuthSecret`
    OauthClient,
    /// `ssoClientId` / `ssoSecret`
    SsoClient,
}

/// Where a parameter goes in the outgoing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamLocation {
    /// URI template placeholder
    Uri,
    /// Query string
    Query,
    /// Member of the JSON document sent as the `query` query parameter
    QueryJson,
    /// Member of a JSON request body
    Json,
    /// Field of an urlencoded form body
    Form,
}

/// Declared parameter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    #[default]
    Any,
}

impl ParamType {
    /// Coerce a caller value to this type.
    ///
    /// Scalars given as strings (as they come from the command line) are
    /// parsed; a comma-separated string becomes an array.
    pub fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ParamType::Any, v) => Some(v.clone()),
            (ParamType::String, Value::String(_)) => Some(value.clone()),
            (ParamType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ParamType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (ParamType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Some(value.clone())
            },
            (ParamType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (ParamType::Number, Value::Number(_)) => Some(value.clone()),
            (ParamType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            (ParamType::Boolean, Value::Bool(_)) => Some(value.clone()),
            (ParamType::Boolean, Value::String(s)) => match s.as_str() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            (ParamType::Array, Value::Array(_)) => Some(value.clone()),
            (ParamType::Array, Value::String(s)) => Some(Value::Array(
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
            )),
            (ParamType::Array, Value::Number(_)) => Some(Value::Array(vec![value.clone()])),
            (ParamType::Object, Value::Object(_)) => Some(value.clone()),
            (ParamType::Object, Value::String(s)) => match serde_json::from_str(s) {
                Ok(parsed @ Value::Object(_)) => Some(parsed),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::String => "a string",
            ParamType::Integer => "an integer",
            ParamType::Number => "a number",
            ParamType::Boolean => "a boolean",
            ParamType::Array => "an array",
            ParamType::Object => "an object",
            ParamType::Any => "any value",
        };
        f.write_str(name)
    }
}

/// Parameter schema entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamDef {
    pub name: String,
    pub location: ParamLocation,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "type")]
    pub kind: ParamType,
    /// Name on the wire when it differs from `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_as: Option<String>,
    /// Configuration key supplying the value when the caller omits it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamDef {
    pub fn wire_name(&self) -> &str {
        self.sent_as.as_deref().unwrap_or(&self.name)
    }
}

/// How a response body becomes a [`super::CommandResult`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ResponseMode {
    /// Whole body parsed as JSON
    #[default]
    Raw,
    /// JSON envelope that must carry a top-level `field`
    Field { field: String },
    /// Body kept as text under `response`
    Body,
}

/// Declarative description of one remote operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    pub name: String,
    pub http_method: HttpMethod,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParamDef>,
    /// Location for caller parameters the schema does not declare
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_parameters: Option<ParamLocation>,
    #[serde(default)]
    pub response: ResponseMode,
    #[serde(default)]
    pub scope: AuthScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,
}

impl OperationDescriptor {
    pub fn parameter(&self, name: &str) -> Option<&ParamDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Check internal consistency of the descriptor
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidDescriptor {
            operation: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("operation name is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(invalid(format!("parameter `{}` is declared twice", param.name)));
            }
        }

        let placeholders = template_placeholders(&self.uri).map_err(invalid)?;
        for placeholder in &placeholders {
            match self.parameter(&placeholder.name) {
                Some(p) if p.location == ParamLocation::Uri => {},
                _ => {
                    return Err(invalid(format!(
                        "placeholder `{}` has no matching uri parameter",
                        placeholder.name
                    )))
                },
            }
        }
        for param in self.parameters.iter().filter(|p| p.location == ParamLocation::Uri) {
            if !placeholders.iter().any(|p| p.name == param.name) {
                return Err(invalid(format!(
                    "uri parameter `{}` does not appear in `{}`",
                    param.name, self.uri
                )));
            }
        }

        if let ResponseMode::Field { field } = &self.response {
            if field.is_empty() {
                return Err(invalid("response field name is empty".to_string()));
            }
        }

        if self.additional_parameters == Some(ParamLocation::Uri) {
            return Err(invalid("additional parameters cannot go in the uri".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(value: Value) -> OperationDescriptor {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_deserialize_defaults() {
        let op = descriptor(json!({
            "name": "getObjectById",
            "httpMethod": "GET",
            "uri": "api/v002/objet-touristique/get-by-id/{id}",
            "parameters": [{"name": "id", "location": "uri", "required": true, "type": "integer"}]
        }));

        assert_eq!(op.http_method, HttpMethod::Get);
        assert_eq!(op.scope, AuthScope::None);
        assert_eq!(op.response, ResponseMode::Raw);
        assert!(op.validate().is_ok());
    }

    #[test]
    fn test_scope_wire_names() {
        let op = descriptor(json!({
            "name": "getMetadata",
            "httpMethod": "GET",
            "uri": "api/v002/metadata",
            "scope": "api_metadonnees",
            "response": {"mode": "field", "field": "nodeId"}
        }));
        assert_eq!(op.scope, AuthScope::Metadata);
        assert_eq!(
            op.response,
            ResponseMode::Field {
                field: "nodeId".to_string()
            }
        );
        assert_eq!(AuthScope::from_wire_name("api_ecriture"), Some(AuthScope::Write));
        assert_eq!(AuthScope::from_wire_name("unknown"), None);
    }

    #[test]
    fn test_validate_rejects_undeclared_placeholder() {
        let op = descriptor(json!({
            "name": "broken",
            "httpMethod": "GET",
            "uri": "api/{id}"
        }));
        assert!(matches!(
            op.validate(),
            Err(RegistryError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unused_uri_param() {
        let op = descriptor(json!({
            "name": "broken",
            "httpMethod": "GET",
            "uri": "api/objects",
            "parameters": [{"name": "id", "location": "uri"}]
        }));
        assert!(op.validate().is_err());
    }

    #[test]
    fn test_coerce_from_command_line_strings() {
        assert_eq!(ParamType::Integer.coerce(&json!("100")), Some(json!(100)));
        assert_eq!(ParamType::Integer.coerce(&json!("abc")), None);
        assert_eq!(ParamType::Boolean.coerce(&json!("true")), Some(json!(true)));
        assert_eq!(ParamType::Array.coerce(&json!("fr, en")), Some(json!(["fr", "en"])));
        assert_eq!(ParamType::String.coerce(&json!(42)), Some(json!("42")));
        assert_eq!(
            ParamType::Object.coerce(&json!(r#"{"a":1}"#)),
            Some(json!({"a": 1}))
        );
        assert_eq!(ParamType::Object.coerce(&json!([1])), None);
    }
}
