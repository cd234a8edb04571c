//! Request/Response Translator
//!
//! Turns a descriptor plus caller parameters into an [`HttpRequest`], and a
//! response body back into a [`CommandResult`].
//!
//! URI templates use `{name}` for a required path segment and `{/name}` for
//! an optional one that expands to `/value` or to nothing.

use base64::{engine::general_purpose, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{Map, Value};
use std::collections::HashMap;
use url::Url;

use super::descriptor::{BasicAuth, OperationDescriptor, ParamLocation, ResponseMode};
use super::result::CommandResult;
use crate::api::http::HttpRequest;
use crate::config::ClientConfig;
use crate::error::{ConfigError, Error, Failure};

/// Name of the query parameter carrying `queryJson` parameters
const QUERY_JSON_PARAM: &str = "query";

/// Placeholder found in a URI template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    pub optional: bool,
}

enum Segment<'a> {
    Literal(&'a str),
    Var(Placeholder),
}

fn parse_template(template: &str) -> Result<Vec<Segment<'_>>, String> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        if start > 0 {
            segments.push(Segment::Literal(&rest[..start]));
        }
        let Some(len) = rest[start..].find('}') else {
            return Err(format!("unclosed placeholder in `{template}`"));
        };
        let inner = &rest[start + 1..start + len];
        let (name, optional) = match inner.strip_prefix('/') {
            Some(name) => (name, true),
            None => (inner, false),
        };
        if name.is_empty() || name.contains(&['{', '/'][..]) {
            return Err(format!("invalid placeholder `{{{inner}}}` in `{template}`"));
        }
        segments.push(Segment::Var(Placeholder {
            name: name.to_string(),
            optional,
        }));
        rest = &rest[start + len + 1..];
    }

    if rest.contains('}') {
        return Err(format!("unbalanced `}}` in `{template}`"));
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}

/// List the placeholders of a URI template
pub fn template_placeholders(template: &str) -> Result<Vec<Placeholder>, String> {
    Ok(parse_template(template)?
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Var(placeholder) => Some(placeholder),
            Segment::Literal(_) => None,
        })
        .collect())
}

/// Expand a URI template; values are percent-encoded
pub fn expand_template(template: &str, values: &HashMap<String, String>) -> Result<String, String> {
    let mut expanded = String::with_capacity(template.len());

    for segment in parse_template(template)? {
        match segment {
            Segment::Literal(text) => expanded.push_str(text),
            Segment::Var(Placeholder { name, optional }) => match values.get(&name) {
                Some(value) if optional => {
                    expanded.push('/');
                    expanded.push_str(&urlencoding::encode(value));
                },
                Some(value) => expanded.push_str(&urlencoding::encode(value)),
                None if optional => {},
                None => return Err(format!("missing value for uri parameter `{name}`")),
            },
        }
    }

    Ok(expanded)
}

/// Render a parameter value for a query string, form field or path segment
fn wire_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(items) => items.iter().map(wire_string).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

/// Whether a config default carries something worth sending
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

#[derive(Default)]
struct Placement {
    uri: HashMap<String, String>,
    query: Vec<(String, String)>,
    query_json: Map<String, Value>,
    json: Map<String, Value>,
    form: Vec<(String, String)>,
}

impl Placement {
    fn place(&mut self, location: ParamLocation, name: &str, wire_name: &str, value: Value) {
        match location {
            ParamLocation::Uri => {
                self.uri.insert(name.to_string(), wire_string(&value));
            },
            ParamLocation::Query => self.query.push((wire_name.to_string(), wire_string(&value))),
            ParamLocation::QueryJson => {
                self.query_json.insert(wire_name.to_string(), value);
            },
            ParamLocation::Json => {
                self.json.insert(wire_name.to_string(), value);
            },
            ParamLocation::Form => self.form.push((wire_name.to_string(), wire_string(&value))),
        }
    }
}

fn resolve_url(config: &ClientConfig, path: &str) -> Result<Url, Failure> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Url::parse(path).map_err(|e| Failure::Format(format!("invalid URL `{path}`: {e}")));
    }

    let base = Url::parse(&config.base_uri).map_err(|source| {
        Error::from(ConfigError::InvalidBaseUri {
            uri: config.base_uri.clone(),
            source,
        })
    })?;
    base.join(path.trim_start_matches('/'))
        .map_err(|e| Failure::Format(format!("invalid path `{path}`: {e}")))
}

fn basic_auth_header(kind: BasicAuth, config: &ClientConfig) -> Result<HeaderValue, Failure> {
    let (id, secret, id_key, secret_key, purpose) = match kind {
        BasicAuth::OauthClient => (
            config.oauth_client_id.as_deref(),
            config.oauth_secret.as_deref(),
            "OAuthClientId",
            "OAuthSecret",
            "request metadata or write tokens",
        ),
        BasicAuth::SsoClient => (
            config.sso_client_id.as_deref(),
            config.sso_secret.as_deref(),
            "ssoClientId",
            "ssoSecret",
            "request SSO tokens",
        ),
    };

    let missing = |key| Error::from(ConfigError::MissingCredential { key, purpose });
    let id = id.ok_or_else(|| missing(id_key))?;
    let secret = secret.ok_or_else(|| missing(secret_key))?;

    let encoded = general_purpose::STANDARD.encode(format!("{id}:{secret}"));
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .map_err(|_| Failure::Format("client credentials are not a valid header".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Build the transport request for one command
pub(crate) fn build_request(
    descriptor: &OperationDescriptor,
    params: &Map<String, Value>,
    config: &ClientConfig,
) -> Result<HttpRequest, Failure> {
    let mut placement = Placement::default();

    for def in &descriptor.parameters {
        let supplied = params.get(&def.name).filter(|v| !v.is_null()).cloned();
        let value = supplied.or_else(|| def.default.clone()).or_else(|| {
            def.config_default
                .as_deref()
                .and_then(|key| config.get(key))
                .filter(is_present)
        });

        let Some(value) = value else {
            if def.required {
                return Err(Failure::Format(format!(
                    "missing required parameter `{}`",
                    def.name
                )));
            }
            continue;
        };

        let value = def.kind.coerce(&value).ok_or_else(|| {
            Failure::Format(format!("parameter `{}` must be {}", def.name, def.kind))
        })?;

        // An empty path segment would address another endpoint
        if def.location == ParamLocation::Uri && wire_string(&value).is_empty() {
            if def.required {
                return Err(Failure::Format(format!(
                    "uri parameter `{}` must not be empty",
                    def.name
                )));
            }
            continue;
        }
        placement.place(def.location, &def.name, def.wire_name(), value);
    }

    for (name, value) in params {
        if descriptor.parameter(name).is_some() || value.is_null() {
            continue;
        }
        match descriptor.additional_parameters {
            Some(location) => placement.place(location, name, name, value.clone()),
            None => tracing::debug!(
                "Dropping undeclared parameter `{}` for {}",
                name,
                descriptor.name
            ),
        }
    }

    let path = expand_template(&descriptor.uri, &placement.uri).map_err(Failure::Format)?;
    let mut url = resolve_url(config, &path)?;

    if !placement.query.is_empty() || !placement.query_json.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &placement.query {
            pairs.append_pair(key, value);
        }
        if !placement.query_json.is_empty() {
            pairs.append_pair(
                QUERY_JSON_PARAM,
                &Value::Object(placement.query_json).to_string(),
            );
        }
    }

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    if let Some(kind) = descriptor.basic_auth {
        headers.insert(AUTHORIZATION, basic_auth_header(kind, config)?);
    }

    let body = if !placement.json.is_empty() {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Some(Value::Object(placement.json).to_string().into_bytes())
    } else if !placement.form.is_empty() {
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&placement.form)
            .finish();
        Some(encoded.into_bytes())
    } else {
        None
    };

    Ok(HttpRequest {
        method: descriptor.http_method.as_reqwest(),
        url,
        headers,
        body,
    })
}

/// Decode a successful response body according to the descriptor
pub(crate) fn decode_response(
    descriptor: &OperationDescriptor,
    body: &[u8],
) -> Result<CommandResult, Failure> {
    match &descriptor.response {
        ResponseMode::Body => {
            let mut map = Map::new();
            map.insert(
                "response".to_string(),
                Value::String(String::from_utf8_lossy(body).into_owned()),
            );
            Ok(CommandResult::from(map))
        },
        ResponseMode::Raw => {
            if body.iter().all(u8::is_ascii_whitespace) {
                return Ok(CommandResult::default());
            }
            let value: Value = serde_json::from_slice(body)
                .map_err(|e| Failure::Format(format!("response is not valid JSON: {e}")))?;
            Ok(CommandResult::from_value(value))
        },
        ResponseMode::Field { field } => {
            let value: Value = serde_json::from_slice(body).map_err(|_| {
                Failure::Format(format!(
                    "expected a JSON document with a `{field}` field, got {} bytes of non-JSON content",
                    body.len()
                ))
            })?;
            match value {
                Value::Object(map) if map.contains_key(field) => Ok(CommandResult::from(map)),
                _ => Err(Failure::Format(format!("response has no `{field}` field"))),
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(value: Value) -> OperationDescriptor {
        serde_json::from_value(value).unwrap()
    }

    fn config(options: Value) -> ClientConfig {
        ClientConfig::from_options(&options).unwrap()
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn object_by_id() -> OperationDescriptor {
        descriptor(json!({
            "name": "getObjectById",
            "httpMethod": "GET",
            "uri": "api/v002/objet-touristique/get-by-id/{id}",
            "parameters": [
                {"name": "id", "location": "uri", "required": true, "type": "integer"},
                {"name": "apiKey", "location": "query", "required": true, "configDefault": "apiKey"},
                {"name": "projetId", "location": "query", "required": true, "configDefault": "projetId"},
                {"name": "responseFields", "location": "query", "type": "array", "configDefault": "responseFields"},
                {"name": "locales", "location": "query", "type": "array", "configDefault": "locales"}
            ]
        }))
    }

    #[test]
    fn test_expand_template() {
        let mut values = HashMap::new();
        values.insert("referenceId".to_string(), "12".to_string());
        values.insert("nodeId".to_string(), "a b".to_string());

        let uri = "api/v002/metadata/{referenceId}/{nodeId}{/targetType}{/targetId}";
        assert_eq!(
            expand_template(uri, &values).unwrap(),
            "api/v002/metadata/12/a%20b"
        );

        values.insert("targetType".to_string(), "membre".to_string());
        assert_eq!(
            expand_template(uri, &values).unwrap(),
            "api/v002/metadata/12/a%20b/membre"
        );

        values.remove("nodeId");
        assert!(expand_template(uri, &values).is_err());
    }

    #[test]
    fn test_template_placeholders() {
        let found = template_placeholders("a/{id}{/opt}").unwrap();
        assert_eq!(found.len(), 2);
        assert!(!found[0].optional);
        assert!(found[1].optional);
        assert!(template_placeholders("a/{id").is_err());
        assert!(template_placeholders("a/id}").is_err());
    }

    #[test]
    fn test_build_fills_config_defaults() {
        let request = build_request(
            &object_by_id(),
            &params(json!({"id": 100})),
            &config(json!({"apiKey": "k1", "projetId": "42", "locales": ["fr", "en"]})),
        )
        .unwrap();

        assert_eq!(request.method, reqwest::Method::GET);
        assert_eq!(request.url.path(), "/api/v002/objet-touristique/get-by-id/100");
        let query: HashMap<_, _> = request.url.query_pairs().into_owned().collect();
        assert_eq!(query["apiKey"], "k1");
        assert_eq!(query["projetId"], "42");
        assert_eq!(query["locales"], "fr,en");
        assert!(!query.contains_key("responseFields"));
        assert!(request.body.is_none());
    }

    #[test]
    fn test_caller_params_override_config_defaults() {
        let request = build_request(
            &object_by_id(),
            &params(json!({"id": "7", "responseFields": ["@all", "nom"]})),
            &config(json!({"apiKey": "k1", "projetId": "42", "responseFields": ["id"]})),
        )
        .unwrap();

        let query: HashMap<_, _> = request.url.query_pairs().into_owned().collect();
        assert_eq!(query["responseFields"], "@all,nom");
    }

    #[test]
    fn test_missing_required_parameter() {
        let err = build_request(
            &object_by_id(),
            &params(json!({})),
            &config(json!({"apiKey": "k1", "projetId": "42"})),
        )
        .unwrap_err();
        assert!(matches!(err, Failure::Format(ref m) if m.contains("`id`")));
    }

    #[test]
    fn test_type_mismatch() {
        let err = build_request(
            &object_by_id(),
            &params(json!({"id": "not-a-number"})),
            &config(json!({"apiKey": "k1", "projetId": "42"})),
        )
        .unwrap_err();
        assert!(matches!(err, Failure::Format(ref m) if m.contains("integer")));
    }

    #[test]
    fn test_query_json_and_additional_parameters() {
        let search = descriptor(json!({
            "name": "searchObject",
            "httpMethod": "GET",
            "uri": "api/v002/recherche/list-objets-touristiques/",
            "additionalParameters": "queryJson",
            "parameters": [
                {"name": "apiKey", "location": "queryJson", "configDefault": "apiKey"},
                {"name": "projetId", "location": "queryJson", "configDefault": "projetId"},
                {"name": "count", "location": "queryJson", "type": "integer", "configDefault": "count"}
            ]
        }));

        let request = build_request(
            &search,
            &params(json!({"selectionIds": [64], "first": 20})),
            &config(json!({"apiKey": "k1", "projetId": 42})),
        )
        .unwrap();

        let query: HashMap<_, _> = request.url.query_pairs().into_owned().collect();
        let sent: Value = serde_json::from_str(&query["query"]).unwrap();
        assert_eq!(
            sent,
            json!({"apiKey": "k1", "projetId": "42", "count": 20, "selectionIds": [64], "first": 20})
        );
    }

    #[test]
    fn test_form_body_and_basic_auth() {
        let put = descriptor(json!({
            "name": "putMetadata",
            "httpMethod": "PUT",
            "uri": "api/v002/metadata/{referenceId}",
            "basicAuth": "oauthClient",
            "parameters": [
                {"name": "referenceId", "location": "uri", "required": true},
                {"name": "general", "location": "form", "sentAs": "metadata[general]"}
            ]
        }));

        let request = build_request(
            &put,
            &params(json!({"referenceId": 5, "general": "{\"a\":1}"})),
            &config(json!({"OAuthClientId": "id", "OAuthSecret": "secret"})),
        )
        .unwrap();

        assert_eq!(request.headers[CONTENT_TYPE], "application/x-www-form-urlencoded");
        let expected = format!("Basic {}", general_purpose::STANDARD.encode("id:secret"));
        assert_eq!(request.headers[AUTHORIZATION], expected.as_str());
        let body = String::from_utf8(request.body.unwrap()).unwrap();
        assert_eq!(body, "metadata%5Bgeneral%5D=%7B%22a%22%3A1%7D");
    }

    #[test]
    fn test_basic_auth_requires_credentials() {
        let token = descriptor(json!({
            "name": "getAccessToken",
            "httpMethod": "GET",
            "uri": "oauth/token",
            "basicAuth": "oauthClient"
        }));
        let err = build_request(&token, &Map::new(), &config(json!({}))).unwrap_err();
        assert!(matches!(
            err,
            Failure::Domain(Error::Config(ConfigError::MissingCredential { key: "OAuthClientId", .. }))
        ));
    }

    fn metadata_node() -> OperationDescriptor {
        descriptor(json!({
            "name": "getMetadata",
            "httpMethod": "GET",
            "uri": "api/v002/metadata/{referenceId}/{nodeId}{/targetType}",
            "parameters": [
                {"name": "referenceId", "location": "uri", "required": true},
                {"name": "nodeId", "location": "uri", "required": true, "type": "string"},
                {"name": "targetType", "location": "uri", "type": "string"}
            ]
        }))
    }

    #[test]
    fn test_empty_required_uri_parameter() {
        let err = build_request(
            &metadata_node(),
            &params(json!({"referenceId": 12, "nodeId": ""})),
            &config(json!({})),
        )
        .unwrap_err();
        assert!(matches!(err, Failure::Format(ref m) if m.contains("`nodeId`")));
    }

    #[test]
    fn test_empty_optional_uri_parameter_is_omitted() {
        let request = build_request(
            &metadata_node(),
            &params(json!({"referenceId": 12, "nodeId": "n", "targetType": ""})),
            &config(json!({})),
        )
        .unwrap();
        assert_eq!(request.url.path(), "/api/v002/metadata/12/n");
    }

    #[test]
    fn test_absolute_template_ignores_base_uri() {
        let op = descriptor(json!({
            "name": "external",
            "httpMethod": "GET",
            "uri": "https://base.apidae-tourisme.com/oauth/authorize/"
        }));
        let request = build_request(&op, &Map::new(), &config(json!({}))).unwrap();
        assert_eq!(request.url.host_str(), Some("base.apidae-tourisme.com"));
    }

    #[test]
    fn test_decode_modes() {
        let raw = object_by_id();
        let result = decode_response(&raw, br#"{"id":100,"name":"X"}"#).unwrap();
        assert_eq!(result.into_value(), json!({"id": 100, "name": "X"}));
        assert!(decode_response(&raw, b"").unwrap().is_empty());
        assert!(matches!(
            decode_response(&raw, b"<html>"),
            Err(Failure::Format(_))
        ));

        let field = descriptor(json!({
            "name": "getMetadata",
            "httpMethod": "GET",
            "uri": "api/v002/metadata",
            "response": {"mode": "field", "field": "nodeId"}
        }));
        assert!(decode_response(&field, br#"{"nodeId":"n","general":"{}"}"#).is_ok());
        assert!(matches!(
            decode_response(&field, br#"{"other":1}"#),
            Err(Failure::Format(ref m)) if m.contains("nodeId")
        ));
        assert!(matches!(
            decode_response(&field, &[0x89, b'P', b'N', b'G']),
            Err(Failure::Format(_))
        ));

        let search = descriptor(json!({
            "name": "searchObject",
            "httpMethod": "GET",
            "uri": "api/v002/recherche/list-objets-touristiques/",
            "response": {"mode": "field", "field": "numFound"}
        }));
        let result = decode_response(
            &search,
            br#"{"numFound":2,"objetsTouristiques":[{"id":1},{"id":2}],"query":{"count":20}}"#,
        )
        .unwrap();
        assert_eq!(result["numFound"], 2);
        assert_eq!(result["objetsTouristiques"].as_array().unwrap().len(), 2);
        assert_eq!(result["query"]["count"], 20);

        let body = descriptor(json!({
            "name": "deleteMetadata",
            "httpMethod": "DELETE",
            "uri": "api/v002/metadata",
            "response": {"mode": "body"}
        }));
        let result = decode_response(&body, b"OK").unwrap();
        assert_eq!(result["response"], "OK");
    }
}
