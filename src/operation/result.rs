//! Decoded command result

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::ops::Deref;

/// Field name → value mapping produced by one dispatch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CommandResult(Map<String, Value>);

impl CommandResult {
    /// Wrap a decoded body.
    ///
    /// Objects are taken as-is, top-level arrays get positional keys
    /// (`"0"`, `"1"`, ...) and bare scalars land under `response`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            Value::Array(items) => Self(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(idx, item)| (idx.to_string(), item))
                    .collect(),
            ),
            Value::Null => Self::default(),
            scalar => {
                let mut map = Map::new();
                map.insert("response".to_string(), scalar);
                Self(map)
            },
        }
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Deserialize the whole result into a typed model
    pub fn deserialize<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(Value::Object(self.0.clone()))
    }
}

impl Deref for CommandResult {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Map<String, Value>> for CommandResult {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<CommandResult> for Value {
    fn from(result: CommandResult) -> Self {
        result.into_value()
    }
}
