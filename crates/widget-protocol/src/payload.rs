//! The `data` object sent with every webhook POST.
//!
//! Embedders may attach arbitrary keys.  `_meta` is reserved: it always holds
//! the page origin/pathname and may only be extended via
//! [`Payload::set_metadata`].

use serde::Serialize;
use serde_json::{Map, Value};

pub const META_KEY: &str = "_meta";
pub const LOGGING_DISABLED_KEY: &str = "_logging_disabled";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload key must not be empty")]
    EmptyKey,
    #[error("key \"{0}\" is reserved")]
    Reserved(String),
    #[error("payload key \"{0}\" not found")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// A fresh payload holding only the page context in `_meta`.
    pub fn new(origin: Option<String>, pathname: Option<String>) -> Self {
        let mut meta = Map::new();
        meta.insert("origin".into(), origin.map(Value::String).unwrap_or(Value::Null));
        meta.insert(
            "pathname".into(),
            pathname.map(Value::String).unwrap_or(Value::Null),
        );
        let mut map = Map::new();
        map.insert(META_KEY.into(), Value::Object(meta));
        Self(map)
    }

    /// Add or overwrite a top-level key.
    pub fn attach(&mut self, key: &str, value: Value) -> Result<(), PayloadError> {
        if key.is_empty() {
            return Err(PayloadError::EmptyKey);
        }
        if key == META_KEY {
            return Err(PayloadError::Reserved(key.into()));
        }
        self.0.insert(key.into(), value);
        Ok(())
    }

    /// Remove a previously attached key.
    pub fn detach(&mut self, key: &str) -> Result<(), PayloadError> {
        if key == META_KEY {
            return Err(PayloadError::Reserved(key.into()));
        }
        self.0
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| PayloadError::NotFound(key.into()))
    }

    /// Add or overwrite a key inside `_meta`.
    pub fn set_metadata(&mut self, key: &str, value: Value) -> Result<(), PayloadError> {
        if key.is_empty() {
            return Err(PayloadError::EmptyKey);
        }
        let meta = self
            .0
            .entry(META_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !meta.is_object() {
            *meta = Value::Object(Map::new());
        }
        if let Value::Object(meta) = meta {
            meta.insert(key.into(), value);
        }
        Ok(())
    }

    /// Turn bot-side conversation logging on or off.
    pub fn set_logging(&mut self, enabled: bool) {
        if enabled {
            self.0.remove(LOGGING_DISABLED_KEY);
        } else {
            self.0.insert(LOGGING_DISABLED_KEY.into(), Value::Bool(true));
        }
    }

    pub fn is_logging(&self) -> bool {
        self.0.get(LOGGING_DISABLED_KEY) != Some(&Value::Bool(true))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::new(None, None)
    }
}
