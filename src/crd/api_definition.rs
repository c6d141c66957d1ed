//! Typed Tyk API definition carried by a TykRoute
//!
//! Only the fields the operator inspects are typed. Everything else the user
//! puts in `apiDefinition` is kept verbatim in the `extra` maps so the gateway
//! receives it untouched. Output always uses Tyk's native snake_case keys;
//! camelCase spellings are accepted on input.
//!
//! The API server does not type-check `apiDefinition`, so every inspected
//! field is a [`Lenient`]: a value of the wrong type still decodes and is left
//! for validation to report on the route's status.

use std::collections::BTreeMap;

use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::Error;

/// A field that keeps its raw JSON when it does not have the expected type
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Lenient<T> {
    /// Value of the expected type
    Typed(T),
    /// Anything else, as written
    Raw(Value),
}

impl<T> Lenient<T> {
    /// The value, if it has the expected type
    pub fn typed(&self) -> Option<&T> {
        match self {
            Self::Typed(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    /// The raw JSON, if the value has the wrong type
    pub fn raw(&self) -> Option<&Value> {
        match self {
            Self::Typed(_) => None,
            Self::Raw(value) => Some(value),
        }
    }
}

impl<T> From<T> for Lenient<T> {
    fn from(value: T) -> Self {
        Self::Typed(value)
    }
}

/// Typed view of an optional lenient field
pub(crate) fn typed<T>(field: &Option<Lenient<T>>) -> Option<&T> {
    field.as_ref().and_then(Lenient::typed)
}

/// A Tyk API definition
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ApiDefinition {
    /// Display name of the API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Lenient<String>>,

    /// Proxy settings (listen path and upstream)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<Lenient<ProxyConfig>>,

    /// Disables authentication when true
    #[serde(default, alias = "useKeyless", skip_serializing_if = "Option::is_none")]
    pub use_keyless: Option<Lenient<bool>>,

    /// Enables JWT authentication
    #[serde(
        default,
        alias = "enableJwt",
        alias = "enableJWT",
        skip_serializing_if = "Option::is_none"
    )]
    pub enable_jwt: Option<Lenient<bool>>,

    /// Global rate limit
    #[serde(
        default,
        alias = "globalRateLimit",
        skip_serializing_if = "Option::is_none"
    )]
    pub global_rate_limit: Option<Lenient<RateLimit>>,

    /// Response cache settings
    #[serde(default, alias = "cacheOptions", skip_serializing_if = "Option::is_none")]
    pub cache_options: Option<Lenient<CacheOptions>>,

    /// CORS settings
    #[serde(
        default,
        rename = "CORS",
        alias = "cors",
        skip_serializing_if = "Option::is_none"
    )]
    pub cors: Option<Lenient<CorsConfig>>,

    /// Fields the operator does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `proxy` section of an API definition
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ProxyConfig {
    /// Path prefix the gateway listens on
    #[serde(default, alias = "listenPath", skip_serializing_if = "Option::is_none")]
    pub listen_path: Option<Lenient<String>>,

    /// Upstream the gateway forwards to
    #[serde(default, alias = "targetUrl", skip_serializing_if = "Option::is_none")]
    pub target_url: Option<Lenient<String>>,

    /// Fields the operator does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `global_rate_limit` section
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RateLimit {
    /// Requests allowed per window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<Lenient<Number>>,

    /// Window length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per: Option<Lenient<Number>>,

    /// Fields the operator does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `cache_options` section
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct CacheOptions {
    /// Turns response caching on
    #[serde(default, alias = "enableCache", skip_serializing_if = "Option::is_none")]
    pub enable_cache: Option<Lenient<bool>>,

    /// Cache entry lifetime in seconds
    #[serde(default, alias = "cacheTimeout", skip_serializing_if = "Option::is_none")]
    pub cache_timeout: Option<Lenient<Number>>,

    /// Fields the operator does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `CORS` section
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct CorsConfig {
    /// Turns CORS handling on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<Lenient<bool>>,

    /// Origins allowed to call the API
    #[serde(default, alias = "allowedOrigins", skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Lenient<Vec<String>>>,

    /// Fields the operator does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ApiDefinition {
    /// Listen path, if one is set
    pub fn listen_path(&self) -> Option<&str> {
        typed(&typed(&self.proxy)?.listen_path).map(String::as_str)
    }

    /// Upstream target URL, if one is set
    pub fn target_url(&self) -> Option<&str> {
        typed(&typed(&self.proxy)?.target_url).map(String::as_str)
    }

    /// Whether authentication is disabled
    pub fn is_keyless(&self) -> bool {
        typed(&self.use_keyless) == Some(&true)
    }

    /// Canonical serialization: pretty JSON, keys sorted at every level.
    ///
    /// Two definitions with the same content always produce byte-identical
    /// output, which is what change detection in the shared document keys on.
    pub fn to_canonical_json(&self) -> Result<String, Error> {
        let value = serde_json::to_value(self).map_err(|e| Error::serialization(e.to_string()))?;
        serde_json::to_string_pretty(&sorted(value)).map_err(|e| Error::serialization(e.to_string()))
    }
}

/// Rebuild objects with keys in lexicographic order, recursively
fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

/// Extract `proxy.listen_path` from a stored document entry.
///
/// Entries are written by this operator in snake_case, but hand-edited entries
/// may use camelCase; both are recognised. The path is trimmed so hand-edited
/// entries with stray whitespace still claim it. Unparseable entries have no path.
pub fn listen_path_of(entry: &str) -> Option<String> {
    let value: Value = serde_json::from_str(entry).ok()?;
    let proxy = value.get("proxy")?;
    proxy
        .get("listen_path")
        .or_else(|| proxy.get("listenPath"))
        .and_then(Value::as_str)
        .map(|path| path.trim().to_string())
}

/// Schema for `apiDefinition`: an object whose contents the API server keeps as-is
pub(crate) fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        Value::Bool(true),
    );
    Schema::Object(schema)
}
