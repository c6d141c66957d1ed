//! Route validation
//!
//! [`validate`] is a pure check of a route spec against the listen paths its
//! siblings already publish. It collects every problem instead of stopping at
//! the first, and on success hands back the canonical serialization that gets
//! written to the shared document.

use std::collections::BTreeMap;

use serde_json::{Number, Value};
use url::Url;

use crate::crd::{typed, Lenient, ProxyConfig, TykRouteSpec};

/// Category of a validation failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// `target.configMapName` is empty
    MissingTarget,
    /// `apiDefinition.name` is empty
    MissingName,
    /// `proxy.listen_path` is empty
    MissingListenPath,
    /// `proxy.listen_path` does not start with `/` or is padded with whitespace
    InvalidListenPath,
    /// Another entry in the document already publishes the listen path
    DuplicateListenPath,
    /// `proxy.target_url` is not an absolute http(s) URL
    InvalidTarget,
    /// A rate-limit or cache field is not a non-negative integer
    InvalidNumericField,
    /// A field has the wrong JSON type
    InvalidType,
    /// The definition could not be serialized
    Unserializable,
}

/// A single validation failure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// Failure category
    pub kind: ValidationErrorKind,
    /// Path of the offending field
    pub field: String,
    /// Human-readable description
    pub message: String,
}

impl ValidationError {
    fn new(kind: ValidationErrorKind, field: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A validated API definition ready to be written
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedDocument {
    listen_path: String,
    json: String,
}

impl NormalizedDocument {
    /// The listen path the definition publishes
    pub fn listen_path(&self) -> &str {
        &self.listen_path
    }

    /// Canonical JSON serialization
    pub fn as_str(&self) -> &str {
        &self.json
    }
}

/// Outcome of [`validate`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationResult {
    /// True when no errors were found
    pub ok: bool,
    /// Canonical document, present only when `ok`
    pub normalized: Option<NormalizedDocument>,
    /// Every problem found
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// Split into the normalized document or the collected errors
    pub fn into_result(self) -> Result<NormalizedDocument, Vec<ValidationError>> {
        match self.normalized {
            Some(doc) if self.ok => Ok(doc),
            _ => Err(self.errors),
        }
    }
}

/// Join errors into a single status message
pub fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate `spec`.
///
/// `sibling_listen_paths` maps listen paths already in the target document to
/// the key that owns them, excluding the route's own entry.
pub fn validate(
    spec: &TykRouteSpec,
    sibling_listen_paths: &BTreeMap<String, String>,
) -> ValidationResult {
    use ValidationErrorKind::*;

    let mut errors = Vec::new();
    let api = &spec.api_definition;

    if spec.target.config_map_name.trim().is_empty() {
        errors.push(ValidationError::new(
            MissingTarget,
            "target.configMapName",
            "configMapName is required",
        ));
    }

    if let Some(raw) = raw_value(&api.name) {
        errors.push(wrong_type(InvalidType, "apiDefinition.name", raw, "a string"));
    } else if typed(&api.name).map_or(true, |n| n.trim().is_empty()) {
        errors.push(ValidationError::new(
            MissingName,
            "apiDefinition.name",
            "name is required",
        ));
    }

    let proxy = match &api.proxy {
        Some(Lenient::Raw(raw)) => {
            errors.push(wrong_type(InvalidType, "apiDefinition.proxy", raw, "an object"));
            None
        }
        Some(Lenient::Typed(proxy)) => Some(proxy),
        None => None,
    };
    check_listen_path(&mut errors, proxy, sibling_listen_paths);

    if let Some(raw) = proxy.and_then(|p| raw_value(&p.target_url)) {
        errors.push(wrong_type(
            InvalidTarget,
            "apiDefinition.proxy.target_url",
            raw,
            "a string",
        ));
    } else if !api.is_keyless() && !matches!(api.proxy, Some(Lenient::Raw(_))) {
        if let Err(message) = check_target_url(api.target_url().unwrap_or_default()) {
            errors.push(ValidationError::new(
                InvalidTarget,
                "apiDefinition.proxy.target_url",
                message,
            ));
        }
    }

    for (field, value) in [
        ("apiDefinition.use_keyless", &api.use_keyless),
        ("apiDefinition.enable_jwt", &api.enable_jwt),
    ] {
        if let Some(raw) = raw_value(value) {
            errors.push(wrong_type(InvalidType, field, raw, "a boolean"));
        }
    }

    match &api.global_rate_limit {
        Some(Lenient::Raw(raw)) => errors.push(wrong_type(
            InvalidType,
            "apiDefinition.global_rate_limit",
            raw,
            "an object",
        )),
        Some(Lenient::Typed(limit)) => {
            check_non_negative(&mut errors, "apiDefinition.global_rate_limit.rate", &limit.rate);
            check_non_negative(&mut errors, "apiDefinition.global_rate_limit.per", &limit.per);
        }
        None => {}
    }
    match &api.cache_options {
        Some(Lenient::Raw(raw)) => errors.push(wrong_type(
            InvalidType,
            "apiDefinition.cache_options",
            raw,
            "an object",
        )),
        Some(Lenient::Typed(cache)) => {
            if let Some(raw) = raw_value(&cache.enable_cache) {
                errors.push(wrong_type(
                    InvalidType,
                    "apiDefinition.cache_options.enable_cache",
                    raw,
                    "a boolean",
                ));
            }
            check_non_negative(
                &mut errors,
                "apiDefinition.cache_options.cache_timeout",
                &cache.cache_timeout,
            );
        }
        None => {}
    }
    match &api.cors {
        Some(Lenient::Raw(raw)) => {
            errors.push(wrong_type(InvalidType, "apiDefinition.CORS", raw, "an object"))
        }
        Some(Lenient::Typed(cors)) => {
            if let Some(raw) = raw_value(&cors.enable) {
                errors.push(wrong_type(InvalidType, "apiDefinition.CORS.enable", raw, "a boolean"));
            }
            if let Some(raw) = raw_value(&cors.allowed_origins) {
                errors.push(wrong_type(
                    InvalidType,
                    "apiDefinition.CORS.allowed_origins",
                    raw,
                    "a list of strings",
                ));
            }
        }
        None => {}
    }

    if !errors.is_empty() {
        return ValidationResult {
            ok: false,
            normalized: None,
            errors,
        };
    }

    match api.to_canonical_json() {
        Ok(json) => ValidationResult {
            ok: true,
            normalized: Some(NormalizedDocument {
                listen_path: api.listen_path().unwrap_or_default().to_string(),
                json,
            }),
            errors,
        },
        Err(e) => ValidationResult {
            ok: false,
            normalized: None,
            errors: vec![ValidationError::new(
                Unserializable,
                "apiDefinition",
                e.to_string(),
            )],
        },
    }
}

fn raw_value<T>(field: &Option<Lenient<T>>) -> Option<&Value> {
    field.as_ref().and_then(Lenient::raw)
}

fn wrong_type(kind: ValidationErrorKind, field: &str, raw: &Value, expected: &str) -> ValidationError {
    ValidationError::new(kind, field, format!("{raw} must be {expected}"))
}

fn check_listen_path(
    errors: &mut Vec<ValidationError>,
    proxy: Option<&ProxyConfig>,
    sibling_listen_paths: &BTreeMap<String, String>,
) {
    use ValidationErrorKind::*;
    const FIELD: &str = "apiDefinition.proxy.listen_path";

    let value = proxy.and_then(|p| p.listen_path.as_ref());
    let listen_path = match value {
        Some(Lenient::Raw(raw)) => {
            errors.push(wrong_type(InvalidListenPath, FIELD, raw, "a string"));
            return;
        }
        Some(Lenient::Typed(path)) => path.as_str(),
        None => "",
    };

    if listen_path.trim().is_empty() {
        errors.push(ValidationError::new(MissingListenPath, FIELD, "listen_path is required"));
    } else if listen_path.trim() != listen_path {
        errors.push(ValidationError::new(
            InvalidListenPath,
            FIELD,
            format!("listen_path {listen_path:?} must not have surrounding whitespace"),
        ));
    } else if !listen_path.starts_with('/') {
        errors.push(ValidationError::new(
            InvalidListenPath,
            FIELD,
            format!("listen_path {listen_path} must start with '/'"),
        ));
    } else if let Some(owner) = sibling_listen_paths.get(listen_path) {
        errors.push(ValidationError::new(
            DuplicateListenPath,
            FIELD,
            format!("listen_path {listen_path} already exists in {owner}"),
        ));
    }
}

fn check_target_url(raw: &str) -> Result<(), String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("target_url is required unless use_keyless is true".to_string());
    }
    let url = Url::parse(raw).map_err(|e| format!("target_url {raw} is not a valid URL: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("target_url {raw} must use http or https"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(format!("target_url {raw} has no host"));
    }
    Ok(())
}

fn check_non_negative(
    errors: &mut Vec<ValidationError>,
    field: &str,
    value: &Option<Lenient<Number>>,
) {
    let problem = match value {
        Some(Lenient::Typed(n)) if n.as_u64().is_none() => Some(n.to_string()),
        Some(Lenient::Raw(raw)) => Some(raw.to_string()),
        _ => None,
    };
    if let Some(shown) = problem {
        errors.push(ValidationError::new(
            ValidationErrorKind::InvalidNumericField,
            field,
            format!("{shown} must be a non-negative integer"),
        ));
    }
}
