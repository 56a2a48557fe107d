//! # Thing Description Envelope
//!
//! A document is a typed envelope of the fields the directory manages
//! (`id`, `@context`, `@type`, `security`, `registration`, `@version`)
//! plus an ordered bag of opaque payload fields that pass through untouched.

use crate::DirectoryError;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

pub const KEY_ID: &str = "id";
pub const KEY_AT_ID: &str = "@id";
pub const KEY_CONTEXT: &str = "@context";
pub const KEY_TYPE: &str = "@type";
pub const KEY_VERSION: &str = "@version";
pub const KEY_SECURITY: &str = "security";
pub const KEY_SECURITY_DEFINITIONS: &str = "securityDefinitions";
pub const KEY_REGISTRATION: &str = "registration";
pub const KEY_TITLE: &str = "title";
pub const KEY_CREATED: &str = "created";
pub const KEY_MODIFIED: &str = "modified";

// =============================================================================
// CONTEXT
// =============================================================================

/// The three shapes `@context` can take.
#[derive(Debug, Clone, PartialEq)]
pub enum Context {
    /// `"@context": "https://..."`
    Single(String),
    /// `"@context": ["https://...", {"prefix": "https://..."}]`
    Many(Vec<Value>),
    /// `"@context": {"td": "https://..."}`
    Scoped(Map<String, Value>),
}

impl Context {
    pub fn from_value(value: Value) -> Result<Self, DirectoryError> {
        match value {
            Value::String(s) => Ok(Self::Single(s)),
            Value::Array(items) => Ok(Self::Many(items)),
            Value::Object(map) => Ok(Self::Scoped(map)),
            other => Err(DirectoryError::Conversion(format!(
                "@context must be a string, array or object, got {other}"
            ))),
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Single(s) => Value::String(s.clone()),
            Self::Many(items) => Value::Array(items.clone()),
            Self::Scoped(map) => Value::Object(map.clone()),
        }
    }

    /// Whether `iri` appears as the context itself, an array entry, or a mapped value.
    #[must_use]
    pub fn contains(&self, iri: &str) -> bool {
        match self {
            Self::Single(s) => s == iri,
            Self::Many(items) => items.iter().any(|item| match item {
                Value::String(s) => s == iri,
                Value::Object(map) => map.values().any(|v| v.as_str() == Some(iri)),
                _ => false,
            }),
            Self::Scoped(map) => map.values().any(|v| v.as_str() == Some(iri)),
        }
    }

    /// Rewrite every occurrence of `from` to `to`. Returns how many were replaced.
    pub fn replace_iri(&mut self, from: &str, to: &str) -> usize {
        fn swap(value: &mut Value, from: &str, to: &str) -> usize {
            match value {
                Value::String(s) if s == from => {
                    *s = to.to_string();
                    1
                }
                Value::Object(map) => map.values_mut().map(|v| swap(v, from, to)).sum(),
                _ => 0,
            }
        }

        match self {
            Self::Single(s) if s == from => {
                *s = to.to_string();
                1
            }
            Self::Single(_) => 0,
            Self::Many(items) => items.iter_mut().map(|v| swap(v, from, to)).sum(),
            Self::Scoped(map) => map.values_mut().map(|v| swap(v, from, to)).sum(),
        }
    }
}

// =============================================================================
// REGISTRATION
// =============================================================================

/// Directory-managed registration block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Registration {
    pub created: Option<String>,
    pub modified: Option<String>,
    /// Any other registration fields (`expires`, `ttl`, ...).
    pub extra: Map<String, Value>,
}

impl Registration {
    fn from_map(mut map: Map<String, Value>) -> Result<Self, DirectoryError> {
        let created = take_string(&mut map, KEY_CREATED, "registration.created")?;
        let modified = take_string(&mut map, KEY_MODIFIED, "registration.modified")?;
        Ok(Self {
            created,
            modified,
            extra: map,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(created) = &self.created {
            map.insert(KEY_CREATED.to_string(), Value::String(created.clone()));
        }
        if let Some(modified) = &self.modified {
            map.insert(KEY_MODIFIED.to_string(), Value::String(modified.clone()));
        }
        for (k, v) in &self.extra {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}

// =============================================================================
// THING DESCRIPTION
// =============================================================================

/// A Thing Description: managed envelope plus opaque payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThingDescription {
    pub id: Option<String>,
    pub context: Option<Context>,
    /// `@type` terms, always held as a list.
    pub types: Vec<String>,
    /// `security`, always held as a list once present.
    pub security: Option<Vec<Value>>,
    pub registration: Option<Registration>,
    /// `@version`; absent on legacy documents.
    pub schema_version: Option<String>,
    /// Every other field, in input order.
    pub payload: Map<String, Value>,
}

impl ThingDescription {
    /// Parse a JSON value into the envelope.
    ///
    /// `@id` is accepted as an alias of `id`. A single `security` value is
    /// wrapped into a list. A `null` in a managed field counts as absent.
    pub fn from_value(value: Value) -> Result<Self, DirectoryError> {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => Err(DirectoryError::Conversion(format!(
                "document must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn from_map(mut map: Map<String, Value>) -> Result<Self, DirectoryError> {
        let id = take_string(&mut map, KEY_ID, KEY_ID)?;
        let at_id = take_string(&mut map, KEY_AT_ID, KEY_AT_ID)?;
        let id = match (id, at_id) {
            (Some(a), Some(b)) if a != b => {
                return Err(DirectoryError::MalformedRequest(format!(
                    "conflicting identifiers: id={a} @id={b}"
                )));
            }
            (Some(a), _) => Some(a),
            (None, b) => b,
        };

        let context = match map.shift_remove(KEY_CONTEXT) {
            None | Some(Value::Null) => None,
            Some(v) => Some(Context::from_value(v)?),
        };

        let types = match map.shift_remove(KEY_TYPE) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => vec![s],
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(DirectoryError::Conversion(format!(
                        "@type entries must be strings, got {}",
                        json_kind(&other)
                    ))),
                })
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(DirectoryError::Conversion(format!(
                    "@type must be a string or array, got {}",
                    json_kind(&other)
                )));
            }
        };

        let security = match map.shift_remove(KEY_SECURITY) {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(items),
            Some(single) => Some(vec![single]),
        };

        let registration = match map.shift_remove(KEY_REGISTRATION) {
            None | Some(Value::Null) => None,
            Some(Value::Object(reg)) => Some(Registration::from_map(reg)?),
            Some(other) => {
                return Err(DirectoryError::Conversion(format!(
                    "registration must be an object, got {}",
                    json_kind(&other)
                )));
            }
        };

        let schema_version = match map.shift_remove(KEY_VERSION) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(other) => {
                return Err(DirectoryError::Conversion(format!(
                    "@version must be a string, got {}",
                    json_kind(&other)
                )));
            }
        };

        Ok(Self {
            id,
            context,
            types,
            security,
            registration,
            schema_version,
            payload: map,
        })
    }

    /// Render the envelope back to a JSON object.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(context) = &self.context {
            map.insert(KEY_CONTEXT.to_string(), context.to_value());
        }
        if let Some(id) = &self.id {
            map.insert(KEY_ID.to_string(), Value::String(id.clone()));
        }
        if !self.types.is_empty() {
            map.insert(
                KEY_TYPE.to_string(),
                Value::Array(self.types.iter().cloned().map(Value::String).collect()),
            );
        }
        for (k, v) in &self.payload {
            map.insert(k.clone(), v.clone());
        }
        if let Some(security) = &self.security {
            map.insert(KEY_SECURITY.to_string(), Value::Array(security.clone()));
        }
        if let Some(registration) = &self.registration {
            map.insert(KEY_REGISTRATION.to_string(), registration.to_value());
        }
        if let Some(version) = &self.schema_version {
            map.insert(KEY_VERSION.to_string(), Value::String(version.clone()));
        }
        map
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }

    /// The `title` payload field, if it is a string.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.payload.get(KEY_TITLE).and_then(Value::as_str)
    }

    #[must_use]
    pub fn created(&self) -> Option<&str> {
        self.registration.as_ref()?.created.as_deref()
    }

    #[must_use]
    pub fn modified(&self) -> Option<&str> {
        self.registration.as_ref()?.modified.as_deref()
    }
}

impl Serialize for ThingDescription {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn take_string(
    map: &mut Map<String, Value>,
    key: &str,
    field: &str,
) -> Result<Option<String>, DirectoryError> {
    match map.shift_remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(DirectoryError::Conversion(format!(
            "{field} must be a string, got {}",
            json_kind(&other)
        ))),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// TESTS
// =============================================================================
