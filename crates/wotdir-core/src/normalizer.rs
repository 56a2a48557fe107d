//! # Document Normalizer
//!
//! Brings inbound documents to the canonical 1.1 shape before anything else
//! looks at them.
//!
//! - `normalize`: legacy upgrade (only when `@version` is absent), identifier
//!   aliasing, `security` wrapping, canonical `@type` ordering.
//! - `decorate`: `Thing` type membership and registration timestamps.
//! - `prune` / `merge_patch`: the patch path only.

use crate::DirectoryError;
use crate::document::{
    KEY_REGISTRATION, KEY_SECURITY, KEY_SECURITY_DEFINITIONS, KEY_TITLE, KEY_VERSION, Context,
    Registration, ThingDescription,
};
use crate::primitives::{CONTEXT_V10, CONTEXT_V11, SCHEMA_VERSION, TD_NS, THING_TYPE};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

const LEGACY_SECURITY: &str = "hasSecurityConfiguration";
const LEGACY_TITLE: &str = "td:title";
const LEGACY_SCHEME: &str = "td:scheme";
const LEGACY_NOSEC: &str = "@none";
const NOSEC_NAME: &str = "nosec_sc";

/// Current time in the timestamp format written into `registration`.
#[must_use]
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// =============================================================================
// NORMALIZE
// =============================================================================

/// Parse and normalize a raw document.
pub fn normalize(raw: Value) -> Result<ThingDescription, DirectoryError> {
    let Value::Object(mut map) = raw else {
        return Err(DirectoryError::Conversion(
            "document must be a JSON object".to_string(),
        ));
    };

    let legacy = matches!(map.get(KEY_VERSION), None | Some(Value::Null));
    if legacy {
        upgrade_legacy_fields(&mut map);
    }

    let mut td = ThingDescription::from_map(map)?;

    if legacy {
        match td.context.as_mut() {
            Some(context) => {
                let rewritten = context.replace_iri(CONTEXT_V10, CONTEXT_V11);
                if rewritten > 0 {
                    tracing::debug!(rewritten, "legacy context rewritten");
                }
            }
            None => td.context = Some(Context::Single(CONTEXT_V11.to_string())),
        }
        td.schema_version = Some(SCHEMA_VERSION.to_string());
    }

    td.types = canonical_types(std::mem::take(&mut td.types));
    Ok(td)
}

/// Rename and restructure fields of a pre-1.1 document in place.
fn upgrade_legacy_fields(map: &mut Map<String, Value>) {
    if let Some(Value::Object(definitions)) = map.get_mut(KEY_SECURITY_DEFINITIONS) {
        if let Some(nosec) = definitions.shift_remove(LEGACY_NOSEC) {
            let scheme = match nosec {
                Value::Object(obj) => Value::Object(obj),
                other => {
                    let mut obj = Map::new();
                    obj.insert("scheme".to_string(), other);
                    Value::Object(obj)
                }
            };
            definitions.insert(NOSEC_NAME.to_string(), scheme);
        }
        for definition in definitions.values_mut() {
            if let Value::Object(def) = definition {
                if let Some(scheme) = def.shift_remove(LEGACY_SCHEME) {
                    def.entry("scheme").or_insert(scheme);
                }
            }
        }
    }

    if let Some(security) = map.shift_remove(LEGACY_SECURITY) {
        map.entry(KEY_SECURITY).or_insert(security);
    }

    if let Some(title) = map.shift_remove(LEGACY_TITLE) {
        map.entry(KEY_TITLE).or_insert(title);
    }

    if let Some(Value::Object(registration)) = map.get_mut(KEY_REGISTRATION) {
        registration.shift_remove("id");
    }
}

/// Compact full TD-namespace type IRIs to terms, then sort and dedup.
///
/// `@type` is a set; a fixed order keeps documents comparable after a trip
/// through the graph.
fn canonical_types(types: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = types
        .into_iter()
        .map(|t| match t.strip_prefix(TD_NS) {
            Some(term) if !term.is_empty() && !term.contains(':') => term.to_string(),
            _ => t,
        })
        .collect();
    out.sort();
    out.dedup();
    out
}

// =============================================================================
// DECORATE
// =============================================================================

/// Add `Thing` to `@type` and stamp registration timestamps.
///
/// `created` is only filled when missing; `modified` is always `now`.
pub fn decorate(td: &mut ThingDescription, now: &str) {
    if !td.types.iter().any(|t| t == THING_TYPE) {
        td.types.push(THING_TYPE.to_string());
        td.types.sort();
    }

    let registration = td.registration.get_or_insert_with(Registration::default);
    if registration.created.is_none() {
        registration.created = Some(now.to_string());
    }
    registration.modified = Some(now.to_string());
}

/// Replace `registration.created` with the value from an earlier write.
pub fn carry_created(td: &mut ThingDescription, created: Option<&str>) {
    if let Some(created) = created {
        td.registration
            .get_or_insert_with(Registration::default)
            .created = Some(created.to_string());
    }
}

// =============================================================================
// PATCH HELPERS
// =============================================================================

/// Overlay `patch` onto `base` one top-level field at a time.
///
/// Arrays and nested objects are replaced wholesale, not merged.
pub fn merge_patch(base: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        base.insert(key, value);
    }
}

/// Recursively drop object fields whose value is `null`.
pub fn prune(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(prune);
        }
        Value::Array(items) => items.iter_mut().for_each(prune),
        _ => {}
    }
}

// =============================================================================
// TESTS
// =============================================================================
