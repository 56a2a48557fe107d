//! # API Endpoint Handlers
//!
//! `/things` CRUD and `/health`. Handlers only translate HTTP to
//! [`wotdir_core::Directory`] calls; every failure leaves as an [`ApiError`].

use super::{
    AppState,
    types::{ApiError, HealthResponse, ListFormat, ListParams},
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use wotdir_core::DirectoryError;
use wotdir_core::document::{KEY_AT_ID, KEY_ID};
use wotdir_core::primitives::DISCOVERY_CONTEXT;

pub const TD_JSON: &str = "application/td+json";
pub const LD_JSON: &str = "application/ld+json";
pub const MERGE_PATCH_JSON: &str = "application/merge-patch+json";

/// Media types accepted for full documents.
const DOCUMENT_TYPES: &[&str] = &["application/json", TD_JSON, LD_JSON];

/// Media types accepted for merge patches.
const PATCH_TYPES: &[&str] = &[MERGE_PATCH_JSON, "application/json"];

// =============================================================================
// REQUEST HELPERS
// =============================================================================

/// Essence of the `Content-Type` header, lowercased, parameters dropped.
fn media_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|essence| essence.trim().to_ascii_lowercase())
}

fn require_content_type(headers: &HeaderMap, accepted: &[&str]) -> Result<(), ApiError> {
    match media_type(headers) {
        Some(found) if accepted.contains(&found.as_str()) => Ok(()),
        found => Err(ApiError::UnsupportedMediaType(format!(
            "Content type {} is not supported. Use one of: {}",
            found.as_deref().unwrap_or("(none)"),
            accepted.join(", ")
        ))),
    }
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("Request body is empty".to_string()));
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Request body is not valid JSON: {}", e)))
}

fn declared_id(map: &Map<String, Value>) -> Option<&str> {
    map.get(KEY_ID)
        .and_then(Value::as_str)
        .or_else(|| map.get(KEY_AT_ID).and_then(Value::as_str))
}

fn thing_location(state: &AppState, id: &str) -> String {
    format!("{}/things/{}", state.base_url, id)
}

// =============================================================================
// ROOT
// =============================================================================

/// Any method on `/` lands on the listing with a temporary redirect.
pub async fn root_redirect_handler() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, "/things")])
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, ApiError> {
    Ok(Json(HealthResponse::ok(state.directory.count()?)))
}

// =============================================================================
// LISTING
// =============================================================================

/// `GET /things`: one page of documents, ordered by id.
pub async fn list_things_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let things = state.directory.all()?;
    let total = things.len();
    let limit = params.limit.unwrap_or(state.page_size).max(1);
    let offset = params.offset.unwrap_or(0);
    let format = params.format.unwrap_or_default();

    let members: Vec<Value> = things
        .iter()
        .skip(offset)
        .take(limit)
        .map(|td| td.to_value())
        .collect();

    let next_offset = offset.saturating_add(limit);
    let has_next = next_offset < total;
    let suffix = match format {
        ListFormat::Array => "",
        ListFormat::Collection => "&format=collection",
    };
    let page_url = |at: usize| {
        format!(
            "{}/things?offset={}&limit={}{}",
            state.base_url, at, limit, suffix
        )
    };

    let mut headers = HeaderMap::new();
    if has_next {
        let link = format!("<{}>; rel=\"next\"", page_url(next_offset));
        if let Ok(value) = HeaderValue::from_str(&link) {
            headers.insert(header::LINK, value);
        }
    }

    let body = match format {
        ListFormat::Array => {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(TD_JSON));
            Value::Array(members)
        }
        ListFormat::Collection => {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(LD_JSON));
            let mut collection = json!({
                "@context": DISCOVERY_CONTEXT,
                "@type": "ThingCollection",
                "total": total,
                "@id": page_url(offset),
                "members": members,
            });
            if has_next {
                collection["next"] = Value::String(page_url(next_offset));
            }
            collection
        }
    };

    Ok((StatusCode::OK, headers, Json(body)).into_response())
}

// =============================================================================
// SINGLE THING
// =============================================================================

/// `GET|HEAD /things/{id}`.
pub async fn get_thing_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let thing = state
        .directory
        .get(&id)?
        .ok_or(DirectoryError::NotFound(id))?;
    Ok(([(header::CONTENT_TYPE, TD_JSON)], Json(thing.as_ref())).into_response())
}

/// `POST /things`: register a document without an id.
pub async fn register_thing_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    require_content_type(&headers, DOCUMENT_TYPES)?;
    let raw = parse_body(&body)?;
    let (id, _) = state.directory.insert(raw)?;
    tracing::info!(event = "thing_registered", id = %id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, thing_location(&state, &id))],
    )
        .into_response())
}

/// `PUT /things/{id}`: create or replace.
///
/// A body without an id takes the path id; a body with a different id is
/// rejected.
pub async fn put_thing_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    require_content_type(&headers, DOCUMENT_TYPES)?;
    let mut raw = parse_body(&body)?;
    let Some(map) = raw.as_object_mut() else {
        return Err(DirectoryError::Conversion("document must be a JSON object".to_string()).into());
    };

    match declared_id(map) {
        Some(body_id) if body_id != id => {
            return Err(DirectoryError::MalformedRequest(format!(
                "body id {} does not match path id {}",
                body_id, id
            ))
            .into());
        }
        Some(_) => {}
        None => {
            map.insert(KEY_ID.to_string(), Value::String(id.clone()));
        }
    }

    let (id, existed) = state.directory.upsert(raw)?;
    if existed {
        tracing::info!(event = "thing_replaced", id = %id);
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        tracing::info!(event = "thing_registered", id = %id);
        Ok((
            StatusCode::CREATED,
            [(header::LOCATION, thing_location(&state, &id))],
        )
            .into_response())
    }
}

/// `PATCH /things/{id}`: JSON merge patch.
pub async fn patch_thing_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    require_content_type(&headers, PATCH_TYPES)?;
    let partial = parse_body(&body)?;
    state.directory.patch(partial, &id)?;
    tracing::info!(event = "thing_patched", id = %id);
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /things/{id}`.
pub async fn delete_thing_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.directory.delete(&id)?;
    tracing::info!(event = "thing_deleted", id = %id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type).expect("header"),
        );
        headers
    }

    #[test]
    fn media_type_drops_parameters_and_case() {
        let headers = headers_with("Application/TD+JSON; charset=utf-8");
        assert_eq!(media_type(&headers).as_deref(), Some(TD_JSON));
    }

    #[test]
    fn patch_types_exclude_ld_json() {
        assert!(require_content_type(&headers_with(MERGE_PATCH_JSON), PATCH_TYPES).is_ok());
        assert!(matches!(
            require_content_type(&headers_with(LD_JSON), PATCH_TYPES),
            Err(ApiError::UnsupportedMediaType(_))
        ));
        assert!(matches!(
            require_content_type(&HeaderMap::new(), DOCUMENT_TYPES),
            Err(ApiError::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn declared_id_prefers_plain_id() {
        let map = json!({"id": "urn:a", "@id": "urn:b"});
        assert_eq!(declared_id(map.as_object().expect("object")), Some("urn:a"));
        let map = json!({"@id": "urn:b"});
        assert_eq!(declared_id(map.as_object().expect("object")), Some("urn:b"));
    }

    #[test]
    fn empty_body_is_bad_request() {
        assert!(matches!(
            parse_body(&Bytes::new()),
            Err(ApiError::BadRequest(_))
        ));
    }
}
