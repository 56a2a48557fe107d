//! # API Request/Response Types
//!
//! JSON shapes of the HTTP API, and the single place where a
//! [`DirectoryError`] becomes a status code.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use wotdir_core::{DirectoryError, ValidationError};

pub const PROBLEM_JSON: &str = "application/problem+json";

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub things: usize,
}

impl HealthResponse {
    #[must_use]
    pub fn ok(things: usize) -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            things,
        }
    }
}

// =============================================================================
// LISTING
// =============================================================================

/// Shape of a `GET /things` body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListFormat {
    #[default]
    Array,
    Collection,
}

/// Query string of `GET /things`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub format: Option<ListFormat>,
}

/// Query string of the event routes. Only its presence matters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventParams {
    pub diff: Option<String>,
}

// =============================================================================
// PROBLEM DETAILS
// =============================================================================

/// One validation violation as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrorJson {
    pub category: String,
    pub message: String,
}

impl From<&ValidationError> for ValidationErrorJson {
    fn from(error: &ValidationError) -> Self {
        Self {
            category: error.category.label().to_string(),
            message: error.message.clone(),
        }
    }
}

/// Problem-details error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<ValidationErrorJson>>,
}

impl ErrorDetails {
    #[must_use]
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            kind: None,
            title: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            status: status.as_u16(),
            detail: detail.into(),
            instance: None,
            validation_errors: None,
        }
    }
}

// =============================================================================
// API ERROR
// =============================================================================

/// Everything a handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    Directory(DirectoryError),
    BadRequest(String),
    UnsupportedMediaType(String),
    NotImplemented(String),
}

impl From<DirectoryError> for ApiError {
    fn from(error: DirectoryError) -> Self {
        Self::Directory(error)
    }
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Directory(e) => directory_status(e),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }

    #[must_use]
    pub fn details(&self) -> ErrorDetails {
        let status = self.status();
        match self {
            Self::Directory(DirectoryError::Validation(errors)) => ErrorDetails {
                title: "Validation Exception".to_string(),
                validation_errors: Some(errors.iter().map(ValidationErrorJson::from).collect()),
                ..ErrorDetails::new(status, "The input did not pass the Schema validation")
            },
            Self::Directory(e) => ErrorDetails::new(status, e.to_string()),
            Self::BadRequest(detail)
            | Self::UnsupportedMediaType(detail)
            | Self::NotImplemented(detail) => ErrorDetails::new(status, detail.clone()),
        }
    }
}

/// HTTP status for each error kind.
#[must_use]
pub fn directory_status(error: &DirectoryError) -> StatusCode {
    match error {
        DirectoryError::Conversion(_)
        | DirectoryError::Validation(_)
        | DirectoryError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
        DirectoryError::NotFound(_) => StatusCode::NOT_FOUND,
        DirectoryError::StoreOperation(_)
        | DirectoryError::CacheRefresh { .. }
        | DirectoryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let details = self.details();
        let status = self.status();
        if status.is_server_error() {
            let kind = match &self {
                Self::Directory(e) => e.kind(),
                _ => "http",
            };
            tracing::error!(
                event = "request_failed",
                kind,
                detail = %details.detail,
                "Request failed"
            );
        } else {
            tracing::debug!(
                event = "request_rejected",
                status = status.as_u16(),
                detail = %details.detail
            );
        }
        (status, [(header::CONTENT_TYPE, PROBLEM_JSON)], Json(details)).into_response()
    }
}
