//! # Core Type Definitions
//!
//! Shared identifiers and the error type of the directory engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

// =============================================================================
// ENTITY KEY
// =============================================================================

/// Name of the graph partition that holds one document: `prefix + id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey(String);

impl EntityKey {
    /// Build the key for a document id under the given prefix.
    #[must_use]
    pub fn new(prefix: &str, id: &str) -> Self {
        Self(format!("{prefix}{id}"))
    }

    /// Wrap a partition name as read back from the store.
    #[must_use]
    pub fn from_raw(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The document id, if this key lives under `prefix`.
    #[must_use]
    pub fn id<'a>(&'a self, prefix: &str) -> Option<&'a str> {
        self.0.strip_prefix(prefix).filter(|id| !id.is_empty())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// VALIDATION ERRORS
// =============================================================================

/// Which validation pass produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationCategory {
    Structural,
    Semantic,
}

impl ValidationCategory {
    /// Human-facing label used in problem-details responses.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Structural => "Syntactic Validation",
            Self::Semantic => "Semantic Validation",
        }
    }
}

/// A single shape violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub category: ValidationCategory,
    pub message: String,
}

impl ValidationError {
    pub fn structural(message: impl Into<String>) -> Self {
        Self {
            category: ValidationCategory::Structural,
            message: message.into(),
        }
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self {
            category: ValidationCategory::Semantic,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category.label(), self.message)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by the directory engine.
///
/// Each variant is a distinct kind; the HTTP layer maps them to status codes
/// once, at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// Document <-> graph translation failed.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// One or more shape violations. Always carries the full list.
    #[error("Validation failed with {} violation(s)", .0.len())]
    Validation(Vec<ValidationError>),

    /// No partition exists for the referenced id.
    #[error("Thing with id: {0} does not exist.")]
    NotFound(String),

    /// The request is missing a required identifier or declares a forbidden one.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The store failed to execute or commit. The open transaction was aborted.
    #[error("Store operation failed: {0}")]
    StoreOperation(String),

    /// The write committed but the cache could not be refreshed from the store.
    #[error("Cache refresh failed for {id}: {reason}")]
    CacheRefresh { id: String, reason: String },

    /// Anything unclassified.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DirectoryError {
    /// Short machine-readable name, used as a structured log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Conversion(_) => "conversion",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::MalformedRequest(_) => "malformed_request",
            Self::StoreOperation(_) => "store_operation",
            Self::CacheRefresh { .. } => "cache_refresh",
            Self::Internal(_) => "internal",
        }
    }

    pub(crate) fn store(e: impl fmt::Display) -> Self {
        Self::StoreOperation(e.to_string())
    }
}

// =============================================================================
// LOCK HELPERS
// =============================================================================

fn poisoned(what: &str) -> DirectoryError {
    tracing::error!(lock = what, "lock poisoned");
    DirectoryError::Internal(format!("{what} lock poisoned"))
}

pub(crate) fn acquire_lock<'a, T>(
    mutex: &'a Mutex<T>,
    what: &str,
) -> Result<MutexGuard<'a, T>, DirectoryError> {
    mutex.lock().map_err(|_| poisoned(what))
}

pub(crate) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    what: &str,
) -> Result<RwLockReadGuard<'a, T>, DirectoryError> {
    lock.read().map_err(|_| poisoned(what))
}

pub(crate) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    what: &str,
) -> Result<RwLockWriteGuard<'a, T>, DirectoryError> {
    lock.write().map_err(|_| poisoned(what))
}

// =============================================================================
// TESTS
// =============================================================================
