//! # wotdir-core
//!
//! The write pipeline and change feed of a WoT Thing Description directory.
//!
//! An inbound document is normalized to the canonical 1.1 shape, converted
//! to a triple set, validated, committed to its own named graph partition,
//! and re-read into the document cache. Every commit appends one event to an
//! ordered log that live subscribers follow and late subscribers replay.
//!
//! ## Architectural Constraints
//!
//! - The graph store is the source of truth; the cache is a read mirror
//! - One partition per entity, keyed by `prefix + id`
//! - Has NO async runtime and NO network dependencies
//! - Ordered collections everywhere output order matters

// =============================================================================
// MODULES
// =============================================================================

pub mod cache;
pub mod codec;
pub mod config;
pub mod directory;
pub mod document;
pub mod engine;
pub mod events;
pub mod normalizer;
pub mod primitives;
pub mod store;
pub mod types;
pub mod validation;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{DirectoryError, EntityKey, ValidationCategory, ValidationError};

// =============================================================================
// RE-EXPORTS: Pipeline
// =============================================================================

pub use cache::ThingCache;
pub use codec::{GraphCodec, Term, Triple, TripleSet};
pub use config::DirectoryConfig;
pub use directory::Directory;
pub use document::{Context, Registration, ThingDescription};
pub use engine::{DirectoryWriteEngine, RebuildReport};
pub use normalizer::{decorate, normalize, prune};
pub use validation::{ShapeRules, ValidationPipeline};

// =============================================================================
// RE-EXPORTS: Storage and Events
// =============================================================================

pub use events::{Event, EventBus, EventCategory, EventHub, EventLog, ReplayCursor, Subscription};
pub use store::{
    GraphStore, MemoryStore, ReadTxn, RedbStore, StorageBackend, UpdateOperation, UpdateStatement,
    WriteTxn,
};
