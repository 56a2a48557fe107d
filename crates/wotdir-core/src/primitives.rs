//! # Directory Primitives
//!
//! Fixed vocabulary IRIs, schema markers and limits used across the engine.
//!
//! These values are compiled into the binary. Anything an operator may want
//! to tune lives in [`crate::config::DirectoryConfig`] instead.

// =============================================================================
// SCHEMA MARKERS
// =============================================================================

/// Context IRI of the legacy (1.0) Thing Description schema.
pub const CONTEXT_V10: &str = "https://www.w3.org/2019/wot/td/v1";

/// Context IRI of the canonical (1.1) Thing Description schema.
pub const CONTEXT_V11: &str = "https://www.w3.org/2022/wot/td/v1.1";

/// Value stamped into `@version` once a document is canonical.
pub const SCHEMA_VERSION: &str = "1.1";

/// Context of the paginated `ThingCollection` listing.
pub const DISCOVERY_CONTEXT: &str = "https://w3c.github.io/wot-discovery/context/discovery-context.jsonld";

/// Type term every registered document carries.
pub const THING_TYPE: &str = "Thing";

/// Scheme prefix of server-assigned identifiers.
pub const URN_UUID_PREFIX: &str = "urn:uuid:";

/// URI schemes accepted for a document root.
pub const RECOGNIZED_ID_SCHEMES: &[&str] = &["urn:", "did:", "http:", "https:"];

// =============================================================================
// VOCABULARY
// =============================================================================

/// Thing Description vocabulary namespace.
pub const TD_NS: &str = "https://www.w3.org/2019/wot/td#";

/// Namespace for JSON-LD keywords carried through the graph (`@context`, `@version`, ...).
pub const DIRECTORY_NS: &str = "http://localhost/wotdir/ns#";

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const RDF_FIRST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#first";
pub const RDF_REST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#rest";
pub const RDF_NIL: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#nil";
pub const RDF_JSON: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#JSON";

pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";

/// Default prefix joined with a document id to form its graph partition name.
pub const DEFAULT_GRAPH_PREFIX: &str = "http://localhost/wotdir/graph/";

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum nesting depth of objects and arrays inside a document.
///
/// Both directions of the codec stop here instead of recursing without bound.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Attempts at drawing a fresh identifier before giving up.
pub const MAX_ID_ATTEMPTS: usize = 16;

/// Default capacity of each per-category broadcast ring.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Default pause between replayed events on a fresh subscription.
pub const DEFAULT_REPLAY_DELAY_MS: u64 = 300;
