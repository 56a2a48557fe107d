//! # Graph Codec
//!
//! Reversible mapping between a [`ThingDescription`] and the triple set
//! stored in its graph partition.
//!
//! ## Mapping
//!
//! | Document                 | Graph                                          |
//! |--------------------------|------------------------------------------------|
//! | `id`                     | root subject IRI                               |
//! | `@type` (root)           | `rdf:type` → TD-namespace IRIs                 |
//! | `@context`               | `rdf:JSON` literal                             |
//! | other `@keyword`         | directory namespace predicate                  |
//! | plain key                | TD-namespace predicate                         |
//! | absolute IRI key         | predicate as-is                                |
//! | nested object            | blank node                                     |
//! | array                    | `rdf:first` / `rdf:rest` collection            |
//! | string / bool / number   | `xsd:string` / `xsd:boolean` / `xsd:integer` or `xsd:double` |
//! | null                     | `rdf:JSON` literal `null`                      |
//!
//! Characters that cannot appear inside an IRI are percent-encoded in
//! predicates and type IRIs, and `%` itself is always encoded, so the
//! mapping inverts exactly.

mod linear;

pub use linear::{parse_triples, write_triples};

use crate::DirectoryError;
use crate::document::{KEY_CONTEXT, KEY_ID, KEY_TYPE, ThingDescription};
use crate::primitives::{
    DIRECTORY_NS, MAX_NESTING_DEPTH, RDF_FIRST, RDF_JSON, RDF_NIL, RDF_REST, RDF_TYPE,
    RECOGNIZED_ID_SCHEMES, TD_NS, XSD_BOOLEAN, XSD_DOUBLE, XSD_INTEGER, XSD_STRING,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// TRIPLES
// =============================================================================

/// An RDF term.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    Iri(String),
    Blank(String),
    Literal { value: String, datatype: String },
}

impl Term {
    fn literal(value: impl Into<String>, datatype: &str) -> Self {
        Self::Literal {
            value: value.into(),
            datatype: datatype.to_string(),
        }
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Blank(_))
    }
}

/// One subject/predicate/object statement. Predicates are always IRIs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
}

/// The content of one graph partition.
pub type TripleSet = BTreeSet<Triple>;

/// Whether `iri` starts with a scheme accepted for a document root.
#[must_use]
pub fn has_recognized_scheme(iri: &str) -> bool {
    RECOGNIZED_ID_SCHEMES
        .iter()
        .any(|scheme| iri.len() > scheme.len() && iri.starts_with(scheme))
}

// =============================================================================
// KEY / IRI MAPPING
// =============================================================================

fn is_absolute_iri(key: &str) -> bool {
    key.contains("://") || key.starts_with("urn:")
}

fn is_iri_unsafe(c: char) -> bool {
    c.is_whitespace()
        || c.is_control()
        || matches!(c, '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\')
}

fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '%' || is_iri_unsafe(c) {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn percent_decode(encoded: &str) -> Result<String, DirectoryError> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded
                .get(i + 1..i + 3)
                .ok_or_else(|| DirectoryError::Conversion(format!("bad escape in {encoded}")))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| DirectoryError::Conversion(format!("bad escape in {encoded}")))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|e| DirectoryError::Conversion(e.to_string()))
}

/// Predicate IRI for a document key.
#[must_use]
pub fn predicate_for_key(key: &str) -> String {
    if key == KEY_TYPE {
        RDF_TYPE.to_string()
    } else if let Some(keyword) = key.strip_prefix('@') {
        format!("{DIRECTORY_NS}{}", percent_encode(keyword))
    } else if is_absolute_iri(key) {
        percent_encode(key)
    } else {
        format!("{TD_NS}{}", percent_encode(key))
    }
}

/// Document key for a predicate IRI. Inverse of [`predicate_for_key`].
pub fn key_for_predicate(predicate: &str) -> Result<String, DirectoryError> {
    if predicate == RDF_TYPE {
        return Ok(KEY_TYPE.to_string());
    }
    if let Some(keyword) = predicate.strip_prefix(DIRECTORY_NS) {
        return Ok(format!("@{}", percent_decode(keyword)?));
    }
    match predicate.strip_prefix(TD_NS) {
        Some(term) if !term.is_empty() => percent_decode(term),
        _ => percent_decode(predicate),
    }
}

/// IRI for an `@type` term.
#[must_use]
pub fn type_iri(term: &str) -> String {
    if is_absolute_iri(term) {
        percent_encode(term)
    } else {
        format!("{TD_NS}{}", percent_encode(term))
    }
}

fn type_term(iri: &str) -> Result<String, DirectoryError> {
    match iri.strip_prefix(TD_NS) {
        Some(term) if !term.is_empty() => percent_decode(term),
        _ => percent_decode(iri),
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Converts documents to triple sets and back.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphCodec;

impl GraphCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Expand a document into the triples of its partition.
    pub fn to_graph(&self, td: &ThingDescription) -> Result<TripleSet, DirectoryError> {
        let id = td
            .id
            .as_deref()
            .ok_or_else(|| DirectoryError::Conversion("document has no id".to_string()))?;
        if !has_recognized_scheme(id) {
            return Err(DirectoryError::Conversion(format!(
                "id {id} does not use a recognized URI scheme"
            )));
        }
        if id.chars().any(is_iri_unsafe) {
            return Err(DirectoryError::Conversion(format!(
                "id {id:?} contains characters not allowed in an IRI"
            )));
        }

        let root = Term::Iri(id.to_string());
        let mut encoder = Encoder::default();

        for (key, value) in td.to_map() {
            match key.as_str() {
                KEY_ID => {}
                KEY_TYPE => {
                    for term in &td.types {
                        encoder.emit(root.clone(), RDF_TYPE, Term::Iri(type_iri(term)));
                    }
                }
                KEY_CONTEXT => {
                    let text = serde_json::to_string(&value)
                        .map_err(|e| DirectoryError::Conversion(e.to_string()))?;
                    encoder.emit(
                        root.clone(),
                        &predicate_for_key(KEY_CONTEXT),
                        Term::literal(text, RDF_JSON),
                    );
                }
                _ => {
                    let object = encoder.encode(&value, 1)?;
                    encoder.emit(root.clone(), &predicate_for_key(&key), object);
                }
            }
        }

        Ok(encoder.triples)
    }

    /// Rebuild the document from a partition's triples.
    ///
    /// The root is the single IRI subject with a recognized scheme that is
    /// not itself the object of another statement.
    pub fn to_document(&self, triples: &TripleSet) -> Result<ThingDescription, DirectoryError> {
        let index = SubjectIndex::build(triples);
        let root = index.root()?;

        let mut map = Map::new();
        map.insert(KEY_ID.to_string(), Value::String(root.to_string()));

        let mut types = Vec::new();
        let mut fields: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        let root_term = Term::Iri(root.to_string());

        for (predicate, object) in index.statements(&root_term) {
            if predicate == RDF_TYPE {
                match object {
                    Term::Iri(iri) => types.push(Value::String(type_term(iri)?)),
                    other => types.push(index.decode(other, 1, &mut BTreeSet::new())?),
                }
                continue;
            }

            let key = key_for_predicate(predicate)?;
            let value = if key == KEY_CONTEXT {
                decode_json_literal(object)?
            } else {
                index.decode(object, 1, &mut BTreeSet::new())?
            };
            if !fields.contains_key(&key) {
                order.push(key.clone());
            }
            fields.entry(key).or_default().push(value);
        }

        if !types.is_empty() {
            types.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
            map.insert(KEY_TYPE.to_string(), Value::Array(types));
        }
        for key in order {
            if let Some(mut values) = fields.remove(&key) {
                let value = if values.len() == 1 {
                    values.remove(0)
                } else {
                    Value::Array(values)
                };
                map.insert(key, value);
            }
        }

        ThingDescription::from_map(map)
    }

    #[must_use]
    pub fn to_linear_form(&self, triples: &TripleSet) -> String {
        write_triples(triples)
    }

    pub fn parse_linear_form(&self, text: &str) -> Result<TripleSet, DirectoryError> {
        parse_triples(text)
    }
}

// =============================================================================
// ENCODER
// =============================================================================

#[derive(Default)]
struct Encoder {
    triples: TripleSet,
    next_blank: usize,
}

impl Encoder {
    fn fresh(&mut self) -> Term {
        let label = format!("b{}", self.next_blank);
        self.next_blank += 1;
        Term::Blank(label)
    }

    fn emit(&mut self, subject: Term, predicate: &str, object: Term) {
        self.triples.insert(Triple {
            subject,
            predicate: predicate.to_string(),
            object,
        });
    }

    fn encode(&mut self, value: &Value, depth: usize) -> Result<Term, DirectoryError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(DirectoryError::Conversion(format!(
                "document nesting exceeds {MAX_NESTING_DEPTH} levels"
            )));
        }
        Ok(match value {
            Value::Null => Term::literal("null", RDF_JSON),
            Value::Bool(b) => Term::literal(b.to_string(), XSD_BOOLEAN),
            Value::Number(n) if n.is_f64() => Term::literal(n.to_string(), XSD_DOUBLE),
            Value::Number(n) => Term::literal(n.to_string(), XSD_INTEGER),
            Value::String(s) => Term::literal(s.clone(), XSD_STRING),
            Value::Object(map) => {
                let node = self.fresh();
                for (key, child) in map {
                    let object = self.encode(child, depth + 1)?;
                    self.emit(node.clone(), &predicate_for_key(key), object);
                }
                node
            }
            Value::Array(items) => {
                let nil = || Term::Iri(RDF_NIL.to_string());
                let cells: Vec<Term> = items.iter().map(|_| self.fresh()).collect();
                for (i, item) in items.iter().enumerate() {
                    let object = self.encode(item, depth + 1)?;
                    let rest = cells.get(i + 1).cloned().unwrap_or_else(nil);
                    self.emit(cells[i].clone(), RDF_FIRST, object);
                    self.emit(cells[i].clone(), RDF_REST, rest);
                }
                cells.into_iter().next().unwrap_or_else(nil)
            }
        })
    }
}

// =============================================================================
// DECODER
// =============================================================================

struct SubjectIndex<'a> {
    by_subject: BTreeMap<&'a Term, Vec<(&'a str, &'a Term)>>,
    objects: BTreeSet<&'a Term>,
}

impl<'a> SubjectIndex<'a> {
    fn build(triples: &'a TripleSet) -> Self {
        let mut by_subject: BTreeMap<&Term, Vec<(&str, &Term)>> = BTreeMap::new();
        let mut objects = BTreeSet::new();
        for t in triples {
            by_subject
                .entry(&t.subject)
                .or_default()
                .push((t.predicate.as_str(), &t.object));
            objects.insert(&t.object);
        }
        Self {
            by_subject,
            objects,
        }
    }

    fn root(&self) -> Result<&'a str, DirectoryError> {
        let candidates: Vec<&str> = self
            .by_subject
            .keys()
            .filter(|s| !self.objects.contains(*s))
            .filter_map(|s| match s {
                Term::Iri(iri) if has_recognized_scheme(iri) => Some(iri.as_str()),
                _ => None,
            })
            .collect();
        match candidates.as_slice() {
            [] => Err(DirectoryError::Conversion(
                "no root resource with a recognized identifier scheme".to_string(),
            )),
            [root] => Ok(root),
            many => Err(DirectoryError::Conversion(format!(
                "ambiguous root resource: {}",
                many.join(", ")
            ))),
        }
    }

    fn statements(&self, subject: &Term) -> impl Iterator<Item = (&'a str, &'a Term)> + '_ {
        self.by_subject
            .get(subject)
            .into_iter()
            .flat_map(|v| v.iter().copied())
    }

    fn single(&self, subject: &Term, predicate: &str) -> Result<&'a Term, DirectoryError> {
        let mut found = self.statements(subject).filter(|(p, _)| *p == predicate);
        match (found.next(), found.next()) {
            (Some((_, object)), None) => Ok(object),
            _ => Err(DirectoryError::Conversion(format!(
                "list node {subject:?} needs exactly one <{predicate}>"
            ))),
        }
    }

    fn decode(
        &self,
        term: &'a Term,
        depth: usize,
        visiting: &mut BTreeSet<&'a Term>,
    ) -> Result<Value, DirectoryError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(DirectoryError::Conversion(format!(
                "graph nesting exceeds {MAX_NESTING_DEPTH} levels"
            )));
        }
        match term {
            Term::Literal { .. } => decode_literal(term),
            Term::Iri(iri) if iri == RDF_NIL => Ok(Value::Array(Vec::new())),
            Term::Iri(iri) => Ok(Value::String(iri.clone())),
            Term::Blank(label) => {
                if !visiting.insert(term) {
                    return Err(DirectoryError::Conversion(format!(
                        "cycle through blank node _:{label}"
                    )));
                }
                let is_list = self.statements(term).any(|(p, _)| p == RDF_FIRST);
                let value = if is_list {
                    self.decode_list(term, depth, visiting)?
                } else {
                    let mut map = Map::new();
                    for (predicate, object) in self.statements(term) {
                        let key = key_for_predicate(predicate)?;
                        let value = self.decode(object, depth + 1, visiting)?;
                        if map.insert(key.clone(), value).is_some() {
                            return Err(DirectoryError::Conversion(format!(
                                "duplicate field {key} on _:{label}"
                            )));
                        }
                    }
                    Value::Object(map)
                };
                visiting.remove(term);
                Ok(value)
            }
        }
    }

    fn decode_list(
        &self,
        head: &'a Term,
        depth: usize,
        visiting: &mut BTreeSet<&'a Term>,
    ) -> Result<Value, DirectoryError> {
        let mut items = Vec::new();
        let mut cells = vec![head];
        let mut node = head;
        loop {
            let first = self.single(node, RDF_FIRST)?;
            items.push(self.decode(first, depth + 1, visiting)?);
            let rest = self.single(node, RDF_REST)?;
            match rest {
                Term::Iri(iri) if iri == RDF_NIL => break,
                Term::Blank(_) => {
                    if !visiting.insert(rest) {
                        return Err(DirectoryError::Conversion(
                            "cycle in list".to_string(),
                        ));
                    }
                    cells.push(rest);
                    node = rest;
                }
                other => {
                    return Err(DirectoryError::Conversion(format!(
                        "list tail must be a blank node or rdf:nil, got {other:?}"
                    )));
                }
            }
        }
        for cell in cells.into_iter().skip(1) {
            visiting.remove(cell);
        }
        Ok(Value::Array(items))
    }
}

fn decode_literal(term: &Term) -> Result<Value, DirectoryError> {
    let Term::Literal { value, datatype } = term else {
        return Err(DirectoryError::Conversion(format!(
            "expected literal, got {term:?}"
        )));
    };
    let invalid = || DirectoryError::Conversion(format!("invalid <{datatype}> literal {value:?}"));
    match datatype.as_str() {
        XSD_BOOLEAN => value.parse::<bool>().map(Value::Bool).map_err(|_| invalid()),
        XSD_INTEGER => {
            if let Ok(i) = value.parse::<i64>() {
                Ok(Value::Number(i.into()))
            } else {
                value
                    .parse::<u64>()
                    .map(|u| Value::Number(u.into()))
                    .map_err(|_| invalid())
            }
        }
        XSD_DOUBLE => value
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),
        RDF_JSON => serde_json::from_str(value).map_err(|_| invalid()),
        _ => Ok(Value::String(value.clone())),
    }
}

fn decode_json_literal(term: &Term) -> Result<Value, DirectoryError> {
    match term {
        Term::Literal { datatype, .. } if datatype == RDF_JSON => decode_literal(term),
        other => Err(DirectoryError::Conversion(format!(
            "@context must be stored as a JSON literal, got {other:?}"
        ))),
    }
}

// =============================================================================
// TESTS
// =============================================================================
