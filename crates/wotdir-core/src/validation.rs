//! # Validation Pipeline
//!
//! Two passes over a candidate triple set:
//!
//! 1. **Structural**: graph shape only. One root, anonymous nodes forming a
//!    tree, well-formed collections, valid literals, cardinality, required
//!    fields, size.
//! 2. **Semantic**: directory vocabulary. `Thing` membership, registration
//!    timestamps, schema version, context, security references, title.
//!
//! The semantic pass only runs when the structural pass is clean.

use crate::codec::{Term, TripleSet, has_recognized_scheme, key_for_predicate, predicate_for_key};
use crate::document::{
    Context, KEY_CONTEXT, KEY_CREATED, KEY_MODIFIED, KEY_REGISTRATION, KEY_SECURITY,
    KEY_SECURITY_DEFINITIONS, KEY_TITLE, KEY_TYPE, KEY_VERSION,
};
use crate::primitives::{
    CONTEXT_V11, RDF_FIRST, RDF_JSON, RDF_NIL, RDF_REST, RDF_TYPE, SCHEMA_VERSION, THING_TYPE,
    XSD_BOOLEAN, XSD_DOUBLE, XSD_INTEGER, XSD_STRING,
};
use crate::{DirectoryError, ValidationError};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

// =============================================================================
// RULES
// =============================================================================

/// Shape constraints, fixed for the lifetime of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShapeRules {
    /// Document keys the root must carry.
    pub required_fields: Vec<String>,
    /// Document keys allowed to hold more than one value on a node.
    pub multi_valued_fields: Vec<String>,
    /// Upper bound on the size of one partition.
    pub max_triples: usize,
    /// Reject documents without a `security` field.
    pub require_security: bool,
}

impl Default for ShapeRules {
    fn default() -> Self {
        Self {
            required_fields: vec![KEY_CONTEXT.to_string()],
            multi_valued_fields: vec![KEY_TYPE.to_string()],
            max_triples: 20_000,
            require_security: false,
        }
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Structural then semantic validation against one rule set.
#[derive(Debug, Clone)]
pub struct ValidationPipeline {
    rules: ShapeRules,
    required: Vec<(String, String)>,
    multi_valued: BTreeSet<String>,
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        Self::new(ShapeRules::default())
    }
}

impl ValidationPipeline {
    #[must_use]
    pub fn new(rules: ShapeRules) -> Self {
        let required = rules
            .required_fields
            .iter()
            .map(|k| (k.clone(), predicate_for_key(k)))
            .collect();
        let multi_valued = rules
            .multi_valued_fields
            .iter()
            .map(|k| predicate_for_key(k))
            .collect();
        Self {
            rules,
            required,
            multi_valued,
        }
    }

    #[must_use]
    pub fn rules(&self) -> &ShapeRules {
        &self.rules
    }

    /// Run both passes, fail-fast between them.
    pub fn validate(&self, triples: &TripleSet) -> Result<(), DirectoryError> {
        let structural = self.validate_structural(triples);
        if !structural.is_empty() {
            return Err(DirectoryError::Validation(structural));
        }
        let semantic = self.validate_semantic(triples);
        if !semantic.is_empty() {
            return Err(DirectoryError::Validation(semantic));
        }
        Ok(())
    }

    /// Shape checks that do not depend on any vocabulary term.
    #[must_use]
    pub fn validate_structural(&self, triples: &TripleSet) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let shape = Shape::index(triples);

        if triples.len() > self.rules.max_triples {
            errors.push(ValidationError::structural(format!(
                "partition has {} statements, limit is {}",
                triples.len(),
                self.rules.max_triples
            )));
        }

        // Roots and stray named subjects
        let mut roots = Vec::new();
        for subject in shape.subjects.keys() {
            if let Term::Iri(iri) = subject {
                if has_recognized_scheme(iri) && !shape.referenced.contains_key(*subject) {
                    roots.push(*subject);
                } else {
                    errors.push(ValidationError::structural(format!(
                        "named subject <{iri}> is not a valid root"
                    )));
                }
            }
        }
        match roots.len() {
            0 => errors.push(ValidationError::structural(
                "no root resource with a recognized identifier scheme",
            )),
            1 => {}
            n => errors.push(ValidationError::structural(format!(
                "expected exactly one root resource, found {n}"
            ))),
        }

        // Anonymous nodes must form a tree under the root
        for (term, count) in &shape.referenced {
            if let Term::Blank(label) = term {
                if *count > 1 {
                    errors.push(ValidationError::structural(format!(
                        "anonymous node _:{label} is referenced {count} times"
                    )));
                }
            }
        }
        if let [root] = roots.as_slice() {
            let reachable = shape.reachable_from(*root);
            for subject in shape.subjects.keys() {
                if let Term::Blank(label) = subject {
                    if !reachable.contains(*subject) {
                        errors.push(ValidationError::structural(format!(
                            "anonymous node _:{label} is not reachable from the root"
                        )));
                    }
                }
            }
        }

        // Per-node checks
        for (subject, statements) in &shape.subjects {
            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for (predicate, object) in statements {
                *counts.entry(*predicate).or_default() += 1;
                if let Some(problem) = literal_problem(object) {
                    errors.push(ValidationError::structural(problem));
                }
            }

            let is_list = counts.contains_key(RDF_FIRST) || counts.contains_key(RDF_REST);
            if is_list {
                if counts.get(RDF_FIRST) != Some(&1) || counts.get(RDF_REST) != Some(&1) {
                    errors.push(ValidationError::structural(format!(
                        "collection cell {} needs exactly one first and one rest",
                        describe(subject)
                    )));
                }
                if counts.len() > 2 {
                    errors.push(ValidationError::structural(format!(
                        "collection cell {} carries extra fields",
                        describe(subject)
                    )));
                }
                for (predicate, object) in statements {
                    if *predicate == RDF_REST
                        && !matches!(object, Term::Blank(_))
                        && !matches!(object, Term::Iri(iri) if iri == RDF_NIL)
                    {
                        errors.push(ValidationError::structural(format!(
                            "collection tail of {} must be a cell or rdf:nil",
                            describe(subject)
                        )));
                    }
                }
                continue;
            }

            for (predicate, count) in counts {
                if count > 1 && !self.multi_valued.contains(predicate) {
                    let key =
                        key_for_predicate(predicate).unwrap_or_else(|_| predicate.to_string());
                    errors.push(ValidationError::structural(format!(
                        "field `{key}` on {} has {count} values, at most one allowed",
                        describe(subject)
                    )));
                }
            }
        }

        if let [root] = roots.as_slice() {
            for (key, predicate) in &self.required {
                if shape.objects(root, predicate).is_empty() {
                    errors.push(ValidationError::structural(format!(
                        "required field `{key}` is missing"
                    )));
                }
            }
        }

        errors
    }

    /// Vocabulary checks. Assumes the structural pass succeeded.
    #[must_use]
    pub fn validate_semantic(&self, triples: &TripleSet) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let shape = Shape::index(triples);
        let Some(root) = shape.root() else {
            errors.push(ValidationError::semantic("document has no root resource"));
            return errors;
        };

        // @type
        let thing = Term::Iri(crate::codec::type_iri(THING_TYPE));
        if !shape.objects(root, RDF_TYPE).contains(&&thing) {
            errors.push(ValidationError::semantic(format!(
                "@type must include {THING_TYPE}"
            )));
        }

        // registration
        match shape.single(root, &predicate_for_key(KEY_REGISTRATION)) {
            Some(node) if node.is_blank() => {
                let created = timestamp(&shape, node, KEY_CREATED, &mut errors);
                let modified = timestamp(&shape, node, KEY_MODIFIED, &mut errors);
                if let (Some(created), Some(modified)) = (created, modified) {
                    if created > modified {
                        errors.push(ValidationError::semantic(
                            "registration.created is later than registration.modified",
                        ));
                    }
                }
            }
            Some(_) => errors.push(ValidationError::semantic("registration must be an object")),
            None => errors.push(ValidationError::semantic("registration is missing")),
        }

        // @version
        match shape.single(root, &predicate_for_key(KEY_VERSION)) {
            Some(Term::Literal { value, .. }) if value == SCHEMA_VERSION => {}
            Some(other) => errors.push(ValidationError::semantic(format!(
                "@version must be {SCHEMA_VERSION}, found {}",
                describe(other)
            ))),
            None => errors.push(ValidationError::semantic("@version is missing")),
        }

        // @context
        if let Some(term) = shape.single(root, &predicate_for_key(KEY_CONTEXT)) {
            let canonical = match term {
                Term::Literal { value, datatype } if datatype == RDF_JSON => {
                    serde_json::from_str(value)
                        .ok()
                        .and_then(|v| Context::from_value(v).ok())
                        .is_some_and(|c| c.contains(CONTEXT_V11))
                }
                _ => false,
            };
            if !canonical {
                errors.push(ValidationError::semantic(format!(
                    "@context must include {CONTEXT_V11}"
                )));
            }
        }

        // title
        if let Some(term) = shape.single(root, &predicate_for_key(KEY_TITLE)) {
            match term {
                Term::Literal { value, datatype }
                    if datatype == XSD_STRING && !value.trim().is_empty() => {}
                _ => errors.push(ValidationError::semantic("title must be a non-empty string")),
            }
        }

        // security
        match shape.single(root, &predicate_for_key(KEY_SECURITY)) {
            Some(head) => {
                let names = shape.list_items(head);
                let defined: Option<BTreeSet<String>> = shape
                    .single(root, &predicate_for_key(KEY_SECURITY_DEFINITIONS))
                    .map(|defs| {
                        shape
                            .statements(defs)
                            .filter_map(|(p, _)| key_for_predicate(p).ok())
                            .collect()
                    });
                for item in names {
                    match item {
                        Term::Literal { value, datatype } if datatype == XSD_STRING => {
                            if let Some(defined) = &defined {
                                if !defined.contains(value) {
                                    errors.push(ValidationError::semantic(format!(
                                        "security references undefined scheme `{value}`"
                                    )));
                                }
                            }
                        }
                        other => errors.push(ValidationError::semantic(format!(
                            "security entries must be scheme names, found {}",
                            describe(other)
                        ))),
                    }
                }
            }
            None if self.rules.require_security => {
                errors.push(ValidationError::semantic("security is missing"));
            }
            None => {}
        }

        errors
    }
}

// =============================================================================
// HELPERS
// =============================================================================

struct Shape<'a> {
    subjects: BTreeMap<&'a Term, Vec<(&'a str, &'a Term)>>,
    referenced: BTreeMap<&'a Term, usize>,
}

impl<'a> Shape<'a> {
    fn index(triples: &'a TripleSet) -> Self {
        let mut subjects: BTreeMap<&Term, Vec<(&str, &Term)>> = BTreeMap::new();
        let mut referenced: BTreeMap<&Term, usize> = BTreeMap::new();
        for t in triples {
            subjects
                .entry(&t.subject)
                .or_default()
                .push((t.predicate.as_str(), &t.object));
            if !matches!(t.object, Term::Literal { .. }) {
                *referenced.entry(&t.object).or_default() += 1;
            }
        }
        Self {
            subjects,
            referenced,
        }
    }

    fn root(&self) -> Option<&'a Term> {
        let mut roots = self.subjects.keys().copied().filter(|s| {
            matches!(s, Term::Iri(iri) if has_recognized_scheme(iri))
                && !self.referenced.contains_key(*s)
        });
        match (roots.next(), roots.next()) {
            (Some(root), None) => Some(root),
            _ => None,
        }
    }

    fn statements(&self, subject: &Term) -> impl Iterator<Item = (&'a str, &'a Term)> + '_ {
        self.subjects
            .get(subject)
            .into_iter()
            .flat_map(|v| v.iter().copied())
    }

    fn objects(&self, subject: &Term, predicate: &str) -> Vec<&'a Term> {
        self.statements(subject)
            .filter(|(p, _)| *p == predicate)
            .map(|(_, o)| o)
            .collect()
    }

    fn single(&self, subject: &Term, predicate: &str) -> Option<&'a Term> {
        self.objects(subject, predicate).first().copied()
    }

    fn list_items(&self, head: &'a Term) -> Vec<&'a Term> {
        let mut items = Vec::new();
        let mut seen = BTreeSet::new();
        let mut node = head;
        while let Term::Blank(_) = node {
            if !seen.insert(node) {
                break;
            }
            let Some(first) = self.single(node, RDF_FIRST) else {
                // a plain object, not a collection
                items.push(node);
                break;
            };
            items.push(first);
            match self.single(node, RDF_REST) {
                Some(rest) => node = rest,
                None => break,
            }
        }
        if !matches!(head, Term::Blank(_)) && !matches!(head, Term::Iri(iri) if iri == RDF_NIL) {
            items.push(head);
        }
        items
    }

    fn reachable_from(&self, root: &'a Term) -> BTreeSet<&'a Term> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(node) = queue.pop_front() {
            if !seen.insert(node) {
                continue;
            }
            for (_, object) in self.statements(node) {
                if object.is_blank() {
                    queue.push_back(object);
                }
            }
        }
        seen
    }
}

fn describe(term: &Term) -> String {
    match term {
        Term::Iri(iri) => format!("<{iri}>"),
        Term::Blank(label) => format!("_:{label}"),
        Term::Literal { value, .. } => format!("{value:?}"),
    }
}

fn literal_problem(term: &Term) -> Option<String> {
    let Term::Literal { value, datatype } = term else {
        return None;
    };
    let ok = match datatype.as_str() {
        XSD_STRING => true,
        XSD_BOOLEAN => value == "true" || value == "false",
        XSD_INTEGER => value.parse::<i64>().is_ok() || value.parse::<u64>().is_ok(),
        XSD_DOUBLE => value.parse::<f64>().is_ok_and(f64::is_finite),
        RDF_JSON => serde_json::from_str::<serde_json::Value>(value).is_ok(),
        other => return Some(format!("unsupported literal datatype <{other}>")),
    };
    (!ok).then(|| format!("invalid <{datatype}> literal {value:?}"))
}

fn timestamp(
    shape: &Shape<'_>,
    node: &Term,
    key: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<DateTime<FixedOffset>> {
    match shape.single(node, &predicate_for_key(key)) {
        Some(Term::Literal { value, .. }) => match DateTime::parse_from_rfc3339(value) {
            Ok(ts) => Some(ts),
            Err(_) => {
                errors.push(ValidationError::semantic(format!(
                    "registration.{key} is not an RFC 3339 timestamp: {value:?}"
                )));
                None
            }
        },
        Some(other) => {
            errors.push(ValidationError::semantic(format!(
                "registration.{key} must be a string, found {}",
                describe(other)
            )));
            None
        }
        None => {
            errors.push(ValidationError::semantic(format!(
                "registration.{key} is missing"
            )));
            None
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValidationCategory;
    use crate::codec::{GraphCodec, Triple};
    use crate::document::ThingDescription;
    use crate::normalizer::{decorate, normalize};
    use serde_json::{Value, json};

    fn graph_of(raw: Value) -> TripleSet {
        let mut td = normalize(raw).expect("normalize");
        decorate(&mut td, "2024-01-01T00:00:00.000Z");
        GraphCodec::new().to_graph(&td).expect("graph")
    }

    fn valid() -> TripleSet {
        graph_of(json!({
            "id": "urn:dev:valid",
            "title": "Valid",
            "securityDefinitions": {"nosec_sc": {"scheme": "nosec"}},
            "security": ["nosec_sc"]
        }))
    }

    #[test]
    fn valid_document_passes_both_passes() {
        let pipeline = ValidationPipeline::default();
        let graph = valid();
        assert!(pipeline.validate_structural(&graph).is_empty());
        assert!(pipeline.validate_semantic(&graph).is_empty());
        assert!(pipeline.validate(&graph).is_ok());
    }

    #[test]
    fn undefined_security_scheme_is_semantic_error() {
        let graph = graph_of(json!({
            "id": "urn:dev:x",
            "securityDefinitions": {"nosec_sc": {"scheme": "nosec"}},
            "security": "basic_sc"
        }));
        let errors = ValidationPipeline::default().validate_semantic(&graph);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, ValidationCategory::Semantic);
        assert!(errors[0].message.contains("basic_sc"));
    }

    #[test]
    fn missing_registration_is_reported() {
        let td = normalize(json!({"id": "urn:dev:x", "@type": "Thing"})).expect("normalize");
        let graph = GraphCodec::new().to_graph(&td).expect("graph");
        let errors = ValidationPipeline::default().validate_semantic(&graph);
        assert!(errors.iter().any(|e| e.message.contains("registration is missing")));
    }

    #[test]
    fn created_after_modified_is_rejected() {
        let mut td = normalize(json!({"id": "urn:dev:x"})).expect("normalize");
        decorate(&mut td, "2024-01-01T00:00:00.000Z");
        if let Some(reg) = td.registration.as_mut() {
            reg.created = Some("2025-01-01T00:00:00.000Z".into());
        }
        let graph = GraphCodec::new().to_graph(&td).expect("graph");
        let errors = ValidationPipeline::default().validate_semantic(&graph);
        assert!(errors.iter().any(|e| e.message.contains("later than")));
    }

    #[test]
    fn empty_title_is_rejected() {
        let graph = graph_of(json!({"id": "urn:dev:x", "title": "  "}));
        let errors = ValidationPipeline::default().validate_semantic(&graph);
        assert!(errors.iter().any(|e| e.message.contains("title")));
    }

    #[test]
    fn duplicate_value_violates_cardinality() {
        let mut graph = valid();
        let title = predicate_for_key("title");
        graph.insert(Triple {
            subject: Term::Iri("urn:dev:valid".into()),
            predicate: title,
            object: Term::Literal {
                value: "Second".into(),
                datatype: XSD_STRING.into(),
            },
        });
        let errors = ValidationPipeline::default().validate_structural(&graph);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("`title`"));
    }

    #[test]
    fn shared_and_unreachable_blank_nodes_are_rejected() {
        let mut graph = valid();
        graph.insert(Triple {
            subject: Term::Blank("orphan".into()),
            predicate: predicate_for_key("x"),
            object: Term::Literal {
                value: "1".into(),
                datatype: XSD_INTEGER.into(),
            },
        });
        let errors = ValidationPipeline::default().validate_structural(&graph);
        assert!(errors.iter().any(|e| e.message.contains("not reachable")));
    }

    #[test]
    fn bad_literal_is_structural() {
        let mut graph = valid();
        graph.insert(Triple {
            subject: Term::Iri("urn:dev:valid".into()),
            predicate: predicate_for_key("count"),
            object: Term::Literal {
                value: "many".into(),
                datatype: XSD_INTEGER.into(),
            },
        });
        let errors = ValidationPipeline::default().validate_structural(&graph);
        assert!(errors.iter().any(|e| e.message.contains("invalid")));
    }

    #[test]
    fn structural_failure_skips_semantic_pass() {
        // No registration (semantic) and no @context (structural): only the
        // structural violation is reported.
        let mut td = ThingDescription::from_value(json!({"id": "urn:dev:x"})).expect("parse");
        td.context = None;
        let graph = GraphCodec::new().to_graph(&td).expect("graph");
        let err = ValidationPipeline::default().validate(&graph).expect_err("invalid");
        let DirectoryError::Validation(errors) = err else {
            unreachable!("expected validation error");
        };
        assert!(errors.iter().all(|e| e.category == ValidationCategory::Structural));
        assert!(errors.iter().any(|e| e.message.contains("@context")));
    }

    #[test]
    fn required_security_rule() {
        let rules = ShapeRules {
            require_security: true,
            ..ShapeRules::default()
        };
        let graph = graph_of(json!({"id": "urn:dev:x"}));
        let errors = ValidationPipeline::new(rules).validate_semantic(&graph);
        assert!(errors.iter().any(|e| e.message.contains("security is missing")));
    }

    #[test]
    fn rules_parse_from_toml() {
        let rules: ShapeRules =
            toml::from_str("required_fields = [\"@context\", \"title\"]\nmax_triples = 10\n")
                .expect("toml");
        assert_eq!(rules.required_fields.len(), 2);
        assert_eq!(rules.max_triples, 10);
        assert!(!rules.require_security);
    }
}
