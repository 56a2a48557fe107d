//! Line-oriented triple serialization (N-Triples subset).
//!
//! Every literal is written with an explicit datatype, so two different
//! triple sets never render to the same text.

use super::{Term, Triple, TripleSet};
use crate::DirectoryError;
use crate::primitives::XSD_STRING;
use std::fmt::Write as _;

/// Render triples one statement per line, in set order.
#[must_use]
pub fn write_triples(triples: &TripleSet) -> String {
    let mut out = String::new();
    for triple in triples {
        write_term(&mut out, &triple.subject);
        out.push_str(" <");
        out.push_str(&triple.predicate);
        out.push_str("> ");
        write_term(&mut out, &triple.object);
        out.push_str(" .\n");
    }
    out
}

fn write_term(out: &mut String, term: &Term) {
    match term {
        Term::Iri(iri) => {
            out.push('<');
            out.push_str(iri);
            out.push('>');
        }
        Term::Blank(label) => {
            out.push_str("_:");
            out.push_str(label);
        }
        Term::Literal { value, datatype } => {
            out.push('"');
            escape_into(out, value);
            out.push_str("\"^^<");
            out.push_str(datatype);
            out.push('>');
        }
    }
}

fn escape_into(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
}

// =============================================================================
// PARSER
// =============================================================================

/// Parse text produced by [`write_triples`]. Blank lines and `#` comments are skipped.
pub fn parse_triples(text: &str) -> Result<TripleSet, DirectoryError> {
    let mut triples = TripleSet::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let triple = parse_statement(line).map_err(|reason| {
            DirectoryError::Conversion(format!("line {}: {}", index + 1, reason))
        })?;
        triples.insert(triple);
    }
    Ok(triples)
}

fn parse_statement(line: &str) -> Result<Triple, String> {
    let (subject, rest) = parse_subject(line)?;
    let (predicate, rest) = parse_iri(rest.trim_start())?;
    let (object, rest) = parse_object(rest.trim_start())?;
    if rest.trim() != "." {
        return Err(format!("expected '.' at end of statement, found {:?}", rest.trim()));
    }
    Ok(Triple {
        subject,
        predicate,
        object,
    })
}

fn parse_subject(s: &str) -> Result<(Term, &str), String> {
    if s.starts_with('<') {
        let (iri, rest) = parse_iri(s)?;
        Ok((Term::Iri(iri), rest))
    } else if s.starts_with("_:") {
        parse_blank(s)
    } else {
        Err("subject must be an IRI or blank node".to_string())
    }
}

fn parse_object(s: &str) -> Result<(Term, &str), String> {
    if s.starts_with('"') {
        parse_literal(s)
    } else {
        parse_subject(s)
    }
}

fn parse_iri(s: &str) -> Result<(String, &str), String> {
    let body = s.strip_prefix('<').ok_or("expected '<'")?;
    let end = body.find('>').ok_or("unterminated IRI")?;
    let iri = &body[..end];
    if iri.is_empty() || iri.chars().any(|c| c.is_whitespace() || c == '<' || c == '"') {
        return Err(format!("invalid IRI <{iri}>"));
    }
    Ok((iri.to_string(), &body[end + 1..]))
}

fn parse_blank(s: &str) -> Result<(Term, &str), String> {
    let body = s.strip_prefix("_:").ok_or("expected '_:'")?;
    let end = body.find(char::is_whitespace).unwrap_or(body.len());
    if end == 0 {
        return Err("empty blank node label".to_string());
    }
    Ok((Term::Blank(body[..end].to_string()), &body[end..]))
}

fn parse_literal(s: &str) -> Result<(Term, &str), String> {
    let body = s.strip_prefix('"').ok_or("expected '\"'")?;
    let mut value = String::new();
    let mut chars = body.char_indices();
    let close = loop {
        let (i, c) = chars.next().ok_or("unterminated literal")?;
        match c {
            '"' => break i,
            '\\' => {
                let (_, esc) = chars.next().ok_or("dangling escape")?;
                match esc {
                    '\\' => value.push('\\'),
                    '"' => value.push('"'),
                    'n' => value.push('\n'),
                    'r' => value.push('\r'),
                    't' => value.push('\t'),
                    'u' | 'U' => {
                        let width = if esc == 'u' { 4 } else { 8 };
                        let mut hex = String::with_capacity(width);
                        for _ in 0..width {
                            let (_, h) = chars.next().ok_or("truncated unicode escape")?;
                            hex.push(h);
                        }
                        let code = u32::from_str_radix(&hex, 16)
                            .map_err(|_| format!("invalid unicode escape {hex}"))?;
                        value.push(char::from_u32(code).ok_or("invalid code point")?);
                    }
                    other => return Err(format!("unknown escape \\{other}")),
                }
            }
            c => value.push(c),
        }
    };

    let rest = &body[close + 1..];
    match rest.strip_prefix("^^") {
        Some(typed) => {
            let (datatype, rest) = parse_iri(typed)?;
            Ok((Term::Literal { value, datatype }, rest))
        }
        None => Ok((
            Term::Literal {
                value,
                datatype: XSD_STRING.to_string(),
            },
            rest,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{XSD_BOOLEAN, XSD_INTEGER};

    fn sample() -> TripleSet {
        let mut set = TripleSet::new();
        set.insert(Triple {
            subject: Term::Iri("urn:dev:1".into()),
            predicate: "http://p/title".into(),
            object: Term::Literal {
                value: "line one\nsays \"hi\" \\ ok\u{1}".into(),
                datatype: XSD_STRING.into(),
            },
        });
        set.insert(Triple {
            subject: Term::Iri("urn:dev:1".into()),
            predicate: "http://p/props".into(),
            object: Term::Blank("b0".into()),
        });
        set.insert(Triple {
            subject: Term::Blank("b0".into()),
            predicate: "http://p/count".into(),
            object: Term::Literal {
                value: "42".into(),
                datatype: XSD_INTEGER.into(),
            },
        });
        set
    }

    #[test]
    fn written_text_parses_back_to_the_same_set() {
        let triples = sample();
        let text = write_triples(&triples);
        assert_eq!(text.lines().count(), 3);
        assert_eq!(parse_triples(&text).expect("parse"), triples);
    }

    #[test]
    fn literals_of_different_datatypes_render_differently() {
        let as_string = Triple {
            subject: Term::Iri("urn:x".into()),
            predicate: "http://p/v".into(),
            object: Term::Literal {
                value: "true".into(),
                datatype: XSD_STRING.into(),
            },
        };
        let mut as_bool = as_string.clone();
        as_bool.object = Term::Literal {
            value: "true".into(),
            datatype: XSD_BOOLEAN.into(),
        };
        let a = write_triples(&TripleSet::from([as_string]));
        let b = write_triples(&TripleSet::from([as_bool]));
        assert_ne!(a, b);
    }

    #[test]
    fn untyped_literal_defaults_to_string() {
        let triples = parse_triples("<urn:x> <http://p/v> \"plain\" .").expect("parse");
        let triple = triples.iter().next().expect("one triple");
        assert_eq!(
            triple.object,
            Term::Literal {
                value: "plain".into(),
                datatype: XSD_STRING.into()
            }
        );
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let text = "# graph <g>\n\n<urn:x> <http://p/v> _:b1 .\n";
        assert_eq!(parse_triples(text).expect("parse").len(), 1);
    }

    #[test]
    fn malformed_statement_reports_line_number() {
        let err = parse_triples("<urn:x> <http://p/v> <urn:y> .\n<urn:x> <http://p/v>")
            .expect_err("truncated");
        assert!(
            matches!(&err, DirectoryError::Conversion(msg) if msg.starts_with("line 2:")),
            "{err:?}"
        );
    }
}
