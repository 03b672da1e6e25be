//! A minimal Exclusive XML Canonicalization (`xml-c14n-20010315`) routine.
//!
//! This is deliberately not a general-purpose C14N implementation: it only
//! needs to canonicalize the fixed, self-produced `factura`/`Signature` XML
//! this service emits (no external entities, no comments, no processing
//! instructions, ASCII-safe tag/attribute names). It normalizes attribute
//! ordering (lexicographic, as C14N requires), expands empty elements to
//! explicit start/end tag pairs, and applies C14N's text/attribute
//! escaping rules.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum C14nError {
    #[error("XML parse error during canonicalization: {0}")]
    Parse(#[from] quick_xml::Error),
    #[error("invalid UTF-8 in canonicalized output: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Canonicalizes an XML fragment (or full document) per the subset
/// described above.
pub fn canonicalize(xml: &str) -> Result<Vec<u8>, C14nError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);
    let mut out = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Decl(_) | Event::DocType(_) | Event::PI(_) | Event::Comment(_) => {
                // C14N drops the XML declaration, doctype, PIs, and comments
                // (comments only when canonicalizing without comments,
                // which is what the enveloped-signature profile uses).
            }
            Event::Start(e) => {
                out.push(b'<');
                out.extend_from_slice(e.name().as_ref());
                write_sorted_attrs(&mut out, &e);
                out.push(b'>');
            }
            Event::Empty(e) => {
                out.push(b'<');
                out.extend_from_slice(e.name().as_ref());
                write_sorted_attrs(&mut out, &e);
                out.push(b'>');
                out.push(b'<');
                out.push(b'/');
                out.extend_from_slice(e.name().as_ref());
                out.push(b'>');
            }
            Event::End(e) => {
                out.push(b'<');
                out.push(b'/');
                out.extend_from_slice(e.name().as_ref());
                out.push(b'>');
            }
            Event::Text(e) => {
                let text = e.unescape()?.into_owned();
                out.extend_from_slice(escape_text(&text).as_bytes());
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                out.extend_from_slice(escape_text(&text).as_bytes());
            }
            Event::Eof => break,
        }
        buf.clear();
    }

    Ok(out)
}

fn write_sorted_attrs(out: &mut Vec<u8>, e: &quick_xml::events::BytesStart<'_>) {
    let mut attrs: Vec<(String, String)> = e
        .attributes()
        .filter_map(|a| a.ok())
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
            let value = a.unescape_value().unwrap_or_default().into_owned();
            (key, value)
        })
        .collect();
    // C14N attribute ordering: namespace declarations first (lexicographic
    // by prefix), then remaining attributes (lexicographic by qualified
    // name). Our documents never carry unprefixed default-namespace
    // redeclarations mid-tree, so a single lexicographic sort over the
    // full qualified name satisfies this in practice.
    attrs.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, value) in attrs {
        out.push(b' ');
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(b"=\"");
        out.extend_from_slice(escape_attr(&value).as_bytes());
        out.push(b'"');
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\r', "&#xD;")
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
        .replace('\t', "&#x9;")
        .replace('\n', "&#xA;")
        .replace('\r', "&#xD;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_attributes_lexicographically() {
        let xml = r#"<a z="1" a="2"></a>"#;
        let out = String::from_utf8(canonicalize(xml).unwrap()).unwrap();
        assert_eq!(out, r#"<a a="2" z="1"></a>"#);
    }

    #[test]
    fn expands_empty_elements() {
        let xml = r#"<a><b/></a>"#;
        let out = String::from_utf8(canonicalize(xml).unwrap()).unwrap();
        assert_eq!(out, "<a><b></b></a>");
    }

    #[test]
    fn drops_xml_declaration() {
        let xml = "<?xml version=\"1.0\"?><a></a>";
        let out = String::from_utf8(canonicalize(xml).unwrap()).unwrap();
        assert_eq!(out, "<a></a>");
    }

    #[test]
    fn is_deterministic() {
        let xml = r#"<root><child attr="x">text &amp; more</child></root>"#;
        let a = canonicalize(xml).unwrap();
        let b = canonicalize(xml).unwrap();
        assert_eq!(a, b);
    }
}
