// XML tree parsing: raw response bytes into a tag-keyed tree.
//
// Sibling elements become a mapping when their tags are all distinct and a
// sequence of one-entry mappings as soon as one tag repeats. The wire format
// cannot tell "a list of N items" from "one of each", so the tree keeps that
// ambiguity instead of guessing.
use crate::error::DecodeError;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, Event};
use quick_xml::name::{QName, ResolveResult};
use quick_xml::reader::NsReader;
use serde::{Serialize, Serializer};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    // Trimmed leaf text, empty for empty elements
    Scalar(String),
    // Children with distinct tags, in document order
    Mapping(Vec<(String, XmlNode)>),
    // Children with at least one repeated tag; every element is a one-entry Mapping
    Sequence(Vec<XmlNode>),
}

impl XmlNode {
    // Child of a mapping by tag name
    pub fn get(&self, tag: &str) -> Option<&XmlNode> {
        match self {
            XmlNode::Mapping(entries) => entries
                .iter()
                .find(|(key, _)| key == tag)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            XmlNode::Scalar(text) => Some(text),
            _ => None,
        }
    }

    /// The only entry of a one-entry mapping.
    pub fn single_entry(&self) -> Option<(&str, &XmlNode)> {
        match self {
            XmlNode::Mapping(entries) if entries.len() == 1 => {
                entries.first().map(|(key, value)| (key.as_str(), value))
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            XmlNode::Scalar(_) => "scalar",
            XmlNode::Mapping(_) => "mapping",
            XmlNode::Sequence(_) => "sequence",
        }
    }

    // Compact JSON rendering used in error reports
    pub fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

impl Serialize for XmlNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            XmlNode::Scalar(text) => serializer.serialize_str(text),
            XmlNode::Mapping(entries) => {
                serializer.collect_map(entries.iter().map(|(key, value)| (key, value)))
            }
            XmlNode::Sequence(items) => serializer.collect_seq(items),
        }
    }
}

// An element whose end tag has not been seen yet
struct OpenElement {
    tag: String,
    children: Vec<(String, XmlNode)>,
    text: String,
}

impl OpenElement {
    fn new(tag: String) -> Self {
        Self {
            tag,
            children: Vec::new(),
            text: String::new(),
        }
    }

    fn finish(self) -> (String, XmlNode) {
        if self.children.is_empty() {
            let text = self.text.trim().to_string();
            return (self.tag, XmlNode::Scalar(text));
        }

        let has_duplicates = {
            let mut seen = HashSet::with_capacity(self.children.len());
            !self.children.iter().all(|(tag, _)| seen.insert(tag.as_str()))
        };

        let node = if has_duplicates {
            XmlNode::Sequence(
                self.children
                    .into_iter()
                    .map(|entry| XmlNode::Mapping(vec![entry]))
                    .collect(),
            )
        } else {
            XmlNode::Mapping(self.children)
        };
        (self.tag, node)
    }
}

// Builds the tree while the reader walks the document
#[derive(Default)]
struct TreeBuilder {
    stack: Vec<OpenElement>,
    root: Option<(String, XmlNode)>,
}

impl TreeBuilder {
    fn open(&mut self, tag: String) -> Result<(), DecodeError> {
        self.ensure_inside_document()?;
        self.stack.push(OpenElement::new(tag));
        Ok(())
    }

    fn empty(&mut self, tag: String) -> Result<(), DecodeError> {
        self.ensure_inside_document()?;
        self.attach((tag, XmlNode::Scalar(String::new())));
        Ok(())
    }

    fn close(&mut self) -> Result<(), DecodeError> {
        let element = self
            .stack
            .pop()
            .ok_or_else(|| DecodeError::malformed("closing tag without an open element"))?;
        self.attach(element.finish());
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<(), DecodeError> {
        match self.stack.last_mut() {
            Some(open) => {
                open.text.push_str(text);
                Ok(())
            }
            None if text.trim().is_empty() => Ok(()),
            None => Err(DecodeError::malformed("text outside of the root element")),
        }
    }

    fn attach(&mut self, entry: (String, XmlNode)) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(entry),
            None => self.root = Some(entry),
        }
    }

    fn ensure_inside_document(&self) -> Result<(), DecodeError> {
        if self.stack.is_empty() && self.root.is_some() {
            return Err(DecodeError::malformed("content after the root element"));
        }
        Ok(())
    }

    fn finish(self) -> Result<XmlNode, DecodeError> {
        if let Some(open) = self.stack.last() {
            return Err(DecodeError::malformed(format!(
                "unexpected end of document inside <{}>",
                open.tag
            )));
        }
        let (tag, node) = self
            .root
            .ok_or_else(|| DecodeError::malformed("document has no root element"))?;
        Ok(XmlNode::Mapping(vec![(tag, node)]))
    }
}

/// Parses a complete XML document. The result is a one-entry mapping from the
/// root tag to the parsed root. Tags are namespace-resolved to `{uri}local`.
pub fn parse(xml: &[u8]) -> Result<XmlNode, DecodeError> {
    let mut reader = NsReader::from_reader(xml);
    let mut builder = TreeBuilder::default();
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            DecodeError::malformed(format!("error at position {}: {}", reader.error_position(), e))
        })?;

        match event {
            Event::Start(start) => builder.open(resolved_tag(&reader, start.name())?)?,
            Event::Empty(start) => builder.empty(resolved_tag(&reader, start.name())?)?,
            Event::End(_) => builder.close()?,
            Event::Text(text) => {
                let text = text
                    .decode()
                    .map_err(|e| DecodeError::malformed(e.to_string()))?;
                builder.text(&text)?;
            }
            Event::CData(cdata) => {
                let text = cdata
                    .decode()
                    .map_err(|e| DecodeError::malformed(e.to_string()))?;
                builder.text(&text)?;
            }
            Event::GeneralRef(reference) => builder.text(&resolve_reference(&reference)?)?,
            Event::Eof => break,
            // Declaration, comments, processing instructions, doctype
            _ => {}
        }
        buf.clear();
    }

    builder.finish()
}

fn resolved_tag<R>(reader: &NsReader<R>, name: QName<'_>) -> Result<String, DecodeError> {
    let (namespace, local) = reader.resolve_element(name);
    let local = std::str::from_utf8(local.as_ref())
        .map_err(|e| DecodeError::malformed(format!("tag name is not UTF-8: {}", e)))?;

    match namespace {
        ResolveResult::Bound(namespace) => {
            let uri = std::str::from_utf8(namespace.as_ref())
                .map_err(|e| DecodeError::malformed(format!("namespace is not UTF-8: {}", e)))?;
            Ok(format!("{{{}}}{}", uri, local))
        }
        ResolveResult::Unbound => Ok(local.to_string()),
        ResolveResult::Unknown(prefix) => Err(DecodeError::malformed(format!(
            "unbound namespace prefix `{}`",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

fn resolve_reference(reference: &BytesRef<'_>) -> Result<String, DecodeError> {
    if let Some(ch) = reference
        .resolve_char_ref()
        .map_err(|e| DecodeError::malformed(e.to_string()))?
    {
        return Ok(ch.to_string());
    }

    let name = reference
        .decode()
        .map_err(|e| DecodeError::malformed(e.to_string()))?;
    resolve_predefined_entity(&name)
        .map(str::to_string)
        .ok_or_else(|| DecodeError::malformed(format!("undefined entity &{};", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn scalar(text: &str) -> XmlNode {
        XmlNode::Scalar(text.to_string())
    }

    fn root_of(tree: &XmlNode) -> &XmlNode {
        tree.single_entry().map(|(_, node)| node).unwrap()
    }

    #[test]
    fn test_distinct_children_become_mapping() {
        let tree = parse(b"<a><b>1</b><c>2</c><d/></a>").unwrap();

        assert_eq!(
            tree,
            XmlNode::Mapping(vec![(
                "a".to_string(),
                XmlNode::Mapping(vec![
                    ("b".to_string(), scalar("1")),
                    ("c".to_string(), scalar("2")),
                    ("d".to_string(), scalar("")),
                ])
            )])
        );
    }

    #[test]
    fn test_repeated_children_become_sequence() {
        let tree = parse(b"<list><item>x</item><other>y</other><item>z</item></list>").unwrap();

        let expected = XmlNode::Sequence(vec![
            XmlNode::Mapping(vec![("item".to_string(), scalar("x"))]),
            XmlNode::Mapping(vec![("other".to_string(), scalar("y"))]),
            XmlNode::Mapping(vec![("item".to_string(), scalar("z"))]),
        ]);
        assert_eq!(root_of(&tree), &expected);
    }

    #[test]
    fn test_leaf_text_is_trimmed() {
        let tree = parse(b"<a>\n   hello world \t\n</a>").unwrap();
        assert_eq!(root_of(&tree), &scalar("hello world"));
    }

    #[test]
    fn test_whitespace_only_leaf_is_empty() {
        let tree = parse(b"<a>   </a>").unwrap();
        assert_eq!(root_of(&tree), &scalar(""));
    }

    #[test]
    fn test_entities_and_cdata_are_resolved() {
        let tree = parse(b"<a>Tom &amp; Jerry &#38; <![CDATA[<b>bold</b>]]></a>").unwrap();
        assert_eq!(root_of(&tree), &scalar("Tom & Jerry & <b>bold</b>"));
    }

    #[test]
    fn test_namespaces_are_kept_in_tag_names() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
            <env:Envelope xmlns:env="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ns1="ns1">
                <env:Body><ns1:callResponse><callReturn>ok</callReturn></ns1:callResponse></env:Body>
            </env:Envelope>"#;
        let tree = parse(xml).unwrap();

        let (root_tag, envelope) = tree.single_entry().unwrap();
        assert_eq!(root_tag, "{http://schemas.xmlsoap.org/soap/envelope/}Envelope");
        let body = envelope
            .get("{http://schemas.xmlsoap.org/soap/envelope/}Body")
            .unwrap();
        let response = body.get("{ns1}callResponse").unwrap();
        assert_eq!(response.get("callReturn"), Some(&scalar("ok")));
    }

    #[test]
    fn test_attributes_and_comments_are_ignored() {
        let tree = parse(br#"<a kind="x"><!-- note --><b type="int">3</b></a>"#).unwrap();
        assert_eq!(
            root_of(&tree),
            &XmlNode::Mapping(vec![("b".to_string(), scalar("3"))])
        );
    }

    #[test]
    fn test_text_of_parent_elements_is_dropped() {
        let tree = parse(b"<a>stray<b>1</b>tail</a>").unwrap();
        assert_eq!(
            root_of(&tree),
            &XmlNode::Mapping(vec![("b".to_string(), scalar("1"))])
        );
    }

    #[test_case(b"<a><b></a>"; "#1 Mismatched end tag")]
    #[test_case(b"<a><b>text</b>"; "#2 Unterminated root")]
    #[test_case(b"<a></a><b></b>"; "#3 Second root element")]
    #[test_case(b""; "#4 Empty document")]
    #[test_case(b"<a>&nbsp;</a>"; "#5 Undefined entity")]
    #[test_case(b"<x:a></x:a>"; "#6 Unbound prefix")]
    #[test_case(b"<a><b</a>"; "#7 Broken start tag")]
    #[test_case(b"text<a/>"; "#8 Text before root")]
    fn test_malformed_documents(xml: &[u8]) {
        let result = parse(xml);
        assert!(
            matches!(result, Err(DecodeError::MalformedXmlError(_))),
            "expected malformed error, got {:?}",
            result
        );
    }

    #[test]
    fn test_render_as_json() {
        let tree = parse(b"<a><b>1</b><b>2</b></a>").unwrap();
        assert_eq!(tree.render(), r#"{"a":[{"b":"1"},{"b":"2"}]}"#);
    }
}
