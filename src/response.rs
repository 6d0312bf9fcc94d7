// Response reduction: from the parsed SOAP envelope to a usable value.
//
// Every response is `Envelope/Body/<method>Response/<method>Return`, and the
// return element is a list of `item` records with a `key` and a `value`. One
// record flags errors, another (`msg`) carries the payload. The payload itself
// is encoded with the same records, nested to varying depths per endpoint.
use crate::decoded::DecodedValue;
use crate::error::DecodeError;
use crate::xml_tree::{self, XmlNode};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const DEFAULT_SERVICE_NAMESPACE: &str = "ns1";
pub const DEFAULT_METHOD_TAG: &str = "webservice";

const ERROR_KEY: &str = "error";
const PAYLOAD_KEY: &str = "msg";

// Decoder configuration: where the payload lives and which field names
// identify entities in list-shaped payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub envelope_namespace: String,
    pub response_tag: String,
    pub return_tag: String,
    // First-record keys that mark an entity with several fields (user lists)
    pub grouping_fields: Vec<String>,
    // Keys whose value names an entity in id/name lookups
    pub display_fields: Vec<String>,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self::for_method(DEFAULT_SERVICE_NAMESPACE, DEFAULT_METHOD_TAG)
    }
}

impl DecodeConfig {
    pub fn for_method(service_namespace: &str, method_tag: &str) -> Self {
        Self {
            envelope_namespace: SOAP_ENVELOPE_NS.to_string(),
            response_tag: format!("{{{}}}{}Response", service_namespace, method_tag),
            return_tag: format!("{}Return", method_tag),
            grouping_fields: vec!["listName".to_string()],
            display_fields: vec!["name".to_string(), "language".to_string()],
        }
    }

    pub fn with_grouping_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grouping_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_display_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.display_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    fn is_grouping_field(&self, key: &str) -> bool {
        self.grouping_fields.iter().any(|field| field == key)
    }

    fn is_display_field(&self, key: &str) -> bool {
        self.display_fields.iter().any(|field| field == key)
    }
}

/// An array element that could not be reduced and was replaced by its raw
/// content.
///
/// `path` holds the element's index in each enclosing array, outermost
/// first, so `[0, 2]` is the third element of the array found in the first
/// element of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub path: Vec<usize>,
    pub reason: String,
}

impl Diagnostic {
    // Index within the innermost array
    pub fn index(&self) -> Option<usize> {
        self.path.last().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub value: DecodedValue,
    pub diagnostics: Vec<Diagnostic>,
}

// One `{"item": {"key": K, "value": V}}` record
struct Record<'a> {
    key: &'a str,
    value: &'a XmlNode,
}

impl<'a> Record<'a> {
    fn from_node(node: &'a XmlNode) -> Result<Self, DecodeError> {
        match node.single_entry() {
            Some(("item", fields)) => Self::from_fields(fields),
            _ => Err(DecodeError::shape("expected an `item` record", node)),
        }
    }

    fn from_fields(fields: &'a XmlNode) -> Result<Self, DecodeError> {
        let key = fields
            .get("key")
            .and_then(XmlNode::as_scalar)
            .ok_or_else(|| DecodeError::shape("record has no scalar `key`", fields))?;
        let value = fields
            .get("value")
            .ok_or_else(|| DecodeError::shape("record has no `value`", fields))?;
        Ok(Self { key, value })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseDecoder {
    config: DecodeConfig,
}

impl ResponseDecoder {
    pub fn new(config: DecodeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }

    /// Parses and reduces one raw response. Shape errors carry the raw
    /// response text.
    pub fn decode(&self, xml: &[u8]) -> Result<Decoded, DecodeError> {
        debug!(bytes = xml.len(), "decoding service response");
        let tree = xml_tree::parse(xml)?;

        self.reduce(&tree).map_err(|err| match err {
            DecodeError::ResponseParseError { reason, .. } => DecodeError::ResponseParseError {
                reason,
                content: String::from_utf8_lossy(xml).into_owned(),
            },
            other => other,
        })
    }

    pub fn reduce(&self, tree: &XmlNode) -> Result<Decoded, DecodeError> {
        let prefix = format!("{{{}}}", self.config.envelope_namespace);
        let tree = strip_envelope_namespace(tree.clone(), &prefix);

        let payload = self.unwrap_envelope(&tree)?;
        let records = payload_records(payload)?;
        check_error_flag(&records)?;

        let mut diagnostics = Vec::new();
        let value = match records.iter().rev().find(|record| record.key == PAYLOAD_KEY) {
            Some(record) => self.unwrap_value(record.value, &mut diagnostics)?,
            None => DecodedValue::empty_map(),
        };

        if !diagnostics.is_empty() {
            debug!(substituted = diagnostics.len(), "response decoded with raw elements");
        }
        Ok(Decoded { value, diagnostics })
    }

    fn unwrap_envelope<'t>(&self, tree: &'t XmlNode) -> Result<&'t XmlNode, DecodeError> {
        let envelope = child(tree, "Envelope")?;
        let body = child(envelope, "Body")?;

        if let Some(fault) = body.get("Fault") {
            let message = fault
                .get("faultstring")
                .and_then(XmlNode::as_scalar)
                .map(str::to_string)
                .unwrap_or_else(|| fault.render());
            return Err(DecodeError::ServiceError { message });
        }

        let response = child(body, &self.config.response_tag)?;
        child(response, &self.config.return_tag)
    }

    fn unwrap_value(
        &self,
        node: &XmlNode,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<DecodedValue, DecodeError> {
        match node {
            XmlNode::Scalar(text) => Ok(DecodedValue::Scalar(text.clone())),
            XmlNode::Mapping(_) => {
                let item = match node.single_entry() {
                    Some(("item", item)) => item,
                    _ => return Err(DecodeError::shape("expected a single `item` entry", node)),
                };

                match item {
                    XmlNode::Scalar(text) => Ok(DecodedValue::Scalar(text.clone())),
                    XmlNode::Mapping(_) => {
                        let record = Record::from_fields(item)?;
                        let value = self.unwrap_value(record.value, diagnostics)?;
                        Ok(DecodedValue::entry(record.key, value))
                    }
                    XmlNode::Sequence(records) => self.unwrap_entity(records, diagnostics),
                }
            }
            XmlNode::Sequence(children) => Ok(self.unwrap_indexed(children, diagnostics)),
        }
    }

    // Several records describing one entity. The first record's value names
    // the entity; what the rest contribute depends on the first key.
    fn unwrap_entity(
        &self,
        nodes: &[XmlNode],
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<DecodedValue, DecodeError> {
        let records = nodes
            .iter()
            .map(Record::from_node)
            .collect::<Result<Vec<_>, _>>()?;
        let (first, rest) = match records.split_first() {
            Some(split) => split,
            None => return Ok(DecodedValue::empty_map()),
        };
        let entity_key = first
            .value
            .as_scalar()
            .ok_or_else(|| DecodeError::shape("entity key is not a scalar", first.value))?;

        if self.config.is_grouping_field(first.key) {
            let mut fields = IndexMap::new();
            for record in &records {
                if record.value.as_scalar() == Some(entity_key) {
                    continue;
                }
                fields.insert(
                    record.key.to_string(),
                    self.unwrap_value(record.value, diagnostics)?,
                );
            }
            return Ok(DecodedValue::entry(entity_key, DecodedValue::Map(fields)));
        }

        let display = rest
            .iter()
            .rev()
            .find(|record| self.config.is_display_field(record.key))
            .ok_or_else(|| {
                DecodeError::shape(
                    format!("no display field among the records of `{}`", entity_key),
                    &XmlNode::Sequence(nodes.to_vec()),
                )
            })?;
        let value = self.unwrap_value(display.value, diagnostics)?;
        Ok(DecodedValue::entry(entity_key, value))
    }

    // Arrays mix clean records with odd ones on some endpoints. Elements that
    // do not reduce to a map are kept under their index instead.
    fn unwrap_indexed(
        &self,
        children: &[XmlNode],
        diagnostics: &mut Vec<Diagnostic>,
    ) -> DecodedValue {
        let mut merged = IndexMap::new();

        for (index, child) in children.iter().enumerate() {
            // Kept only if the element itself reduces; a raw element replaces
            // whatever was reported from inside it
            let mut nested = Vec::new();
            match self.unwrap_value(child, &mut nested) {
                Ok(DecodedValue::Map(entries)) => {
                    merged.extend(entries);
                    diagnostics.extend(nested.into_iter().map(|mut diagnostic| {
                        diagnostic.path.insert(0, index);
                        diagnostic
                    }));
                }
                Ok(_) => {
                    merged.insert(index.to_string(), raw_element(child));
                }
                Err(err) => {
                    let reason = match &err {
                        DecodeError::ResponseParseError { reason, .. } => reason.clone(),
                        other => other.to_string(),
                    };
                    warn!(index, %reason, "keeping raw array element that could not be reduced");
                    diagnostics.push(Diagnostic {
                        path: vec![index],
                        reason,
                    });
                    merged.insert(index.to_string(), raw_element(child));
                }
            }
        }

        DecodedValue::Map(merged)
    }
}

/// Decodes a raw response with the default configuration.
pub fn decode(xml: &[u8]) -> Result<DecodedValue, DecodeError> {
    ResponseDecoder::default()
        .decode(xml)
        .map(|decoded| decoded.value)
}

/// Like [`decode`], also returning the array elements kept raw.
pub fn decode_with_diagnostics(xml: &[u8]) -> Result<Decoded, DecodeError> {
    ResponseDecoder::default().decode(xml)
}

pub fn reduce(tree: &XmlNode) -> Result<DecodedValue, DecodeError> {
    ResponseDecoder::default()
        .reduce(tree)
        .map(|decoded| decoded.value)
}

// Strips the envelope namespace from the first key of each mapping level and
// descends through that first entry only. Deeper or later keys keep their
// qualified names.
fn strip_envelope_namespace(node: XmlNode, prefix: &str) -> XmlNode {
    match node {
        XmlNode::Mapping(mut entries) => {
            if let Some((key, value)) = entries.first_mut() {
                if key.contains(prefix) {
                    *key = key.replace(prefix, "");
                }
                if matches!(value, XmlNode::Mapping(_)) {
                    let inner = std::mem::replace(value, XmlNode::Scalar(String::new()));
                    *value = strip_envelope_namespace(inner, prefix);
                }
            }
            XmlNode::Mapping(entries)
        }
        other => other,
    }
}

fn child<'t>(node: &'t XmlNode, tag: &str) -> Result<&'t XmlNode, DecodeError> {
    node.get(tag).ok_or_else(|| {
        DecodeError::shape(format!("missing `{}` in response envelope", tag), node)
    })
}

fn payload_records(payload: &XmlNode) -> Result<Vec<Record<'_>>, DecodeError> {
    match payload {
        XmlNode::Sequence(items) => items.iter().map(Record::from_node).collect(),
        // A lone record does not repeat its tag
        XmlNode::Mapping(_) => Ok(vec![Record::from_node(payload)?]),
        XmlNode::Scalar(_) => Err(DecodeError::shape(
            "response payload is not a record list",
            payload,
        )),
    }
}

// The message is the value of the record right after the flag
fn check_error_flag(records: &[Record<'_>]) -> Result<(), DecodeError> {
    for (index, record) in records.iter().enumerate() {
        if record.key != ERROR_KEY || record.value.as_scalar() != Some("true") {
            continue;
        }

        let message = match records.get(index + 1) {
            Some(next) => match next.value {
                XmlNode::Scalar(text) => text.clone(),
                other => other.render(),
            },
            None => {
                return Err(DecodeError::shape(
                    "error flag is not followed by a message record",
                    record.value,
                ))
            }
        };
        return Err(DecodeError::ServiceError { message });
    }
    Ok(())
}

fn raw_element(child: &XmlNode) -> DecodedValue {
    match child.single_entry() {
        Some(("item", inner)) => DecodedValue::from(inner),
        _ => DecodedValue::from(child),
    }
}
