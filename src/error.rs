// Error types for response decoding
use crate::xml_tree::XmlNode;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    // The bytes are not well-formed XML
    #[error("Malformed XML: {0}")]
    MalformedXmlError(String),

    // Well-formed XML that does not have the envelope/record shape we expect.
    // `content` holds the raw response (or the offending node) for diagnosis.
    #[error("Unexpected response shape: {reason}")]
    ResponseParseError { reason: String, content: String },

    // The service flagged `error = true` and sent this message
    #[error("Service error: {message}")]
    ServiceError { message: String },
}

impl DecodeError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        DecodeError::MalformedXmlError(message.into())
    }

    pub(crate) fn shape(reason: impl Into<String>, node: &XmlNode) -> Self {
        DecodeError::ResponseParseError {
            reason: reason.into(),
            content: node.render(),
        }
    }

    pub fn is_service_error(&self) -> bool {
        matches!(self, DecodeError::ServiceError { .. })
    }

    // Raw content attached to a shape error, if any
    pub fn content(&self) -> Option<&str> {
        match self {
            DecodeError::ResponseParseError { content, .. } => Some(content),
            _ => None,
        }
    }
}
