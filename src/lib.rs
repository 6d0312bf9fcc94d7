// Client library for the DoctorSender SOAP web service

// Response decoding
pub mod decoded;
pub mod error;
pub mod response;
pub mod xml_tree;

// Requests and the call pipeline
pub mod catalog;
pub mod client;
pub mod envelope;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export key types for convenience
pub use catalog::{Catalog, CatalogTable};
pub use client::{
    ApiError, ClientConfig, ClientError, ClientStats, HttpTransport, SoapClient, Transport,
};
pub use decoded::{CoercionError, DecodedValue};
pub use envelope::{Call, EnvelopeError, Param, RequestEnvelope};
pub use error::DecodeError;
pub use response::{
    decode, decode_with_diagnostics, reduce, DecodeConfig, Decoded, Diagnostic, ResponseDecoder,
};
pub use xml_tree::{parse, XmlNode};
