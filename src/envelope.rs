// Request envelopes: the SOAP document posted for every API call.
//
// All calls go to the same `webservice` operation; the API method name and its
// positional parameters travel inside the body.
use chrono::NaiveDateTime;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use thiserror::Error;

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SOAP_ENC_NS: &str = "http://schemas.xmlsoap.org/soap/encoding/";
const APACHE_SOAP_NS: &str = "http://xml.apache.org/xml-soap";
const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// `ur-type[N]` value the service expects in the data array header
pub const DEFAULT_UR_TYPE: usize = 3;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Failed to write request envelope: {0}")]
    WriteError(String),
}

// One positional argument of an API method
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Int(i64),
    Str(String),
    Bool(bool),
    // Free text that may contain markup (mail bodies, subjects)
    CData(String),
    DateTime(NaiveDateTime),
    StrArray(Vec<String>),
    // Array of `ns2:Map` records, one map per element
    MapArray(Vec<Vec<(String, String)>>),
}

impl Param {
    pub fn str(value: impl Into<String>) -> Self {
        Param::Str(value.into())
    }

    pub fn cdata(value: impl Into<String>) -> Self {
        Param::CData(value.into())
    }
}

/// One API call: the method name and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    method: String,
    params: Vec<Param>,
    ur_type: usize,
}

impl Call {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Vec::new(),
            ur_type: DEFAULT_UR_TYPE,
        }
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn params(mut self, params: impl IntoIterator<Item = Param>) -> Self {
        self.params.extend(params);
        self
    }

    // Calls taking map arrays are declared as ur-type[2]
    pub fn ur_type(mut self, ur_type: usize) -> Self {
        self.ur_type = ur_type;
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn parameters(&self) -> &[Param] {
        &self.params
    }
}

// Credentials and operation names shared by every request of a client
#[derive(Debug, Clone)]
pub struct RequestEnvelope<'a> {
    pub user: &'a str,
    pub token: &'a str,
    pub service_namespace: &'a str,
    pub method_tag: &'a str,
}

type XmlWriter = Writer<Vec<u8>>;

impl<'a> RequestEnvelope<'a> {
    /// Serializes `call` as a complete request document.
    pub fn build(&self, call: &Call) -> Result<Vec<u8>, EnvelopeError> {
        let mut writer = Writer::new(Vec::new());
        self.write_document(&mut writer, call)
            .map_err(|e| EnvelopeError::WriteError(e.to_string()))?;
        Ok(writer.into_inner())
    }

    fn write_document(&self, writer: &mut XmlWriter, call: &Call) -> std::io::Result<()> {
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        writer.write_event(Event::Start(BytesStart::new("SOAP-ENV:Envelope").with_attributes([
            ("xmlns:SOAP-ENV", SOAP_ENV_NS),
            ("xmlns:SOAP-ENC", SOAP_ENC_NS),
            ("xmlns:ns1", self.service_namespace),
            ("xmlns:ns2", APACHE_SOAP_NS),
            ("xmlns:xsd", XSD_NS),
            ("xmlns:xsi", XSI_NS),
            ("SOAP-ENV:encodingStyle", SOAP_ENC_NS),
        ])))?;

        // Authentication header
        start(writer, "SOAP-ENV:Header", &[])?;
        start(writer, "ns1:app_auth", &[])?;
        write_pair(writer, "user", self.user, &[])?;
        write_pair(writer, "pass", self.token, &[])?;
        end(writer, "ns1:app_auth")?;
        end(writer, "SOAP-ENV:Header")?;

        start(writer, "SOAP-ENV:Body", &[])?;
        let operation_tag = format!("ns1:{}", self.method_tag);
        start(writer, &operation_tag, &[])?;
        text_element(writer, "method", &[("xsi:type", "xsd:string")], call.method())?;

        if !call.params.is_empty() {
            let array_type = format!("xsd:ur-type[{}]", call.ur_type);
            start(
                writer,
                "data",
                &[
                    ("SOAP-ENC:arrayType", array_type.as_str()),
                    ("xsi:type", "SOAP-ENC:Array"),
                ],
            )?;
            for param in &call.params {
                write_param(writer, param)?;
            }
            end(writer, "data")?;
        }

        end(writer, &operation_tag)?;
        end(writer, "SOAP-ENV:Body")?;
        end(writer, "SOAP-ENV:Envelope")
    }
}

fn write_param(writer: &mut XmlWriter, param: &Param) -> std::io::Result<()> {
    match param {
        Param::Int(value) => {
            text_element(writer, "item", &[("xsi:type", "xsd:int")], &value.to_string())
        }
        Param::Str(value) => text_element(writer, "item", &[("xsi:type", "xsd:str")], value),
        Param::Bool(value) => text_element(
            writer,
            "item",
            &[("xsi:type", "xsd:bool")],
            if *value { "true" } else { "false" },
        ),
        Param::CData(value) => {
            start(writer, "item", &[("xsi:type", "xsd:str")])?;
            // A CDATA section cannot contain its own terminator
            if value.contains("]]>") {
                writer.write_event(Event::Text(BytesText::new(value)))?;
            } else {
                writer.write_event(Event::CData(BytesCData::new(value.as_str())))?;
            }
            end(writer, "item")
        }
        Param::DateTime(value) => text_element(
            writer,
            "item",
            &[("xsi:type", "xsd:str")],
            &value.format(DATE_TIME_FORMAT).to_string(),
        ),
        Param::StrArray(values) => {
            let array_type = format!("xsd:string[{}]", values.len());
            start(
                writer,
                "item",
                &[
                    ("SOAP-ENC:arrayType", array_type.as_str()),
                    ("xsi:type", "SOAP-ENC:Array"),
                ],
            )?;
            for value in values {
                text_element(writer, "item", &[("xsi:type", "xsd:string")], value)?;
            }
            end(writer, "item")
        }
        Param::MapArray(maps) => {
            let array_type = format!("ns2:Map[{}]", maps.len());
            start(
                writer,
                "item",
                &[
                    ("SOAP-ENC:arrayType", array_type.as_str()),
                    ("xsi:type", "SOAP-ENC:Array"),
                ],
            )?;
            for map in maps {
                start(writer, "item", &[("xsi:type", "ns2:Map")])?;
                for (key, value) in map {
                    write_pair(writer, key, value, &[("xsi:type", "xsd:string")])?;
                }
                end(writer, "item")?;
            }
            end(writer, "item")
        }
    }
}

// `<item><key>k</key><value>v</value></item>`
fn write_pair(
    writer: &mut XmlWriter,
    key: &str,
    value: &str,
    attributes: &[(&str, &str)],
) -> std::io::Result<()> {
    start(writer, "item", &[])?;
    text_element(writer, "key", attributes, key)?;
    text_element(writer, "value", attributes, value)?;
    end(writer, "item")
}

fn text_element(
    writer: &mut XmlWriter,
    tag: &str,
    attributes: &[(&str, &str)],
    text: &str,
) -> std::io::Result<()> {
    start(writer, tag, attributes)?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    end(writer, tag)
}

fn start(writer: &mut XmlWriter, tag: &str, attributes: &[(&str, &str)]) -> std::io::Result<()> {
    writer.write_event(Event::Start(
        BytesStart::new(tag).with_attributes(attributes.iter().copied()),
    ))
}

fn end(writer: &mut XmlWriter, tag: &str) -> std::io::Result<()> {
    writer.write_event(Event::End(BytesEnd::new(tag)))
}
