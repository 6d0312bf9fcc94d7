// Helpers for building service responses in tests

pub const ENVELOPE_OPEN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ns1="ns1" xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:ns2="http://xml.apache.org/xml-soap" xmlns:SOAP-ENC="http://schemas.xmlsoap.org/soap/encoding/" SOAP-ENV:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><SOAP-ENV:Body><ns1:webserviceResponse><webserviceReturn xsi:type="ns2:Map">"#;

pub const ENVELOPE_CLOSE: &str =
    "</webserviceReturn></ns1:webserviceResponse></SOAP-ENV:Body></SOAP-ENV:Envelope>";

// `<item><key>..</key><value>..</value></item>`; `value` is inserted verbatim
pub fn record(key: &str, value: &str) -> String {
    format!(
        r#"<item><key xsi:type="xsd:string">{}</key><value>{}</value></item>"#,
        key, value
    )
}

// One entity of a list payload: its records wrapped in a single `item`
pub fn entity(fields: &[(&str, &str)]) -> String {
    let records: String = fields.iter().map(|(k, v)| record(k, v)).collect();
    format!("<item>{}</item>", records)
}

pub fn envelope(records: &[String]) -> String {
    format!("{}{}{}", ENVELOPE_OPEN, records.concat(), ENVELOPE_CLOSE)
}

// A successful response carrying `msg`
pub fn ok_response(msg: &str) -> String {
    envelope(&[record("error", "false"), record("msg", msg)])
}

pub fn error_response(message: &str) -> String {
    envelope(&[record("error", "true"), record("msg", message)])
}
