// SOAP client: builds request envelopes, posts them and decodes the answers.
//
// Every call is a single POST to the service endpoint. There are no retries;
// the service is not idempotent for most write methods.

use crate::catalog::{Catalog, CatalogTable};
use crate::decoded::{CoercionError, DecodedValue};
use crate::envelope::{Call, EnvelopeError, RequestEnvelope};
use crate::error::DecodeError;
use crate::response::{
    DecodeConfig, Decoded, ResponseDecoder, DEFAULT_METHOD_TAG, DEFAULT_SERVICE_NAMESPACE,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_ENDPOINT: &str = "https://soapwebservice.doctorsender.com/soapserver.php";
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml";

// Longest response excerpt kept in an ApiResponseError message
const ERROR_BODY_EXCERPT: usize = 512;

// Error types for the call pipeline
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("API error: {status_code} - {message}")]
    ApiResponseError { status_code: u16, message: String },

    #[error(transparent)]
    RequestEncoding(#[from] EnvelopeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Unexpected response value: {0}")]
    Coercion(#[from] CoercionError),
}

impl ApiError {
    // The service answered with its error flag or a SOAP fault
    pub fn is_service_error(&self) -> bool {
        matches!(self, ApiError::Decode(err) if err.is_service_error())
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

// Client configuration, loadable from JSON; missing fields take the defaults
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: String,
    pub user: String,
    pub token: String,
    pub timeout_ms: u64,
    pub service_namespace: String,
    pub method_tag: String,
    pub user_agent: String,
    pub grouping_fields: Vec<String>,
    pub display_fields: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let decode = DecodeConfig::default();
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user: String::new(),
            token: String::new(),
            timeout_ms: 40_000,
            service_namespace: DEFAULT_SERVICE_NAMESPACE.to_string(),
            method_tag: DEFAULT_METHOD_TAG.to_string(),
            user_agent: format!("doctorsender-rs/{}", env!("CARGO_PKG_VERSION")),
            grouping_fields: decode.grouping_fields,
            display_fields: decode.display_fields,
        }
    }
}

impl ClientConfig {
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        let config: ClientConfig =
            serde_json::from_str(json).map_err(|e| ClientError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ClientError::ConfigError(format!(
                "endpoint must be an http(s) URL, got `{}`",
                self.endpoint
            )));
        }
        if self.user.is_empty() || self.token.is_empty() {
            return Err(ClientError::ConfigError(
                "user and token are required".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ClientError::ConfigError(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.service_namespace.is_empty() || self.method_tag.is_empty() {
            return Err(ClientError::ConfigError(
                "service_namespace and method_tag must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    // Decoder settings matching the configured operation tags
    pub fn decode_config(&self) -> DecodeConfig {
        DecodeConfig::for_method(&self.service_namespace, &self.method_tag)
            .with_grouping_fields(self.grouping_fields.iter().cloned())
            .with_display_fields(self.display_fields.iter().cloned())
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// Client statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ClientStats {
    pub requests_sent: usize,
    pub requests_succeeded: usize,
    pub requests_failed: usize,
    pub requests_timeout: usize,
    pub service_errors: usize,
    // Array elements kept raw because they could not be unwrapped
    pub swallowed_elements: usize,
    pub average_response_time_ms: f64,
    pub max_response_time_ms: f64,
}

impl ClientStats {
    fn record(&mut self, elapsed_ms: f64, outcome: &Result<Decoded, ApiError>) {
        self.requests_sent += 1;
        match outcome {
            Ok(decoded) => {
                self.requests_succeeded += 1;
                self.swallowed_elements += decoded.diagnostics.len();
            }
            Err(err) => {
                self.requests_failed += 1;
                if err.is_service_error() {
                    self.service_errors += 1;
                }
                if matches!(err, ApiError::Timeout(_)) {
                    self.requests_timeout += 1;
                }
            }
        }

        // Running average over all requests sent
        let count = self.requests_sent as f64;
        self.average_response_time_ms += (elapsed_ms - self.average_response_time_ms) / count;
        self.max_response_time_ms = self.max_response_time_ms.max(elapsed_ms);
    }
}

// Moves request bytes to the service and returns the raw response body
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Bytes, ApiError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Bytes, ApiError> {
        let timeout_ms = timeout.as_millis() as u64;
        let classify = |err: reqwest::Error| {
            if err.is_timeout() {
                ApiError::Timeout(timeout_ms)
            } else {
                ApiError::NetworkError(err.to_string())
            }
        };

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.bytes().await.map_err(classify)?;

        if status.is_success() {
            return Ok(body);
        }

        // SOAP faults travel with a 500 status; let the decoder report them
        if looks_like_envelope(&body) {
            warn!(status = status.as_u16(), "service answered with an error status");
            return Ok(body);
        }

        Err(ApiError::ApiResponseError {
            status_code: status.as_u16(),
            message: excerpt(&body),
        })
    }
}

// True when the body holds an `Envelope` start tag, prefixed or not
pub(crate) fn looks_like_envelope(body: &[u8]) -> bool {
    body.split(|&b| b == b'<').skip(1).any(|tag| {
        let name_len = tag
            .iter()
            .position(|&b| b.is_ascii_whitespace() || matches!(b, b'>' | b'/'))
            .unwrap_or(tag.len());
        let name = &tag[..name_len];
        name == b"Envelope" || name.ends_with(b":Envelope")
    })
}

fn excerpt(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(ERROR_BODY_EXCERPT)
        .collect()
}

/// Client for the DoctorSender SOAP API.
///
/// Shareable behind an `Arc`; the statistics block is the only mutable state.
pub struct SoapClient<T = HttpTransport> {
    config: ClientConfig,
    decoder: ResponseDecoder,
    transport: T,
    stats: Mutex<ClientStats>,
}

impl SoapClient<HttpTransport> {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(&config.user_agent)?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> SoapClient<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self {
            decoder: ResponseDecoder::new(config.decode_config()),
            config,
            transport,
            stats: Mutex::new(ClientStats::default()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn stats(&self) -> ClientStats {
        self.stats.lock().clone()
    }

    /// Sends one call and decodes the answer, keeping any diagnostics about
    /// array elements that were passed through raw.
    pub async fn call(&self, call: Call) -> Result<Decoded, ApiError> {
        let body = RequestEnvelope {
            user: &self.config.user,
            token: &self.config.token,
            service_namespace: &self.config.service_namespace,
            method_tag: &self.config.method_tag,
        }
        .build(&call)?;

        debug!(method = call.method(), bytes = body.len(), "sending request");
        let started = Instant::now();
        let outcome = self.exchange(body).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &outcome {
            Ok(decoded) => debug!(
                method = call.method(),
                elapsed_ms,
                diagnostics = decoded.diagnostics.len(),
                "request succeeded"
            ),
            Err(err) => debug!(method = call.method(), elapsed_ms, error = %err, "request failed"),
        }

        self.stats.lock().record(elapsed_ms, &outcome);
        outcome
    }

    pub async fn call_value(&self, call: Call) -> Result<DecodedValue, ApiError> {
        Ok(self.call(call).await?.value)
    }

    async fn exchange(&self, body: Vec<u8>) -> Result<Decoded, ApiError> {
        let response = self
            .transport
            .post(&self.config.endpoint, body, self.config.timeout())
            .await?;
        Ok(self.decoder.decode(&response)?)
    }

    // Names of the account's IP groups; also a cheap credential check
    pub async fn ip_groups(&self) -> Result<Vec<String>, ApiError> {
        let value = self.call_value(Call::new("dsIpGroupGetNames")).await?;
        Ok(value.scalar_values()?)
    }

    // Language id -> language name
    pub async fn languages(&self) -> Result<CatalogTable, ApiError> {
        self.table("dsLanguageGetAll").await
    }

    // ISO-3 country code -> country name
    pub async fn countries(&self) -> Result<CatalogTable, ApiError> {
        self.table("dsCountryGetAll").await
    }

    // Category id -> category name
    pub async fn categories(&self) -> Result<CatalogTable, ApiError> {
        self.table("dsCategoryGetAll").await
    }

    // Sender addresses configured for the account
    pub async fn from_emails(&self) -> Result<Vec<String>, ApiError> {
        let value = self.call_value(Call::new("dsSettingsGetAllFromEmail")).await?;
        Ok(value.scalar_values()?)
    }

    /// Fetches the language, country and category tables concurrently.
    pub async fn load_catalog(&self) -> Result<Catalog, ApiError> {
        let (languages, countries, categories) =
            futures::try_join!(self.languages(), self.countries(), self.categories())?;
        Ok(Catalog {
            languages,
            countries,
            categories,
        })
    }

    async fn table(&self, method: &str) -> Result<CatalogTable, ApiError> {
        let value = self.call_value(Call::new(method)).await?;
        Ok(CatalogTable::from_decoded(&value)?)
    }
}
