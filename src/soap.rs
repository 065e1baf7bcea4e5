// SOAP plumbing shared by the schedule, provider and location connections
use crate::settings::{ConfigError, Service, Settings};
use crate::xmlmanip::{inject_tags, pretty_print, Element, Predicate, Tags, XmlError, XmlSchema};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

// Errors raised while building, sending or reading Tangier requests
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    // The caller asked for something the API cannot express.
    #[error("Invalid API call: {0}")]
    ApiCall(String),

    // Tangier answered with an error payload.
    #[error("Tangier returned an error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {status_code} - {message}")]
    HttpStatus {
        status_code: u16,
        message: String,
        is_retryable: bool,
    },

    #[error("SOAP fault: {0}")]
    Fault(String),

    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error("Date error: {0}")]
    Date(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::HttpStatus { is_retryable, .. } => *is_retryable,
            _ => false,
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::Config(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Io(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 250,
            max_backoff_ms: 10000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

// Exponential backoff with jitter.
pub fn calculate_backoff(retry_attempt: u32, config: &RetryConfig) -> Duration {
    let base_backoff_ms = (config.initial_backoff_ms as f64
        * config.backoff_multiplier.powf(retry_attempt as f64))
    .min(config.max_backoff_ms as f64);

    let jitter = rand::random::<f64>() * config.jitter_factor * base_backoff_ms;
    let backoff_ms = base_backoff_ms * (1.0 - config.jitter_factor / 2.0) + jitter;

    Duration::from_millis(backoff_ms as u64)
}

/// Invokes a named remote operation with a Tangier request document and returns the
/// response document.
#[async_trait]
pub trait SoapTransport: Send + Sync + 'static {
    async fn call(&self, operation: &str, xml_string: &str) -> Result<String, ApiError>;
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: String,
    pub namespace: String,
    pub parameter: String,
    pub timeout_seconds: u64,
    pub retry_config: RetryConfig,
}

impl TransportConfig {
    pub fn from_settings(settings: &Settings, service: Service) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: settings.endpoint(service)?,
            namespace: settings.soap_namespace.clone(),
            parameter: settings.soap_parameter.clone(),
            timeout_seconds: settings.timeout_seconds,
            retry_config: RetryConfig {
                max_retries: settings.max_retries,
                ..Default::default()
            },
        })
    }
}

// Minimal SOAP 1.1 poster: wraps the request document as the single string
// parameter of the operation and unwraps `{Operation}Result` from the reply.
pub struct HttpSoapTransport {
    client: Client,
    service_url: String,
    config: TransportConfig,
}

impl HttpSoapTransport {
    pub fn new(config: TransportConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            client,
            service_url: service_url(&config.endpoint),
            config,
        })
    }

    pub fn from_settings(settings: &Settings, service: Service) -> Result<Self, ApiError> {
        Self::new(TransportConfig::from_settings(settings, service)?)
    }

    async fn post_envelope(&self, operation: &str, envelope: &str) -> Result<Bytes, ApiError> {
        let response = self
            .client
            .post(&self.service_url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header(
                "SOAPAction",
                format!("\"{}{}\"", self.config.namespace, operation),
            )
            .body(envelope.to_string())
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if status.is_success() {
            return Ok(body);
        }

        // Servers report SOAP faults with a 500 status.
        let text = String::from_utf8_lossy(&body);
        if let Some(fault) = Element::parse(&text)
            .ok()
            .and_then(|envelope| fault_message(&envelope))
        {
            return Err(ApiError::Fault(fault));
        }
        Err(ApiError::HttpStatus {
            status_code: status.as_u16(),
            message: status.canonical_reason().unwrap_or("unknown").to_string(),
            is_retryable: status.is_server_error(),
        })
    }
}

#[async_trait]
impl SoapTransport for HttpSoapTransport {
    async fn call(&self, operation: &str, xml_string: &str) -> Result<String, ApiError> {
        let envelope = build_envelope(
            &self.config.namespace,
            &self.config.parameter,
            operation,
            xml_string,
        )?;

        let mut attempt = 0;
        loop {
            debug!(operation, attempt, url = %self.service_url, "Sending SOAP request");
            match self.post_envelope(operation, &envelope).await {
                Ok(body) => {
                    let text = String::from_utf8_lossy(&body);
                    return parse_envelope(operation, &text);
                }
                Err(err) if err.is_retryable() && attempt < self.config.retry_config.max_retries => {
                    let backoff = calculate_backoff(attempt, &self.config.retry_config);
                    warn!(operation, attempt, error = %err, ?backoff, "Retrying SOAP request");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// Endpoints are configured as WSDL locations; requests go to the service itself.
pub fn service_url(endpoint: &str) -> String {
    let lower = endpoint.to_ascii_lowercase();
    match lower.rfind("?wsdl") {
        Some(pos) if pos + 5 == lower.len() => endpoint[..pos].to_string(),
        _ => endpoint.to_string(),
    }
}

pub fn build_envelope(
    namespace: &str,
    parameter: &str,
    operation: &str,
    xml_string: &str,
) -> Result<String, XmlError> {
    let call = Element::new(operation)
        .with_attr("xmlns", namespace)
        .with_child(Element::new(parameter).with_text(xml_string));
    let envelope = Element::new("soap:Envelope")
        .with_attr("xmlns:soap", SOAP_ENVELOPE_NS)
        .with_child(Element::new("soap:Body").with_child(call));
    Ok(format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>{}",
        envelope.to_xml()?
    ))
}

// Pull the response document out of a SOAP reply.
pub fn parse_envelope(operation: &str, body: &str) -> Result<String, ApiError> {
    let envelope = Element::parse(body)?;
    if let Some(fault) = fault_message(&envelope) {
        return Err(ApiError::Fault(fault));
    }

    let result_name = format!("{}Result", operation);
    let result = envelope.descendant(&result_name).ok_or_else(|| {
        ApiError::Api(format!("response has no <{}> element", result_name))
    })?;

    match result.children.first() {
        // Some servers embed the document instead of escaping it.
        Some(document) if result.text.is_empty() => Ok(document.to_xml()?),
        _ => Ok(result.text.clone()),
    }
}

fn fault_message(envelope: &Element) -> Option<String> {
    let fault = envelope.descendant("Fault")?;
    let message = fault
        .descendant("faultstring")
        .or_else(|| fault.descendant("Text"))
        .map(|e| e.text.clone())
        .unwrap_or_else(|| "unknown fault".to_string());
    Some(message)
}

// Inject an empty `container` element at root position 2 (after the credentials) and
// fill it with `tags`.
pub fn build_request(base_xml: &str, container: &str, tags: &Tags) -> Result<String, XmlError> {
    let xml = inject_tags(base_xml, "", 2, &Tags::new().with(container, ""))?;
    inject_tags(&xml, container, 0, tags)
}

// Reject responses that carry an error comment or an `error` element.
pub fn check_response(xml: &str) -> Result<(), ApiError> {
    let schema = XmlSchema::parse(xml)?;

    let commented = schema.search(&Predicate::contains("comment", "Error"));
    if !commented.is_empty() {
        return Err(ApiError::Api(collect_texts(&commented, "comment")));
    }
    let errors = schema.search(&Predicate::contains("error", ""));
    if !errors.is_empty() {
        return Err(ApiError::Api(collect_texts(&errors, "error")));
    }
    Ok(())
}

fn collect_texts(records: &[crate::xmlmanip::Record], key: &str) -> String {
    records
        .iter()
        .filter_map(|r| r.text(key))
        .collect::<Vec<_>>()
        .join("; ")
}

// Log a request or response document at debug level when `enabled`.
pub fn debug_xml(label: &str, xml: &str, enabled: bool) {
    if !enabled {
        return;
    }
    match pretty_print(xml) {
        Ok(pretty) => debug!("{}:\n{}", label, pretty),
        Err(_) => debug!("{}: {}", label, xml),
    }
}
