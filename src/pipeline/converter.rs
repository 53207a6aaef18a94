//! Document conversion engines.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::engine::BodyEngine;
use crate::error::ConversionError;
use crate::pipeline::types::{ConvertInput, ConvertedDocument};

/// Turns HTML or a document into a PDF.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    fn engine(&self) -> BodyEngine;

    async fn convert(&self, input: &ConvertInput) -> Result<ConvertedDocument, ConversionError>;
}

/// Conversion service reached over HTTP.
///
/// The input is uploaded as multipart field `file` alongside a `kind` text
/// field; the response body is the PDF. Engine A (remote service) and engine B
/// (local rendering sidecar) speak the same protocol.
pub struct HttpConverter {
    engine: BodyEngine,
    endpoint: String,
    api_key: Option<SecretString>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpConverter {
    pub fn new(
        engine: BodyEngine,
        endpoint: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Self {
        Self {
            engine,
            endpoint: endpoint.into(),
            api_key,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    fn request_failed(&self, reason: impl Into<String>) -> ConversionError {
        ConversionError::RequestFailed {
            engine: self.engine.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl DocumentConverter for HttpConverter {
    fn engine(&self) -> BodyEngine {
        self.engine
    }

    async fn convert(&self, input: &ConvertInput) -> Result<ConvertedDocument, ConversionError> {
        let part = Part::bytes(input.clone().into_bytes())
            .file_name(input.filename.clone())
            .mime_str(&input.mime_type)
            .map_err(|_| ConversionError::Unsupported(input.mime_type.clone()))?;
        let form = Form::new()
            .text("kind", input.kind.as_str())
            .part("file", part);

        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ConversionError::Timeout(self.timeout)
            } else {
                self.request_failed(format!("connection error: {e}"))
            }
        })?;

        match resp.status() {
            s if s.is_success() => {}
            StatusCode::UNSUPPORTED_MEDIA_TYPE => {
                return Err(ConversionError::Unsupported(input.mime_type.clone()));
            }
            StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(self.request_failed("payload too large"));
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(self.request_failed(format!("unauthorized (HTTP {})", resp.status())));
            }
            StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => {
                return Err(ConversionError::Timeout(self.timeout));
            }
            s => return Err(self.request_failed(format!("HTTP {s}"))),
        }

        let pdf = resp
            .bytes()
            .await
            .map_err(|e| self.request_failed(format!("reading response: {e}")))?
            .to_vec();
        if !pdf.starts_with(b"%PDF") {
            return Err(ConversionError::InvalidOutput {
                engine: self.engine.to_string(),
                reason: "response is not a PDF".to_string(),
            });
        }

        debug!(engine = %self.engine, input_bytes = input.len(), pdf_bytes = pdf.len(), "Converted");
        Ok(ConvertedDocument {
            engine: self.engine,
            pdf,
        })
    }
}

/// Converters keyed by engine. A missing engine is a configuration error,
/// reported when it is first needed.
#[derive(Clone, Default)]
pub struct ConverterSet {
    converters: HashMap<BodyEngine, Arc<dyn DocumentConverter>>,
}

impl ConverterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, converter: Arc<dyn DocumentConverter>) -> Self {
        self.converters.insert(converter.engine(), converter);
        self
    }

    pub fn get(&self, engine: BodyEngine) -> Result<Arc<dyn DocumentConverter>, ConversionError> {
        self.converters
            .get(&engine)
            .cloned()
            .ok_or_else(|| ConversionError::NotConfigured {
                engine: engine.to_string(),
            })
    }
}
