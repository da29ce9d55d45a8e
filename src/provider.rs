//! Image-generation provider contract and its HTTP implementation.
//!
//! The orchestrator only sees [`ImageProvider`]; [`GeminiProvider`] speaks the
//! `generateContent` REST dialect using [`reqwest`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Access credential for the provider. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Source image attached to every frame request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One single-frame generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub model: String,
    pub source: InlineImage,
    pub instruction: String,
    pub seed: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    /// Base64 payload as returned by the provider.
    InlineImage { mime_type: String, data: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderResponse {
    pub parts: Vec<ContentPart>,
}

impl ProviderResponse {
    /// First image-bearing part, scanning in order.
    pub fn first_image(&self) -> Option<(&str, &str)> {
        self.parts.iter().find_map(|part| match part {
            ContentPart::InlineImage { mime_type, data } => Some((mime_type.as_str(), data.as_str())),
            ContentPart::Text(_) => None,
        })
    }
}

/// Errors from the provider transport layer.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider returned a non-2xx status code.
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The body could not be understood.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate_image(
        &self,
        credential: &Credential,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// HTTP client for the `generateContent` endpoint.
pub struct GeminiProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl GeminiProvider {
    /// * `endpoint` - base URL, e.g. `https://generativelanguage.googleapis.com`.
    /// * `timeout` - whole-request timeout enforced by the transport.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, model: &str) -> String {
        format!("{}/v1beta/models/{model}:generateContent", self.endpoint)
    }
}

#[async_trait]
impl ImageProvider for GeminiProvider {
    async fn generate_image(
        &self,
        credential: &Credential,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let response = self
            .client
            .post(self.url_for(&request.model))
            .header("x-goog-api-key", credential.expose())
            .json(&request_body(request))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed = parse_response(&body)?;
        debug!(parts = parsed.parts.len(), "provider responded");
        Ok(parsed)
    }
}

pub(crate) fn request_body(request: &ProviderRequest) -> serde_json::Value {
    json!({
        "contents": [{
            "parts": [
                {
                    "inlineData": {
                        "mimeType": request.source.mime_type,
                        "data": STANDARD.encode(&request.source.data),
                    }
                },
                { "text": request.instruction },
            ]
        }],
        "generationConfig": {
            "seed": request.seed,
            "temperature": request.temperature,
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireResponse {
    candidates: Vec<WireCandidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireCandidate {
    content: Option<WireContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireContent {
    parts: Vec<WirePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WirePart {
    text: Option<String>,
    inline_data: Option<WireInlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WireInlineData {
    mime_type: Option<String>,
    data: Option<String>,
}

/// Only the first candidate is considered.
pub(crate) fn parse_response(body: &str) -> Result<ProviderResponse, ProviderError> {
    let wire: WireResponse =
        serde_json::from_str(body).map_err(|err| ProviderError::Malformed(err.to_string()))?;
    let parts = wire
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .unwrap_or_default();

    let parts = parts
        .into_iter()
        .filter_map(|part| {
            if let Some(inline) = part.inline_data {
                if let Some(data) = inline.data.filter(|d| !d.is_empty()) {
                    return Some(ContentPart::InlineImage {
                        mime_type: inline
                            .mime_type
                            .unwrap_or_else(|| crate::codec::FALLBACK_MIME.to_string()),
                        data,
                    });
                }
            }
            part.text.map(ContentPart::Text)
        })
        .collect();
    Ok(ProviderResponse { parts })
}
