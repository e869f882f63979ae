//! Embedding provider for the OpenAI `/embeddings` endpoint.
//!
//! Only available with the `openai` feature.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
/// Output size of `text-embedding-3-small`.
const DEFAULT_DIMENSIONS: usize = 1536;
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// An [`EmbeddingProvider`] that calls the OpenAI embeddings API over HTTP.
///
/// Works against any OpenAI-compatible server via
/// [`with_base_url`](Self::with_base_url). A truncated output size can be
/// requested with [`with_dimensions`](Self::with_dimensions); the
/// [`Embedder`](crate::Embedder) then checks every vector against it.
///
/// ```rust,ignore
/// use kb_rag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::from_env()?.with_dimensions(512);
/// ```
pub struct OpenAIEmbeddingProvider {
    http: reqwest::Client,
    http_timeout: Duration,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    truncate_to: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// A provider for `text-embedding-3-small` on the public API.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for an empty key or if the HTTP
    /// client cannot be built.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::ConfigError("OpenAI API key is empty".to_string()));
        }
        Ok(Self {
            http: build_client(DEFAULT_HTTP_TIMEOUT)?,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            truncate_to: None,
        })
    }

    /// Read `OPENAI_API_KEY`, and `OPENAI_BASE_URL` when present.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| RagError::ConfigError("OPENAI_API_KEY is not set".to_string()))?;
        let mut provider = Self::new(api_key)?;
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            provider = provider.with_base_url(base_url);
        }
        Ok(provider)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Ask the API for vectors of `dimensions` entries.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self.truncate_to = Some(dimensions);
        self
    }

    /// Per-request HTTP timeout. Defaults to 30 seconds.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = build_client(timeout)?;
        self.http_timeout = timeout;
        Ok(self)
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    fn failure(&self, e: reqwest::Error) -> RagError {
        if e.is_timeout() {
            return RagError::ProviderTimeout {
                provider: PROVIDER.to_string(),
                timeout: self.http_timeout,
            };
        }
        error!(provider = PROVIDER, error = %e, "embedding request failed");
        provider_error(format!("request failed: {e}"))
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RagError::ConfigError(format!("failed to build HTTP client: {e}")))
}

fn provider_error(message: String) -> RagError {
    RagError::ProviderError { provider: PROVIDER.to_string(), message }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// The `error.message` of an API error body, or the raw body.
fn error_detail(body: String) -> String {
    match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => body,
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, model = %self.model, chars = text.len(), "embedding request");
        let body =
            EmbeddingsRequest { model: &self.model, input: text, dimensions: self.truncate_to };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.failure(e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response.text().await.unwrap_or_default());
            error!(provider = PROVIDER, %status, %detail, "embeddings API rejected request");
            return Err(provider_error(format!("status {status}: {detail}")));
        }

        let parsed: EmbeddingsResponse = response.json().await.map_err(|e| self.failure(e))?;
        match parsed.data.into_iter().next() {
            Some(item) => Ok(item.embedding),
            None => Err(provider_error("response contained no embedding".to_string())),
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
