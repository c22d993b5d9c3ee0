//! Text generation
//!
//! Hypotheses and patches come from ranked text-generation backends. A
//! [`GenerationChain`] asks each backend in order and keeps the first answer
//! that is neither empty nor the `LLM_ERROR` sentinel.

use crate::error::GenerationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Prefix a backend uses to report failure in-band
pub const SENTINEL_PREFIX: &str = "LLM_ERROR";

/// A single text-generation backend
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Complete the prompt
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Reject empty answers and in-band error sentinels, judged after the
/// code fences are stripped
pub fn check_reply(text: String) -> Result<String, GenerationError> {
    let cleaned = sanitize(&text);
    if cleaned.is_empty() {
        Err(GenerationError::Empty)
    } else if cleaned.starts_with(SENTINEL_PREFIX) {
        Err(GenerationError::Sentinel(cleaned))
    } else {
        Ok(text)
    }
}

/// Strip markdown code fences from generated SQL or code
#[must_use]
pub fn sanitize(text: &str) -> String {
    text.replace("```sql", "").replace("```", "").trim().to_string()
}

/// Ranked backends, first usable answer wins
#[derive(Clone, Default)]
pub struct GenerationChain {
    backends: Vec<Arc<dyn TextGenerator>>,
}

impl std::fmt::Debug for GenerationChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("GenerationChain").field("backends", &names).finish()
    }
}

impl GenerationChain {
    /// Create chain from backends in rank order
    #[must_use]
    pub fn new(backends: Vec<Arc<dyn TextGenerator>>) -> Self {
        Self { backends }
    }

    /// Append a lower-ranked backend
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn TextGenerator>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Number of backends
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Check if no backend is configured
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Ask each backend in order
    pub async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        for backend in &self.backends {
            match backend.generate(prompt).await.and_then(check_reply) {
                Ok(text) => {
                    tracing::debug!(backend = backend.name(), chars = text.len(), "generation succeeded");
                    return Ok(text);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(backend = backend.name(), error = %e, "generation backend failed, trying next");
                }
                Err(e) => return Err(e),
            }
        }
        Err(GenerationError::Exhausted(self.backends.len()))
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    text: String,
}

/// HTTP backend: `POST {url}` with `{prompt}`, answers `{text}`
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    url: String,
}

impl HttpGenerator {
    /// Create backend
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Unavailable(e.to_string()))?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    fn name(&self) -> &str {
        &self.url
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(&self.url)
            .json(&GenerateRequest { prompt })
            .send()
            .await
            .map_err(|e| GenerationError::Unavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Unavailable(format!("HTTP {}", status.as_u16())));
        }
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Unavailable(e.to_string()))?;
        Ok(body.text)
    }
}
