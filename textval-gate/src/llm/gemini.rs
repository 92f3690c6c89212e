//! Google Gemini REST client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{LanguageModel, LlmError};
use crate::{
    error::{GateError, Result},
    http::{base_url, create_http_client, endpoint},
};

/// Public Generative Language API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const MAX_ERROR_BODY: usize = 512;

/// Client for `POST /v1beta/{model}:generateContent`.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base: Url,
    api_key: String,
    timeout: Duration,
}

impl GeminiClient {
    /// Creates a client against the public endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if the key is empty.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key, timeout)
    }

    /// Creates a client against another base URL, e.g. a proxy or a test server.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if the key is empty or the URL invalid.
    pub fn with_base_url(base: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GateError::Config("GOOGLE_API_KEY is empty".into()));
        }
        Ok(Self { client: create_http_client(timeout)?, base: base_url(base)?, api_key, timeout })
    }

    async fn call(&self, url: Url, prompt: &str) -> std::result::Result<String, LlmError> {
        let body = GenerateRequest { contents: vec![Content { parts: vec![Part { text: prompt }] }] };
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY).rev().find(|&i| body.is_char_boundary(i)).unwrap_or(0);
                body.truncate(cut);
            }
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let parsed: GenerateResponse = response.json().await?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect::<String>())
            .filter(|text| !text.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base", &self.base.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    #[instrument(skip(self, prompt), fields(prompt_len = prompt.len()), level = "debug")]
    async fn generate(&self, model: &str, prompt: &str) -> std::result::Result<String, LlmError> {
        let url = endpoint(&self.base, &format!("v1beta/{model}:generateContent"))
            .map_err(|_| LlmError::Status { status: 400, body: format!("invalid model name '{model}'") })?;

        let result = match tokio::time::timeout(self.timeout, self.call(url, prompt)).await {
            Ok(Err(LlmError::Transport(e))) if e.is_timeout() => Err(LlmError::Timeout(self.timeout)),
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout)),
        };

        match &result {
            Ok(text) => debug!(output_len = text.len(), "model call succeeded"),
            Err(e) => warn!(error = %e, "model call failed"),
        }
        result
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}
