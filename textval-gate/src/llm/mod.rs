//! Language model collaborator.
//!
//! The core only needs "prompt in, text out". [`LanguageModel`] is that seam;
//! [`GeminiClient`] is the production implementation. Structured responses
//! (quality reports, compliance and strategy reports) are pulled out of the
//! raw text with [`parse_structured_response`].

mod gemini;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

pub use gemini::{DEFAULT_BASE_URL, GeminiClient};

/// Model used by the validator workflow.
pub const VALIDATOR_MODEL: &str = "models/gemini-flash-lite-latest";

/// Model used by every other workflow.
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash";

/// Failures of a model call.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The call did not finish within the configured timeout.
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    /// The request could not be sent or the response not read.
    #[error("model transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("model provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The provider answered without any text candidate.
    #[error("model returned no text")]
    EmptyResponse,

    /// Output that should contain a JSON object could not be parsed.
    #[error(transparent)]
    Structured(#[from] ParseError),
}

/// Why structured output could not be extracted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// No `{ ... }` span in the output.
    #[error("no JSON object found in model output")]
    NoJsonObject,
    /// The span was found but did not deserialize.
    #[error("malformed JSON in model output: {0}")]
    Malformed(String),
}

/// Text generation backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Sends one prompt to `model` and returns the generated text.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on timeout, transport or provider failure.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, LlmError>;
}

/// Result of the quality-check step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Model's justification.
    pub reasoning: String,
    /// Score from 1 to 100.
    pub human_quality_score: u32,
}

/// Extracts and deserializes the JSON object embedded in model output.
///
/// Models often wrap JSON in prose or code fences, so the span from the
/// first `{` to the last `}` is taken.
///
/// # Errors
///
/// Returns [`ParseError::NoJsonObject`] when there is no such span and
/// [`ParseError::Malformed`] when it does not deserialize into `T`.
pub fn parse_structured_response<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    let start = raw.find('{').ok_or(ParseError::NoJsonObject)?;
    let end = raw.rfind('}').filter(|&end| end > start).ok_or(ParseError::NoJsonObject)?;
    serde_json::from_str(&raw[start..=end]).map_err(|e| ParseError::Malformed(e.to_string()))
}
