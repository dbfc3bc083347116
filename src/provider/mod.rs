//! Multimodal model provider abstraction.
//!
//! Defines the [`ModelProvider`] trait so the extraction pipeline can talk to
//! Gemini in production and to a canned provider in tests.

pub mod gemini;

use std::path::Path;

/// Everything a provider needs for one image-to-text exchange.
#[derive(Debug, Clone)]
pub struct ModelRequest<'a> {
    pub image_path: &'a Path,
    pub mime_type: &'a str,
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub temperature: f32,
}

/// Failures talking to the external model service.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("failed to read upload: {0}")]
    Io(#[from] std::io::Error),

    #[error("request to model provider failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("model provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("model provider response could not be decoded: {0}")]
    Decode(String),

    #[error("model provider returned no content")]
    EmptyResponse,
}

/// Async trait implemented by each model backend.
#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Send the image and prompts, returning the model's raw text reply.
    async fn generate(&self, request: &ModelRequest<'_>) -> Result<String, ProviderError>;
}
