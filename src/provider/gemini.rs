//! Google Gemini provider (Files API upload + generateContent).

use super::{ModelProvider, ModelRequest, ProviderError};
use crate::config::Settings;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Gemini client for image extraction requests.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: Client::new(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Upload raw image bytes to the Files API, returning the file handle.
    async fn upload_file(&self, data: Vec<u8>, mime_type: &str) -> Result<UploadedFile, ProviderError> {
        info!("GeminiClient: uploading {} bytes ({})", data.len(), mime_type);

        let resp = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "raw")
            .header("Content-Type", mime_type)
            .body(data)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let upload: FileUploadResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        debug!("GeminiClient: uploaded {} -> {}", upload.file.name, upload.file.uri);
        Ok(upload.file)
    }

    async fn generate_content(&self, request: &GenerateContentRequest) -> Result<String, ProviderError> {
        debug!("Sending request to Gemini: model={}", self.model);

        let resp = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let response: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        if let Some(usage) = &response.usage_metadata {
            info!(
                "Gemini response: {} tokens (prompt: {}, completion: {})",
                usage.total_token_count, usage.prompt_token_count, usage.candidates_token_count
            );
        }

        response.into_text()
    }
}

#[async_trait::async_trait]
impl ModelProvider for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &ModelRequest<'_>) -> Result<String, ProviderError> {
        let data = tokio::fs::read(request.image_path).await?;
        let file = self.upload_file(data, request.mime_type).await?;

        let body = GenerateContentRequest::new(
            &file,
            request.mime_type,
            request.system_prompt,
            request.user_prompt,
            request.temperature,
        );

        self.generate_content(&body).await
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct FileUploadResponse {
    file: UploadedFile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    name: String,
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    fn new(
        file: &UploadedFile,
        fallback_mime: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Self {
        Self {
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text {
                    text: system_prompt.to_string(),
                }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part::FileData {
                        file_data: FileData {
                            mime_type: file
                                .mime_type
                                .clone()
                                .unwrap_or_else(|| fallback_mime.to_string()),
                            file_uri: file.uri.clone(),
                        },
                    },
                    Part::Text {
                        text: user_prompt.to_string(),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature,
                response_mime_type: "text/plain".to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    FileData {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    /// Concatenate the text parts of the first candidate.
    fn into_text(self) -> Result<String, ProviderError> {
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

/// A reply part; only text is read, other kinds (inline data, calls) are skipped.
#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}
