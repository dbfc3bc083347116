//! Invoice extraction pipeline: prompt, model call, tolerant parse, validation.

use crate::config::ExtractionConfig;
use crate::prompt;
use crate::provider::{ModelProvider, ModelRequest, ProviderError};
use crate::repair::{parse_model_output, ParseOutcome};
use crate::schema::{self, Items, Violation};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why an extraction produced no items.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("model response could not be parsed as JSON")]
    Unparsable { raw: String },

    #[error("model response does not match the item schema ({} violations)", .0.len())]
    Validation(Vec<Violation>),
}

/// Extraction pipeline orchestrator.
pub struct Extractor {
    provider: Arc<dyn ModelProvider>,
    temperature: f32,
}

impl Extractor {
    pub fn new(provider: Arc<dyn ModelProvider>, temperature: f32) -> Self {
        Self {
            provider,
            temperature,
        }
    }

    /// Extract line items from the invoice image at `image_path`.
    pub async fn extract(
        &self,
        image_path: &Path,
        config: &ExtractionConfig,
    ) -> Result<Items, ExtractError> {
        let mime_type = mime_guess::from_path(image_path)
            .first_or_octet_stream()
            .to_string();
        let system_prompt = prompt::system_prompt(config);
        let user_prompt = prompt::user_prompt();

        info!(
            "Starting extraction for: {:?} ({}, provider={}) using config: {}",
            image_path,
            mime_type,
            self.provider.name(),
            config.name
        );

        let request = ModelRequest {
            image_path,
            mime_type: &mime_type,
            system_prompt: &system_prompt,
            user_prompt: &user_prompt,
            temperature: config.temperature.unwrap_or(self.temperature),
        };

        let response = self.provider.generate(&request).await?;
        debug!("Raw model response length: {} chars", response.len());

        let value = match parse_model_output(&response) {
            ParseOutcome::Parsed(value) => value,
            ParseOutcome::Unparsable { raw } => {
                warn!(
                    "Model response is not JSON: {}",
                    raw.chars().take(200).collect::<String>()
                );
                return Err(ExtractError::Unparsable { raw });
            }
        };

        let items = schema::validate(&value).map_err(|violations| {
            for v in &violations {
                warn!("Schema violation: {}", v);
            }
            ExtractError::Validation(violations)
        })?;

        info!("Extraction complete: {} items", items.items.len());
        Ok(items)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::create_default_config;
    use std::sync::Mutex;

    /// Provider returning a canned reply and recording what it was asked.
    pub(crate) struct CannedProvider {
        reply: Mutex<Option<Result<String, ProviderError>>>,
        pub(crate) seen: Mutex<Vec<SeenRequest>>,
    }

    #[derive(Debug, Clone)]
    pub(crate) struct SeenRequest {
        pub(crate) mime_type: String,
        pub(crate) temperature: f32,
        pub(crate) file_existed: bool,
        pub(crate) system_prompt: String,
    }

    impl CannedProvider {
        pub(crate) fn replying(text: &str) -> Self {
            Self::with(Ok(text.to_string()))
        }

        pub(crate) fn failing(err: ProviderError) -> Self {
            Self::with(Err(err))
        }

        fn with(reply: Result<String, ProviderError>) -> Self {
            Self {
                reply: Mutex::new(Some(reply)),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ModelProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, request: &ModelRequest<'_>) -> Result<String, ProviderError> {
            self.seen.lock().unwrap().push(SeenRequest {
                mime_type: request.mime_type.to_string(),
                temperature: request.temperature,
                file_existed: request.image_path.exists(),
                system_prompt: request.system_prompt.to_string(),
            });
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(ProviderError::EmptyResponse))
        }
    }

    pub(crate) const ONE_ITEM: &str = r#"{"items": [{"Item ID": "A1", "Item Description": "Toner cartridge", "Unit Price": 100.0, "Quantity": 2, "Tax Amount": 30.0, "Total Amount": 230.0}]}"#;

    #[tokio::test]
    async fn test_extracts_items() {
        let provider = Arc::new(CannedProvider::replying(ONE_ITEM));
        let extractor = Extractor::new(provider.clone(), 0.2);

        let items = extractor
            .extract(Path::new("uploads/x.jpeg"), &create_default_config())
            .await
            .unwrap();

        assert_eq!(items.items.len(), 1);
        assert_eq!(items.items[0].item_id, "A1");
        assert_eq!(items.items[0].tax_amount, 30.0);

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].mime_type, "image/jpeg");
        assert_eq!(seen[0].temperature, 0.2);
        assert!(seen[0].system_prompt.contains("* Quantity → from 'الكميه'"));
    }

    #[tokio::test]
    async fn test_profile_temperature_overrides() {
        let provider = Arc::new(CannedProvider::replying(r#"{"items": []}"#));
        let extractor = Extractor::new(provider.clone(), 0.2);
        let mut config = create_default_config();
        config.temperature = Some(0.0);

        extractor.extract(Path::new("a.png"), &config).await.unwrap();
        assert_eq!(provider.seen.lock().unwrap()[0].temperature, 0.0);
    }

    #[tokio::test]
    async fn test_near_json_is_recovered() {
        let reply = "```json\n{items: [{'Item ID': 'A1', 'Item Description': 'Toner', 'Unit Price': 10, 'Quantity': 1, 'Tax Amount': 1.5, 'Total Amount': 11.5,},]}\n```";
        let extractor = Extractor::new(Arc::new(CannedProvider::replying(reply)), 0.2);

        let items = extractor
            .extract(Path::new("a.jpg"), &create_default_config())
            .await
            .unwrap();
        assert_eq!(items.items[0].total_amount, 11.5);
    }

    #[tokio::test]
    async fn test_prose_reply_is_unparsable() {
        let reply = "The image does not contain an invoice.";
        let extractor = Extractor::new(Arc::new(CannedProvider::replying(reply)), 0.2);

        let err = extractor
            .extract(Path::new("a.jpg"), &create_default_config())
            .await
            .unwrap_err();
        match err {
            ExtractError::Unparsable { raw } => assert_eq!(raw, reply),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_types_are_validation_errors() {
        let reply = r#"{"items": [{"Item ID": "A1", "Item Description": "Toner", "Unit Price": "10 SAR", "Quantity": 1, "Tax Amount": 1.5, "Total Amount": 11.5}]}"#;
        let extractor = Extractor::new(Arc::new(CannedProvider::replying(reply)), 0.2);

        let err = extractor
            .extract(Path::new("a.jpg"), &create_default_config())
            .await
            .unwrap_err();
        match err {
            ExtractError::Validation(violations) => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].path, "items[0].Unit Price");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let provider = CannedProvider::failing(ProviderError::Api {
            status: 429,
            body: "quota exceeded".to_string(),
        });
        let extractor = Extractor::new(Arc::new(provider), 0.2);

        let err = extractor
            .extract(Path::new("a.jpg"), &create_default_config())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Provider(ProviderError::Api { status: 429, .. })));
    }

    #[tokio::test]
    async fn test_items_round_trip() {
        let original = Items {
            items: vec![schema::Item {
                item_id: "HP-CF259A".to_string(),
                description: "حبر طابعة".to_string(),
                unit_price: 50.5,
                quantity: 3.0,
                tax_amount: 22.73,
                total_amount: 174.23,
            }],
        };
        let encoded = serde_json::to_string(&original).unwrap();
        let extractor = Extractor::new(Arc::new(CannedProvider::replying(&encoded)), 0.2);

        let decoded = extractor
            .extract(Path::new("a.jpg"), &create_default_config())
            .await
            .unwrap();
        assert_eq!(decoded, original);
    }
}
