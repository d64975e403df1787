use async_trait::async_trait;
use slipscan_core::{Receipt, ReceiptParser, SlipError, SlipResult};
use tracing::{info, instrument};

use crate::extract::parse_receipt_json;
use crate::preprocess::{prepare_image, PreparedImage};
use crate::prompt::EXTRACTION_PROMPT;
use crate::vision::{describe_image, VisionProvider};

/// `ReceiptParser` backed by a vision LLM.
pub struct LlmReceiptParser {
    client: reqwest::Client,
    provider: VisionProvider,
    prompt: String,
    preprocess: bool,
}

impl LlmReceiptParser {
    pub fn new(provider: VisionProvider) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider,
            prompt: EXTRACTION_PROMPT.to_string(),
            preprocess: true,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_preprocessing(mut self, enabled: bool) -> Self {
        self.preprocess = enabled;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn provider(&self) -> &VisionProvider {
        &self.provider
    }
}

#[async_trait]
impl ReceiptParser for LlmReceiptParser {
    fn name(&self) -> &str {
        self.provider.name()
    }

    #[instrument(skip_all, fields(provider = self.provider.name(), model = self.provider.model()))]
    async fn parse(&self, image: &[u8], mime_type: &str) -> SlipResult<Receipt> {
        let bytes = image.to_vec();
        let mime = mime_type.to_string();
        let enabled = self.preprocess;
        let prepared: PreparedImage = tokio::task::spawn_blocking(move || prepare_image(&bytes, &mime, enabled))
            .await
            .map_err(|e| SlipError::Other(e.into()))?;

        let text = describe_image(
            &self.client,
            &self.provider,
            &prepared.bytes,
            &prepared.mime_type,
            &self.prompt,
        )
        .await?;
        let receipt = parse_receipt_json(&text)?;
        info!(
            vendor = %receipt.vendor_name,
            total = receipt.total,
            items = receipt.items.len(),
            preprocessed = prepared.preprocessed,
            "Receipt parsed"
        );
        Ok(receipt)
    }
}
