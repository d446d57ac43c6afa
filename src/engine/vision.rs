//! Vision-model engine: transcribe a page by sending its image to a VLM.
//!
//! Provider selection follows the same precedence as the rest of the
//! edgequake-llm ecosystem:
//!
//! 1. Named provider (`--vision-provider`) + model (`--vision-model`).
//! 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` both set.
//! 3. `OPENAI_API_KEY` present → OpenAI.
//! 4. `ProviderFactory::from_env()` auto-detection.

use super::OcrEngine;
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::pipeline::encode::encode_image_data;
use crate::prompts::{page_instruction, OCR_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use image::DynamicImage;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

pub struct VisionEngine {
    provider: Arc<dyn LLMProvider>,
    label: String,
    max_tokens: usize,
}

impl VisionEngine {
    /// Wrap an already constructed provider.
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
            max_tokens: 4096,
        }
    }

    /// Resolve a provider from config and environment.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let model = config.vision_model.as_deref().unwrap_or(DEFAULT_MODEL);

        if let Some(ref name) = config.vision_provider {
            return Ok(Self::new(create_provider(name, model)?, format!("vision:{name}/{model}")));
        }

        if let (Ok(prov), Ok(env_model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !env_model.is_empty() {
                let label = format!("vision:{prov}/{env_model}");
                return Ok(Self::new(create_provider(&prov, &env_model)?, label));
            }
        }

        if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
            return Ok(Self::new(
                create_provider("openai", model)?,
                format!("vision:openai/{model}"),
            ));
        }

        let (provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| ServiceError::EngineUnavailable {
                engine: "vision".to_string(),
                hint: format!(
                    "no LLM provider could be auto-detected; set OPENAI_API_KEY, \
                     ANTHROPIC_API_KEY or --vision-provider ({e})"
                ),
            })?;
        Ok(Self::new(provider, "vision:auto"))
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ServiceError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        ServiceError::EngineUnavailable {
            engine: format!("vision:{name}"),
            hint: format!("{e}"),
        }
    })
}

#[async_trait]
impl OcrEngine for VisionEngine {
    fn name(&self) -> &str {
        &self.label
    }

    async fn check(&self, _language: &str) -> Result<(), ServiceError> {
        // Construction already validated the provider and its credentials.
        Ok(())
    }

    async fn recognize(
        &self,
        page_num: usize,
        image: &DynamicImage,
        language: &str,
    ) -> Result<String, String> {
        let img = image.clone();
        let image_data = tokio::task::spawn_blocking(move || encode_image_data(&img))
            .await
            .map_err(|e| format!("encode task panicked: {e}"))?
            .map_err(|e| format!("PNG encoding failed: {e}"))?;

        let messages = vec![
            ChatMessage::system(OCR_SYSTEM_PROMPT),
            ChatMessage::user_with_images(&page_instruction(language), vec![image_data]),
        ];
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| e.to_string())?;
        debug!(
            "Page {}: {} input tokens, {} output tokens",
            page_num, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}
