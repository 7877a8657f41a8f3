use core_types::ai::AI_CONFIG_KEY;
use core_types::{AiConfig, AiModel, AiProvider, KbError, KbResult, ModelKind, ProviderKind};
use serde::Deserialize;
use storage_sqlite::{NewModel, NewProvider, ProviderChanges};

use crate::{KnowledgeBase, StorageResultExt, bounded_text, required_text};

const PROVIDER_NAME_MAX_CHARS: usize = 50;
const URL_MAX_CHARS: usize = 255;
const API_KEY_MAX_CHARS: usize = 255;
const MODEL_NAME_MAX_CHARS: usize = 100;
const AI_CONFIG_DESCRIPTION: &str = "default models used by the assistant";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderInput {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<ProviderKind>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelInput {
    #[serde(alias = "provider")]
    pub provider_id: Option<String>,
    pub name: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<ModelKind>,
}

impl KnowledgeBase {
    /// Newest first, each with its models.
    pub async fn list_providers(&self) -> KbResult<Vec<AiProvider>> {
        self.storage.list_providers().await.storage()
    }

    pub async fn create_provider(&self, input: ProviderInput) -> KbResult<AiProvider> {
        let name = required_text("name", input.name.as_deref(), PROVIDER_NAME_MAX_CHARS)?;
        let kind = input
            .kind
            .ok_or_else(|| KbError::validation("type is required"))?;
        let base_url = required_text("base_url", input.base_url.as_deref(), URL_MAX_CHARS)?;
        let api_key = bounded_text(
            "api_key",
            input.api_key.as_deref().unwrap_or_default(),
            API_KEY_MAX_CHARS,
        )?;

        let provider = self
            .storage
            .create_provider(NewProvider {
                name,
                kind,
                base_url,
                api_key,
            })
            .await
            .storage()?;
        tracing::info!(provider = %provider.name, kind = provider.kind.as_str(), "provider added");
        Ok(provider)
    }

    pub async fn provider(&self, id: &str) -> KbResult<AiProvider> {
        self.storage
            .get_provider(id)
            .await
            .storage()?
            .ok_or_else(|| KbError::not_found("provider", id))
    }

    pub async fn update_provider(&self, id: &str, input: ProviderInput) -> KbResult<AiProvider> {
        let changes = ProviderChanges {
            name: input
                .name
                .as_deref()
                .map(|name| required_text("name", Some(name), PROVIDER_NAME_MAX_CHARS))
                .transpose()?,
            kind: input.kind,
            base_url: input
                .base_url
                .as_deref()
                .map(|url| required_text("base_url", Some(url), URL_MAX_CHARS))
                .transpose()?,
            api_key: input
                .api_key
                .as_deref()
                .map(|key| bounded_text("api_key", key, API_KEY_MAX_CHARS))
                .transpose()?,
        };
        self.storage
            .update_provider(id, changes)
            .await
            .storage()?
            .ok_or_else(|| KbError::not_found("provider", id))
    }

    /// Removes the provider together with its models.
    pub async fn delete_provider(&self, id: &str) -> KbResult<()> {
        if self.storage.delete_provider(id).await.storage()? {
            Ok(())
        } else {
            Err(KbError::not_found("provider", id))
        }
    }

    pub async fn create_model(&self, input: ModelInput) -> KbResult<AiModel> {
        let provider_id = input
            .provider_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| KbError::validation("provider is required"))?;
        let name = required_text("name", input.name.as_deref(), MODEL_NAME_MAX_CHARS)?;
        let display_name = input
            .display_name
            .as_deref()
            .map(|display| bounded_text("display_name", display, MODEL_NAME_MAX_CHARS))
            .transpose()?
            .filter(|display| !display.is_empty());
        self.provider(&provider_id).await?;

        self.storage
            .create_model(NewModel {
                provider_id,
                name,
                display_name,
                kind: input.kind.unwrap_or(ModelKind::Chat),
            })
            .await
            .storage()
    }

    pub async fn delete_model(&self, id: &str) -> KbResult<()> {
        if self.storage.delete_model(id).await.storage()? {
            Ok(())
        } else {
            Err(KbError::not_found("model", id))
        }
    }

    /// The stored default-model selection. An empty selection is written on
    /// first read.
    pub async fn ai_config(&self) -> KbResult<AiConfig> {
        if let Some(value) = self.storage.get_setting(AI_CONFIG_KEY).await.storage()? {
            return serde_json::from_value(value)
                .map_err(|err| KbError::Internal(anyhow::Error::new(err).context("stored AI config is malformed")));
        }
        let config = AiConfig::default();
        self.save_ai_config(config.clone()).await?;
        Ok(config)
    }

    pub async fn save_ai_config(&self, config: AiConfig) -> KbResult<()> {
        let value = serde_json::to_value(&config).map_err(anyhow::Error::new)?;
        self.storage
            .put_setting(AI_CONFIG_KEY, &value, AI_CONFIG_DESCRIPTION)
            .await
            .storage()
    }

    /// The stored config without creating it, for the chat path.
    pub(crate) async fn stored_ai_config(&self) -> KbResult<Option<AiConfig>> {
        match self.storage.get_setting(AI_CONFIG_KEY).await.storage()? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| KbError::validation(format!("AI config is malformed: {err}"))),
            None => Ok(None),
        }
    }
}
