use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

pub const AI_CONFIG_KEY: &str = "system_ai_config";

pub type ChatEventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send + 'static>>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    #[serde(rename = "Google AI")]
    GoogleAi,
    Qwen,
    Doubao,
    DeepSeek,
    Ollama,
    #[serde(rename = "custom")]
    Custom,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAi",
            Self::GoogleAi => "Google AI",
            Self::Qwen => "Qwen",
            Self::Doubao => "Doubao",
            Self::DeepSeek => "DeepSeek",
            Self::Ollama => "Ollama",
            Self::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            Self::OpenAi,
            Self::GoogleAi,
            Self::Qwen,
            Self::Doubao,
            Self::DeepSeek,
            Self::Ollama,
            Self::Custom,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Chat,
    Embedding,
    Rerank,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Embedding => "embedding",
            Self::Rerank => "rerank",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "chat" => Some(Self::Chat),
            "embedding" => Some(Self::Embedding),
            "rerank" => Some(Self::Rerank),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiModel {
    pub id: String,
    pub provider_id: String,
    /// Model identifier sent upstream, e.g. `deepseek-chat`.
    pub name: String,
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: ModelKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiProvider {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub models: Vec<AiModel>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored under [`AI_CONFIG_KEY`]. Older records used camelCase keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AiConfig {
    #[serde(default, alias = "defaultChatModelId")]
    pub default_chat_model_id: String,
    #[serde(default, alias = "defaultEmbeddingModelId")]
    pub default_embedding_model_id: String,
    #[serde(default, alias = "defaultRerankModelId")]
    pub default_rerank_model_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Where and as whom to call the upstream chat API.
#[derive(Debug, Clone)]
pub struct UpstreamEndpoint {
    pub provider_name: String,
    pub base_url: String,
    pub api_key: String,
}

impl From<&AiProvider> for UpstreamEndpoint {
    fn from(provider: &AiProvider) -> Self {
        Self {
            provider_name: provider.name.clone(),
            base_url: provider.base_url.clone(),
            api_key: provider.api_key.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatStreamRequest {
    pub model: String,
    pub messages: Vec<ChatTurn>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    TextDelta { text: String },
    Completed,
    /// Terminal; nothing follows a failure.
    Failed { message: String },
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Opens a streaming completion. Errors returned here mean the request
    /// never reached a response; failures after that arrive as
    /// [`ChatEvent::Failed`].
    async fn stream_chat(
        &self,
        endpoint: &UpstreamEndpoint,
        request: ChatStreamRequest,
    ) -> Result<ChatEventStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_config_accepts_legacy_camel_case() {
        let config: AiConfig =
            serde_json::from_str(r#"{"defaultChatModelId":"model_x"}"#).expect("parse");
        assert_eq!(config.default_chat_model_id, "model_x");
        assert!(config.default_rerank_model_id.is_empty());
    }

    #[test]
    fn provider_kind_uses_wire_names() {
        assert_eq!(
            serde_json::to_string(&ProviderKind::GoogleAi).expect("json"),
            "\"Google AI\""
        );
        assert_eq!(ProviderKind::parse("custom"), Some(ProviderKind::Custom));
    }
}
