//! Relays a chat completion from the configured default model.
//!
//! Everything that can be checked before contacting the upstream API is
//! reported as an ordinary error. Once streaming has started, failures become
//! a final `Error: ...` chunk, since the response head has already been sent.

use core_types::{ChatEvent, ChatStreamRequest, ChatTurn, KbError, KbResult, UpstreamEndpoint};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{KnowledgeBase, StorageResultExt};

const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub system_prompt: String,
    /// Appended to the system prompt in knowledge-base mode.
    pub knowledge_base_hint: String,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            system_prompt: "你是“小橘文档”知识库助手。".to_string(),
            knowledge_base_hint: " (已开启知识库模式，但检索功能暂未连接)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(default, alias = "useKnowledgeBase")]
    pub use_knowledge_base: bool,
}

impl KnowledgeBase {
    /// Resolves the default chat model and starts relaying its reply as
    /// plain text chunks. Dropping the returned stream stops the upstream read.
    pub async fn chat(&self, request: ChatRequest) -> KbResult<ReceiverStream<String>> {
        let (endpoint, model) = self.resolve_chat_model().await?;

        let mut system_prompt = self.chat.system_prompt.clone();
        if request.use_knowledge_base {
            system_prompt.push_str(&self.chat.knowledge_base_hint);
        }
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(ChatTurn::system(system_prompt));
        messages.extend(request.history);
        messages.push(ChatTurn::user(request.message));

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let provider = self.provider.clone();
        tracing::info!(provider = %endpoint.provider_name, model = %model, turns = messages.len(), "starting chat relay");
        tokio::spawn(async move {
            let request = ChatStreamRequest { model, messages };
            let opened = tokio::select! {
                opened = provider.stream_chat(&endpoint, request) => opened,
                () = tx.closed() => {
                    tracing::debug!(provider = %endpoint.provider_name, "chat client left before upstream answered");
                    return;
                }
            };
            let mut events = match opened {
                Ok(events) => events,
                Err(err) => {
                    tracing::warn!(provider = %endpoint.provider_name, error = %err, "chat upstream unreachable");
                    let _ = tx.send(format!("Error: {err:#}")).await;
                    return;
                }
            };

            loop {
                let event = tokio::select! {
                    event = events.next() => event,
                    () = tx.closed() => {
                        tracing::debug!(provider = %endpoint.provider_name, "chat client disconnected");
                        break;
                    }
                };
                let chunk = match event {
                    Some(ChatEvent::TextDelta { text }) => text,
                    Some(ChatEvent::Completed) | None => break,
                    Some(ChatEvent::Failed { message }) => {
                        tracing::warn!(provider = %endpoint.provider_name, %message, "chat upstream failed");
                        let _ = tx.send(format!("Error: {message}")).await;
                        break;
                    }
                };
                if tx.send(chunk).await.is_err() {
                    tracing::debug!(provider = %endpoint.provider_name, "chat client disconnected");
                    break;
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    async fn resolve_chat_model(&self) -> KbResult<(UpstreamEndpoint, String)> {
        let config = self
            .stored_ai_config()
            .await?
            .ok_or_else(|| KbError::validation("no default chat model is configured"))?;
        let model_id = config.default_chat_model_id.trim();
        if model_id.is_empty() {
            return Err(KbError::validation("no default chat model is selected"));
        }

        let model = self
            .storage
            .get_model(model_id)
            .await
            .storage()?
            .ok_or_else(|| KbError::validation(format!("configured chat model does not exist: {model_id}")))?;
        let provider = self
            .storage
            .get_provider(&model.provider_id)
            .await
            .storage()?
            .ok_or_else(|| {
                KbError::validation(format!("provider of chat model {model_id} does not exist"))
            })?;
        Ok((UpstreamEndpoint::from(&provider), model.name))
    }
}
