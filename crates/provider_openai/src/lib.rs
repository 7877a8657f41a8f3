use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use core_types::{ChatEvent, ChatEventStream, ChatStreamRequest, ProviderAdapter, UpstreamEndpoint};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Talks to any server exposing the OpenAI `chat/completions` streaming API.
pub struct OpenAiCompatibleAdapter {
    client: reqwest::Client,
    read_timeout: Duration,
}

impl OpenAiCompatibleAdapter {
    /// `read_timeout` bounds the wait for each upstream chunk, not the whole reply.
    pub fn new(read_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            read_timeout,
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    async fn stream_chat(
        &self,
        endpoint: &UpstreamEndpoint,
        request: ChatStreamRequest,
    ) -> Result<ChatEventStream> {
        let url = format!(
            "{}/chat/completions",
            endpoint.base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": true,
        });

        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", endpoint.api_key.trim()))
                .context("invalid authorization header")?,
        );

        debug!(provider = %endpoint.provider_name, %url, "opening chat stream");
        let response = tokio::time::timeout(
            self.read_timeout,
            self.client
                .post(&url)
                .headers(headers)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .json(&body)
                .send(),
        )
        .await
        .with_context(|| format!("no response from {url} within {:?}", self.read_timeout))??;

        let status = response.status();
        if !status.is_success() {
            let text = match tokio::time::timeout(self.read_timeout, response.text()).await {
                Ok(Ok(text)) => text,
                Ok(Err(err)) => format!("<unreadable body: {err}>"),
                Err(_) => format!("<no body within {:?}>", self.read_timeout),
            };
            warn!(provider = %endpoint.provider_name, status = status.as_u16(), "upstream rejected chat request");
            return Ok(Box::pin(stream::iter([ChatEvent::Failed {
                message: format!("Upstream API {} - {}", status.as_u16(), text),
            }])));
        }

        let chunks = response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .boxed();
        Ok(relay(chunks, self.read_timeout))
    }
}

struct RelayState {
    chunks: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<ChatEvent>,
    finished: bool,
    read_timeout: Duration,
}

/// Turns the upstream byte stream into chat events, ending after the first
/// `Completed` or `Failed`.
fn relay(
    chunks: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    read_timeout: Duration,
) -> ChatEventStream {
    let state = RelayState {
        chunks,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
        read_timeout,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                if matches!(event, ChatEvent::Completed | ChatEvent::Failed { .. }) {
                    state.finished = true;
                    state.pending.clear();
                }
                return Some((event, state));
            }
            if state.finished {
                return None;
            }

            match tokio::time::timeout(state.read_timeout, state.chunks.next()).await {
                Err(_) => state.pending.push_back(ChatEvent::Failed {
                    message: format!("upstream read timed out after {:?}", state.read_timeout),
                }),
                Ok(Some(Err(err))) => state.pending.push_back(ChatEvent::Failed {
                    message: err.to_string(),
                }),
                Ok(Some(Ok(chunk))) => state.pending.extend(state.decoder.push(&chunk)),
                Ok(None) => {
                    state.pending.extend(state.decoder.finish());
                    // a stream closed without [DONE] still ends cleanly
                    state.pending.push_back(ChatEvent::Completed);
                }
            }
        }
    }))
}

/// Incremental decoder for `data:` lines of an OpenAI chat completion stream.
/// Bytes are buffered until a full line arrives, so events and multi-byte
/// characters may be split across network chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ChatEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            events.extend(decode_line(&line));
        }
        events
    }

    /// Decodes a trailing line that never got its newline.
    pub fn finish(&mut self) -> Vec<ChatEvent> {
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line).into_iter().collect()
    }
}

fn decode_line(line: &[u8]) -> Option<ChatEvent> {
    let line = String::from_utf8_lossy(line);
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(ChatEvent::Completed);
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, payload, "skipping malformed chat event");
            return None;
        }
    };
    let text = value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())?;
    Some(ChatEvent::TextDelta {
        text: text.to_string(),
    })
}
