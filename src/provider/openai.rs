//! OpenAI-compatible streaming provider
//!
//! Connects to a local OpenAI-compatible endpoint (Ollama, LM Studio,
//! llama.cpp server) and streams chat completions with tool support.
//! The SSE body is parsed line by line; reasoning and content deltas are
//! forwarded as they arrive while tool-call deltas are buffered by index
//! and reassembled into whole calls. A round whose argument buffers do
//! not parse as JSON when the stream finishes is rejected with an error
//! frame rather than silently truncated.

use crate::error::{CampfireError, Result};
use crate::provider::{
    FunctionCall, Message, ModelInfo, Provider, ProviderFrame, ToolCall,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// Frames buffered between the reader task and the orchestrator.
/// The bound is the back-pressure window: reading from the provider
/// halts while the consumer is slower than the stream.
const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Provider adapter for OpenAI-compatible chat endpoints
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model_id: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    stream: bool,
}

/// Tool definition in OpenAI wire format
#[derive(Serialize)]
struct WireTool {
    r#type: &'static str,
    function: serde_json::Value,
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl OpenAiProvider {
    pub fn new(base_url: &str, api_key: &str, default_model_id: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CampfireError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!(
            "Initialized provider: base_url={}, default_model={}",
            base_url,
            default_model_id
        );

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            default_model_id: default_model_id.to_string(),
        })
    }

    fn wrap_tools(tools: &[serde_json::Value]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|schema| WireTool {
                r#type: "function",
                function: schema.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url);
        let fallback = vec![ModelInfo {
            id: self.default_model_id.clone(),
            display_name: self.default_model_id.clone(),
        }];

        let response = match self.client.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!("Model listing returned {}; using fallback", response.status());
                return Ok(fallback);
            }
            Err(err) => {
                tracing::warn!("Model listing failed: {}; using fallback", err);
                return Ok(fallback);
            }
        };

        match response.json::<ModelsResponse>().await {
            Ok(parsed) if !parsed.data.is_empty() => Ok(parsed
                .data
                .into_iter()
                .map(|entry| ModelInfo {
                    display_name: entry.id.clone(),
                    id: entry.id,
                })
                .collect()),
            Ok(_) => Ok(fallback),
            Err(err) => {
                tracing::warn!("Failed to parse model list: {}; using fallback", err);
                Ok(fallback)
            }
        }
    }

    async fn is_reachable(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        matches!(
            self.client.get(&url).bearer_auth(&self.api_key).send().await,
            Ok(response) if response.status().is_success()
        )
    }

    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: &[serde_json::Value],
        model_id: &str,
    ) -> Result<mpsc::Receiver<ProviderFrame>> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: model_id,
            messages,
            tool_choice: if tools.is_empty() { None } else { Some("auto") },
            tools: Self::wrap_tools(tools),
            stream: true,
        };

        tracing::debug!(
            "Streaming chat: {} messages, {} tools, model={}",
            messages.len(),
            tools.len(),
            model_id
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CampfireError::Upstream(format!("chat request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CampfireError::Upstream(format!(
                "provider returned {}: {}",
                status, body
            ))
            .into());
        }

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut line_buffer = String::new();
            let mut assembler = StreamAssembler::new();

            'read: while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx
                            .send(ProviderFrame::Error(format!("stream error: {}", err)))
                            .await;
                        return;
                    }
                };
                line_buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = line_buffer.find('\n') {
                    let line = line_buffer[..pos].trim().to_string();
                    line_buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'read;
                    }

                    for frame in assembler.ingest(data) {
                        if tx.send(frame).await.is_err() {
                            // Consumer went away; stop reading.
                            return;
                        }
                    }
                    if assembler.finished() {
                        break 'read;
                    }
                }
            }

            for frame in assembler.finish() {
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

/// Buffers one round's tool-call deltas and turns raw SSE payloads into
/// consumer-facing frames.
struct StreamAssembler {
    buffers: BTreeMap<usize, ToolCallBuffer>,
    finish_reason: Option<String>,
    call_counter: usize,
}

#[derive(Default)]
struct ToolCallBuffer {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl StreamAssembler {
    fn new() -> Self {
        Self {
            buffers: BTreeMap::new(),
            finish_reason: None,
            call_counter: 0,
        }
    }

    /// True once the provider signalled a finish reason; no more payload
    /// frames will follow.
    fn finished(&self) -> bool {
        self.finish_reason.is_some()
    }

    /// Parse one `data:` payload; returns the frames to forward now.
    fn ingest(&mut self, data: &str) -> Vec<ProviderFrame> {
        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(err) => {
                return vec![ProviderFrame::Error(format!(
                    "failed to parse stream chunk: {}",
                    err
                ))]
            }
        };

        let mut frames = Vec::new();
        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }

            let delta = choice.delta;
            if let Some(text) = delta.reasoning.or(delta.reasoning_content) {
                if !text.is_empty() {
                    frames.push(ProviderFrame::Thinking(text));
                }
            }
            if let Some(text) = delta.content {
                if !text.is_empty() {
                    frames.push(ProviderFrame::Content(text));
                }
            }
            if let Some(deltas) = delta.tool_calls {
                for tc in deltas {
                    let index = tc.index.unwrap_or(self.call_counter);
                    self.call_counter = self.call_counter.max(index + 1);
                    let buffer = self.buffers.entry(index).or_default();
                    if let Some(id) = tc.id {
                        buffer.id = Some(id);
                    }
                    if let Some(function) = tc.function {
                        if let Some(name) = function.name {
                            buffer.name = name;
                        }
                        if let Some(arguments) = function.arguments {
                            buffer.arguments.push_str(&arguments);
                        }
                    }
                }
            }
        }
        frames
    }

    /// Finalize the round: emit reassembled tool calls (validated as
    /// complete JSON) and the terminal frame.
    fn finish(self) -> Vec<ProviderFrame> {
        if self.buffers.is_empty() {
            return vec![ProviderFrame::Done];
        }

        let mut calls = Vec::with_capacity(self.buffers.len());
        for (index, buffer) in self.buffers {
            let arguments = if buffer.arguments.is_empty() {
                "{}".to_string()
            } else {
                buffer.arguments
            };
            if serde_json::from_str::<serde_json::Value>(&arguments).is_err() {
                // The provider reported done mid-payload. Reject the round
                // instead of executing a truncated call.
                return vec![ProviderFrame::Error(format!(
                    "tool call '{}' ended with incomplete arguments",
                    buffer.name
                ))];
            }
            if buffer.name.is_empty() {
                return vec![ProviderFrame::Error(format!(
                    "tool call at index {} has no name",
                    index
                ))];
            }
            calls.push(ToolCall {
                id: buffer
                    .id
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                function: FunctionCall {
                    name: buffer.name,
                    arguments,
                },
            });
        }
        vec![ProviderFrame::ToolCalls(calls), ProviderFrame::Done]
    }
}
