//! Provider abstraction over the local LLM endpoint
//!
//! The orchestrator talks to an OpenAI-compatible chat/completions
//! endpoint through the [`Provider`] trait: list models, and stream one
//! completion as a sequence of [`ProviderFrame`]s. Adapters are
//! responsible for reassembling partial tool-call deltas into whole calls
//! before the orchestrator observes them; the frames a consumer sees
//! carry only complete tool calls.

pub mod openai;

pub use openai::OpenAiProvider;

use crate::error::{CampfireError, Result};
use crate::store::Store;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Message structure for provider conversations
///
/// Unlike stored [`crate::store::ChatMessage`]s, provider messages also
/// cover the synthetic `tool` role used to feed tool results back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (user, assistant, system, tool)
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call this message answers (for `tool` role messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn assistant_with_tools(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(String::new()),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }
}

/// Function call details within a tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a JSON string, complete by the time the orchestrator
    /// sees it
    pub arguments: String,
}

/// A complete tool call announced by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

/// Model metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
}

/// One frame of a streaming completion
#[derive(Debug, Clone)]
pub enum ProviderFrame {
    /// Reasoning text; may arrive in many small fragments
    Thinking(String),
    /// Content token fragment
    Content(String),
    /// Whole tool calls, reassembled from deltas; emitted at most once
    /// per round, before `Done`
    ToolCalls(Vec<ToolCall>),
    /// The round finished normally
    Done,
    /// The round failed (transport error, malformed tool-call payload)
    Error(String),
}

/// Provider trait for OpenAI-compatible chat endpoints
#[async_trait]
pub trait Provider: Send + Sync {
    /// List available models. Implementations fall back to a configured
    /// default when the endpoint is unreachable.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Whether the endpoint answered the last health probe. Used by the
    /// status surface only.
    async fn is_reachable(&self) -> bool;

    /// Start one streaming completion. Frames arrive on a bounded
    /// channel; dropping the receiver cancels the stream at the next
    /// frame boundary.
    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: &[serde_json::Value],
        model_id: &str,
    ) -> Result<mpsc::Receiver<ProviderFrame>>;
}

/// Setting key holding the active model id
const CURRENT_MODEL_KEY: &str = "current_model";

/// Tracks the active model, persisted through app settings
pub struct ModelManager {
    provider: Arc<dyn Provider>,
    store: Store,
    default_model_id: String,
}

impl ModelManager {
    pub fn new(provider: Arc<dyn Provider>, store: Store, default_model_id: String) -> Self {
        Self {
            provider,
            store,
            default_model_id,
        }
    }

    /// The active model: the persisted selection, or the configured
    /// default.
    pub fn current_model(&self) -> Result<String> {
        Ok(self
            .store
            .setting_get(CURRENT_MODEL_KEY)?
            .unwrap_or_else(|| self.default_model_id.clone()))
    }

    /// Switch models after validating against the live list, and persist
    /// the selection.
    pub async fn set_model(&self, model_id: &str) -> Result<String> {
        let models = self.provider.list_models().await?;
        if !models.iter().any(|m| m.id == model_id) {
            return Err(
                CampfireError::Validation(format!("unknown model: {}", model_id)).into(),
            );
        }
        self.store.setting_put(CURRENT_MODEL_KEY, model_id)?;
        tracing::info!("Switched model to {}", model_id);
        self.current_model()
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.provider.list_models().await
    }

    pub async fn is_reachable(&self) -> bool {
        self.provider.is_reachable().await
    }
}
