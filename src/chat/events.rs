//! Wire events for one chat turn
//!
//! Every turn emits a strictly ordered sequence of JSON events:
//!
//! ```text
//! session_info  rule_chunks  (thinking | tool_calls)*  token*  end
//! ```
//!
//! Consumers dispatch on the `type` field; over SSE each event is one
//! `data: <json>` block and heartbeats are comment lines outside the
//! grammar.

use crate::provider::ToolCall;
use serde::Serialize;

/// A tool call as announced to the client, before execution
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnnouncedToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments string
    pub arguments: String,
}

impl From<&ToolCall> for AnnouncedToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        }
    }
}

/// Why a turn ended
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Complete,
    MaxRounds,
    Error,
}

/// One event on the turn stream
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First event of every turn
    SessionInfo { session_id: String },
    /// Second event; lists the retrieved context chunks (possibly empty)
    RuleChunks {
        chunk_ids: Vec<usize>,
        texts: Vec<String>,
    },
    /// Reasoning fragment; consumers concatenate
    Thinking { content: String },
    /// Tool calls announced before execution
    ToolCalls { tool_calls: Vec<AnnouncedToolCall> },
    /// Content fragment
    Token { token: String },
    /// Last event of every turn
    End {
        reason: EndReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl StreamEvent {
    pub fn end_complete() -> Self {
        Self::End {
            reason: EndReason::Complete,
            error: None,
        }
    }

    pub fn end_max_rounds() -> Self {
        Self::End {
            reason: EndReason::MaxRounds,
            error: None,
        }
    }

    pub fn end_error(message: impl Into<String>) -> Self {
        Self::End {
            reason: EndReason::Error,
            error: Some(message.into()),
        }
    }

    /// Wire form: `data: <json>\n\n`
    pub fn to_sse(&self) -> String {
        let json = serde_json::to_string(self).expect("stream events always serialize");
        format!("data: {}\n\n", json)
    }

    /// The grammar type tag, handy for assertions and logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SessionInfo { .. } => "session_info",
            Self::RuleChunks { .. } => "rule_chunks",
            Self::Thinking { .. } => "thinking",
            Self::ToolCalls { .. } => "tool_calls",
            Self::Token { .. } => "token",
            Self::End { .. } => "end",
        }
    }
}
