//! Row types for the Campfire store
//!
//! All timestamps are UTC RFC 3339 strings as stored in SQLite. Closed
//! string columns (roles, task status, artifact types, context sources)
//! are mirrored as enums so that invalid values are rejected as
//! validation errors before they reach the database.

use crate::error::CampfireError;
use serde::{Deserialize, Serialize};

/// A chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque, client-generated identifier (UUIDs are typical)
    pub session_id: String,
    /// Human-readable title; derived lazily from the first user message
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Role of a stored chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CampfireError> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(CampfireError::Validation(format!(
                "unknown message role: {}",
                other
            ))),
        }
    }
}

/// A message within a session, append-only and ordered by `created_at`
/// then `id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    /// Optional metadata: `thinking` text and executed tool-call
    /// descriptors for assistant messages, attachment info for user
    /// messages
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
}

/// Task status lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CampfireError> {
        match value {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            other => Err(CampfireError::Validation(format!(
                "unknown task status: {}",
                other
            ))),
        }
    }
}

/// A to-do item, optionally scoped to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub session_id: Option<String>,
    pub item: String,
    pub status: TaskStatus,
    /// 1..=5; accepted and stored but not consulted by the orchestrator
    pub priority: i64,
    pub sort_order: i64,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

/// Partial update applied to a task; `None` fields are left unchanged
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub item: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<i64>,
    pub sort_order: Option<i64>,
}

/// The closed set of derivable artifact types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    ProjectIdea,
    TechStack,
    SubmissionSummary,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::ProjectIdea,
        ArtifactKind::TechStack,
        ArtifactKind::SubmissionSummary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectIdea => "project_idea",
            Self::TechStack => "tech_stack",
            Self::SubmissionSummary => "submission_summary",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CampfireError> {
        match value {
            "project_idea" => Ok(Self::ProjectIdea),
            "tech_stack" => Ok(Self::TechStack),
            "submission_summary" => Ok(Self::SubmissionSummary),
            other => Err(CampfireError::Validation(format!(
                "unknown artifact type: {}",
                other
            ))),
        }
    }
}

/// A derived artifact; at most one active row per `(session, type)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: i64,
    pub session_id: String,
    pub artifact_type: ArtifactKind,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
    pub updated_at: String,
}

/// Where a context row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextSource {
    Initial,
    File,
    Text,
    Url,
}

impl ContextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::File => "file",
            Self::Text => "text",
            Self::Url => "url",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CampfireError> {
        match value {
            "initial" => Ok(Self::Initial),
            "file" => Ok(Self::File),
            "text" => Ok(Self::Text),
            "url" => Ok(Self::Url),
            other => Err(CampfireError::Validation(format!(
                "unknown context source: {}",
                other
            ))),
        }
    }
}

/// An ingested context row feeding the retrieval index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRow {
    pub id: i64,
    /// `None` rows form the shared context used only when no session is
    /// active
    pub session_id: Option<String>,
    pub source: ContextSource,
    pub filename: Option<String>,
    pub content: String,
    pub active: bool,
    pub created_at: String,
}
