//! Tool dispatch layer
//!
//! The LLM sees a closed set of callable tools. Instead of a dynamic
//! name-to-handler map, calls are parsed into the [`ToolCommand`] enum
//! with per-variant typed parameters; the JSON schemas handed to the
//! provider are generated next to the variants so the two cannot drift.
//!
//! Handler failures never escape as errors: every execution produces a
//! [`ToolOutcome`] that is serialized back to the model as tool output.

pub mod list_directory;
pub mod title;
pub mod todos;

pub use list_directory::RepoGuard;

use crate::artifact::ArtifactGenerator;
use crate::error::CampfireError;
use crate::store::{ArtifactKind, Store};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Result of one tool execution, fed back to the model verbatim
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub ok: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Wire shape: `{"ok": bool, "result"?: ..., "error"?: ...}`
    pub fn to_value(&self) -> Value {
        let mut out = json!({ "ok": self.ok });
        if let Some(result) = &self.result {
            out["result"] = result.clone();
        }
        if let Some(error) = &self.error {
            out["error"] = Value::String(error.clone());
        }
        out
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionParams {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListTodosParams {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub detailed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddTodoParams {
    pub item: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListDirectoryParams {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TitleParams {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub force: bool,
}

/// The closed set of callable tools, with typed parameters
#[derive(Debug, Clone)]
pub enum ToolCommand {
    GetSessionId,
    ListTodos(ListTodosParams),
    AddTodo(AddTodoParams),
    ClearTodos(SessionParams),
    ListDirectory(ListDirectoryParams),
    DeriveProjectIdea(SessionParams),
    CreateTechStack(SessionParams),
    SummarizeChatHistory(SessionParams),
    GenerateChatTitle(TitleParams),
}

impl ToolCommand {
    /// Parse a named call with a JSON arguments string.
    pub fn parse(name: &str, arguments: &str) -> Result<Self, CampfireError> {
        let arguments = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };
        let parse_err = |e: serde_json::Error| {
            CampfireError::Validation(format!("invalid arguments for '{}': {}", name, e))
        };
        match name {
            "get_session_id" => Ok(Self::GetSessionId),
            "list_todos" => Ok(Self::ListTodos(
                serde_json::from_str(arguments).map_err(parse_err)?,
            )),
            "add_todo" => Ok(Self::AddTodo(
                serde_json::from_str(arguments).map_err(parse_err)?,
            )),
            "clear_todos" => Ok(Self::ClearTodos(
                serde_json::from_str(arguments).map_err(parse_err)?,
            )),
            "list_directory" => Ok(Self::ListDirectory(
                serde_json::from_str(arguments).map_err(parse_err)?,
            )),
            "derive_project_idea" => Ok(Self::DeriveProjectIdea(
                serde_json::from_str(arguments).map_err(parse_err)?,
            )),
            "create_tech_stack" => Ok(Self::CreateTechStack(
                serde_json::from_str(arguments).map_err(parse_err)?,
            )),
            "summarize_chat_history" => Ok(Self::SummarizeChatHistory(
                serde_json::from_str(arguments).map_err(parse_err)?,
            )),
            "generate_chat_title" => Ok(Self::GenerateChatTitle(
                serde_json::from_str(arguments).map_err(parse_err)?,
            )),
            other => Err(CampfireError::Tool(format!("Unknown tool: {}", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetSessionId => "get_session_id",
            Self::ListTodos(_) => "list_todos",
            Self::AddTodo(_) => "add_todo",
            Self::ClearTodos(_) => "clear_todos",
            Self::ListDirectory(_) => "list_directory",
            Self::DeriveProjectIdea(_) => "derive_project_idea",
            Self::CreateTechStack(_) => "create_tech_stack",
            Self::SummarizeChatHistory(_) => "summarize_chat_history",
            Self::GenerateChatTitle(_) => "generate_chat_title",
        }
    }

    /// JSON schemas for the whole tool set, in the inner
    /// `{name, description, parameters}` form the provider adapter wraps.
    pub fn definitions() -> Vec<Value> {
        let session_prop = || {
            json!({
                "type": "string",
                "description": "Chat session id; injected by the runtime when omitted"
            })
        };
        vec![
            json!({
                "name": "get_session_id",
                "description": "Return the active chat session id.",
                "parameters": {"type": "object", "properties": {}, "required": []}
            }),
            json!({
                "name": "list_todos",
                "description": "List the current to-do items for this session. Trust its output.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "session_id": session_prop(),
                        "detailed": {"type": "boolean", "description": "Include status and timestamps"}
                    },
                    "required": []
                }
            }),
            json!({
                "name": "add_todo",
                "description": "Add a new item to the session to-do list.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "item": {"type": "string", "description": "Task description"},
                        "session_id": session_prop()
                    },
                    "required": ["item"]
                }
            }),
            json!({
                "name": "clear_todos",
                "description": "Clear every to-do item of this session.",
                "parameters": {
                    "type": "object",
                    "properties": {"session_id": session_prop()},
                    "required": []
                }
            }),
            json!({
                "name": "list_directory",
                "description": "List files and folders within the project directory (safe, relative paths only).",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Relative path from the project root"}
                    },
                    "required": []
                }
            }),
            json!({
                "name": "derive_project_idea",
                "description": "Derive and store a concise project idea from the conversation.",
                "parameters": {
                    "type": "object",
                    "properties": {"session_id": session_prop()},
                    "required": []
                }
            }),
            json!({
                "name": "create_tech_stack",
                "description": "Recommend and store a tech stack based on the conversation.",
                "parameters": {
                    "type": "object",
                    "properties": {"session_id": session_prop()},
                    "required": []
                }
            }),
            json!({
                "name": "summarize_chat_history",
                "description": "Summarize the conversation into a stored submission note.",
                "parameters": {
                    "type": "object",
                    "properties": {"session_id": session_prop()},
                    "required": []
                }
            }),
            json!({
                "name": "generate_chat_title",
                "description": "Set the session title from the conversation. Idempotent unless force is set.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "session_id": session_prop(),
                        "force": {"type": "boolean", "description": "Regenerate even if a title exists"}
                    },
                    "required": []
                }
            }),
        ]
    }
}

/// Executes parsed tool commands against the store, the repository
/// guard, and the artifact generator
pub struct ToolRegistry {
    store: Store,
    artifacts: Arc<ArtifactGenerator>,
    repo: RepoGuard,
}

impl ToolRegistry {
    pub fn new(store: Store, artifacts: Arc<ArtifactGenerator>, repo: RepoGuard) -> Self {
        Self {
            store,
            artifacts,
            repo,
        }
    }

    /// Schemas for the provider request.
    pub fn definitions(&self) -> Vec<Value> {
        ToolCommand::definitions()
    }

    /// Execute one announced call. The runtime session id always wins
    /// over whatever the model put in the arguments; models are told they
    /// may omit it.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &str,
        session_id: Option<&str>,
    ) -> ToolOutcome {
        let command = match ToolCommand::parse(name, arguments) {
            Ok(command) => command,
            Err(err) => return ToolOutcome::failure(err.to_string()),
        };
        tracing::debug!("Executing tool {}", command.name());

        match command {
            ToolCommand::GetSessionId => ToolOutcome::success(json!({
                "session_id": session_id,
            })),
            ToolCommand::ListTodos(params) => {
                let session = resolve_session(session_id, params.session_id.as_deref());
                wrap(todos::list(&self.store, session, params.detailed))
            }
            ToolCommand::AddTodo(params) => {
                let session = resolve_session(session_id, params.session_id.as_deref());
                match session {
                    Some(session) => wrap(todos::add(&self.store, session, &params.item)),
                    None => ToolOutcome::failure("add_todo requires a session_id"),
                }
            }
            ToolCommand::ClearTodos(params) => {
                let session = resolve_session(session_id, params.session_id.as_deref());
                match session {
                    Some(session) => wrap(todos::clear(&self.store, session)),
                    None => ToolOutcome::failure("clear_todos requires a session_id"),
                }
            }
            ToolCommand::ListDirectory(params) => {
                wrap(list_directory::run(
                    &self.repo,
                    params.path.as_deref().unwrap_or("."),
                ))
            }
            ToolCommand::DeriveProjectIdea(params) => {
                self.generate_artifact(session_id, params, ArtifactKind::ProjectIdea)
                    .await
            }
            ToolCommand::CreateTechStack(params) => {
                self.generate_artifact(session_id, params, ArtifactKind::TechStack)
                    .await
            }
            ToolCommand::SummarizeChatHistory(params) => {
                self.generate_artifact(session_id, params, ArtifactKind::SubmissionSummary)
                    .await
            }
            ToolCommand::GenerateChatTitle(params) => {
                let session = resolve_session(session_id, params.session_id.as_deref());
                match session {
                    Some(session) => {
                        wrap(title::generate(&self.store, session, params.force))
                    }
                    None => ToolOutcome::failure("generate_chat_title requires a session_id"),
                }
            }
        }
    }

    async fn generate_artifact(
        &self,
        session_id: Option<&str>,
        params: SessionParams,
        kind: ArtifactKind,
    ) -> ToolOutcome {
        let Some(session) = resolve_session(session_id, params.session_id.as_deref()) else {
            return ToolOutcome::failure(format!("{} requires a session_id", kind.as_str()));
        };
        match self.artifacts.generate(session, kind, None).await {
            Ok(artifact) => ToolOutcome::success(json!({
                "artifact_type": artifact.artifact_type,
                "content": artifact.content,
            })),
            Err(err) => ToolOutcome::failure(err.to_string()),
        }
    }
}

fn resolve_session<'a>(runtime: Option<&'a str>, from_args: Option<&'a str>) -> Option<&'a str> {
    runtime.or(from_args)
}

fn wrap(result: crate::error::Result<Value>) -> ToolOutcome {
    match result {
        Ok(value) => ToolOutcome::success(value),
        Err(err) => ToolOutcome::failure(err.to_string()),
    }
}
