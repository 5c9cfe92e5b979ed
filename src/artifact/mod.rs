//! Artifact derivation
//!
//! Project idea, tech stack, and submission summary are derived from the
//! session history by a one-shot provider invocation with tool calling
//! disabled and a fixed instruction per artifact type. The result is
//! upserted into the store, replacing any previous artifact of the same
//! type. Callers may attach a token sink to observe the generation as it
//! streams.

pub mod export;

pub use export::build_submission_pack;

use crate::error::{CampfireError, Result};
use crate::provider::{Message, ModelManager, Provider, ProviderFrame};
use crate::store::{Artifact, ArtifactKind, Role, Store};
use std::sync::Arc;
use tokio::sync::mpsc;

/// History window carried into a derivation
const HISTORY_WINDOW: usize = 20;

const PROJECT_IDEA_INSTRUCTION: &str = "You are a senior product strategist. From the \
conversation, craft a concise, specific hackathon project idea. Keep it actionable and \
focused. Return 1-2 sentences and avoid filler.";

const TECH_STACK_INSTRUCTION: &str = "You are a senior software architect. Based on the \
conversation, produce a concise recommended tech stack for a hackathon project. Prefer \
labeled lines in the form 'Frontend: ...', 'Backend: ...', 'Database: ...', \
'Additional: ...'. Avoid prose beyond the stack.";

const SUBMISSION_SUMMARY_INSTRUCTION: &str = "You are an experienced engineering manager. \
Summarize the conversation into a brief project progress note covering accomplishments, \
challenges, and next steps. Return at most two short paragraphs or up to five concise \
bullet points. Be concrete.";

fn instruction_for(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::ProjectIdea => PROJECT_IDEA_INSTRUCTION,
        ArtifactKind::TechStack => TECH_STACK_INSTRUCTION,
        ArtifactKind::SubmissionSummary => SUBMISSION_SUMMARY_INSTRUCTION,
    }
}

fn closing_request(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::ProjectIdea => {
            "Based on the conversation above, state the project idea now."
        }
        ArtifactKind::TechStack => {
            "Based on the conversation above, recommend the tech stack now."
        }
        ArtifactKind::SubmissionSummary => {
            "Based on the conversation above, write the progress note now."
        }
    }
}

/// Derives artifacts through one-shot provider calls
pub struct ArtifactGenerator {
    store: Store,
    provider: Arc<dyn Provider>,
    models: Arc<ModelManager>,
}

impl ArtifactGenerator {
    pub fn new(store: Store, provider: Arc<dyn Provider>, models: Arc<ModelManager>) -> Self {
        Self {
            store,
            provider,
            models,
        }
    }

    /// Generate one artifact and upsert it.
    ///
    /// Tokens are forwarded to `token_sink` as they stream when one is
    /// supplied (used by the `?stream=true` endpoints).
    pub async fn generate(
        &self,
        session_id: &str,
        kind: ArtifactKind,
        token_sink: Option<mpsc::Sender<String>>,
    ) -> Result<Artifact> {
        self.store.get_session(session_id)?;
        let history = self.store.list_messages(session_id, None, 0)?;
        if history.is_empty() {
            return Err(CampfireError::Validation(format!(
                "session {} has no chat history",
                session_id
            ))
            .into());
        }

        let mut messages = vec![Message::system(instruction_for(kind))];
        let window_start = history.len().saturating_sub(HISTORY_WINDOW);
        for stored in &history[window_start..] {
            if stored.content.trim().is_empty() {
                continue;
            }
            messages.push(match stored.role {
                Role::User => Message::user(stored.content.clone()),
                Role::Assistant => Message::assistant(stored.content.clone()),
                Role::System => Message::system(stored.content.clone()),
            });
        }
        messages.push(Message::user(closing_request(kind)));

        let model_id = self.models.current_model()?;
        // Tool calling is off for derivations: no schemas are sent.
        let mut frames = self.provider.stream_chat(&messages, &[], &model_id).await?;

        let mut parts: Vec<String> = Vec::new();
        while let Some(frame) = frames.recv().await {
            match frame {
                ProviderFrame::Content(token) => {
                    if let Some(sink) = &token_sink {
                        let _ = sink.send(token.clone()).await;
                    }
                    parts.push(token);
                }
                ProviderFrame::Thinking(_) => {}
                ProviderFrame::ToolCalls(_) => {
                    // Tools were disabled; ignore a misbehaving model.
                }
                ProviderFrame::Done => break,
                ProviderFrame::Error(message) => {
                    return Err(CampfireError::Upstream(message).into());
                }
            }
        }

        let content = parts.concat().trim().to_string();
        if content.is_empty() {
            return Err(CampfireError::Upstream(format!(
                "model produced no content for {}",
                kind.as_str()
            ))
            .into());
        }

        let metadata = serde_json::json!({
            "message_count": history.len(),
            "model_id": model_id,
        });
        self.store
            .put_artifact(session_id, kind, &content, Some(&metadata))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::provider::ModelInfo;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Provider double that replays scripted frame sequences, one per
    /// `stream_chat` call.
    pub struct ScriptedProvider {
        pub scripts: Mutex<Vec<Vec<ProviderFrame>>>,
        pub seen_requests: Mutex<Vec<(usize, usize)>>,
        /// Keep the frame channel open after a script runs out, so a
        /// test can exercise cancellation mid-stream.
        pub hold_open: Mutex<bool>,
    }

    impl ScriptedProvider {
        pub fn new(scripts: Vec<Vec<ProviderFrame>>) -> Self {
            Self {
                scripts: Mutex::new(scripts),
                seen_requests: Mutex::new(Vec::new()),
                hold_open: Mutex::new(false),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(vec![ModelInfo {
                id: "stub-model".into(),
                display_name: "stub-model".into(),
            }])
        }

        async fn is_reachable(&self) -> bool {
            true
        }

        async fn stream_chat(
            &self,
            messages: &[Message],
            tools: &[serde_json::Value],
            _model_id: &str,
        ) -> Result<mpsc::Receiver<ProviderFrame>> {
            self.seen_requests
                .lock()
                .unwrap()
                .push((messages.len(), tools.len()));
            let mut scripts = self.scripts.lock().unwrap();
            let frames = if scripts.is_empty() {
                vec![ProviderFrame::Content("Done.".into()), ProviderFrame::Done]
            } else {
                scripts.remove(0)
            };
            let hold_open = *self.hold_open.lock().unwrap();
            let (tx, rx) = mpsc::channel(64);
            tokio::spawn(async move {
                for frame in frames {
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                }
                while hold_open && !tx.is_closed() {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
            });
            Ok(rx)
        }
    }
}
