//! Stream orchestrator
//!
//! Implements one chat turn as a bounded multi-round tool-calling loop
//! with a strictly ordered event stream. The orchestrator receives
//! handles to the store, the retrieval index, the tool registry, and the
//! provider at construction; events go out on a bounded channel whose
//! consumer (the transport) is the back-pressure sink.
//!
//! Turns on the same session are serialized through a per-session mutex;
//! turns on different sessions run in parallel. Cancellation is a
//! cooperative token observed at every frame boundary and between tool
//! calls.

pub mod events;
pub mod prompts;

pub use events::{AnnouncedToolCall, EndReason, StreamEvent};

use crate::config::TurnLimits;
use crate::error::{CampfireError, Result};
use crate::index::RetrievalIndex;
use crate::provider::{Message, ModelManager, Provider, ProviderFrame, ToolCall};
use crate::store::{Role, Store};
use crate::tools::{title, ToolRegistry};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const RETRIEVAL_K: usize = 5;
const HISTORY_WINDOW: usize = 20;
const BUDGET_EXHAUSTED_TOKEN: &str = "[tool call budget exhausted]";

/// A file or URL snippet attached to one turn. Attachments are framed
/// into the model-visible user content but stripped from what is
/// persisted.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Block label, e.g. `FILE:rules.txt` or `URL:https://...`
    pub label: String,
    pub text: String,
}

/// Input to one chat turn
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Created lazily when absent
    pub session_id: Option<String>,
    pub user_input: String,
    pub attachments: Vec<Attachment>,
}

/// What one provider round produced
enum RoundOutcome {
    ToolCalls(Vec<ToolCall>),
    Finished,
    Cancelled,
    DeadlineExceeded,
    Failed(String),
}

/// Drives chat turns end to end
pub struct Orchestrator {
    store: Store,
    index: Arc<RetrievalIndex>,
    tools: Arc<ToolRegistry>,
    provider: Arc<dyn Provider>,
    models: Arc<ModelManager>,
    limits: TurnLimits,
    turn_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        store: Store,
        index: Arc<RetrievalIndex>,
        tools: Arc<ToolRegistry>,
        provider: Arc<dyn Provider>,
        models: Arc<ModelManager>,
        limits: TurnLimits,
    ) -> Self {
        Self {
            store,
            index,
            tools,
            provider,
            models,
            limits,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Bound for the outbound event channel.
    pub fn event_queue_capacity(&self) -> usize {
        self.limits.event_queue_capacity
    }

    fn lock_for(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.turn_locks.lock().expect("turn lock map poisoned");
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Run one turn, emitting events on `events` until `end` (or
    /// cancellation). Validation failures surface as errors before any
    /// event is emitted, so the transport can still answer with a status
    /// code.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<String> {
        let user_input = request.user_input.trim().to_string();
        if user_input.is_empty() {
            return Err(CampfireError::Validation("user_input must not be empty".into()).into());
        }

        let session_id = request
            .session_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.store.upsert_session(&session_id, None)?;

        // Serialize turns on the same session, in arrival order.
        let lock = self.lock_for(&session_id);
        let _guard = tokio::select! {
            guard = lock.lock_owned() => guard,
            _ = cancel.cancelled() => return Ok(session_id),
        };

        let deadline = Instant::now() + self.limits.turn_timeout;

        // Persist the user message without attachment bodies.
        let user_metadata = if request.attachments.is_empty() {
            None
        } else {
            Some(serde_json::json!({
                "attachments": request
                    .attachments
                    .iter()
                    .map(|a| a.label.clone())
                    .collect::<Vec<_>>(),
            }))
        };
        self.store
            .append_message(&session_id, Role::User, &user_input, user_metadata.as_ref())?;

        if !emit(
            &events,
            StreamEvent::SessionInfo {
                session_id: session_id.clone(),
            },
        )
        .await
        {
            return Ok(session_id);
        }

        let rule_hits = match self
            .index
            .retrieve(Some(&session_id), &user_input, RETRIEVAL_K)
            .await
        {
            Ok((hits, _ready)) => hits,
            Err(err) => {
                tracing::warn!("Retrieval failed; continuing without context: {}", err);
                Vec::new()
            }
        };
        if !emit(
            &events,
            StreamEvent::RuleChunks {
                chunk_ids: rule_hits.iter().map(|h| h.chunk_id).collect(),
                texts: rule_hits.iter().map(|h| h.text.clone()).collect(),
            },
        )
        .await
        {
            return Ok(session_id);
        }

        let mut messages = self.build_messages(&session_id, &rule_hits, &user_input, &request)?;
        let model_id = self.models.current_model()?;

        let mut thinking_parts: Vec<String> = Vec::new();
        let mut content_parts: Vec<String> = Vec::new();
        let mut executed_calls: Vec<AnnouncedToolCall> = Vec::new();
        let mut executed_ids: HashSet<String> = HashSet::new();
        let mut total_calls = 0usize;
        let end_event;

        // Rounds 1..=N may call tools; round N+1 is the forced
        // content-only round.
        let mut round = 0usize;
        loop {
            round += 1;
            let forced_final = round > self.limits.max_tool_rounds;
            let tool_defs = if forced_final || total_calls >= self.limits.max_total_tool_calls {
                Vec::new()
            } else {
                self.tools.definitions()
            };

            let frames = match self
                .provider
                .stream_chat(&messages, &tool_defs, &model_id)
                .await
            {
                Ok(frames) => frames,
                Err(err) => {
                    end_event = StreamEvent::end_error(err.to_string());
                    break;
                }
            };

            let outcome = consume_round(
                frames,
                &events,
                &cancel,
                deadline,
                &mut thinking_parts,
                &mut content_parts,
            )
            .await;

            match outcome {
                RoundOutcome::Finished => {
                    end_event = StreamEvent::end_complete();
                    break;
                }
                RoundOutcome::Failed(message) => {
                    end_event = StreamEvent::end_error(message);
                    break;
                }
                RoundOutcome::Cancelled => {
                    self.persist_partial(&session_id, &thinking_parts, &content_parts, &executed_calls)?;
                    return Ok(session_id);
                }
                RoundOutcome::DeadlineExceeded => {
                    end_event = StreamEvent::end_error("turn timed out");
                    break;
                }
                RoundOutcome::ToolCalls(calls) => {
                    if forced_final {
                        // Still asking for tools after the forced round.
                        end_event = StreamEvent::end_max_rounds();
                        break;
                    }

                    // Never execute the same announced call id twice.
                    let fresh: Vec<ToolCall> = calls
                        .into_iter()
                        .filter(|call| !executed_ids.contains(&call.id))
                        .collect();
                    if fresh.is_empty() {
                        end_event = StreamEvent::end_complete();
                        break;
                    }

                    let announced: Vec<AnnouncedToolCall> =
                        fresh.iter().map(AnnouncedToolCall::from).collect();
                    if !emit(
                        &events,
                        StreamEvent::ToolCalls {
                            tool_calls: announced.clone(),
                        },
                    )
                    .await
                    {
                        self.persist_partial(&session_id, &thinking_parts, &content_parts, &executed_calls)?;
                        return Ok(session_id);
                    }

                    messages.push(Message::assistant_with_tools(fresh.clone()));

                    let mut exhausted = false;
                    for (call, descriptor) in fresh.iter().zip(&announced) {
                        if total_calls >= self.limits.max_total_tool_calls {
                            exhausted = true;
                            messages.push(Message::tool_result(
                                call.id.clone(),
                                serde_json::json!({
                                    "ok": false,
                                    "error": "tool call budget exhausted",
                                })
                                .to_string(),
                            ));
                            continue;
                        }

                        let outcome = self.execute_tool_call(call, &session_id).await;
                        executed_ids.insert(call.id.clone());
                        executed_calls.push(descriptor.clone());
                        total_calls += 1;
                        messages.push(Message::tool_result(
                            call.id.clone(),
                            outcome.to_value().to_string(),
                        ));
                    }

                    if exhausted {
                        if emit(
                            &events,
                            StreamEvent::Token {
                                token: BUDGET_EXHAUSTED_TOKEN.to_string(),
                            },
                        )
                        .await
                        {
                            content_parts.push(BUDGET_EXHAUSTED_TOKEN.to_string());
                        }
                        end_event = StreamEvent::end_max_rounds();
                        break;
                    }

                    if cancel.is_cancelled() {
                        self.persist_partial(&session_id, &thinking_parts, &content_parts, &executed_calls)?;
                        return Ok(session_id);
                    }
                }
            }
        }

        self.persist_assistant(
            &session_id,
            &thinking_parts,
            &content_parts,
            &executed_calls,
            false,
        )?;
        self.backfill_title(&session_id);
        emit(&events, end_event).await;
        Ok(session_id)
    }

    fn build_messages(
        &self,
        session_id: &str,
        rule_hits: &[crate::index::RetrievalHit],
        user_input: &str,
        request: &TurnRequest,
    ) -> Result<Vec<Message>> {
        let mut messages = vec![Message::system(prompts::build_system_prompt(rule_hits))];

        let history = self.store.list_messages(session_id, None, 0)?;
        // The just-persisted user message is replaced by the
        // attachment-framed variant below.
        let history = &history[..history.len().saturating_sub(1)];
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

        let mut visible = String::new();
        for attachment in &request.attachments {
            visible.push_str(&format!(
                "[{}]\n{}\n[/{}]\n",
                attachment.label,
                attachment.text,
                attachment.label.split(':').next().unwrap_or("CONTEXT"),
            ));
        }
        visible.push_str(user_input);
        messages.push(Message::user(visible));

        Ok(messages)
    }

    async fn execute_tool_call(
        &self,
        call: &ToolCall,
        session_id: &str,
    ) -> crate::tools::ToolOutcome {
        tracing::debug!("Tool call {} ({})", call.function.name, call.id);
        match tokio::time::timeout(
            self.limits.tool_call_timeout,
            self.tools
                .execute(&call.function.name, &call.function.arguments, Some(session_id)),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => crate::tools::ToolOutcome::failure(format!(
                "tool '{}' timed out after {}s",
                call.function.name,
                self.limits.tool_call_timeout.as_secs()
            )),
        }
    }

    fn persist_assistant(
        &self,
        session_id: &str,
        thinking: &[String],
        content: &[String],
        executed: &[AnnouncedToolCall],
        partial: bool,
    ) -> Result<()> {
        let content = content.concat();
        if content.trim().is_empty() && executed.is_empty() {
            return Ok(());
        }

        let mut metadata = serde_json::Map::new();
        let thinking = thinking.concat();
        if !thinking.trim().is_empty() {
            metadata.insert("thinking".into(), thinking.into());
        }
        if !executed.is_empty() {
            metadata.insert(
                "tool_calls".into(),
                serde_json::to_value(executed).map_err(CampfireError::Serialization)?,
            );
        }
        if partial {
            metadata.insert("partial".into(), true.into());
        }
        let metadata = if metadata.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(metadata))
        };

        self.store
            .append_message(session_id, Role::Assistant, &content, metadata.as_ref())?;
        Ok(())
    }

    /// Persistence rule for cancelled turns: only when at least one
    /// non-empty token was emitted, and flagged as partial.
    fn persist_partial(
        &self,
        session_id: &str,
        thinking: &[String],
        content: &[String],
        executed: &[AnnouncedToolCall],
    ) -> Result<()> {
        if content.iter().all(|part| part.trim().is_empty()) {
            return Ok(());
        }
        self.persist_assistant(session_id, thinking, content, executed, true)
    }

    fn backfill_title(&self, session_id: &str) {
        let untitled = matches!(
            self.store.find_session(session_id),
            Ok(Some(session)) if session.title.as_deref().unwrap_or("").trim().is_empty()
        );
        if untitled {
            if let Err(err) = title::generate(&self.store, session_id, false) {
                tracing::debug!("Title generation skipped: {}", err);
            }
        }
    }
}

async fn emit(events: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    events.send(event).await.is_ok()
}

async fn consume_round(
    mut frames: mpsc::Receiver<ProviderFrame>,
    events: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
    deadline: Instant,
    thinking_parts: &mut Vec<String>,
    content_parts: &mut Vec<String>,
) -> RoundOutcome {
    let mut announced: Option<Vec<ToolCall>> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return RoundOutcome::Cancelled,
            _ = tokio::time::sleep_until(deadline) => return RoundOutcome::DeadlineExceeded,
            frame = frames.recv() => match frame {
                Some(ProviderFrame::Thinking(text)) => {
                    if !emit(events, StreamEvent::Thinking { content: text.clone() }).await {
                        return RoundOutcome::Cancelled;
                    }
                    thinking_parts.push(text);
                }
                Some(ProviderFrame::Content(text)) => {
                    if !emit(events, StreamEvent::Token { token: text.clone() }).await {
                        return RoundOutcome::Cancelled;
                    }
                    content_parts.push(text);
                }
                Some(ProviderFrame::ToolCalls(calls)) => {
                    announced = Some(calls);
                }
                Some(ProviderFrame::Done) => {
                    return match announced {
                        Some(calls) => RoundOutcome::ToolCalls(calls),
                        None => RoundOutcome::Finished,
                    };
                }
                Some(ProviderFrame::Error(message)) => return RoundOutcome::Failed(message),
                None => return RoundOutcome::Failed("provider stream ended unexpectedly".into()),
            }
        }
    }
}
