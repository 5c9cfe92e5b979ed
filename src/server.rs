//! HTTP shim
//!
//! Thin axum layer translating the HTTP surface into library calls. No
//! business logic lives here: handlers validate transport-level input,
//! call into the runtime, and map typed errors onto status codes.
//! Streaming responses are SSE where every event is one `data: <json>`
//! block and keep-alives are `: ping` comment lines.

use crate::artifact::{build_submission_pack, ArtifactGenerator};
use crate::chat::{Attachment, Orchestrator, StreamEvent, TurnRequest};
use crate::config::Config;
use crate::error::{CampfireError, Result};
use crate::index::{Embedder, HttpEmbedder, RetrievalIndex};
use crate::ingest::{ContextIngestor, PlainTextExtractor, TextExtractor};
use crate::provider::{ModelManager, OpenAiProvider, Provider};
use crate::store::{ArtifactKind, Store, TaskPatch, TaskStatus};
use crate::tools::{RepoGuard, ToolRegistry};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub index: Arc<RetrievalIndex>,
    pub ingestor: Arc<ContextIngestor>,
    pub orchestrator: Arc<Orchestrator>,
    pub artifacts: Arc<ArtifactGenerator>,
    pub models: Arc<ModelManager>,
}

/// Wire the runtime together from configuration.
pub fn build_state(config: Config) -> Result<AppState> {
    let store = Store::open(config.db_path.clone())?;
    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
        &config.provider_base_url,
        &config.provider_api_key,
        &config.embedding_model_id,
        config.embedding_dim,
    )?);
    let index = Arc::new(RetrievalIndex::new(
        store.clone(),
        embedder,
        config.rag_cache_dir(),
    ));
    let extractor: Arc<dyn TextExtractor> = Arc::new(PlainTextExtractor);
    let ingestor = Arc::new(ContextIngestor::new(
        store.clone(),
        index.clone(),
        extractor,
        config.ingest,
    )?);
    let provider: Arc<dyn Provider> = Arc::new(OpenAiProvider::new(
        &config.provider_base_url,
        &config.provider_api_key,
        &config.default_model_id,
    )?);
    let models = Arc::new(ModelManager::new(
        provider.clone(),
        store.clone(),
        config.default_model_id.clone(),
    ));
    let artifacts = Arc::new(ArtifactGenerator::new(
        store.clone(),
        provider.clone(),
        models.clone(),
    ));
    let repo = RepoGuard::new(&config.repo_root)?;
    let tools = Arc::new(ToolRegistry::new(store.clone(), artifacts.clone(), repo));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        index.clone(),
        tools,
        provider,
        models.clone(),
        config.turn,
    ));

    Ok(AppState {
        config: Arc::new(config),
        store,
        index,
        ingestor,
        orchestrator,
        artifacts,
        models,
    })
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat-stream", post(chat_stream))
        .route("/api/todos", get(get_todos).post(post_todo).delete(clear_todos))
        .route("/api/todos/{id}", put(update_todo).delete(delete_todo))
        .route("/api/context/rules", post(upload_rules))
        .route("/api/context/add-text", post(add_text_context))
        .route("/api/context/status", get(context_status))
        .route("/api/context/list", get(context_list))
        .route("/api/context/{id}", delete(deactivate_context))
        .route("/api/chat-sessions", get(list_sessions))
        .route(
            "/api/chat-sessions/{id}",
            get(session_detail).put(update_title).delete(delete_session),
        )
        .route(
            "/api/chat-sessions/{id}/project-artifacts",
            get(list_artifacts),
        )
        .route(
            "/api/chat-sessions/{id}/project-artifacts/{kind}",
            get(get_artifact),
        )
        .route(
            "/api/chat-sessions/{id}/derive-project-idea",
            post(derive_project_idea),
        )
        .route(
            "/api/chat-sessions/{id}/create-tech-stack",
            post(create_tech_stack),
        )
        .route(
            "/api/chat-sessions/{id}/summarize-chat-history",
            post(summarize_chat_history),
        )
        .route("/api/export/submission-pack", post(export_submission_pack))
        .route("/api/ollama/status", get(ollama_status))
        .route("/api/ollama/model", get(get_model).post(set_model))
        .route("/api/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(config: Config) -> Result<()> {
    let bind_addr = config.bind_addr.clone();
    let state = build_state(config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| CampfireError::Config(format!("failed to bind {}: {}", bind_addr, e)))?;
    tracing::info!("Listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .map_err(|e| CampfireError::Internal(e.to_string()))?;
    Ok(())
}

// ---- error mapping ------------------------------------------------------

/// Library error adapted to an HTTP response
struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match self.0.downcast_ref::<CampfireError>() {
            Some(err) => (status_for(err), err.kind()),
            None => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = json!({
            "error": { "code": code, "message": self.0.to_string() }
        });
        (status, Json(body)).into_response()
    }
}

fn status_for(err: &CampfireError) -> StatusCode {
    match err {
        CampfireError::Validation(_)
        | CampfireError::TooManyRedirects(_)
        | CampfireError::Serialization(_) => StatusCode::BAD_REQUEST,
        CampfireError::NotFound(_) => StatusCode::NOT_FOUND,
        CampfireError::Conflict(_) => StatusCode::CONFLICT,
        CampfireError::UnauthorizedPath(_) => StatusCode::FORBIDDEN,
        CampfireError::Oversize(_) => StatusCode::PAYLOAD_TOO_LARGE,
        CampfireError::UnsupportedMime(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        CampfireError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        CampfireError::Upstream(_)
        | CampfireError::Provider(_)
        | CampfireError::Http(_)
        | CampfireError::SseParse(_)
        | CampfireError::StreamInterrupted(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ---- chat ---------------------------------------------------------------

async fn chat_stream(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut user_input = String::new();
    let mut session_id: Option<String> = None;
    let mut url_text: Option<String> = None;
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| anyhow::Error::from(CampfireError::Validation(e.to_string())))?
    {
        match field.name().unwrap_or_default() {
            "user_input" => {
                user_input = field
                    .text()
                    .await
                    .map_err(|e| anyhow::Error::from(CampfireError::Validation(e.to_string())))?
            }
            "session_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| anyhow::Error::from(CampfireError::Validation(e.to_string())))?;
                if !value.trim().is_empty() {
                    session_id = Some(value);
                }
            }
            "url_text" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| anyhow::Error::from(CampfireError::Validation(e.to_string())))?;
                if !value.trim().is_empty() {
                    url_text = Some(value);
                }
            }
            "files" => {
                let filename = field.file_name().unwrap_or("upload.txt").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| anyhow::Error::from(CampfireError::Oversize(e.to_string())))?;
                files.push((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    if user_input.trim().is_empty() {
        return Err(
            anyhow::Error::from(CampfireError::Validation("user_input is required".into())).into(),
        );
    }

    // Pre-ingest attachments into the session context; failures abort
    // before the stream starts so they still map to status codes.
    let mut attachments = Vec::new();
    for (filename, bytes) in &files {
        let row = state
            .ingestor
            .add_file(filename, bytes, session_id.as_deref())?;
        attachments.push(Attachment {
            label: format!("FILE:{}", filename),
            text: row.content,
        });
    }
    if let Some(url_text) = url_text {
        if url_text.starts_with("http://") || url_text.starts_with("https://") {
            let row = state.ingestor.add_url(&url_text, session_id.as_deref()).await?;
            attachments.push(Attachment {
                label: format!("URL:{}", url_text),
                text: row.content,
            });
        } else {
            let row = state.ingestor.add_text(&url_text, session_id.as_deref())?;
            attachments.push(Attachment {
                label: "URL_TEXT".to_string(),
                text: row.content,
            });
        }
    }

    let request = TurnRequest {
        session_id,
        user_input,
        attachments,
    };

    let (tx, rx) = mpsc::channel(state.orchestrator.event_queue_capacity());
    let cancel = CancellationToken::new();
    let orchestrator = state.orchestrator.clone();
    let turn_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = orchestrator.run_turn(request, tx, turn_cancel).await {
            tracing::warn!("chat turn failed before streaming: {}", err);
        }
    });

    Ok(sse_response(rx, cancel))
}

/// Turn an event receiver into an SSE response that cancels the producer
/// when the client goes away.
fn sse_response(
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    // Dropping the stream (client disconnect) drops the guard, which
    // cancels the turn cooperatively.
    let guard = cancel.drop_guard();
    let stream = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        let sse = Event::default().data(
            serde_json::to_string(&event).expect("stream events always serialize"),
        );
        Some((Ok(sse), (rx, guard)))
    });
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

// ---- todos --------------------------------------------------------------

#[derive(Deserialize)]
struct TodoQuery {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    detailed: bool,
}

async fn get_todos(
    State(state): State<AppState>,
    Query(query): Query<TodoQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let tasks = state.store.list_tasks(query.session_id.as_deref())?;
    if query.detailed {
        Ok(Json(json!({ "todos": tasks })))
    } else {
        let items: Vec<&str> = tasks.iter().map(|t| t.item.as_str()).collect();
        Ok(Json(json!({ "todos": items })))
    }
}

#[derive(Deserialize)]
struct NewTodo {
    item: String,
    #[serde(default)]
    session_id: Option<String>,
}

async fn post_todo(
    State(state): State<AppState>,
    Json(body): Json<NewTodo>,
) -> ApiResult<Json<serde_json::Value>> {
    let task = state.store.add_task(&body.item, body.session_id.as_deref())?;
    let todos = state.store.list_tasks(body.session_id.as_deref())?;
    Ok(Json(json!({ "ok": true, "todo": task, "todos": todos })))
}

#[derive(Deserialize)]
struct SessionQuery {
    #[serde(default)]
    session_id: Option<String>,
}

async fn clear_todos(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let session_id = query.session_id.as_deref().filter(|s| !s.is_empty()).ok_or_else(|| {
        anyhow::Error::from(CampfireError::Validation("session_id is required".into()))
    })?;
    let deleted = state.store.clear_tasks(session_id)?;
    Ok(Json(json!({ "ok": true, "deleted": deleted })))
}

#[derive(Deserialize)]
struct TodoPatchBody {
    #[serde(default)]
    item: Option<String>,
    #[serde(default)]
    status: Option<TaskStatus>,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    sort_order: Option<i64>,
}

async fn update_todo(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<TodoPatchBody>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.item.is_none()
        && body.status.is_none()
        && body.priority.is_none()
        && body.sort_order.is_none()
    {
        return Err(
            anyhow::Error::from(CampfireError::Validation("no fields provided".into())).into(),
        );
    }
    let patch = TaskPatch {
        item: body.item,
        status: body.status,
        priority: body.priority,
        sort_order: body.sort_order,
    };
    let task = state.store.update_task(id, &patch)?;
    Ok(Json(json!({ "ok": true, "todo": task })))
}

async fn delete_todo(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.delete_task(id, query.session_id.as_deref())?;
    Ok(Json(json!({ "ok": true })))
}

// ---- context ------------------------------------------------------------

async fn upload_rules(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let mut session_id: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| anyhow::Error::from(CampfireError::Validation(e.to_string())))?
    {
        match field.name().unwrap_or_default() {
            "session_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| anyhow::Error::from(CampfireError::Validation(e.to_string())))?;
                if !value.trim().is_empty() {
                    session_id = Some(value);
                }
            }
            "file" => {
                let filename = field.file_name().unwrap_or("rules.txt").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| anyhow::Error::from(CampfireError::Oversize(e.to_string())))?;
                file = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| {
        anyhow::Error::from(CampfireError::Validation("file field is required".into()))
    })?;
    let row = state
        .ingestor
        .add_file(&filename, &bytes, session_id.as_deref())?;
    Ok(Json(json!({ "ok": true, "id": row.id, "filename": row.filename })))
}

#[derive(Deserialize)]
struct AddTextBody {
    text: String,
    #[serde(default)]
    session_id: Option<String>,
}

async fn add_text_context(
    State(state): State<AppState>,
    Json(body): Json<AddTextBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let cleaned = body.text.trim();
    let row = if cleaned.starts_with("http://") || cleaned.starts_with("https://") {
        state.ingestor.add_url(cleaned, body.session_id.as_deref()).await?
    } else {
        state.ingestor.add_text(cleaned, body.session_id.as_deref())?
    };
    Ok(Json(json!({ "ok": true, "id": row.id, "source": row.source })))
}

async fn context_status(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let session_id = query.session_id.as_deref();
    let mut status = state.index.status(session_id);
    if !status.ready && !status.building {
        // Kick a background rebuild when context exists but no index
        // has been built yet (cold process start).
        let has_rows = !state.store.list_active_context(session_id)?.is_empty();
        if has_rows {
            state.index.request_rebuild(session_id);
            status = state.index.status(session_id);
            status.building = true;
        }
    }
    Ok(Json(serde_json::to_value(&status).map_err(CampfireError::Serialization).map_err(anyhow::Error::from)?))
}

async fn context_list(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let rows = state.store.list_active_context(query.session_id.as_deref())?;
    Ok(Json(json!({ "items": rows })))
}

async fn deactivate_context(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.deactivate_context(id)?;
    state.index.request_rebuild(query.session_id.as_deref());
    Ok(Json(json!({ "ok": true })))
}

// ---- sessions -----------------------------------------------------------

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    20
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let sessions = state
        .store
        .list_recent_sessions(page.limit.min(100), page.offset)?;
    Ok(Json(json!({
        "sessions": sessions,
        "limit": page.limit.min(100),
        "offset": page.offset,
    })))
}

async fn session_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state.store.get_session(&id)?;
    let total = state.store.count_messages(&id)?;
    let messages = state.store.list_messages(&id, Some(page.limit.max(1)), page.offset)?;
    Ok(Json(json!({
        "session": session,
        "messages": messages,
        "total_messages": total,
        "offset": page.offset,
    })))
}

#[derive(Deserialize)]
struct TitleBody {
    title: String,
}

async fn update_title(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TitleBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.update_session_title(&id, body.title.trim())?;
    Ok(Json(json!({ "ok": true })))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.delete_session(&id)?;
    state.index.evict(Some(&id));
    Ok(Json(json!({ "ok": true })))
}

// ---- artifacts ----------------------------------------------------------

async fn list_artifacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.get_session(&id)?;
    let artifacts = state.store.list_artifacts(&id)?;
    Ok(Json(json!({ "artifacts": artifacts })))
}

async fn get_artifact(
    State(state): State<AppState>,
    Path((id, kind)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let kind = ArtifactKind::parse(&kind).map_err(anyhow::Error::from)?;
    let artifact = state.store.get_artifact(&id, kind)?.ok_or_else(|| {
        anyhow::Error::from(CampfireError::NotFound(format!(
            "artifact {} for session {}",
            kind.as_str(),
            id
        )))
    })?;
    Ok(Json(json!({ "artifact": artifact })))
}

#[derive(Deserialize)]
struct StreamQuery {
    #[serde(default)]
    stream: bool,
}

async fn derive_project_idea(
    state: State<AppState>,
    path: Path<String>,
    query: Query<StreamQuery>,
) -> ApiResult<Response> {
    generate_artifact(state, path, query, ArtifactKind::ProjectIdea).await
}

async fn create_tech_stack(
    state: State<AppState>,
    path: Path<String>,
    query: Query<StreamQuery>,
) -> ApiResult<Response> {
    generate_artifact(state, path, query, ArtifactKind::TechStack).await
}

async fn summarize_chat_history(
    state: State<AppState>,
    path: Path<String>,
    query: Query<StreamQuery>,
) -> ApiResult<Response> {
    generate_artifact(state, path, query, ArtifactKind::SubmissionSummary).await
}

async fn generate_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
    kind: ArtifactKind,
) -> ApiResult<Response> {
    if !query.stream {
        let artifact = state.artifacts.generate(&id, kind, None).await?;
        return Ok(Json(json!({ "ok": true, "artifact": artifact })).into_response());
    }

    // Streaming variant: token* end over SSE.
    let (token_tx, mut token_rx) = mpsc::channel::<String>(64);
    let (event_tx, event_rx) = mpsc::channel::<StreamEvent>(64);
    let artifacts = state.artifacts.clone();
    tokio::spawn(async move {
        let forward = event_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(token) = token_rx.recv().await {
                if forward.send(StreamEvent::Token { token }).await.is_err() {
                    break;
                }
            }
        });

        let result = artifacts.generate(&id, kind, Some(token_tx)).await;
        // All tokens are on the wire before the terminal event.
        let _ = forwarder.await;
        let end = match result {
            Ok(_) => StreamEvent::end_complete(),
            Err(err) => StreamEvent::end_error(err.to_string()),
        };
        let _ = event_tx.send(end).await;
    });

    Ok(sse_response(event_rx, CancellationToken::new()).into_response())
}

// ---- export -------------------------------------------------------------

async fn export_submission_pack(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Response> {
    let session_id = query.session_id.as_deref().filter(|s| !s.is_empty()).ok_or_else(|| {
        anyhow::Error::from(CampfireError::Validation("session_id is required".into()))
    })?;
    let model_id = state.models.current_model()?;
    let bytes = build_submission_pack(&state.store, session_id, &model_id)?;

    let filename = format!(
        "submission_pack_{}.zip",
        &session_id[..session_id.len().min(8)]
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        bytes,
    )
        .into_response())
}

// ---- provider -----------------------------------------------------------

async fn ollama_status(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let connected = state.models.is_reachable().await;
    let models = state.models.list_models().await?;
    Ok(Json(json!({
        "connected": connected,
        "base_url": state.config.provider_base_url,
        "model": state.models.current_model()?,
        "available_models": models.iter().map(|m| m.id.clone()).collect::<Vec<_>>(),
    })))
}

async fn get_model(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(json!({ "model": state.models.current_model()? })))
}

#[derive(Deserialize)]
struct SetModelBody {
    model: String,
}

async fn set_model(
    State(state): State<AppState>,
    Json(body): Json<SetModelBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let model = state.models.set_model(&body.model).await?;
    Ok(Json(json!({ "ok": true, "model": model })))
}

async fn health(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    // A cheap store round-trip proves the database is usable.
    state.store.setting_get("health_probe")?;
    Ok(Json(json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") })))
}
