//! Shared fixtures for integration tests: a scripted provider, a
//! deterministic counting embedder, and a fully wired app served on an
//! ephemeral port.

use async_trait::async_trait;
use campfire::artifact::ArtifactGenerator;
use campfire::chat::Orchestrator;
use campfire::config::{Config, IngestLimits, TurnLimits};
use campfire::error::Result;
use campfire::index::{Embedder, RetrievalIndex};
use campfire::ingest::{ContextIngestor, PlainTextExtractor, TextExtractor};
use campfire::provider::{Message, ModelInfo, ModelManager, Provider, ProviderFrame};
use campfire::server::{router, AppState};
use campfire::store::Store;
use campfire::tools::{RepoGuard, ToolRegistry};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Provider double replaying scripted frame sequences, one per
/// `stream_chat` call. When the scripts run out it answers with a plain
/// completion.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Vec<ProviderFrame>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<ProviderFrame>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
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
        _messages: &[Message],
        _tools: &[serde_json::Value],
        _model_id: &str,
    ) -> Result<mpsc::Receiver<ProviderFrame>> {
        let frames = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                vec![
                    ProviderFrame::Content("Done.".into()),
                    ProviderFrame::Done,
                ]
            } else {
                scripts.remove(0)
            }
        };
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for frame in frames {
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// Deterministic embedder hashing whitespace tokens into buckets; counts
/// encode calls for cache-reuse assertions.
pub struct CountingEmbedder {
    dim: usize,
    calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dim];
                let lowered = text.to_lowercase();
                let tokens = lowered
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty());
                for token in tokens {
                    let mut hash: usize = 17;
                    for byte in token.bytes() {
                        hash = hash.wrapping_mul(31).wrapping_add(byte as usize);
                    }
                    vector[hash % self.dim] += 1.0;
                }
                vector
            })
            .collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn model_id(&self) -> &str {
        "counting-embedder"
    }
}

/// A fully wired app on an ephemeral port
pub struct TestApp {
    pub base_url: String,
    pub state: AppState,
    pub embedder: Arc<CountingEmbedder>,
    pub client: reqwest::Client,
    _dir: tempfile::TempDir,
}

/// Build the runtime around the given provider scripts and serve it.
pub async fn spawn_app(scripts: Vec<Vec<ProviderFrame>>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_root: dir.path().to_path_buf(),
        db_path: dir.path().join("app.db"),
        repo_root: dir.path().to_path_buf(),
        ingest: IngestLimits {
            max_upload_bytes: 64 * 1024,
            max_url_bytes: 16 * 1024,
            url_timeout: std::time::Duration::from_secs(2),
            max_redirects: 3,
        },
        ..Config::default()
    };

    let store = Store::open(config.db_path.clone()).unwrap();
    let embedder = Arc::new(CountingEmbedder::new(16));
    let index = Arc::new(RetrievalIndex::new(
        store.clone(),
        embedder.clone() as Arc<dyn Embedder>,
        config.rag_cache_dir(),
    ));
    let extractor: Arc<dyn TextExtractor> = Arc::new(PlainTextExtractor);
    let ingestor = Arc::new(
        ContextIngestor::new(store.clone(), index.clone(), extractor, config.ingest).unwrap(),
    );
    let provider: Arc<dyn Provider> = Arc::new(ScriptedProvider::new(scripts));
    let models = Arc::new(ModelManager::new(
        provider.clone(),
        store.clone(),
        "stub-model".to_string(),
    ));
    let artifacts = Arc::new(ArtifactGenerator::new(
        store.clone(),
        provider.clone(),
        models.clone(),
    ));
    let repo = RepoGuard::new(&config.repo_root).unwrap();
    let tools = Arc::new(ToolRegistry::new(store.clone(), artifacts.clone(), repo));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        index.clone(),
        tools,
        provider,
        models.clone(),
        TurnLimits::default(),
    ));

    let state = AppState {
        config: Arc::new(config),
        store,
        index,
        ingestor,
        orchestrator,
        artifacts,
        models,
    };

    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    TestApp {
        base_url: format!("http://{}", addr),
        state,
        embedder,
        client: reqwest::Client::new(),
        _dir: dir,
    }
}

/// Parse an SSE body into the JSON events it carries, skipping
/// heartbeat comments.
pub fn parse_sse(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .filter_map(|line| line.trim().strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str(data).ok())
        .collect()
}

/// The event `type` tags in order.
pub fn event_types(events: &[serde_json::Value]) -> Vec<String> {
    events
        .iter()
        .map(|e| e["type"].as_str().unwrap_or_default().to_string())
        .collect()
}
