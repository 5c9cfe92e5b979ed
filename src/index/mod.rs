//! Session-scoped retrieval index
//!
//! Maintains one nearest-neighbour structure per session (plus a
//! no-session slot) over the active context rows. Each slot moves through
//! `empty -> building -> ready`; rebuilds run on spawned workers, carry a
//! monotonically increasing epoch so a superseded build discards its
//! result, and publish by swapping a single immutable snapshot pointer.
//! Readers always see either the previous `ready` snapshot or nothing,
//! never a half-built index.
//!
//! Builds are content-addressed: when a cache entry exists for the
//! current rules hash the index is loaded from disk and the embedder is
//! not called.

pub mod cache;
pub mod chunk;
pub mod embed;

pub use chunk::IndexChunk;
pub use embed::{l2_normalize, Embedder, HttpEmbedder};

use crate::error::Result;
use crate::store::Store;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// One retrieval result
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetrievalHit {
    pub chunk_id: usize,
    pub text: String,
    /// Cosine similarity in `[-1, 1]`; higher is more relevant
    pub score: f32,
}

/// Observable index state for one session
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStatus {
    pub ready: bool,
    pub building: bool,
    pub n_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_hash: Option<String>,
}

/// Immutable built index published to readers
struct Snapshot {
    rules_hash: String,
    chunks: Vec<IndexChunk>,
    /// Normalized embedding matrix, row-major `n_chunks x dim`
    vectors: Vec<f32>,
    dim: usize,
}

impl Snapshot {
    fn top_k(&self, query: &[f32], k: usize) -> Vec<RetrievalHit> {
        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let row = &self.vectors[i * self.dim..(i + 1) * self.dim];
                let score: f32 = row.iter().zip(query).map(|(a, b)| a * b).sum();
                (i, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| RetrievalHit {
                chunk_id: self.chunks[i].chunk_id,
                text: self.chunks[i].text.clone(),
                score,
            })
            .collect()
    }
}

#[derive(Default)]
struct Slot {
    building: bool,
    epoch: u64,
    snapshot: Option<Arc<Snapshot>>,
}

type SessionKey = Option<String>;

/// Per-session retrieval index manager
pub struct RetrievalIndex {
    store: Store,
    embedder: Arc<dyn Embedder>,
    cache_root: PathBuf,
    slots: Mutex<HashMap<SessionKey, Slot>>,
}

impl RetrievalIndex {
    pub fn new(store: Store, embedder: Arc<dyn Embedder>, cache_root: PathBuf) -> Self {
        Self {
            store,
            embedder,
            cache_root,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn key(session_id: Option<&str>) -> SessionKey {
        session_id.map(String::from)
    }

    /// Request an asynchronous rebuild for a session. Rebuild requests
    /// coalesce: only the result of the newest request is ever published.
    pub fn request_rebuild(self: &Arc<Self>, session_id: Option<&str>) {
        let key = Self::key(session_id);
        let epoch = {
            let mut slots = self.slots.lock().expect("index slots lock poisoned");
            let slot = slots.entry(key.clone()).or_default();
            slot.epoch += 1;
            slot.building = true;
            slot.epoch
        };

        let index = Arc::clone(self);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = index.run_build(key.clone(), epoch).await {
                        tracing::warn!("Index rebuild failed for {:?}: {}", key, err);
                    }
                });
            }
            Err(_) => {
                // No runtime: leave the slot dirty and let the next status
                // poll or inline rebuild pick the work up.
                let mut slots = self.slots.lock().expect("index slots lock poisoned");
                if let Some(slot) = slots.get_mut(&Self::key(session_id)) {
                    if slot.epoch == epoch {
                        slot.building = false;
                    }
                }
            }
        }
    }

    /// Rebuild inline and wait for the result. Used by status polling and
    /// tests; follows the same epoch discipline as spawned builds.
    pub async fn rebuild_now(&self, session_id: Option<&str>) -> Result<IndexStatus> {
        let key = Self::key(session_id);
        let epoch = {
            let mut slots = self.slots.lock().expect("index slots lock poisoned");
            let slot = slots.entry(key.clone()).or_default();
            slot.epoch += 1;
            slot.building = true;
            slot.epoch
        };
        self.run_build(key, epoch).await?;
        Ok(self.status(session_id))
    }

    async fn run_build(&self, key: SessionKey, epoch: u64) -> Result<()> {
        let built = self.build_snapshot(key.as_deref()).await;

        let mut slots = self.slots.lock().expect("index slots lock poisoned");
        let slot = slots.entry(key).or_default();
        if slot.epoch != epoch {
            // A newer request superseded this build; its worker owns the slot.
            return Ok(());
        }
        slot.building = false;
        match built {
            Ok(snapshot) => {
                slot.snapshot = snapshot.map(Arc::new);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Compute (or load from cache) the snapshot for the current active
    /// context set. `None` means the set is empty.
    async fn build_snapshot(&self, session_id: Option<&str>) -> Result<Option<Snapshot>> {
        let rows = self.store.list_active_context(session_id)?;
        if rows.is_empty() {
            return Ok(None);
        }

        let rules_hash =
            cache::compute_rules_hash(rows.iter().map(|row| row.content.as_str()));
        let dim = self.embedder.dim();

        if let Some((chunks, vectors, meta)) = cache::load(&self.cache_root, &rules_hash, dim)? {
            tracing::debug!(
                "Loaded retrieval index from cache: hash={}, chunks={}",
                rules_hash,
                meta.n_chunks
            );
            return Ok(Some(Snapshot {
                rules_hash,
                chunks,
                vectors,
                dim,
            }));
        }

        let row_texts: Vec<(i64, String)> = rows
            .into_iter()
            .map(|row| (row.id, row.content))
            .collect();
        let chunks = chunk::chunk_rows(&row_texts);
        if chunks.is_empty() {
            return Ok(None);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut embedded = self.embedder.encode(&texts).await?;
        let mut vectors = Vec::with_capacity(chunks.len() * dim);
        for vector in &mut embedded {
            l2_normalize(vector);
            vectors.extend_from_slice(vector);
        }

        cache::save(
            &self.cache_root,
            &rules_hash,
            &chunks,
            &vectors,
            dim,
            self.embedder.model_id(),
        )?;
        tracing::info!(
            "Built retrieval index: hash={}, chunks={}",
            rules_hash,
            chunks.len()
        );

        Ok(Some(Snapshot {
            rules_hash,
            chunks,
            vectors,
            dim,
        }))
    }

    /// Top-k lookup against the current `ready` snapshot.
    ///
    /// Returns the hits plus a readiness flag; when the index is not
    /// ready the hit list is empty and the caller decides whether to
    /// proceed without context.
    pub async fn retrieve(
        &self,
        session_id: Option<&str>,
        query_text: &str,
        k: usize,
    ) -> Result<(Vec<RetrievalHit>, bool)> {
        let snapshot = {
            let slots = self.slots.lock().expect("index slots lock poisoned");
            slots
                .get(&Self::key(session_id))
                .and_then(|slot| slot.snapshot.clone())
        };

        let snapshot = match snapshot {
            Some(snapshot) => snapshot,
            None => return Ok((Vec::new(), false)),
        };

        let mut query = self
            .embedder
            .encode(std::slice::from_ref(&query_text.to_string()))
            .await?
            .into_iter()
            .next()
            .unwrap_or_else(|| vec![0.0; snapshot.dim]);
        l2_normalize(&mut query);

        Ok((snapshot.top_k(&query, k), true))
    }

    /// Observable state for one session's slot.
    pub fn status(&self, session_id: Option<&str>) -> IndexStatus {
        let slots = self.slots.lock().expect("index slots lock poisoned");
        match slots.get(&Self::key(session_id)) {
            Some(slot) => IndexStatus {
                ready: slot.snapshot.is_some(),
                building: slot.building,
                n_chunks: slot
                    .snapshot
                    .as_ref()
                    .map(|s| s.chunks.len())
                    .unwrap_or(0),
                rules_hash: slot.snapshot.as_ref().map(|s| s.rules_hash.clone()),
            },
            None => IndexStatus {
                ready: false,
                building: false,
                n_chunks: 0,
                rules_hash: None,
            },
        }
    }

    /// Drop the in-memory snapshot for a session (the disk cache stays).
    /// Used when a session is deleted.
    pub fn evict(&self, session_id: Option<&str>) {
        let mut slots = self.slots.lock().expect("index slots lock poisoned");
        slots.remove(&Self::key(session_id));
    }
}
