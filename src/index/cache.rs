//! Content-addressed disk cache for built retrieval indexes
//!
//! A build is addressed by the SHA-256 of the ordered active context
//! contents. Each entry lives under `<cache_root>/<rules_hash>/` as three
//! files: `chunks.json` (ordered chunk list), `embeddings.bin` (packed
//! little-endian f32 matrix, n x dim), and `meta.json`. Entries are never
//! mutated in place; a stale entry is simply ignored and eventually
//! garbage-collected by age.

use crate::error::{CampfireError, Result};
use crate::index::chunk::IndexChunk;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Metadata stored alongside a cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub n_chunks: usize,
    pub dim: usize,
    pub embedding_model_id: String,
    pub created_at: String,
}

/// Chunk record as persisted in `chunks.json`
#[derive(Debug, Serialize, Deserialize)]
struct CachedChunk {
    chunk_id: usize,
    text: String,
    source_row_id: i64,
}

/// SHA-256 over the ordered concatenation of active context contents.
///
/// Two sessions with identical ordered contents share a hash and thus a
/// cache entry.
pub fn compute_rules_hash<'a>(contents: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for content in contents {
        hasher.update(content.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Directory for one cache entry
pub fn entry_dir(cache_root: &Path, rules_hash: &str) -> PathBuf {
    cache_root.join(rules_hash)
}

/// Persist a built index. Vectors are the already-normalized embedding
/// matrix, flattened row-major.
pub fn save(
    cache_root: &Path,
    rules_hash: &str,
    chunks: &[IndexChunk],
    vectors: &[f32],
    dim: usize,
    embedding_model_id: &str,
) -> Result<()> {
    let dir = entry_dir(cache_root, rules_hash);
    std::fs::create_dir_all(&dir).map_err(|e| CampfireError::Index(e.to_string()))?;

    let cached: Vec<CachedChunk> = chunks
        .iter()
        .map(|c| CachedChunk {
            chunk_id: c.chunk_id,
            text: c.text.clone(),
            source_row_id: c.source_row_id,
        })
        .collect();
    let chunks_json =
        serde_json::to_vec_pretty(&cached).map_err(CampfireError::Serialization)?;
    std::fs::write(dir.join("chunks.json"), chunks_json)
        .map_err(|e| CampfireError::Index(e.to_string()))?;

    let mut packed = Vec::with_capacity(vectors.len() * 4);
    for value in vectors {
        packed.extend_from_slice(&value.to_le_bytes());
    }
    std::fs::write(dir.join("embeddings.bin"), packed)
        .map_err(|e| CampfireError::Index(e.to_string()))?;

    let meta = CacheMeta {
        n_chunks: chunks.len(),
        dim,
        embedding_model_id: embedding_model_id.to_string(),
        created_at: Utc::now().to_rfc3339(),
    };
    let meta_json = serde_json::to_vec_pretty(&meta).map_err(CampfireError::Serialization)?;
    std::fs::write(dir.join("meta.json"), meta_json)
        .map_err(|e| CampfireError::Index(e.to_string()))?;

    Ok(())
}

/// Load a cache entry if present and compatible with `expected_dim`.
///
/// Returns `None` when the entry is absent; incompatible or corrupt
/// entries are also treated as misses rather than errors, so a rebuild
/// falls back to computing fresh.
pub fn load(
    cache_root: &Path,
    rules_hash: &str,
    expected_dim: usize,
) -> Result<Option<(Vec<IndexChunk>, Vec<f32>, CacheMeta)>> {
    let dir = entry_dir(cache_root, rules_hash);
    let meta_path = dir.join("meta.json");
    if !meta_path.exists() {
        return Ok(None);
    }

    let meta: CacheMeta = match std::fs::read(&meta_path)
        .ok()
        .and_then(|raw| serde_json::from_slice(&raw).ok())
    {
        Some(meta) => meta,
        None => return Ok(None),
    };
    if meta.dim != expected_dim {
        tracing::debug!(
            "Ignoring cache entry {}: dim {} != expected {}",
            rules_hash,
            meta.dim,
            expected_dim
        );
        return Ok(None);
    }

    let cached: Vec<CachedChunk> = match std::fs::read(dir.join("chunks.json"))
        .ok()
        .and_then(|raw| serde_json::from_slice(&raw).ok())
    {
        Some(chunks) => chunks,
        None => return Ok(None),
    };

    let packed = match std::fs::read(dir.join("embeddings.bin")) {
        Ok(raw) => raw,
        Err(_) => return Ok(None),
    };
    if packed.len() != meta.n_chunks * meta.dim * 4 || cached.len() != meta.n_chunks {
        tracing::warn!("Cache entry {} is inconsistent; ignoring", rules_hash);
        return Ok(None);
    }

    let mut vectors = Vec::with_capacity(meta.n_chunks * meta.dim);
    for bytes in packed.chunks_exact(4) {
        vectors.push(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
    }

    let chunks = cached
        .into_iter()
        .map(|c| IndexChunk {
            chunk_id: c.chunk_id,
            text: c.text,
            source_row_id: c.source_row_id,
            offset: 0,
        })
        .collect();

    Ok(Some((chunks, vectors, meta)))
}
