//! Vector index and its lifecycle management
//!
//! The index is an exact inner-product structure over L2-normalized passage
//! embeddings, addressed by corpus position. It is built wholesale and never
//! mutated incrementally; a corpus change replaces it entirely. The manager
//! decides rebuild-vs-reuse by comparing a persisted corpus fingerprint
//! against a freshly computed one, so an unchanged corpus never pays the
//! re-embedding cost across restarts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::corpus::{self, Corpus};
use crate::embeddings::Embedder;

// Batch size for passage embedding during a rebuild. Kept modest so a slow
// local Ollama instance is not saturated.
fn get_batch_size() -> usize {
    std::env::var("EMBEDDING_BATCH_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(32)
}

/// Normalize a vector to unit length in-place.
/// If the vector has zero or very small norm, it is left unchanged.
pub(crate) fn normalize(v: &mut [f32]) {
    let norm_sq: f32 = v.iter().map(|x| x * x).sum();
    if norm_sq > 1e-20 {
        let norm = norm_sq.sqrt();
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product between two vectors of the same length.
/// For normalized vectors this equals cosine similarity.
#[inline(always)]
pub(crate) fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Exact inner-product index over all passage embeddings, addressed by
/// corpus position. Read-only once built; rebuilt wholesale on change.
#[derive(Debug, Serialize, Deserialize)]
pub struct VectorIndex {
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Append an embedding. Positions follow insertion order, matching the
    /// corpus ordering used at build time.
    pub fn add(&mut self, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dim {
            return Err(anyhow::anyhow!(
                "Vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dim
            ));
        }
        self.vectors.push(vector);
        Ok(())
    }

    /// Top-k inner-product search. Returns (position, score) pairs in
    /// non-increasing score order; fewer than k when the index is smaller.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if query.len() != self.dim {
            tracing::warn!(
                "Query dimension {} does not match index dimension {}",
                query.len(),
                self.dim
            );
            return Vec::new();
        }
        if k == 0 || self.vectors.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, dot_product(query, vector)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

/// Owns the persisted index artifact: the serialized index plus a sidecar
/// file holding the corpus fingerprint it was built from.
pub struct IndexManager {
    data_dir: PathBuf,
}

impl IndexManager {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("index.json")
    }

    pub fn fingerprint_path(&self) -> PathBuf {
        self.data_dir.join("index.fingerprint")
    }

    /// Produce a ready index for the given corpus, rebuilding only when the
    /// persisted artifact is absent, unpaired, stale, or unloadable.
    ///
    /// Decision order: no index artifact → rebuild; no fingerprint sidecar →
    /// rebuild; fingerprint mismatch → rebuild; match → reuse. An artifact
    /// that matches but fails to deserialize is treated like a mismatch and
    /// rebuilt rather than crashing startup.
    pub async fn ensure_index(
        &self,
        corpus: &Corpus,
        corpus_path: &Path,
        embedder: &dyn Embedder,
    ) -> Result<VectorIndex> {
        let current_fingerprint = corpus::compute_fingerprint(corpus_path)?;

        match self.try_reuse(corpus, &current_fingerprint).await {
            Some(index) => Ok(index),
            None => self.rebuild(corpus, &current_fingerprint, embedder).await,
        }
    }

    async fn try_reuse(&self, corpus: &Corpus, current_fingerprint: &str) -> Option<VectorIndex> {
        let index_path = self.index_path();
        let fingerprint_path = self.fingerprint_path();

        if !index_path.exists() {
            tracing::info!("No persisted index artifact found. Building index.");
            return None;
        }

        let stored = match tokio::fs::read_to_string(&fingerprint_path).await {
            Ok(contents) => contents.trim().to_string(),
            Err(_) => {
                tracing::info!("Index artifact has no fingerprint sidecar. Rebuilding.");
                return None;
            }
        };

        if stored != current_fingerprint {
            tracing::info!("Corpus fingerprint changed. Rebuilding index.");
            return None;
        }

        match self.load_index().await {
            Ok(index) => {
                if index.len() != corpus.len() {
                    tracing::warn!(
                        "Persisted index has {} vectors but corpus has {} passages. Rebuilding.",
                        index.len(),
                        corpus.len()
                    );
                    return None;
                }
                tracing::info!(
                    "Reusing persisted index ({} vectors, dim {})",
                    index.len(),
                    index.dim()
                );
                Some(index)
            }
            Err(e) => {
                // Corrupted artifact: recover by rebuilding, same as a stale
                // fingerprint. The file is left in place for inspection.
                tracing::warn!("Persisted index failed to load: {e:#}. Rebuilding.");
                None
            }
        }
    }

    async fn load_index(&self) -> Result<VectorIndex> {
        let data = tokio::fs::read_to_string(self.index_path())
            .await
            .context("Failed to read persisted index")?;
        let index: VectorIndex =
            serde_json::from_str(&data).context("Failed to deserialize persisted index")?;
        Ok(index)
    }

    /// Embed every passage, build a fresh index, and persist it together
    /// with the fingerprint it was built from.
    async fn rebuild(
        &self,
        corpus: &Corpus,
        fingerprint: &str,
        embedder: &dyn Embedder,
    ) -> Result<VectorIndex> {
        let texts = corpus.texts();
        let batch_size = get_batch_size();
        let total_batches = texts.len().div_ceil(batch_size.max(1));

        tracing::info!(
            "Embedding {} passages in {} batches of up to {}",
            texts.len(),
            total_batches,
            batch_size
        );

        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for (batch_idx, batch) in texts.chunks(batch_size.max(1)).enumerate() {
            let batch_embeddings = embedder
                .embed_batch(batch)
                .await
                .with_context(|| format!("Embedding batch {}/{} failed", batch_idx + 1, total_batches))?;
            if batch_embeddings.len() != batch.len() {
                return Err(anyhow::anyhow!(
                    "Batch {}/{}: received {} embeddings for {} passages",
                    batch_idx + 1,
                    total_batches,
                    batch_embeddings.len(),
                    batch.len()
                ));
            }
            embeddings.extend(batch_embeddings);
        }

        let dim = embeddings.first().map(|v| v.len()).unwrap_or(0);
        let mut index = VectorIndex::new(dim);
        for mut embedding in embeddings {
            normalize(&mut embedding);
            index.add(embedding)?;
        }

        self.persist(&index, fingerprint).await?;
        tracing::info!(
            "Index ready with {} passages (dim {})",
            index.len(),
            index.dim()
        );
        Ok(index)
    }

    /// Persist the index and fingerprint as a pair.
    ///
    /// The stale sidecar is removed first and the new one written last, so a
    /// crash anywhere in between leaves an index without a fingerprint — a
    /// state the decision algorithm resolves as rebuild, never stale reuse.
    /// Each file itself is committed with the temp-write + rename pattern.
    async fn persist(&self, index: &VectorIndex, fingerprint: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .context("Failed to create data directory")?;

        let fingerprint_path = self.fingerprint_path();
        match tokio::fs::remove_file(&fingerprint_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("Failed to remove stale fingerprint sidecar"),
        }

        let index_path = self.index_path();
        let index_tmp = index_path.with_extension("json.tmp");
        let data = serde_json::to_string(index).context("Failed to serialize index")?;
        tokio::fs::write(&index_tmp, data)
            .await
            .context("Failed to write index to temporary file")?;
        tokio::fs::rename(&index_tmp, &index_path)
            .await
            .context("Failed to commit index file (atomic rename)")?;

        let fingerprint_tmp = fingerprint_path.with_extension("fingerprint.tmp");
        tokio::fs::write(&fingerprint_tmp, fingerprint)
            .await
            .context("Failed to write fingerprint to temporary file")?;
        tokio::fs::rename(&fingerprint_tmp, &fingerprint_path)
            .await
            .context("Failed to commit fingerprint sidecar (atomic rename)")?;

        tracing::debug!(
            "Persisted index ({} vectors) and fingerprint to {:?}",
            index.len(),
            self.data_dir
        );
        Ok(())
    }
}
