//! Thread-safe retrieval facade
//!
//! Turns a query string into an ordered list of scored passages by embedding
//! the query and running a top-k search against the vector index. The
//! embedding call and the index search share capability state that is not
//! documented as safe for concurrent reentry, so the pair is treated as one
//! critical section: at most one embed+search unit is in flight at a time,
//! guarded by a mutex owned by this instance. A deliberate
//! correctness-over-throughput trade-off.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::corpus::Corpus;
use crate::embeddings::Embedder;
use crate::index::VectorIndex;

/// One retrieved passage with its similarity score and corpus position.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScoredPassage {
    pub position: usize,
    pub score: f32,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Ordered retrieval output: descending similarity, at most k passages,
/// never more than the corpus holds.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub passages: Vec<ScoredPassage>,
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: VectorIndex,
    corpus: Arc<Corpus>,
    default_k: usize,
    search_lock: Mutex<()>,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: VectorIndex,
        corpus: Arc<Corpus>,
        default_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            corpus,
            default_k: default_k.max(1),
            search_lock: Mutex::new(()),
        }
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    pub fn corpus_size(&self) -> usize {
        self.corpus.len()
    }

    /// Retrieve the top-k passages for a single query. `None` uses the
    /// configured default k; k beyond the corpus size yields fewer results
    /// rather than erroring.
    pub async fn search_one(&self, query: &str, k: Option<usize>) -> Result<RetrievalResult> {
        let k = k.unwrap_or(self.default_k);
        let _guard = self.search_lock.lock().await;
        self.embed_and_search(query, k).await
    }

    /// Retrieve top-k passages for each query in order. The whole batch runs
    /// inside one critical section so its embed+search units cannot
    /// interleave with other callers.
    pub async fn search_many(
        &self,
        queries: &[String],
        k: Option<usize>,
    ) -> Result<Vec<RetrievalResult>> {
        let k = k.unwrap_or(self.default_k);
        let _guard = self.search_lock.lock().await;

        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            results.push(self.embed_and_search(query, k).await?);
        }
        Ok(results)
    }

    // Callers must hold `search_lock`.
    async fn embed_and_search(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        tracing::debug!("Retrieving top-{} for: '{}'", k, query);

        let query_embedding = self.embedder.embed(query).await?;
        let hits = self.index.search(&query_embedding, k);

        // Positions the index cannot back with a real passage are sentinel
        // absent-result markers and are dropped
        let passages: Vec<ScoredPassage> = hits
            .into_iter()
            .filter_map(|(position, score)| {
                self.corpus.passage(position).map(|p| ScoredPassage {
                    position,
                    score,
                    text: p.text.clone(),
                    source: p.source.clone(),
                })
            })
            .collect();

        Ok(RetrievalResult { passages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Corpus;
    use async_trait::async_trait;
    use std::io::Write;

    /// Deterministic keyword embedder over a 3-dim space: each axis belongs
    /// to one topic keyword. Yields between embed and result assembly so a
    /// missing lock would let concurrent calls interleave.
    struct KeywordEmbedder;

    impl KeywordEmbedder {
        fn vector_for(text: &str) -> Vec<f32> {
            let lower = text.to_lowercase();
            let mut v = vec![0.01, 0.01, 0.01];
            if lower.contains("ram") || lower.contains("memory") {
                v[0] = 1.0;
            }
            if lower.contains("faiss") || lower.contains("vector") {
                v[1] = 1.0;
            }
            if lower.contains("ollama") || lower.contains("model") {
                v[2] = 1.0;
            }
            crate::index::normalize(&mut v);
            v
        }
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            tokio::task::yield_now().await;
            Ok(Self::vector_for(text))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }
    }

    fn tech_corpus() -> Corpus {
        let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        writeln!(file, r#"{{"text": "RAM is volatile memory."}}"#).unwrap();
        writeln!(file, r#"{{"text": "FAISS performs vector search."}}"#).unwrap();
        writeln!(file, r#"{{"text": "Ollama serves local models."}}"#).unwrap();
        file.flush().unwrap();
        Corpus::load(file.path(), 6000).expect("Corpus should load")
    }

    async fn build_retriever(default_k: usize) -> Retriever {
        let corpus = Arc::new(tech_corpus());
        let embedder: Arc<dyn Embedder> = Arc::new(KeywordEmbedder);

        let mut index = VectorIndex::new(3);
        for passage in corpus.passages() {
            index
                .add(KeywordEmbedder::vector_for(&passage.text))
                .unwrap();
        }

        Retriever::new(embedder, index, corpus, default_k)
    }

    #[tokio::test]
    async fn test_faiss_query_retrieves_faiss_passage() {
        let retriever = build_retriever(5).await;

        let result = retriever
            .search_one("what is FAISS", Some(1))
            .await
            .expect("Search should succeed");

        assert_eq!(result.passages.len(), 1);
        assert_eq!(result.passages[0].text, "FAISS performs vector search.");
        assert_eq!(result.passages[0].position, 1);
    }

    #[tokio::test]
    async fn test_results_are_ordered_and_bounded_by_k() {
        let retriever = build_retriever(5).await;

        let result = retriever
            .search_one("how much memory does a model need", Some(2))
            .await
            .unwrap();

        assert!(result.passages.len() <= 2);
        for pair in result.passages.windows(2) {
            assert!(
                pair[0].score >= pair[1].score,
                "Scores must be non-increasing"
            );
        }
    }

    #[tokio::test]
    async fn test_k_beyond_corpus_size_returns_everything() {
        let retriever = build_retriever(5).await;

        let result = retriever.search_one("vector memory model", Some(50)).await.unwrap();
        assert_eq!(
            result.passages.len(),
            retriever.corpus_size(),
            "Over-large k yields the whole corpus, not an error"
        );
    }

    #[tokio::test]
    async fn test_default_k_applies_when_unspecified() {
        let retriever = build_retriever(2).await;

        let result = retriever.search_one("vector memory model", None).await.unwrap();
        assert_eq!(result.passages.len(), 2);
    }

    #[tokio::test]
    async fn test_search_many_returns_one_result_per_query() {
        let retriever = build_retriever(5).await;

        let queries = vec![
            "what is FAISS".to_string(),
            "what is RAM".to_string(),
        ];
        let results = retriever.search_many(&queries, Some(1)).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].passages[0].text, "FAISS performs vector search.");
        assert_eq!(results[1].passages[0].text, "RAM is volatile memory.");
    }

    #[tokio::test]
    async fn test_concurrent_searches_stay_correct() {
        // M concurrent callers against one retriever: every call must get a
        // valid top-1 for its own query, proving embed+search units never
        // interleave across requests
        let retriever = Arc::new(build_retriever(5).await);

        let cases = [
            ("what is FAISS", "FAISS performs vector search."),
            ("tell me about RAM", "RAM is volatile memory."),
            ("what does Ollama do", "Ollama serves local models."),
        ];

        let mut handles = Vec::new();
        for round in 0..10 {
            let (query, expected) = cases[round % cases.len()];
            let retriever = retriever.clone();
            handles.push(tokio::spawn(async move {
                let result = retriever.search_one(query, Some(1)).await.unwrap();
                (expected, result)
            }));
        }

        for handle in handles {
            let (expected, result) = handle.await.expect("Task must not panic");
            assert_eq!(result.passages.len(), 1);
            assert_eq!(result.passages[0].text, expected);
        }
    }
}
