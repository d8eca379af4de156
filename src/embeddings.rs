//! Embedding capability client
//!
//! Talks to the Ollama embedding API and returns L2-normalized vectors.
//! Query embeddings are cached in an LRU since a chat front end repeats
//! questions often. Batch embedding falls back to sequential requests when
//! the model does not support the batch form.

use std::num::NonZeroUsize;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::index::normalize;

const QUERY_CACHE_SIZE: usize = 1000;

// Batches of long passages can take a while on a loaded local instance
const BATCH_TIMEOUT_SECS: u64 = 1200;

/// Text → normalized fixed-dimension vector. The seam lets index building
/// and retrieval be exercised with deterministic embeddings in tests.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Serialize)]
#[serde(untagged)]
enum OllamaEmbeddingRequest<'a> {
    Single { model: &'a str, input: &'a str },
    Batch { model: &'a str, input: &'a [String] },
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
}

/// Embedding service backed by the Ollama API, with LRU query caching.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    ollama_url: String,
    model: String,
    query_cache: RwLock<LruCache<String, Vec<f32>>>,
}

impl OllamaEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        tracing::info!("Embedding model: {}", config.embedding_model);

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(BATCH_TIMEOUT_SECS))
                .build()?,
            ollama_url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.embedding_model.clone(),
            query_cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    async fn fetch_single(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest::Single {
            model: &self.model,
            input: text,
        };
        let response = self
            .client
            .post(format!("{}/api/embed", self.ollama_url))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Ollama embedding API error: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            ));
        }
        let embedding_response: OllamaEmbeddingResponse = response.json().await?;
        let mut embedding = if let Some(embedding) = embedding_response.embedding {
            embedding
        } else if let Some(embeddings) = embedding_response.embeddings {
            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("Empty embeddings array from Ollama"))?
        } else {
            return Err(anyhow::anyhow!("No embedding returned from Ollama"));
        };
        normalize(&mut embedding);
        Ok(embedding)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    /// Embed a single query text, consulting the LRU cache first.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.query_cache.write().await.get(text) {
            return Ok(cached.clone());
        }

        let embedding = self.fetch_single(text).await?;
        self.query_cache
            .write()
            .await
            .put(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    /// Embed a batch of passage texts, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        if texts.len() > 1 {
            let request = OllamaEmbeddingRequest::Batch {
                model: &self.model,
                input: texts,
            };

            let request_future = self
                .client
                .post(format!("{}/api/embed", self.ollama_url))
                .json(&request)
                .send();

            let response = match tokio::time::timeout(
                Duration::from_secs(BATCH_TIMEOUT_SECS),
                request_future,
            )
            .await
            {
                Ok(Ok(resp)) => resp,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(anyhow::anyhow!(
                        "Batch embedding request timed out after {} seconds for {} texts. \
                         The Ollama server may be overloaded.",
                        BATCH_TIMEOUT_SECS,
                        texts.len()
                    ))
                }
            };

            if !response.status().is_success() {
                return Err(anyhow::anyhow!(
                    "Ollama embedding API error: {} - {}",
                    response.status(),
                    response.text().await.unwrap_or_default()
                ));
            }

            let embedding_response: OllamaEmbeddingResponse = response.json().await?;

            if let Some(mut embeddings) = embedding_response.embeddings {
                if embeddings.len() == texts.len() {
                    for embedding in &mut embeddings {
                        normalize(embedding);
                    }
                    return Ok(embeddings);
                }
                tracing::warn!(
                    "Batch embedding returned {} embeddings for {} texts, falling back to sequential",
                    embeddings.len(),
                    texts.len()
                );
            } else if embedding_response.embedding.is_some() {
                tracing::warn!(
                    "Model '{}' doesn't support batch embeddings, falling back to sequential",
                    self.model
                );
            }

            tracing::info!("Processing {} embeddings sequentially", texts.len());
            let mut result = Vec::with_capacity(texts.len());
            for text in texts {
                result.push(self.fetch_single(text).await?);
            }
            return Ok(result);
        }

        Ok(vec![self.fetch_single(&texts[0]).await?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_response_accepts_both_shapes() {
        let single: OllamaEmbeddingResponse =
            serde_json::from_str(r#"{"embedding": [0.1, 0.2]}"#).unwrap();
        assert!(single.embedding.is_some());
        assert!(single.embeddings.is_none());

        let batch: OllamaEmbeddingResponse =
            serde_json::from_str(r#"{"embeddings": [[0.1], [0.2]]}"#).unwrap();
        assert!(batch.embedding.is_none());
        assert_eq!(batch.embeddings.unwrap().len(), 2);
    }

    #[test]
    fn test_request_serialization_shapes() {
        let single = OllamaEmbeddingRequest::Single {
            model: "nomic-embed-text",
            input: "hello",
        };
        let json = serde_json::to_value(&single).unwrap();
        assert_eq!(json["model"], "nomic-embed-text");
        assert_eq!(json["input"], "hello");

        let texts = vec!["a".to_string(), "b".to_string()];
        let batch = OllamaEmbeddingRequest::Batch {
            model: "nomic-embed-text",
            input: &texts,
        };
        let json = serde_json::to_value(&batch).unwrap();
        assert!(json["input"].is_array());
    }
}
