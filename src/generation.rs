//! Generation capability client
//!
//! Sends the retrieved context and the user's question to the Ollama
//! generate endpoint and returns the answer text. Non-streaming, with one
//! long fixed timeout: local inference is slow and there is no mid-flight
//! cancellation once a request is issued.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::discovery::ModelHandle;
use crate::retriever::ScoredPassage;

/// Answer text produced by the generation backend.
#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub answer: String,
}

/// (context, question) → answer. The seam lets the pipeline be exercised
/// without a live backend.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, context: &[ScoredPassage], question: &str) -> Result<GeneratedAnswer>;
}

#[derive(Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Deserialize, Debug)]
struct OllamaGenerateResponse {
    response: String,
}

/// Generation service backed by the Ollama API.
pub struct OllamaGenerator {
    client: reqwest::Client,
    ollama_url: String,
    model: ModelHandle,
    max_tokens: u32,
    temperature: f32,
}

impl OllamaGenerator {
    pub fn new(config: &Config, model: ModelHandle) -> Result<Self> {
        // Connection pooling tuned for repeated requests to one local host
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(300)))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(config.generation_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        tracing::info!("Generation model: {}", model);

        Ok(Self {
            client,
            ollama_url: config.ollama_url.trim_end_matches('/').to_string(),
            model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }
}

/// Assemble the prompt from numbered context passages and the question.
fn build_prompt(context: &[ScoredPassage], question: &str) -> String {
    let mut prompt = String::from(
        "Answer the question using the numbered context passages. \
         If the context does not contain the answer, say so.\n\nContext:\n",
    );
    for (i, passage) in context.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n", i + 1, passage.text));
    }
    prompt.push_str(&format!("\nQuestion: {question}\nAnswer:"));
    prompt
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, context: &[ScoredPassage], question: &str) -> Result<GeneratedAnswer> {
        let request = OllamaGenerateRequest {
            model: self.model.name().to_string(),
            prompt: build_prompt(context, question),
            stream: false,
            options: Some(OllamaOptions {
                temperature: Some(self.temperature),
                num_predict: Some(self.max_tokens as i32),
            }),
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.ollama_url))
            .json(&request)
            .send()
            .await
            .context("Generation request failed")?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Ollama generate API error: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            ));
        }

        let body: OllamaGenerateResponse = response
            .json()
            .await
            .context("Invalid generate response body")?;

        Ok(GeneratedAnswer {
            answer: body.response.trim().to_string(),
        })
    }
}
