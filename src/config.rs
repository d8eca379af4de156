//! Configuration loading for the query service
//!
//! Centralizes environment variable reading into a single struct built once
//! at startup. Nothing here is consulted per-request.

/// Maximum characters kept per corpus passage at load time.
pub const DEFAULT_MAX_CHARS: usize = 6000;

/// Default number of passages retrieved per query.
pub const DEFAULT_TOP_K: usize = 5;

/// Default generation token budget per answer.
pub const DEFAULT_MAX_TOKENS: u32 = 450;

/// Default generation sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Upper bound on accepted question length (characters).
pub const DEFAULT_MAX_QUESTION_CHARS: usize = 2000;

/// How many times backend discovery polls before giving up.
pub const DEFAULT_DISCOVERY_ATTEMPTS: u32 = 20;

/// Fixed delay between discovery attempts (seconds).
pub const DEFAULT_DISCOVERY_DELAY_SECS: u64 = 5;

/// Generation request timeout. Local inference is slow; be generous.
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 300;

/// Service configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the JSONL passage corpus
    pub corpus_path: String,

    /// Directory holding the persisted index artifact and fingerprint
    pub data_dir: String,

    /// Ollama server URL
    pub ollama_url: String,

    /// Embedding model name
    pub embedding_model: String,

    /// Explicit generation model override; skips discovery polling when set
    pub model_override: Option<String>,

    /// Default number of passages retrieved per query
    pub top_k: usize,

    /// Maximum characters kept per passage at corpus load
    pub max_chars: usize,

    /// Maximum accepted question length in characters
    pub max_question_chars: usize,

    /// Generation token budget
    pub max_tokens: u32,

    /// Generation sampling temperature
    pub temperature: f32,

    /// Generation request timeout (seconds)
    pub generation_timeout_secs: u64,

    /// Backend discovery attempt budget
    pub discovery_attempts: u32,

    /// Delay between discovery attempts (seconds)
    pub discovery_delay_secs: u64,

    /// HTTP bind address for the serving surface
    pub http_bind: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            corpus_path: std::env::var("CORPUS_PATH")
                .unwrap_or_else(|_| "./data/corpus.jsonl".to_string()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            ollama_url: std::env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            embedding_model: std::env::var("OLLAMA_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "nomic-embed-text".to_string()),
            model_override: std::env::var("OLLAMA_MODEL").ok().filter(|m| !m.is_empty()),
            top_k: std::env::var("RETRIEVER_K")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TOP_K),
            max_chars: std::env::var("MAX_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_CHARS),
            max_question_chars: std::env::var("MAX_QUESTION_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_QUESTION_CHARS),
            max_tokens: std::env::var("MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: std::env::var("TEMPERATURE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TEMPERATURE),
            generation_timeout_secs: std::env::var("GENERATION_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_GENERATION_TIMEOUT_SECS),
            discovery_attempts: std::env::var("DISCOVERY_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DISCOVERY_ATTEMPTS),
            discovery_delay_secs: std::env::var("DISCOVERY_DELAY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DISCOVERY_DELAY_SECS),
            http_bind: std::env::var("HTTP_BIND")
                .unwrap_or_else(|_| "127.0.0.1:3050".to_string()),
        }
    }

    /// Build a summary string for startup logging
    pub fn summary(&self) -> String {
        format!(
            "CORPUS={}  DATA_DIR={}  OLLAMA={}  K={}",
            self.corpus_path, self.data_dir, self.ollama_url, self.top_k
        )
    }
}
