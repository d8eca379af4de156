//! Startup error taxonomy
//!
//! Failures before the service accepts traffic are fatal: they are logged
//! with remediation hints and the process exits non-zero. Steady-state
//! per-request failures stay `anyhow::Error` and never reach this enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(
        "cannot read corpus file at {path}: {source}. \
         Point CORPUS_PATH at an existing JSONL corpus or run the corpus \
         preparation tooling first"
    )]
    CorpusUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "corpus line {line} in {path} is not a valid record: {source}. \
         Each line must be a JSON object with a \"text\" field"
    )]
    CorpusParse {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "no generation model available after {attempts} attempts against {url}. \
         Check that Ollama is running and has at least one model pulled \
         (e.g. `ollama pull llama3`), or set OLLAMA_MODEL explicitly"
    )]
    DiscoveryExhausted { url: String, attempts: u32 },
}
