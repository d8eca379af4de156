//! Corpus loading and content fingerprinting
//!
//! The corpus is a line-delimited JSON file, one passage record per line.
//! It is loaded once at startup and treated as immutable for the process
//! lifetime; passage order defines the positional id space of the vector
//! index. A SHA-256 digest of the file's raw bytes is the change-detection
//! fingerprint used by the index manager.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::StartupError;

/// One corpus record as it appears on disk.
#[derive(Debug, Deserialize)]
struct PassageRecord {
    text: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    chunk_index: Option<usize>,
    #[serde(default)]
    total_chunks: Option<usize>,
}

/// One unit of retrievable corpus text.
#[derive(Debug, Clone)]
pub struct Passage {
    pub text: String,
    pub source: Option<String>,
    pub chunk_index: Option<usize>,
    pub total_chunks: Option<usize>,
}

/// The full passage corpus, ordered as on disk.
#[derive(Debug)]
pub struct Corpus {
    passages: Vec<Passage>,
}

impl Corpus {
    /// Load the corpus from a JSONL file, truncating each passage's text
    /// to `max_chars` characters. Any unreadable file or unparseable line
    /// is a startup-fatal error.
    pub fn load(path: &Path, max_chars: usize) -> Result<Self, StartupError> {
        let raw = std::fs::read_to_string(path).map_err(|source| StartupError::CorpusUnreadable {
            path: path.display().to_string(),
            source,
        })?;

        let mut passages = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: PassageRecord =
                serde_json::from_str(line).map_err(|source| StartupError::CorpusParse {
                    path: path.display().to_string(),
                    line: line_no + 1,
                    source,
                })?;
            passages.push(Passage {
                text: truncate_chars(record.text, max_chars),
                source: record.source,
                chunk_index: record.chunk_index,
                total_chunks: record.total_chunks,
            });
        }

        tracing::info!("Loaded {} passages from {}", passages.len(), path.display());
        Ok(Self { passages })
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Passage at a positional index, or None for out-of-range positions.
    pub fn passage(&self, position: usize) -> Option<&Passage> {
        self.passages.get(position)
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    /// Passage texts in positional order, for bulk embedding.
    pub fn texts(&self) -> Vec<String> {
        self.passages.iter().map(|p| p.text.clone()).collect()
    }
}

/// Compute the corpus fingerprint: hex-encoded SHA-256 of the file's raw
/// bytes. Two corpora with equal fingerprints are treated as identical for
/// indexing purposes.
pub fn compute_fingerprint(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read corpus file at {}", path.display()))?;
    let hash = Sha256::digest(&bytes);
    Ok(format!("{hash:x}"))
}

/// Truncate a string to at most `max_chars` characters without splitting a
/// character. No-op when the text already fits.
fn truncate_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text,
    }
}
