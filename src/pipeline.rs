//! Query-processing pipeline
//!
//! Per-query flow: validate → retrieve → generate → format → record.
//! Rejections at validation are pre-flight and touch neither the latency
//! timer nor the metrics. Any failure during retrieval or generation is
//! contained to the request: full detail is logged server-side, the caller
//! gets a generic message, and the process never crashes. The pipeline is
//! stateless across queries — no conversation memory.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use crate::generation::Generator;
use crate::metrics::MetricsCollector;
use crate::retriever::{Retriever, ScoredPassage};
use crate::validator::QueryValidator;

/// Display length for each passage in the rendered sources block.
pub const SOURCE_DISPLAY_CHARS: usize = 180;

// A whitespace boundary is only used when it keeps at least this fraction
// of the display budget; otherwise truncation is hard.
const BOUNDARY_FLOOR: f64 = 0.8;

const FAILURE_MESSAGE: &str = "Sorry, I couldn't answer that question right now. \
     Try rephrasing it or being more specific, or check the service health \
     if the problem persists.";

/// Final per-query outcome: the text to show the caller and whether the
/// service attempt succeeded.
#[derive(Debug, Clone)]
pub struct QueryReply {
    pub text: String,
    pub succeeded: bool,
}

pub struct QueryPipeline {
    validator: QueryValidator,
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    metrics: Arc<MetricsCollector>,
}

impl QueryPipeline {
    pub fn new(
        validator: QueryValidator,
        retriever: Arc<Retriever>,
        generator: Arc<dyn Generator>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            validator,
            retriever,
            generator,
            metrics,
        }
    }

    /// Answer one query end to end.
    pub async fn answer_query(&self, message: &str) -> QueryReply {
        if let Err(rejection) = self.validator.validate(message) {
            tracing::debug!("Rejected query: {}", rejection);
            return QueryReply {
                text: rejection,
                succeeded: false,
            };
        }

        // The latency timer covers service attempts only, never rejections
        let started = Instant::now();
        match self.run(message).await {
            Ok(text) => {
                self.metrics
                    .record_query(started.elapsed().as_secs_f64(), true);
                QueryReply {
                    text,
                    succeeded: true,
                }
            }
            Err(e) => {
                self.metrics
                    .record_query(started.elapsed().as_secs_f64(), false);
                // Full detail stays server-side; the caller sees a generic
                // message with nothing leaked from the error chain
                tracing::error!("Query processing failed: {e:#}");
                QueryReply {
                    text: FAILURE_MESSAGE.to_string(),
                    succeeded: false,
                }
            }
        }
    }

    async fn run(&self, question: &str) -> Result<String> {
        let retrieved = self.retriever.search_one(question, None).await?;
        let generated = self
            .generator
            .generate(&retrieved.passages, question)
            .await?;
        Ok(format_answer(&generated.answer, &retrieved.passages))
    }
}

/// Append a human-readable rendering of the retrieved sources to the answer.
fn format_answer(answer: &str, passages: &[ScoredPassage]) -> String {
    if passages.is_empty() {
        return answer.to_string();
    }

    let sources = passages
        .iter()
        .map(|p| format!("- {}", truncate_display(&p.text, SOURCE_DISPLAY_CHARS)))
        .collect::<Vec<_>>()
        .join("\n");

    format!("{answer}\n\n**Retrieved contexts** (top matches):\n{sources}")
}

/// Truncate text to a display length without breaking mid-word: cut at the
/// last whitespace boundary within the limit if that boundary is not
/// unreasonably far back, else cut hard at the limit.
fn truncate_display(text: &str, limit: usize) -> String {
    let mut chars = text.char_indices();
    let cut_byte = match chars.nth(limit) {
        Some((byte_idx, _)) => byte_idx,
        None => return text.to_string(),
    };

    let head = &text[..cut_byte];
    let floor = (limit as f64 * BOUNDARY_FLOOR) as usize;

    let word_safe = head
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .map(|(byte_idx, _)| byte_idx)
        .next_back()
        .filter(|&byte_idx| head[..byte_idx].chars().count() >= floor);

    let cut = match word_safe {
        Some(byte_idx) => head[..byte_idx].trim_end(),
        None => head,
    };
    format!("{cut}...")
}
