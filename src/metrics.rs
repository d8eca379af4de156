//! In-memory service metrics
//!
//! Thread-safe counters for query volume, failures, and latency. All
//! mutations happen under one lock, deliberately independent of the
//! retriever's lock so recording never contends with retrieval. Counters
//! are monotonic for the process lifetime; nothing is persisted.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

#[derive(Debug, Default)]
struct MetricsState {
    query_count: u64,
    error_count: u64,
    cumulative_latency: f64,
}

/// Point-in-time view of the counters with derived rates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub errors: u64,
    pub avg_latency_seconds: f64,
    pub success_rate: f64,
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    state: Mutex<MetricsState>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed service attempt. Latency and total always
    /// accumulate; the error counter only moves on failure. Queries
    /// rejected at validation never reach this.
    pub fn record_query(&self, latency_seconds: f64, success: bool) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.query_count += 1;
        state.cumulative_latency += latency_seconds;
        if !success {
            state.error_count += 1;
        }
    }

    /// Snapshot of totals and derived rates. With no queries yet, average
    /// latency is 0 and success rate is 100 (no evidence of failure).
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let (avg_latency_seconds, success_rate) = if state.query_count == 0 {
            (0.0, 100.0)
        } else {
            let total = state.query_count as f64;
            (
                state.cumulative_latency / total,
                (total - state.error_count as f64) / total * 100.0,
            )
        };

        MetricsSnapshot {
            total: state.query_count,
            errors: state.error_count,
            avg_latency_seconds,
            success_rate,
        }
    }
}
