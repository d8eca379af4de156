//! HTTP serving surface
//!
//! Exposes the query pipeline over a small axum router: POST /query for
//! answering, GET /stats for the metrics snapshot, plus liveness and
//! readiness probes. The `ServiceContext` is built once during startup and
//! handed to every handler; nothing is re-initialized mid-run.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::pipeline::QueryPipeline;

/// Everything the serving surface needs, constructed once at startup.
#[derive(Clone)]
pub struct ServiceContext {
    pub pipeline: Arc<QueryPipeline>,
    pub metrics: Arc<MetricsCollector>,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    message: String,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    answer: String,
    succeeded: bool,
}

/// Liveness probe - always returns 200 OK if the process is alive
async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe - the router only exists after startup completed, so
/// reaching this handler means the index and backend are ready
async fn readyz() -> StatusCode {
    StatusCode::OK
}

async fn answer_query(
    State(ctx): State<ServiceContext>,
    Json(request): Json<QueryRequest>,
) -> Json<QueryResponse> {
    let reply = ctx.pipeline.answer_query(&request.message).await;
    Json(QueryResponse {
        answer: reply.text,
        succeeded: reply.succeeded,
    })
}

async fn stats(State(ctx): State<ServiceContext>) -> Json<MetricsSnapshot> {
    Json(ctx.metrics.snapshot())
}

pub fn build_router(ctx: ServiceContext) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/query", post(answer_query))
        .route("/stats", get(stats))
        .with_state(ctx)
}

/// Bind and serve until ctrl-c.
pub async fn serve(bind: &str, ctx: ServiceContext) -> Result<()> {
    let addr: SocketAddr = bind.parse()?;
    let router = build_router(ctx);

    tracing::info!("Serving queries on http://{}", addr);
    tracing::info!("Endpoints: POST /query, GET /stats, /healthz, /readyz");

    let tcp_listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
