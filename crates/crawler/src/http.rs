//! Crawler admin surface: seed the queue, inspect it, clear it.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use inquest_ledger::{crawl, CrawlingLedger};

#[derive(Clone)]
pub struct AdminState {
    pub ledger: CrawlingLedger,
}

#[derive(Debug, Deserialize)]
struct CrawlRequest {
    urls: Vec<String>,
}

pub fn build_router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/crawl", post(crawl_endpoint))
        .route("/clear-queue", post(clear_queue))
        .route("/queue-size", get(queue_size))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Accept seed URLs and enqueue them; returns immediately.
async fn crawl_endpoint(
    State(state): State<Arc<AdminState>>,
    Json(request): Json<CrawlRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    if request.urls.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No URLs provided.".to_string()));
    }

    let normalized: Vec<String> = request
        .urls
        .iter()
        .map(|u| crawl::normalize_url(u))
        .filter(|u| !u.is_empty())
        .collect();

    // Seeds count as discovered; the seen set keeps later link discovery
    // from re-admitting them.
    for url in &normalized {
        if let Err(e) = state.ledger.mark_seen(url).await {
            error!(url, error = %e, "failed to mark seed as seen");
        }
    }

    match state.ledger.enqueue_urls(&normalized).await {
        Ok(len) => {
            info!(count = normalized.len(), "seed URLs queued");
            Ok(Json(json!({ "status": "queued", "count": len })))
        }
        Err(e) => {
            error!(error = %e, "failed to queue URLs");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn clear_queue(
    State(state): State<Arc<AdminState>>,
) -> Result<Json<Value>, (StatusCode, String)> {
    state
        .ledger
        .clear_queue()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({ "status": "cleared" })))
}

async fn queue_size(
    State(state): State<Arc<AdminState>>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let size = state
        .ledger
        .queue_len()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({ "size": size })))
}
