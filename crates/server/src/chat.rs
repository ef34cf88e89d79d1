//! Chat front-end HTTP surface: intake, polling, SSE streaming, and the
//! result callback the gateway posts to.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::state::{ChatState, RequestStatus, StreamEvent};

#[derive(Debug, Deserialize)]
struct QueryRequest {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ResultRequest {
    text: String,
    request_id: String,
    #[serde(rename = "type", default = "default_result_kind")]
    kind: i32,
}

fn default_result_kind() -> i32 {
    -1
}

pub fn build_router(state: ChatState) -> Router {
    Router::new()
        .route("/api/query", post(submit_query))
        .route("/api/get_status/{request_id}", get(get_status))
        .route("/api/stream_result/{request_id}", get(stream_result))
        .route("/api/result", post(handle_result))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Accept a query, mint a request id, forward to the gateway off the
/// request path.
async fn submit_query(State(state): State<ChatState>, Json(query): Json<QueryRequest>) -> Json<Value> {
    let request_id = Uuid::new_v4().to_string();
    state.create_request(&request_id, &query.text).await;

    let forward_state = state.clone();
    let forward_id = request_id.clone();
    tokio::spawn(async move {
        let payload = json!({ "text": query.text, "request_id": forward_id });
        let sent = forward_state
            .client
            .post(&forward_state.gateway_url)
            .json(&payload)
            .send()
            .await;
        match sent {
            Ok(response) if response.status().is_success() => {
                info!(request_id = %forward_id, "query forwarded to gateway");
            }
            Ok(response) => {
                error!(request_id = %forward_id, status = %response.status(), "gateway rejected query");
                forward_state.mark_failed(&forward_id).await;
            }
            Err(e) => {
                error!(request_id = %forward_id, error = %e, "failed to reach gateway");
                forward_state.mark_failed(&forward_id).await;
            }
        }
    });

    Json(json!({ "request_id": request_id, "status": "pending" }))
}

async fn get_status(
    State(state): State<ChatState>,
    Path(request_id): Path<String>,
) -> Json<Value> {
    match state.status_of(&request_id).await {
        Some((status, text)) => Json(json!({ "status": status, "text": text })),
        None => Json(json!({ "status": "failed", "text": Value::Null })),
    }
}

/// Server-Sent Events: one snapshot of what has accumulated, then live
/// increments until the request finishes.
async fn stream_result(
    State(state): State<ChatState>,
    Path(request_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.subscribe(&request_id).await;

    let stream = async_stream_events(subscription);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Snapshot first, then live increments; the stream ends after the first
/// terminal (done/failed) event. An unknown request id yields a single
/// failed event.
fn async_stream_events(
    subscription: Option<(StreamEvent, tokio::sync::broadcast::Receiver<StreamEvent>)>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let (snapshot, live) = match subscription {
        Some((snapshot, rx)) => (snapshot, Some(rx)),
        None => (
            StreamEvent {
                text: String::new(),
                status: RequestStatus::Failed,
            },
            None,
        ),
    };

    let snapshot_terminal = snapshot.status != RequestStatus::Pending;
    let head = futures::stream::iter([to_sse_event(snapshot)]);

    let tail: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> =
        match live {
            Some(rx) if !snapshot_terminal => {
                let events = BroadcastStream::new(rx)
                    .filter_map(|item| futures::future::ready(item.ok()))
                    .scan(false, |done, event| {
                        let emit = if *done {
                            None
                        } else {
                            if event.status != RequestStatus::Pending {
                                *done = true;
                            }
                            Some(event)
                        };
                        futures::future::ready(emit)
                    })
                    .map(to_sse_event);
                Box::pin(events)
            }
            _ => Box::pin(futures::stream::empty()),
        };

    head.chain(tail)
}

fn to_sse_event(event: StreamEvent) -> Result<Event, Infallible> {
    let payload = json!({ "text": event.text, "status": event.status });
    Ok(Event::default().data(payload.to_string()))
}

/// The gateway's callback: `type == -1` finalizes, `type >= 0` appends.
async fn handle_result(
    State(state): State<ChatState>,
    Json(result): Json<ResultRequest>,
) -> Json<Value> {
    if state
        .apply_result(&result.request_id, &result.text, result.kind)
        .await
    {
        info!(request_id = %result.request_id, kind = result.kind, "result stored");
        Json(json!({ "status": "delivered" }))
    } else {
        warn!(request_id = %result.request_id, "result for unknown request");
        Json(json!({ "status": "unknown_request" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn test_state() -> ChatState {
        // Unroutable gateway: forwarding fails in the background, which the
        // intake path deliberately does not wait for.
        ChatState::new("http://127.0.0.1:1/submit".into())
    }

    #[tokio::test]
    async fn query_returns_pending_with_request_id() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                axum::http::Request::post("/api/query")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(r#"{"text":"What is 2+2?"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["status"], "pending");
        assert!(Uuid::parse_str(body["request_id"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn status_unknown_request_is_failed() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                axum::http::Request::get("/api/get_status/nope")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], "failed");
    }

    #[tokio::test]
    async fn result_callback_roundtrip() {
        let state = test_state();
        state.create_request("r1", "question").await;
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(
                axum::http::Request::post("/api/result")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(
                        r#"{"text":"Four.","request_id":"r1","type":-1}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["status"], "delivered");

        let response = app
            .oneshot(
                axum::http::Request::get("/api/get_status/r1")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], "done");
        assert_eq!(body["text"], "Four.");
    }

    #[tokio::test]
    async fn result_for_unknown_request() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                axum::http::Request::post("/api/result")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(
                        r#"{"text":"x","request_id":"ghost","type":-1}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["status"], "unknown_request");
    }
}
