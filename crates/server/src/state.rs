//! Chat server state: one entry per submitted request, with a broadcast
//! channel feeding any attached SSE streams.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

/// Capacity of each request's stream fan-out.
const STREAM_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Done,
    Failed,
}

/// One incremental payload pushed to SSE subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    pub text: String,
    pub status: RequestStatus,
}

#[derive(Debug)]
pub struct RequestEntry {
    /// The original query text.
    pub text: String,
    pub status: RequestStatus,
    /// Accumulated result text.
    pub result: String,
    pub stream: broadcast::Sender<StreamEvent>,
}

impl RequestEntry {
    fn new(text: String) -> Self {
        let (stream, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            text,
            status: RequestStatus::Pending,
            result: String::new(),
            stream,
        }
    }
}

#[derive(Clone)]
pub struct ChatState {
    requests: Arc<Mutex<HashMap<String, RequestEntry>>>,
    pub client: reqwest::Client,
    /// Where user queries are forwarded (the gateway's /submit).
    pub gateway_url: String,
}

impl ChatState {
    pub fn new(gateway_url: String) -> Self {
        Self {
            requests: Arc::new(Mutex::new(HashMap::new())),
            client: reqwest::Client::new(),
            gateway_url,
        }
    }

    pub async fn create_request(&self, request_id: &str, text: &str) {
        self.requests
            .lock()
            .await
            .insert(request_id.to_string(), RequestEntry::new(text.to_string()));
    }

    pub async fn mark_failed(&self, request_id: &str) {
        let mut requests = self.requests.lock().await;
        if let Some(entry) = requests.get_mut(request_id) {
            entry.status = RequestStatus::Failed;
            let _ = entry.stream.send(StreamEvent {
                text: entry.result.clone(),
                status: RequestStatus::Failed,
            });
        }
    }

    /// Apply a result callback. `kind == -1` finalizes; `kind >= 0`
    /// appends, more to follow. Unknown ids are reported to the caller.
    pub async fn apply_result(&self, request_id: &str, text: &str, kind: i32) -> bool {
        let mut requests = self.requests.lock().await;
        let Some(entry) = requests.get_mut(request_id) else {
            return false;
        };
        entry.result.push_str(text);
        if kind == -1 {
            entry.status = RequestStatus::Done;
        }
        let _ = entry.stream.send(StreamEvent {
            text: text.to_string(),
            status: entry.status,
        });
        true
    }

    pub async fn status_of(&self, request_id: &str) -> Option<(RequestStatus, Option<String>)> {
        let requests = self.requests.lock().await;
        requests.get(request_id).map(|entry| {
            let text = (!entry.result.is_empty()).then(|| entry.result.clone());
            (entry.status, text)
        })
    }

    /// Subscribe to a request's stream; the snapshot event replays what has
    /// already accumulated.
    pub async fn subscribe(
        &self,
        request_id: &str,
    ) -> Option<(StreamEvent, broadcast::Receiver<StreamEvent>)> {
        let requests = self.requests.lock().await;
        requests.get(request_id).map(|entry| {
            let snapshot = StreamEvent {
                text: entry.result.clone(),
                status: entry.status,
            };
            (snapshot, entry.stream.subscribe())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_finalize() {
        let state = ChatState::new("http://unused/submit".into());
        state.create_request("r1", "q").await;

        assert!(state.apply_result("r1", "part one, ", 1).await);
        let (status, text) = state.status_of("r1").await.unwrap();
        assert_eq!(status, RequestStatus::Pending);
        assert_eq!(text.as_deref(), Some("part one, "));

        assert!(state.apply_result("r1", "done.", -1).await);
        let (status, text) = state.status_of("r1").await.unwrap();
        assert_eq!(status, RequestStatus::Done);
        assert_eq!(text.as_deref(), Some("part one, done."));
    }

    #[tokio::test]
    async fn unknown_request_result_is_rejected() {
        let state = ChatState::new("http://unused/submit".into());
        assert!(!state.apply_result("ghost", "text", -1).await);
        assert!(state.status_of("ghost").await.is_none());
    }

    #[tokio::test]
    async fn stream_replays_snapshot_then_live_events() {
        let state = ChatState::new("http://unused/submit".into());
        state.create_request("r2", "q").await;
        state.apply_result("r2", "early ", 1).await;

        let (snapshot, mut rx) = state.subscribe("r2").await.unwrap();
        assert_eq!(snapshot.text, "early ");
        assert_eq!(snapshot.status, RequestStatus::Pending);

        state.apply_result("r2", "late", -1).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.text, "late");
        assert_eq!(event.status, RequestStatus::Done);
    }
}
