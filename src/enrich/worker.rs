//! Isolated execution context for AI work.
//!
//! Requests travel to a dedicated task as `{id, action, payload}` messages and
//! come back as `{id, result}` or `{id, error}`. Each request id is drawn from
//! a monotonic counter and owns a slot in the [`PendingTable`] until its reply
//! arrives or its timeout fires; either way the slot is released. Replies with
//! no matching slot are dropped.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use super::{execute, EnrichError};
use crate::ai::AiCapabilities;
use crate::cards::types::Card;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", content = "payload", rename_all = "camelCase")]
pub enum WorkerAction {
    Embed { text: String },
    SummarizeCard { card: Box<Card> },
    GenerateIllustration { prompt: String },
}

impl WorkerAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Embed { .. } => "embed",
            Self::SummarizeCard { .. } => "summarizeCard",
            Self::GenerateIllustration { .. } => "generateIllustration",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerRequest {
    pub id: u64,
    #[serde(flatten)]
    pub action: WorkerAction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WorkerReply {
    Vector(Vec<f32>),
    Text(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerResponse {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<WorkerReply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResponse {
    pub fn ok(id: u64, reply: WorkerReply) -> Self {
        Self {
            id,
            result: Some(reply),
            error: None,
        }
    }

    pub fn err(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn into_result(self) -> Result<WorkerReply, EnrichError> {
        match (self.result, self.error) {
            (Some(reply), None) => Ok(reply),
            (_, Some(message)) => Err(EnrichError::Failed(message)),
            (None, None) => Err(EnrichError::Failed("empty worker response".into())),
        }
    }
}

/// In-flight requests keyed by correlation id.
#[derive(Debug, Default)]
pub struct PendingTable {
    slots: Mutex<HashMap<u64, oneshot::Sender<WorkerResponse>>>,
}

impl PendingTable {
    fn register(&self, id: u64) -> Result<oneshot::Receiver<WorkerResponse>, EnrichError> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock().map_err(|_| EnrichError::Unavailable)?;
        slots.insert(id, tx);
        Ok(rx)
    }

    fn release(&self, id: u64) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.remove(&id);
        }
    }

    /// Hand a response to its waiting request. Returns `false` when no request
    /// is waiting for that id, in which case the response is dropped.
    pub fn resolve(&self, response: WorkerResponse) -> bool {
        let sender = match self.slots.lock() {
            Ok(mut slots) => slots.remove(&response.id),
            Err(_) => None,
        };
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                tracing::debug!(request_id = response.id, "dropping unmatched worker response");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map_or(0, |slots| slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Client side of the worker context.
pub struct WorkerHandle {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    pending: Arc<PendingTable>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl WorkerHandle {
    /// Start the context on the current Tokio runtime. `None` outside a runtime.
    pub fn spawn(ai: AiCapabilities, timeout: Duration) -> Option<Self> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(PendingTable::default());

        runtime.spawn(run_context(ai, req_rx, resp_tx, timeout));
        runtime.spawn(route_responses(resp_rx, Arc::clone(&pending)));
        tracing::debug!(timeout_ms = timeout.as_millis() as u64, "enrichment worker started");

        Some(Self {
            requests: req_tx,
            pending,
            next_id: AtomicU64::new(1),
            timeout,
        })
    }

    /// Send one action and wait for its correlated reply, bounded by the timeout.
    pub async fn request(&self, action: WorkerAction) -> Result<WorkerReply, EnrichError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.pending.register(id)?;
        let action_name = action.name();
        if self.requests.send(WorkerRequest { id, action }).is_err() {
            self.pending.release(id);
            return Err(EnrichError::Unavailable);
        }
        tracing::debug!(request_id = id, action = action_name, "worker request sent");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(EnrichError::Unavailable),
            Err(_) => {
                self.pending.release(id);
                tracing::warn!(request_id = id, action = action_name, "worker request timed out");
                Err(EnrichError::Timeout(self.timeout))
            }
        }
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }
}

/// Serve requests concurrently; each request runs as its own task so a slow
/// capability never delays unrelated replies. A call that outlives `timeout`
/// is dropped and answered with an error.
async fn run_context(
    ai: AiCapabilities,
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    responses: mpsc::UnboundedSender<WorkerResponse>,
    timeout: Duration,
) {
    while let Some(request) = requests.recv().await {
        let ai = ai.clone();
        let responses = responses.clone();
        tokio::spawn(async move {
            let response = match tokio::time::timeout(timeout, execute(&ai, request.action)).await {
                Ok(Ok(reply)) => WorkerResponse::ok(request.id, reply),
                Ok(Err(e)) => WorkerResponse::err(request.id, e.to_string()),
                Err(_) => {
                    tracing::warn!(request_id = request.id, "capability call abandoned after timeout");
                    WorkerResponse::err(request.id, EnrichError::Timeout(timeout).to_string())
                }
            };
            let _ = responses.send(response);
        });
    }
    tracing::debug!("enrichment worker stopped");
}

async fn route_responses(
    mut responses: mpsc::UnboundedReceiver<WorkerResponse>,
    pending: Arc<PendingTable>,
) {
    while let Some(response) = responses.recv().await {
        pending.resolve(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::Embedder;
    use async_trait::async_trait;

    struct SlowEmbedder(Duration);

    /// Embedder that never answers and records whether its future was dropped.
    struct HungEmbedder {
        dropped: Arc<std::sync::atomic::AtomicBool>,
    }

    struct SetOnDrop(Arc<std::sync::atomic::AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Embedder for HungEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            let _guard = SetOnDrop(Arc::clone(&self.dropped));
            std::future::pending::<()>().await;
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl Embedder for SlowEmbedder {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            tokio::time::sleep(self.0).await;
            Ok(vec![text.len() as f32])
        }
    }

    fn caps(delay: Duration) -> AiCapabilities {
        AiCapabilities::none().with_embedder(Arc::new(SlowEmbedder(delay)))
    }

    #[test]
    fn wire_format_matches_protocol() {
        let request = WorkerRequest {
            id: 7,
            action: WorkerAction::Embed { text: "hi".into() },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 7, "action": "embed", "payload": {"text": "hi"}})
        );

        let ok = serde_json::to_value(WorkerResponse::ok(7, WorkerReply::Text("s".into()))).unwrap();
        assert_eq!(ok, serde_json::json!({"id": 7, "result": "s"}));
        let err = serde_json::to_value(WorkerResponse::err(8, "boom")).unwrap();
        assert_eq!(err, serde_json::json!({"id": 8, "error": "boom"}));
    }

    #[test]
    fn unmatched_responses_are_dropped() {
        let table = PendingTable::default();
        assert!(!table.resolve(WorkerResponse::ok(42, WorkerReply::Text("late".into()))));
        assert!(table.is_empty());
    }

    #[test]
    fn spawn_requires_a_runtime() {
        assert!(WorkerHandle::spawn(AiCapabilities::none(), Duration::from_secs(1)).is_none());
    }

    #[tokio::test]
    async fn concurrent_requests_are_correlated() {
        let worker = WorkerHandle::spawn(caps(Duration::from_millis(5)), Duration::from_secs(5)).unwrap();
        let (a, b) = tokio::join!(
            worker.request(WorkerAction::Embed { text: "a".into() }),
            worker.request(WorkerAction::Embed { text: "three".into() }),
        );
        assert_eq!(a.unwrap(), WorkerReply::Vector(vec![1.0]));
        assert_eq!(b.unwrap(), WorkerReply::Vector(vec![5.0]));
        assert!(worker.pending().is_empty());
    }

    #[tokio::test]
    async fn timeout_releases_the_slot() {
        let worker =
            WorkerHandle::spawn(caps(Duration::from_millis(500)), Duration::from_millis(20)).unwrap();
        let err = worker
            .request(WorkerAction::Embed { text: "x".into() })
            .await
            .unwrap_err();
        // Either timer may fire first; both report the timeout.
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(worker.pending().is_empty());
    }

    #[tokio::test]
    async fn hung_calls_are_cancelled_inside_the_context() {
        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ai = AiCapabilities::none().with_embedder(Arc::new(HungEmbedder {
            dropped: Arc::clone(&dropped),
        }));
        let worker = WorkerHandle::spawn(ai, Duration::from_millis(20)).unwrap();
        let err = worker
            .request(WorkerAction::Embed { text: "x".into() })
            .await
            .unwrap_err();
        // Either timer may fire first; both report the timeout.
        assert!(err.to_string().contains("timed out"), "{err}");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(dropped.load(Ordering::SeqCst));
        assert!(worker.pending().is_empty());
    }

    #[tokio::test]
    async fn capability_errors_come_back_as_failures() {
        let worker = WorkerHandle::spawn(AiCapabilities::none(), Duration::from_secs(1)).unwrap();
        let err = worker
            .request(WorkerAction::GenerateIllustration { prompt: "p".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichError::Failed(_)));
    }
}
