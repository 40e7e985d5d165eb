//! The worker-side LLM proxy.
//!
//! Implements [`LanguageModel`] by posting `llm_request` to the host
//! and awaiting the correlated reply. Pending requests are rejected
//! with a "worker terminated" error on shutdown so no caller hangs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use pg_domain::error::{Error, Result};
use pg_protocol::{RequestIdAllocator, WorkerMessage};
use pg_providers::{GenerateRequest, GenerateResponse, LanguageModel};

/// Completion handles for in-flight proxied requests, keyed by
/// request id.
#[derive(Default)]
pub struct PendingMap {
    inner: Mutex<HashMap<String, oneshot::Sender<Result<GenerateResponse>>>>,
}

impl PendingMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, request_id: String, tx: oneshot::Sender<Result<GenerateResponse>>) {
        self.inner.lock().insert(request_id, tx);
    }

    fn remove(&self, request_id: &str) {
        self.inner.lock().remove(request_id);
    }

    /// Complete one request. Returns false for unknown ids (late or
    /// duplicate replies).
    pub fn complete(&self, request_id: &str, result: Result<GenerateResponse>) -> bool {
        match self.inner.lock().remove(request_id) {
            Some(tx) => tx.send(result).is_ok(),
            None => {
                tracing::warn!(request_id, "reply for unknown llm request");
                false
            }
        }
    }

    /// Reject every in-flight request (worker shutdown).
    pub fn reject_all(&self, reason: &str) {
        let pending: Vec<_> = self.inner.lock().drain().collect();
        for (request_id, tx) in pending {
            tracing::debug!(request_id = %request_id, "rejecting pending llm request");
            let _ = tx.send(Err(Error::Worker(reason.to_owned())));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// The model handle the worker's agent uses; every call crosses the
/// worker boundary.
pub struct ProxyModel {
    to_host: mpsc::Sender<WorkerMessage>,
    ids: RequestIdAllocator,
    pending: Arc<PendingMap>,
}

impl ProxyModel {
    pub fn new(to_host: mpsc::Sender<WorkerMessage>, pending: Arc<PendingMap>) -> Self {
        Self {
            to_host,
            ids: RequestIdAllocator::new(),
            pending,
        }
    }
}

#[async_trait::async_trait]
impl LanguageModel for ProxyModel {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse> {
        let request_id = self.ids.next();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let posted = self
            .to_host
            .send(WorkerMessage::LlmRequest {
                request_id: request_id.clone(),
                options: req,
                model_override: None,
            })
            .await;
        if posted.is_err() {
            self.pending.remove(&request_id);
            return Err(Error::Worker("worker terminated".into()));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Worker("worker terminated".into())),
        }
    }

    fn model_id(&self) -> &str {
        "host/proxy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(text: &str) -> GenerateResponse {
        GenerateResponse {
            text: text.into(),
            tool_calls: vec![],
            finish_reason: Some("stop".into()),
            usage: None,
            model: "host".into(),
        }
    }

    #[tokio::test]
    async fn request_resolves_with_host_reply() {
        let (to_host, mut host_rx) = mpsc::channel(8);
        let pending = Arc::new(PendingMap::new());
        let proxy = ProxyModel::new(to_host, pending.clone());

        let generate = tokio::spawn(async move {
            proxy.generate(GenerateRequest::default()).await
        });

        let request_id = match host_rx.recv().await.unwrap() {
            WorkerMessage::LlmRequest { request_id, .. } => request_id,
            other => panic!("unexpected message: {other:?}"),
        };
        assert!(pending.complete(&request_id, Ok(response("answer"))));

        let result = generate.await.unwrap().unwrap();
        assert_eq!(result.text, "answer");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn reject_all_unblocks_callers() {
        let (to_host, mut host_rx) = mpsc::channel(8);
        let pending = Arc::new(PendingMap::new());
        let proxy = ProxyModel::new(to_host, pending.clone());

        let generate = tokio::spawn(async move {
            proxy.generate(GenerateRequest::default()).await
        });
        let _ = host_rx.recv().await.unwrap();

        pending.reject_all("worker terminated");
        let err = generate.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("worker terminated"));
    }

    #[tokio::test]
    async fn closed_host_channel_is_an_error() {
        let (to_host, host_rx) = mpsc::channel(8);
        drop(host_rx);
        let proxy = ProxyModel::new(to_host, Arc::new(PendingMap::new()));
        assert!(proxy.generate(GenerateRequest::default()).await.is_err());
    }

    #[test]
    fn late_replies_are_ignored() {
        let pending = PendingMap::new();
        assert!(!pending.complete("req-404", Ok(response("late"))));
    }
}
