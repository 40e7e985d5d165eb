//! Channel plumbing: the adapter trait the terminal/chat-bot/API
//! frontends implement, and the single outbound queue the agent writes
//! into.
//!
//! The agent never calls adapters directly — it pushes into a bounded
//! queue drained by one dispatcher task, which routes each message to
//! the adapter matching its source channel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use pg_domain::error::Result;

use crate::agent::Agent;

/// Capacity of the outbound queue.
pub const OUTBOUND_QUEUE_CAP: usize = 64;

/// A message arriving from a channel.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub text: String,
    pub source: String,
    pub metadata: Option<serde_json::Value>,
}

/// A message the agent wants delivered back to a channel.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub text: String,
    /// Channel kind this message belongs to (the task's source).
    pub source: String,
    pub task_id: Option<String>,
}

/// A frontend capable of receiving user input and delivering agent
/// output (terminal REPL, chat bots, HTTP API).
#[async_trait::async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel kind, matched against `OutboundMessage::source`.
    fn kind(&self) -> &str;

    async fn start(&self, agent: Arc<Agent>) -> Result<()>;

    async fn deliver(&self, message: OutboundMessage) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry + dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ChannelRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn ChannelAdapter>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters
            .write()
            .insert(adapter.kind().to_owned(), adapter);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.read().get(kind).cloned()
    }

    pub async fn stop_all(&self) {
        let adapters: Vec<_> = self.adapters.write().drain().map(|(_, a)| a).collect();
        for adapter in adapters {
            if let Err(e) = adapter.stop().await {
                tracing::warn!(channel = adapter.kind(), error = %e, "channel stop failed");
            }
        }
    }
}

/// Drain the outbound queue, routing each message to its channel.
/// Messages for unknown channels are logged and dropped.
pub fn spawn_outbound_dispatcher(
    mut rx: mpsc::Receiver<OutboundMessage>,
    channels: Arc<ChannelRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match channels.get(&message.source) {
                Some(adapter) => {
                    if let Err(e) = adapter.deliver(message).await {
                        tracing::warn!(error = %e, "outbound delivery failed");
                    }
                }
                None => {
                    tracing::info!(
                        source = %message.source,
                        text = %message.text,
                        "no adapter for outbound message"
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingAdapter {
        kind: String,
        delivered: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl ChannelAdapter for RecordingAdapter {
        fn kind(&self) -> &str {
            &self.kind
        }

        async fn start(&self, _agent: Arc<Agent>) -> Result<()> {
            Ok(())
        }

        async fn deliver(&self, message: OutboundMessage) -> Result<()> {
            self.delivered.lock().push(message.text);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatcher_routes_by_source() {
        let channels = Arc::new(ChannelRegistry::new());
        let delivered = Arc::new(Mutex::new(Vec::new()));
        channels.register(Arc::new(RecordingAdapter {
            kind: "terminal".into(),
            delivered: delivered.clone(),
        }));

        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAP);
        let dispatcher = spawn_outbound_dispatcher(rx, channels);

        tx.send(OutboundMessage {
            text: "hello".into(),
            source: "terminal".into(),
            task_id: None,
        })
        .await
        .unwrap();
        tx.send(OutboundMessage {
            text: "lost".into(),
            source: "telegram".into(),
            task_id: None,
        })
        .await
        .unwrap();
        drop(tx);

        dispatcher.await.unwrap();
        assert_eq!(*delivered.lock(), vec!["hello".to_owned()]);
    }
}
