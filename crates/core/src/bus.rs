//! In-process event bus: typed pub/sub with bounded history.
//!
//! `emit` snapshots the current subscriber list and spawns every handler
//! in registration order, so a handler registered mid-dispatch sees only
//! subsequent events. Handler failures are logged and never reach the
//! emitter or the handler's peers.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use pg_domain::error::Result;
use pg_domain::event::{Event, EventSink, EventType};

/// Events retained in history before the oldest is evicted.
pub const HISTORY_CAP: usize = 1024;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type Handler = Arc<dyn Fn(Event) -> BoxFuture<Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    handler: Handler,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventBus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EventBus {
    subscribers: RwLock<HashMap<EventType, Vec<Subscriber>>>,
    history: RwLock<VecDeque<Event>>,
    next_id: AtomicU64,
    running: AtomicBool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAP)),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Register a handler for one event type. Handlers run in
    /// registration order.
    pub fn subscribe(&self, event_type: EventType, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .entry(event_type)
            .or_default()
            .push(Subscriber { id, handler });
        id
    }

    /// Convenience wrapper over [`Self::subscribe`] for async closures.
    pub fn subscribe_fn<F, Fut>(&self, event_type: EventType, f: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.subscribe(
            event_type,
            Arc::new(move |event| -> BoxFuture<Result<()>> { Box::pin(f(event)) }),
        )
    }

    /// Remove a subscription. Returns false when it was already gone.
    pub fn unsubscribe(&self, event_type: EventType, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(list) = subscribers.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        before != list.len()
    }

    /// Publish an event: record it in history and start every currently
    /// registered handler, in registration order. Returns once all
    /// handlers have been started; their completion is not awaited.
    pub fn emit(&self, event: Event) {
        if !self.running.load(Ordering::Acquire) {
            tracing::warn!(event_type = %event.event_type, "bus stopped, dropping event");
            return;
        }

        {
            let mut history = self.history.write();
            if history.len() >= HISTORY_CAP {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let handlers: Vec<Handler> = {
            let subscribers = self.subscribers.read();
            subscribers
                .get(&event.event_type)
                .map(|list| list.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };

        tracing::debug!(
            event_type = %event.event_type,
            event_id = %event.id,
            handlers = handlers.len(),
            "emit"
        );

        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = handler(event.clone()).await {
                    tracing::warn!(
                        event_type = %event.event_type,
                        event_id = %event.id,
                        error = %e,
                        "event handler failed"
                    );
                }
            });
        }
    }

    /// Snapshot of the retained event history, oldest first.
    pub fn history(&self) -> Vec<Event> {
        self.history.read().iter().cloned().collect()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: Event) {
        EventBus::emit(self, event);
    }
}
