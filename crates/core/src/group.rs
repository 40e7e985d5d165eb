//! Structured tracking of background work.
//!
//! Every stage the agent spawns registers its join handle here, so
//! `stop` can join everything under a soft deadline instead of leaking
//! in-flight futures.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct TaskGroup {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a future and register its handle. Finished handles are
    /// pruned opportunistically on every spawn.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(tokio::spawn(fut));
    }

    /// Number of tracked, unfinished handles.
    pub fn len(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Join all outstanding work. Work still running at the deadline is
    /// aborted and logged — leaked work is an invariant violation.
    pub async fn join_all(&self, deadline: Duration) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        if handles.is_empty() {
            return;
        }

        let deadline_at = tokio::time::Instant::now() + deadline;
        let mut leaked = 0usize;
        for mut handle in handles {
            let now = tokio::time::Instant::now();
            if now >= deadline_at {
                handle.abort();
                leaked += 1;
                continue;
            }
            if tokio::time::timeout(deadline_at - now, &mut handle)
                .await
                .is_err()
            {
                handle.abort();
                leaked += 1;
            }
        }

        if leaked > 0 {
            tracing::warn!(leaked, "background work outlived stop deadline");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn join_all_waits_for_spawned_work() {
        let group = TaskGroup::new();
        let done = Arc::new(AtomicBool::new(false));

        let done_clone = done.clone();
        group.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            done_clone.store(true, Ordering::SeqCst);
        });

        group.join_all(Duration::from_secs(1)).await;
        assert!(done.load(Ordering::SeqCst));
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn finished_handles_are_pruned_on_spawn() {
        let group = TaskGroup::new();
        group.spawn(async {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        group.spawn(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        assert_eq!(group.len(), 1);
        group.join_all(Duration::from_secs(1)).await;
    }
}
