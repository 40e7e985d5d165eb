//! The project adapter: multiplexes isolated per-project workers and
//! serves their proxied LLM calls through the host's model registry,
//! under the host's global LLM semaphore.

pub mod proxy;
mod worker;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;

use pg_domain::config::Config;
use pg_domain::error::{Error, Result};
use pg_domain::trace::TraceEvent;
use pg_protocol::{HostMessage, ProjectMessage, WorkerMessage};
use pg_providers::{GenerateRequest, GenerateResponse, ModelRegistry};

use crate::channels::InboundMessage;

/// How long a worker gets to shut down before it is force-terminated.
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(30);
const WORKER_QUEUE_CAP: usize = 64;

/// Receives worker notifications on the host (project output, system
/// notices such as worker termination).
pub type NotifyCallback = Arc<dyn Fn(InboundMessage) + Send + Sync>;

struct WorkerEntry {
    to_worker: mpsc::Sender<HostMessage>,
    worker_join: JoinHandle<()>,
}

pub struct ProjectAdapter {
    weak: Weak<Self>,
    config: Config,
    models: Arc<ModelRegistry>,
    llm_permits: Arc<Semaphore>,
    notify: NotifyCallback,
    workers: Mutex<HashMap<String, WorkerEntry>>,
}

impl ProjectAdapter {
    pub fn new(
        config: Config,
        models: Arc<ModelRegistry>,
        llm_permits: Arc<Semaphore>,
        notify: NotifyCallback,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            config,
            models,
            llm_permits,
            notify,
            workers: Mutex::new(HashMap::new()),
        })
    }

    /// Spawn a worker for the project and send `init`. Fails when the
    /// id is already running.
    pub async fn start_project(&self, id: &str, path: &Path) -> Result<()> {
        let mut workers = self.workers.lock().await;
        if workers.contains_key(id) {
            return Err(Error::InvalidState(format!(
                "project '{id}' is already running"
            )));
        }

        let (to_worker, from_host) = mpsc::channel::<HostMessage>(WORKER_QUEUE_CAP);
        let (to_host, from_worker) = mpsc::channel::<WorkerMessage>(WORKER_QUEUE_CAP);

        let worker_join = tokio::spawn(worker::run_worker(
            id.to_owned(),
            self.config.clone(),
            from_host,
            to_host,
        ));
        tokio::spawn(Self::pump(
            self.weak.clone(),
            id.to_owned(),
            from_worker,
            to_worker.clone(),
        ));

        to_worker
            .send(HostMessage::Init {
                project_path: path.to_path_buf(),
                context_window: self.config.llm.context_window,
            })
            .await
            .map_err(|_| Error::Worker(format!("worker for '{id}' died during init")))?;

        workers.insert(
            id.to_owned(),
            WorkerEntry {
                to_worker,
                worker_join,
            },
        );
        TraceEvent::WorkerStarted {
            project_id: id.to_owned(),
        }
        .emit();
        Ok(())
    }

    /// Deliver a message into a project's agent.
    pub async fn send_message(&self, id: &str, text: &str, source: &str) -> Result<()> {
        let workers = self.workers.lock().await;
        let entry = workers
            .get(id)
            .ok_or_else(|| Error::InvalidState(format!("project '{id}' is not running")))?;
        entry
            .to_worker
            .send(HostMessage::Message {
                message: ProjectMessage {
                    text: text.to_owned(),
                    source: source.to_owned(),
                    metadata: None,
                },
            })
            .await
            .map_err(|_| Error::Worker(format!("worker for '{id}' has terminated")))
    }

    /// Ask a worker to stop; force-terminate after the stop timeout.
    pub async fn stop_project(&self, id: &str) -> Result<()> {
        let entry = self
            .workers
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| Error::InvalidState(format!("project '{id}' is not running")))?;

        let _ = entry.to_worker.send(HostMessage::Shutdown).await;

        let mut join = entry.worker_join;
        let forced = match tokio::time::timeout(WORKER_STOP_TIMEOUT, &mut join).await {
            Ok(_) => false,
            Err(_) => {
                tracing::warn!(project_id = id, "worker ignored shutdown, force-terminating");
                join.abort();
                true
            }
        };

        TraceEvent::WorkerStopped {
            project_id: id.to_owned(),
            forced,
        }
        .emit();
        Ok(())
    }

    /// Stop all workers concurrently.
    pub async fn stop(&self) {
        let ids: Vec<String> = self.workers.lock().await.keys().cloned().collect();
        let stops = ids.iter().map(|id| self.stop_project(id));
        for result in futures_util::future::join_all(stops).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "project stop failed");
            }
        }
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.workers.lock().await.contains_key(id)
    }

    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    // ── Host-side message pump ────────────────────────────────────────

    /// Consume one worker's messages: route notifications to the host
    /// callback and serve proxied LLM requests. Ends when the worker
    /// closes its channel, then announces the termination.
    async fn pump(
        weak: Weak<Self>,
        project_id: String,
        mut from_worker: mpsc::Receiver<WorkerMessage>,
        to_worker: mpsc::Sender<HostMessage>,
    ) {
        while let Some(message) = from_worker.recv().await {
            match message {
                WorkerMessage::Ready => {
                    tracing::info!(project_id = %project_id, "worker ready");
                }
                WorkerMessage::Error { message } => {
                    tracing::warn!(project_id = %project_id, error = %message, "worker error");
                }
                WorkerMessage::Notify { message } => {
                    let Some(adapter) = weak.upgrade() else { break };
                    (adapter.notify)(InboundMessage {
                        text: message.text,
                        source: message.source,
                        metadata: message.metadata,
                    });
                }
                WorkerMessage::LlmRequest {
                    request_id,
                    options,
                    model_override,
                } => {
                    let Some(adapter) = weak.upgrade() else { break };
                    let to_worker = to_worker.clone();
                    tokio::spawn(async move {
                        let reply = match adapter.serve_llm(options, model_override).await {
                            Ok(result) => HostMessage::LlmResponse { request_id, result },
                            Err(e) => HostMessage::LlmError {
                                request_id,
                                error: e.to_string(),
                            },
                        };
                        let _ = to_worker.send(reply).await;
                    });
                }
                WorkerMessage::ShutdownComplete => break,
            }
        }

        if let Some(adapter) = weak.upgrade() {
            (adapter.notify)(InboundMessage {
                text: format!("[system] Project \"{project_id}\" Worker has terminated."),
                source: "system".into(),
                metadata: None,
            });
        }
    }

    /// Serve one proxied request through the shared registry, under the
    /// global LLM semaphore.
    async fn serve_llm(
        &self,
        options: GenerateRequest,
        model_override: Option<String>,
    ) -> Result<GenerateResponse> {
        let model = self.models.get(model_override.as_deref().unwrap_or("default"))?;
        let _permit = self.llm_permits.acquire().await.expect("semaphore closed");
        model.generate(options).await
    }
}
