//! The worker task: an isolated agent rooted at the project path.
//!
//! Lives entirely behind the [`pg_protocol`] message pair. The worker
//! owns its own bus, session store, and tool registry; only LLM calls
//! leave the isolation boundary, proxied back to the host.

use std::sync::Arc;

use tokio::sync::mpsc;

use pg_domain::config::Config;
use pg_domain::error::Error;
use pg_protocol::{HostMessage, ProjectMessage, WorkerMessage};
use pg_providers::LanguageModel;
use pg_sessions::SessionStore;
use pg_tools::ToolRegistry;

use crate::agent::Agent;
use crate::bus::EventBus;
use crate::channels::OUTBOUND_QUEUE_CAP;

use super::proxy::{PendingMap, ProxyModel};

/// Run one project worker until shutdown. Spawned by the adapter.
pub(super) async fn run_worker(
    project_id: String,
    host_config: Config,
    mut from_host: mpsc::Receiver<HostMessage>,
    to_host: mpsc::Sender<WorkerMessage>,
) {
    // ── Phase 1: wait for init ───────────────────────────────────────
    let (project_path, context_window) = loop {
        match from_host.recv().await {
            Some(HostMessage::Init {
                project_path,
                context_window,
            }) => break (project_path, context_window),
            Some(HostMessage::Shutdown) | None => {
                let _ = to_host.send(WorkerMessage::ShutdownComplete).await;
                return;
            }
            Some(other) => {
                tracing::warn!(project_id = %project_id, message = ?other, "message before init, dropped");
            }
        }
    };

    // ── Phase 2: build the isolated agent ────────────────────────────
    let mut config = host_config;
    config.data_dir = project_path.clone();
    if context_window.is_some() {
        config.llm.context_window = context_window;
    }

    let session = match SessionStore::new(&project_path.join("session")) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            let _ = to_host
                .send(WorkerMessage::Error {
                    message: format!("session store init failed: {e}"),
                })
                .await;
            let _ = to_host.send(WorkerMessage::ShutdownComplete).await;
            return;
        }
    };

    let pending = Arc::new(PendingMap::new());
    let proxy: Arc<dyn LanguageModel> =
        Arc::new(ProxyModel::new(to_host.clone(), pending.clone()));

    let bus = Arc::new(EventBus::new());
    let tools = Arc::new(ToolRegistry::new());
    tools.register_many(pg_tools::builtin::default_tools(&[project_path.clone()]));

    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAP);
    let agent = Agent::new(&config, proxy, bus, session, tools, outbound_tx);
    agent.clone().start();

    tracing::info!(project_id = %project_id, path = %project_path.display(), "project worker ready");
    let _ = to_host.send(WorkerMessage::Ready).await;

    // ── Phase 3: pump until shutdown ─────────────────────────────────
    loop {
        tokio::select! {
            host_msg = from_host.recv() => match host_msg {
                Some(HostMessage::Message { message }) => {
                    if let Err(e) = agent.submit(&message.text, &message.source).await {
                        let _ = to_host
                            .send(WorkerMessage::Error {
                                message: format!("submit failed: {e}"),
                            })
                            .await;
                    }
                }
                Some(HostMessage::LlmResponse { request_id, result }) => {
                    pending.complete(&request_id, Ok(result));
                }
                Some(HostMessage::LlmError { request_id, error }) => {
                    pending.complete(
                        &request_id,
                        Err(Error::Llm {
                            provider: "host".into(),
                            message: error,
                        }),
                    );
                }
                Some(HostMessage::Init { .. }) => {}
                Some(HostMessage::Shutdown) | None => break,
            },
            outbound = outbound_rx.recv() => {
                if let Some(outbound) = outbound {
                    let _ = to_host
                        .send(WorkerMessage::Notify {
                            message: ProjectMessage {
                                text: outbound.text,
                                source: project_id.clone(),
                                metadata: None,
                            },
                        })
                        .await;
                }
            }
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────
    agent.stop().await;
    pending.reject_all("worker terminated");
    tracing::info!(project_id = %project_id, "project worker shut down");
    let _ = to_host.send(WorkerMessage::ShutdownComplete).await;
}
