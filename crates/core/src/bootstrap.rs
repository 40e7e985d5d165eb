//! Runtime assembly: config validation, store construction, agent and
//! adapter wiring.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use pg_domain::config::{Config, ConfigSeverity};
use pg_providers::ModelRegistry;
use pg_sessions::SessionStore;
use pg_tools::ToolRegistry;

use crate::agent::Agent;
use crate::bus::EventBus;
use crate::channels::{
    spawn_outbound_dispatcher, ChannelRegistry, OutboundMessage, OUTBOUND_QUEUE_CAP,
};
use crate::projects::ProjectAdapter;

/// Everything a frontend needs to talk to the core.
pub struct Runtime {
    pub config: Arc<Config>,
    pub bus: Arc<EventBus>,
    pub agent: Arc<Agent>,
    pub models: Arc<ModelRegistry>,
    pub channels: Arc<ChannelRegistry>,
    pub projects: Arc<ProjectAdapter>,
    dispatcher: JoinHandle<()>,
}

/// Build and start the full runtime from a validated configuration.
pub async fn build_runtime(config: Arc<Config>) -> anyhow::Result<Runtime> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Data directories ─────────────────────────────────────────────
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    std::fs::create_dir_all(config.data_dir.join("memory"))
        .context("creating memory dir")?;
    std::fs::create_dir_all(&config.auth_dir)
        .with_context(|| format!("creating auth dir {}", config.auth_dir.display()))?;

    // ── Session store ────────────────────────────────────────────────
    let session = Arc::new(
        SessionStore::new(&config.data_dir.join("session"))
            .context("initializing session store")?,
    );
    tracing::info!(path = %config.data_dir.join("session").display(), "session store ready");

    // ── Model registry ───────────────────────────────────────────────
    let models = Arc::new(ModelRegistry::new(
        config.llm.clone(),
        config.auth_dir.clone(),
    ));
    let model = models
        .get("default")
        .context("resolving the default model tier")?;
    tracing::info!(model = model.model_id(), "default model ready");

    // ── Tools ────────────────────────────────────────────────────────
    let tools = Arc::new(ToolRegistry::new());
    tools.register_many(pg_tools::builtin::default_tools(&config.tools.allowed_paths));
    tracing::info!(tools = tools.len(), "tool registry ready");

    // ── Agent ────────────────────────────────────────────────────────
    let bus = Arc::new(EventBus::new());
    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_QUEUE_CAP);
    let agent = Agent::new(
        &config,
        model,
        bus.clone(),
        session,
        tools,
        outbound_tx.clone(),
    );
    agent.clone().start();

    // ── Channels + outbound dispatcher ───────────────────────────────
    let channels = Arc::new(ChannelRegistry::new());
    let dispatcher = spawn_outbound_dispatcher(outbound_rx, channels.clone());

    // ── Project adapter ──────────────────────────────────────────────
    // Worker notifications land on the outbound queue so the active
    // frontend surfaces them.
    let notify_tx = outbound_tx.clone();
    let projects = ProjectAdapter::new(
        (*config).clone(),
        models.clone(),
        agent.llm_permits(),
        Arc::new(move |inbound| {
            let _ = notify_tx.try_send(OutboundMessage {
                text: inbound.text,
                source: "terminal".into(),
                task_id: None,
            });
        }),
    );

    tracing::info!("runtime ready");
    Ok(Runtime {
        config,
        bus,
        agent,
        models,
        channels,
        projects,
        dispatcher,
    })
}

impl Runtime {
    /// Orderly shutdown: channels first, then workers, then the agent
    /// (joining its background work).
    pub async fn shutdown(self) {
        self.channels.stop_all().await;
        self.projects.stop().await;
        self.agent.stop().await;
        self.dispatcher.abort();
        tracing::info!("runtime stopped");
    }
}
