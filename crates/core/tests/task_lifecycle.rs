//! End-to-end task scenarios against a scripted model: conversation
//! round-trips, tool rounds, unknown tools, the active-task cap,
//! completion callbacks, and resume.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use pegasus::channels::OutboundMessage;
use pegasus::{Agent, EventBus};
use pg_domain::config::Config;
use pg_domain::error::{Error, Result};
use pg_domain::message::{Role, ToolCall};
use pg_domain::task::{ActionType, TaskState};
use pg_providers::{GenerateRequest, GenerateResponse, LanguageModel};
use pg_sessions::SessionStore;
use pg_tools::{ToolRegistry, ToolSpec};

const WAIT: Duration = Duration::from_secs(5);

// ── Mock models ─────────────────────────────────────────────────────

fn text_response(text: &str) -> GenerateResponse {
    GenerateResponse {
        text: text.into(),
        tool_calls: vec![],
        finish_reason: Some("stop".into()),
        usage: None,
        model: "mock".into(),
    }
}

fn tool_call_response(call_id: &str, tool: &str) -> GenerateResponse {
    GenerateResponse {
        text: String::new(),
        tool_calls: vec![ToolCall {
            id: call_id.into(),
            name: tool.into(),
            arguments: serde_json::json!({}),
        }],
        finish_reason: Some("tool_calls".into()),
        usage: None,
        model: "mock".into(),
    }
}

/// Plays back a fixed sequence of responses, one per `generate` call.
struct ScriptedModel {
    turns: Mutex<VecDeque<GenerateResponse>>,
}

impl ScriptedModel {
    fn new(turns: Vec<GenerateResponse>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
        })
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, _req: GenerateRequest) -> Result<GenerateResponse> {
        self.turns
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Llm {
                provider: "mock".into(),
                message: "script exhausted".into(),
            })
    }

    fn model_id(&self) -> &str {
        "mock/scripted"
    }
}

/// Blocks every call until a permit is released, then answers "ok".
struct GatedModel {
    gate: Arc<tokio::sync::Semaphore>,
}

#[async_trait::async_trait]
impl LanguageModel for GatedModel {
    async fn generate(&self, _req: GenerateRequest) -> Result<GenerateResponse> {
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        Ok(text_response("ok"))
    }

    fn model_id(&self) -> &str {
        "mock/gated"
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    agent: Arc<Agent>,
    session: Arc<SessionStore>,
    outbound: mpsc::Receiver<OutboundMessage>,
    _dir: tempfile::TempDir,
}

fn harness(model: Arc<dyn LanguageModel>, max_active_tasks: usize, tools: Vec<ToolSpec>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = dir.path().join("data");
    config.auth_dir = dir.path().join("auth");
    config.agent.max_active_tasks = max_active_tasks;

    let session = Arc::new(SessionStore::new(&config.data_dir.join("session")).unwrap());
    let registry = Arc::new(ToolRegistry::new());
    registry.register_many(tools);

    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let agent = Agent::new(
        &config,
        model,
        Arc::new(EventBus::new()),
        session.clone(),
        registry,
        outbound_tx,
    );
    agent.clone().start();

    Harness {
        agent,
        session,
        outbound: outbound_rx,
        _dir: dir,
    }
}

fn fixed_clock_tool() -> ToolSpec {
    ToolSpec::from_fn(
        "current_time",
        "Get the current time.",
        serde_json::json!({ "type": "object", "properties": {} }),
        |_args, _ctx| async { Ok(serde_json::json!("2026-02-28T14:30:05Z")) },
    )
}

// ── S1: conversation round-trip ─────────────────────────────────────

#[tokio::test]
async fn conversation_round_trip() {
    let model = ScriptedModel::new(vec![text_response("Hi!")]);
    let mut h = harness(model, 5, vec![]);

    let task_id = h.agent.submit("Hello", "test").await.unwrap();
    let handle = h.agent.wait_for_task(&task_id, Some(WAIT)).await.unwrap();

    let fsm = handle.fsm.lock().await;
    assert_eq!(fsm.state(), TaskState::Completed);
    let result = fsm.context.final_result.as_ref().unwrap();
    assert_eq!(result.response.as_deref(), Some("Hi!"));
    assert_eq!(result.iterations, 1);
    drop(fsm);

    // Exactly one assistant message was persisted.
    let messages = h.session.load().unwrap();
    let assistant: Vec<_> = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .collect();
    assert_eq!(assistant.len(), 1);
    assert_eq!(assistant[0].content, "Hi!");

    // The response also went out on the task's source channel.
    let out = h.outbound.recv().await.unwrap();
    assert_eq!(out.text, "Hi!");
    assert_eq!(out.source, "test");
}

// ── S2: tool use with summary round ─────────────────────────────────

#[tokio::test]
async fn tool_round_then_summary() {
    let model = ScriptedModel::new(vec![
        tool_call_response("c1", "current_time"),
        text_response("The current time is 2026-02-28T14:30:05Z."),
    ]);
    let h = harness(model, 5, vec![fixed_clock_tool()]);

    let task_id = h.agent.submit("What time is it?", "test").await.unwrap();
    let handle = h.agent.wait_for_task(&task_id, Some(WAIT)).await.unwrap();

    let fsm = handle.fsm.lock().await;
    assert_eq!(fsm.state(), TaskState::Completed);

    let tool_actions: Vec<_> = fsm
        .context
        .actions_done
        .iter()
        .filter(|a| a.action_type == ActionType::ToolCall)
        .collect();
    assert_eq!(tool_actions.len(), 1);
    assert!(tool_actions[0].success);

    let result = fsm.context.final_result.as_ref().unwrap();
    assert!(result
        .response
        .as_deref()
        .unwrap()
        .contains("2026-02-28T14:30:05Z"));

    // The conversation pairs the tool call with its result.
    let tool_message = fsm
        .context
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("c1"));
    assert!(tool_message.content.contains("2026-02-28T14:30:05Z"));
}

// ── S3: unknown tool still terminates ───────────────────────────────

#[tokio::test]
async fn unknown_tool_fails_in_band_and_task_terminates() {
    let model = ScriptedModel::new(vec![
        tool_call_response("c1", "nonexistent_tool_xyz"),
        text_response("That tool is not available."),
    ]);
    let h = harness(model, 5, vec![]);

    let task_id = h.agent.submit("Do the thing", "test").await.unwrap();
    let handle = h.agent.wait_for_task(&task_id, Some(WAIT)).await.unwrap();

    let fsm = handle.fsm.lock().await;
    assert!(fsm.state().is_terminal(), "task must not hang");

    let action = &fsm.context.actions_done[0];
    assert_eq!(action.action_type, ActionType::ToolCall);
    assert!(!action.success);
    assert!(action.error.as_deref().unwrap().contains("unknown tool"));
}

// ── S4: active-task cap ─────────────────────────────────────────────

#[tokio::test]
async fn registry_cap_rejects_excess_submissions() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let model = Arc::new(GatedModel { gate: gate.clone() });
    let h = harness(model, 2, vec![]);

    let first = h.agent.submit("one", "test").await.unwrap();
    let second = h.agent.submit("two", "test").await.unwrap();

    let third = h.agent.submit("three", "test").await;
    assert!(
        matches!(third, Err(Error::RegistryFull { max: 2, .. })),
        "third submission must be rejected: {third:?}"
    );

    // Release the model; the first two run to completion.
    gate.add_permits(16);
    let h1 = h.agent.wait_for_task(&first, Some(WAIT)).await.unwrap();
    let h2 = h.agent.wait_for_task(&second, Some(WAIT)).await.unwrap();
    assert_eq!(h1.fsm.lock().await.state(), TaskState::Completed);
    assert_eq!(h2.fsm.lock().await.state(), TaskState::Completed);

    // With slots free again, new submissions are accepted.
    let fourth = h.agent.submit("four", "test").await.unwrap();
    h.agent.wait_for_task(&fourth, Some(WAIT)).await.unwrap();
}

// ── Completion callbacks ────────────────────────────────────────────

#[tokio::test]
async fn on_task_complete_fires_synchronously_when_already_terminal() {
    let model = ScriptedModel::new(vec![text_response("done")]);
    let h = harness(model, 5, vec![]);

    let task_id = h.agent.submit("Hello", "test").await.unwrap();
    h.agent.wait_for_task(&task_id, Some(WAIT)).await.unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = fired.clone();
    let expected = task_id.clone();
    h.agent
        .on_task_complete(&task_id, move |event| {
            assert_eq!(event.task_id.as_deref(), Some(expected.as_str()));
            fired_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await;

    assert_eq!(fired.load(Ordering::SeqCst), 1, "fires exactly once, inline");
}

#[tokio::test]
async fn on_task_complete_fires_once_for_running_task() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let model = Arc::new(GatedModel { gate: gate.clone() });
    let h = harness(model, 5, vec![]);

    let task_id = h.agent.submit("Hello", "test").await.unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = fired.clone();
    h.agent
        .on_task_complete(&task_id, move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    assert_eq!(fired.load(Ordering::SeqCst), 0, "task still running");

    gate.add_permits(4);
    h.agent.wait_for_task(&task_id, Some(WAIT)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

// ── Resume ──────────────────────────────────────────────────────────

#[tokio::test]
async fn resume_reruns_a_completed_task_with_new_input() {
    let model = ScriptedModel::new(vec![
        text_response("First answer"),
        text_response("Second answer"),
    ]);
    let h = harness(model, 5, vec![]);

    let task_id = h.agent.submit("First question", "test").await.unwrap();
    h.agent.wait_for_task(&task_id, Some(WAIT)).await.unwrap();

    h.agent.resume(&task_id, "Second question").await.unwrap();
    let handle = h.agent.wait_for_task(&task_id, Some(WAIT)).await.unwrap();

    let fsm = handle.fsm.lock().await;
    assert_eq!(fsm.state(), TaskState::Completed);
    let result = fsm.context.final_result.as_ref().unwrap();
    assert_eq!(result.response.as_deref(), Some("Second answer"));
    assert_eq!(result.input, "Second question");
    assert_eq!(result.iterations, 1, "iteration counter was reset");
}

#[tokio::test]
async fn resume_rejects_non_completed_tasks() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let model = Arc::new(GatedModel { gate: gate.clone() });
    let h = harness(model, 5, vec![]);

    let task_id = h.agent.submit("Hello", "test").await.unwrap();
    let err = h.agent.resume(&task_id, "again").await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    assert!(matches!(
        h.agent.resume("no-such-task", "x").await.unwrap_err(),
        Error::TaskNotFound(_)
    ));

    gate.add_permits(4);
    h.agent.wait_for_task(&task_id, Some(WAIT)).await.unwrap();
}

// ── Failure notice on the source channel ────────────────────────────

#[tokio::test]
async fn failed_task_sends_a_short_notice() {
    // Script exhausts immediately → the reasoning stage errors → the
    // task fails.
    let model = ScriptedModel::new(vec![]);
    let mut h = harness(model, 5, vec![]);

    let task_id = h.agent.submit("Hello", "test").await.unwrap();
    let handle = h.agent.wait_for_task(&task_id, Some(WAIT)).await.unwrap();
    assert_eq!(handle.fsm.lock().await.state(), TaskState::Failed);

    let out = h.outbound.recv().await.unwrap();
    assert_eq!(out.source, "test");
    assert!(out.text.contains("couldn't finish"));
}
