//! The agent: a stateless event processor over the bus.
//!
//! Inbound events become tasks; task-lifecycle events drive each task's
//! FSM, and a successful transition dispatches the matching cognitive
//! stage as tracked background work. Stages never call each other —
//! every continuation re-enters through an emitted event, keeping the
//! scheduler flat.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Semaphore};

use pg_domain::config::Config;
use pg_domain::error::{Error, Result};
use pg_domain::event::{Event, EventPayload, EventType, ToolOutcome};
use pg_domain::message::Message;
use pg_domain::task::{ActionResult, ActionType, TaskContext, TaskState, Verdict};
use pg_providers::{GenerateRequest, LanguageModel};
use pg_sessions::{HeuristicCounter, SessionStore};
use pg_tools::{ToolContext, ToolExecutor, ToolRegistry};

use crate::bus::{EventBus, SubscriptionId};
use crate::channels::OutboundMessage;
use crate::group::TaskGroup;
use crate::stages::{memory_index, Actor, Persona, Planner, Reflector, Thinker};
use crate::task::{TaskFsm, TaskHandle, TaskRegistry, TransitionOutcome};

/// How long `submit` waits for its `TASK_CREATED` acknowledgement.
const SUBMIT_ACK_TIMEOUT: Duration = Duration::from_millis(500);
/// Poll period of `wait_for_task`.
const WAIT_POLL_PERIOD: Duration = Duration::from_millis(20);
/// Soft deadline for joining background work at stop.
const STOP_DEADLINE: Duration = Duration::from_secs(5);

struct AgentSettings {
    max_cognitive_iterations: u32,
    task_timeout: Duration,
    compact_threshold: f64,
    context_window: Option<u32>,
}

/// The cognitive task core. Construct with [`Agent::new`], wire channel
/// adapters to [`Agent::submit`], and observe results through the bus
/// or the outbound queue.
pub struct Agent {
    bus: Arc<EventBus>,
    registry: Arc<TaskRegistry>,
    session: Arc<SessionStore>,
    tools: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    model: Arc<dyn LanguageModel>,

    thinker: Thinker,
    planner: Planner,
    actor: Actor,
    reflector: Reflector,

    llm_permits: Arc<Semaphore>,
    tool_permits: Arc<Semaphore>,
    work: TaskGroup,
    outbound: mpsc::Sender<OutboundMessage>,

    settings: AgentSettings,
    data_dir: PathBuf,
    memory_dir: PathBuf,

    running: AtomicBool,
    subscriptions: parking_lot::Mutex<Vec<(EventType, SubscriptionId)>>,
}

impl Agent {
    pub fn new(
        config: &Config,
        model: Arc<dyn LanguageModel>,
        bus: Arc<EventBus>,
        session: Arc<SessionStore>,
        tools: Arc<ToolRegistry>,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> Arc<Self> {
        let llm_permits = Arc::new(Semaphore::new(config.llm.max_concurrent_calls));
        let tool_permits = Arc::new(Semaphore::new(config.agent.max_concurrent_tools));
        let executor = Arc::new(ToolExecutor::new(tools.clone(), config.tools.timeout_sec));
        let persona = Persona::default();

        Arc::new(Self {
            registry: Arc::new(TaskRegistry::new(config.agent.max_active_tasks)),
            thinker: Thinker::new(model.clone(), persona.clone(), llm_permits.clone()),
            planner: Planner::new(),
            actor: Actor::new(model.clone(), persona, llm_permits.clone()),
            reflector: Reflector::new(),
            executor,
            model,
            bus,
            session,
            tools,
            llm_permits,
            tool_permits,
            work: TaskGroup::new(),
            outbound,
            settings: AgentSettings {
                max_cognitive_iterations: config.agent.max_cognitive_iterations,
                task_timeout: Duration::from_secs(config.agent.task_timeout_sec),
                compact_threshold: config.session.compact_threshold,
                context_window: config.llm.context_window,
            },
            data_dir: config.data_dir.clone(),
            memory_dir: config.data_dir.join("memory"),
            running: AtomicBool::new(false),
            subscriptions: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn llm_permits(&self) -> Arc<Semaphore> {
        self.llm_permits.clone()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Lifecycle
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Install the bus subscriptions and start accepting work.
    pub fn start(self: Arc<Self>) {
        self.running.store(true, Ordering::Release);
        self.bus.start();

        let inbound = [
            EventType::MessageReceived,
            EventType::WebhookTriggered,
            EventType::ScheduleFired,
        ];
        for event_type in inbound {
            let weak = Arc::downgrade(&self);
            let id = self.bus.subscribe_fn(event_type, move |event| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(agent) => agent.handle_inbound(event).await,
                        None => Ok(()),
                    }
                }
            });
            self.subscriptions.lock().push((event_type, id));
        }

        let lifecycle = [
            EventType::TaskCreated,
            EventType::ReasonDone,
            EventType::NeedMoreInfo,
            EventType::StepCompleted,
            EventType::ToolCallCompleted,
            EventType::ToolCallFailed,
            EventType::ActDone,
            EventType::ReflectDone,
            EventType::TaskSuspended,
            EventType::TaskResumed,
            EventType::TaskFailed,
        ];
        for event_type in lifecycle {
            let weak = Arc::downgrade(&self);
            let id = self.bus.subscribe_fn(event_type, move |event| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(agent) => agent.handle_lifecycle(event).await,
                        None => Ok(()),
                    }
                }
            });
            self.subscriptions.lock().push((event_type, id));
        }

        self.bus.emit(Event::new(EventType::SystemStarted, "agent"));
        tracing::info!("agent started");
    }

    /// Stop accepting work, then join all outstanding background stages
    /// under a soft deadline.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::Release);
        for (event_type, id) in self.subscriptions.lock().drain(..) {
            self.bus.unsubscribe(event_type, id);
        }
        self.work.join_all(STOP_DEADLINE).await;
        self.bus.stop();
        tracing::info!("agent stopped");
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Public operations
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Submit an inbound message; returns the created task's id.
    ///
    /// Subscribes for the `TASK_CREATED` acknowledgement matching this
    /// submission (by `parent_event_id`) before emitting, bounded by a
    /// short timeout. A creation failure comes back as the error the
    /// creating handler reported (typically `RegistryFull`).
    pub async fn submit(&self, text: &str, source: &str) -> Result<String> {
        let event = Event::new(EventType::MessageReceived, source)
            .with_payload(EventPayload::Message { text: text.to_owned() });
        let submit_id = event.id.clone();

        let (tx, rx) = oneshot::channel::<std::result::Result<String, String>>();
        let slot = Arc::new(parking_lot::Mutex::new(Some(tx)));

        let created_sub = {
            let slot = slot.clone();
            let submit_id = submit_id.clone();
            self.bus.subscribe_fn(EventType::TaskCreated, move |event| {
                let slot = slot.clone();
                let submit_id = submit_id.clone();
                async move {
                    if event.parent_event_id.as_deref() == Some(submit_id.as_str()) {
                        if let Some(task_id) = event.task_id {
                            if let Some(tx) = slot.lock().take() {
                                let _ = tx.send(Ok(task_id));
                            }
                        }
                    }
                    Ok(())
                }
            })
        };
        let failed_sub = {
            let slot = slot.clone();
            let submit_id = submit_id.clone();
            self.bus.subscribe_fn(EventType::TaskFailed, move |event| {
                let slot = slot.clone();
                let submit_id = submit_id.clone();
                async move {
                    // Creation failures carry the submit event as parent
                    // and no task id.
                    if event.parent_event_id.as_deref() == Some(submit_id.as_str())
                        && event.task_id.is_none()
                    {
                        let message = match event.payload {
                            EventPayload::Failed { error } => error,
                            _ => "task creation failed".to_owned(),
                        };
                        if let Some(tx) = slot.lock().take() {
                            let _ = tx.send(Err(message));
                        }
                    }
                    Ok(())
                }
            })
        };

        self.bus.emit(event);
        let outcome = tokio::time::timeout(SUBMIT_ACK_TIMEOUT, rx).await;
        self.bus.unsubscribe(EventType::TaskCreated, created_sub);
        self.bus.unsubscribe(EventType::TaskFailed, failed_sub);

        match outcome {
            Ok(Ok(Ok(task_id))) => Ok(task_id),
            Ok(Ok(Err(message))) if message.contains("registry full") => {
                Err(Error::RegistryFull {
                    active: self.registry.active_count(),
                    max: self.registry.max_active(),
                })
            }
            Ok(Ok(Err(message))) => Err(Error::Other(message)),
            _ => Err(Error::Timeout(
                "task was not created within the submit window".into(),
            )),
        }
    }

    /// Poll the registry until the task is terminal or the deadline
    /// elapses. `None` uses the configured task timeout.
    pub async fn wait_for_task(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<Arc<TaskHandle>> {
        let deadline =
            tokio::time::Instant::now() + timeout.unwrap_or(self.settings.task_timeout);
        loop {
            let handle = self.registry.get(id)?;
            if handle.is_terminal() {
                return Ok(handle);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "task {id} did not reach a terminal state in time"
                )));
            }
            tokio::time::sleep(WAIT_POLL_PERIOD).await;
        }
    }

    /// One-shot completion callback. Fires synchronously when the task
    /// is already terminal at registration time.
    pub async fn on_task_complete<F>(&self, id: &str, callback: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        if let Ok(handle) = self.registry.get(id) {
            if handle.is_terminal() {
                let fsm = handle.fsm.lock().await;
                let event = match fsm.state() {
                    TaskState::Failed => Event::new(EventType::TaskFailed, "agent")
                        .with_task(id)
                        .with_payload(EventPayload::Failed {
                            error: fsm
                                .context
                                .error
                                .clone()
                                .unwrap_or_else(|| "unknown error".into()),
                        }),
                    _ => Event::new(EventType::TaskCompleted, "agent")
                        .with_task(id)
                        .with_payload(EventPayload::Completed {
                            result: fsm
                                .context
                                .final_result
                                .clone()
                                .unwrap_or_else(|| fsm.context.compile_result()),
                        }),
                };
                drop(fsm);
                callback(event);
                return;
            }
        }

        let callback = Arc::new(callback);
        let fired = Arc::new(AtomicBool::new(false));
        let subs: Arc<parking_lot::Mutex<Vec<(EventType, SubscriptionId)>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));

        for event_type in [EventType::TaskCompleted, EventType::TaskFailed] {
            let callback = callback.clone();
            let fired = fired.clone();
            let subs_for_closure = subs.clone();
            let bus = self.bus.clone();
            let id = id.to_owned();
            let sub = self.bus.subscribe_fn(event_type, move |event| {
                let callback = callback.clone();
                let fired = fired.clone();
                let subs = subs_for_closure.clone();
                let bus = bus.clone();
                let id = id.clone();
                async move {
                    if event.task_id.as_deref() == Some(id.as_str())
                        && !fired.swap(true, Ordering::AcqRel)
                    {
                        callback(event);
                        for (event_type, sub) in subs.lock().drain(..) {
                            bus.unsubscribe(event_type, sub);
                        }
                    }
                    Ok(())
                }
            });
            subs.lock().push((event_type, sub));
        }
    }

    /// Re-run a completed task with fresh input. The context keeps its
    /// conversation, everything else rewinds; the emitted `TASK_RESUMED`
    /// drives the task back into reasoning.
    pub async fn resume(&self, id: &str, new_input: &str) -> Result<String> {
        let handle = self.registry.get(id)?;
        {
            let mut fsm = handle.fsm.lock().await;
            if fsm.state() != TaskState::Completed {
                return Err(Error::InvalidState(format!(
                    "task {id} is {}, only COMPLETED tasks can be resumed",
                    fsm.state()
                )));
            }
            self.registry.reactivate(id)?;
            fsm.reset_for_resume(new_input);
        }

        if let Err(e) = self.session.append(&Message::user(new_input), None) {
            tracing::warn!(error = %e, "failed to persist resume input");
        }

        self.bus.emit(
            Event::new(EventType::TaskResumed, "agent")
                .with_task(id)
                .with_payload(EventPayload::Resumed {
                    input: new_input.to_owned(),
                }),
        );
        Ok(id.to_owned())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Event handlers
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Inbound message → new task → `TASK_CREATED`.
    async fn handle_inbound(self: Arc<Self>, event: Event) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        let EventPayload::Message { text } = &event.payload else {
            tracing::warn!(event_type = %event.event_type, "inbound event without message payload");
            return Ok(());
        };

        // Reject early when the pool is full, before touching the
        // session log.
        if self.registry.active_count() >= self.registry.max_active() {
            self.reject_submission(&event, "registry full");
            return Ok(());
        }

        self.maybe_compact().await;

        let task_id = uuid::Uuid::new_v4().to_string();
        let mut context = TaskContext::new(&task_id, text, &event.source);
        match self.session.load() {
            Ok(history) => context.messages = history,
            Err(e) => tracing::warn!(error = %e, "failed to load session history"),
        }

        let user_message = Message::user(text);
        context.messages.push(user_message.clone());
        if let Err(e) = self.session.append(&user_message, None) {
            tracing::warn!(error = %e, "failed to persist user message");
        }

        let fsm = TaskFsm::new(context, self.settings.max_cognitive_iterations);
        match self.registry.register(fsm) {
            Ok(handle) => {
                tracing::info!(task_id = %handle.id, source = %event.source, "task created");
                self.bus.emit(
                    Event::new(EventType::TaskCreated, "agent")
                        .with_task(&handle.id)
                        .with_parent(&event.id),
                );
            }
            Err(e) => self.reject_submission(&event, &e.to_string()),
        }
        Ok(())
    }

    /// A creation failure is acknowledged with a task-less `TASK_FAILED`
    /// pointing back at the submit event.
    fn reject_submission(&self, event: &Event, error: &str) {
        tracing::warn!(source = %event.source, error, "inbound message rejected");
        self.bus.emit(
            Event::new(EventType::TaskFailed, "agent")
                .with_parent(&event.id)
                .with_payload(EventPayload::Failed {
                    error: error.to_owned(),
                }),
        );
    }

    /// Apply one lifecycle event to its task's FSM, then dispatch the
    /// stage for the new state.
    async fn handle_lifecycle(self: Arc<Self>, event: Event) -> Result<()> {
        let Some(task_id) = event.task_id.clone() else {
            // Task-less lifecycle events are submit acknowledgements.
            return Ok(());
        };

        let handle = match self.registry.get(&task_id) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(task_id = %task_id, event_type = %event.event_type, error = %e, "event for unknown task dropped");
                return Ok(());
            }
        };

        let new_state = {
            let mut fsm = handle.fsm.lock().await;
            match fsm.transition(&event) {
                Ok(TransitionOutcome::Changed(state)) => state,
                Ok(TransitionOutcome::Ignored) => return Ok(()),
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "transition rejected, event dropped");
                    return Ok(());
                }
            }
        };

        self.dispatch_stage(new_state, handle, event).await;
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Stage dispatch
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn dispatch_stage(self: Arc<Self>, state: TaskState, handle: Arc<TaskHandle>, trigger: Event) {
        match state {
            TaskState::Reasoning => self.spawn_stage(handle, StageKind::Reasoning),
            TaskState::Acting => self.spawn_stage(handle, StageKind::Acting),
            TaskState::Reflecting => self.spawn_stage(handle, StageKind::Reflecting),
            TaskState::Completed => self.finish_completed(&handle).await,
            TaskState::Failed => self.finish_failed(&handle, &trigger).await,
            TaskState::Suspended => self.notify_suspended(&handle).await,
            TaskState::Created => {}
        }
    }

    fn spawn_stage(self: Arc<Self>, handle: Arc<TaskHandle>, kind: StageKind) {
        let agent = self.clone();
        self.work.spawn(async move {
            let task_id = handle.id.clone();
            let result = match kind {
                StageKind::Reasoning => agent.run_reasoning(&handle).await,
                StageKind::Acting => agent.run_acting(&handle).await,
                StageKind::Reflecting => agent.run_reflecting(&handle).await,
            };
            if let Err(e) = result {
                tracing::warn!(task_id = %task_id, error = %e, "stage failed");
                agent.bus.emit(
                    Event::new(EventType::TaskFailed, "agent")
                        .with_task(&task_id)
                        .with_payload(EventPayload::Failed {
                            error: e.to_string(),
                        }),
                );
            }
        });
    }

    /// Thinker, then Planner on its output; ends in `REASON_DONE` or
    /// `NEED_MORE_INFO`.
    async fn run_reasoning(&self, handle: &Arc<TaskHandle>) -> Result<()> {
        let ctx = handle.fsm.lock().await.context.clone();
        let tools = self.tools.export();
        let memory = if ctx.iteration <= 1 {
            memory_index(&self.memory_dir)
        } else {
            None
        };

        let reasoning = self.thinker.run(&ctx, tools, memory).await?;

        let mut fsm = handle.fsm.lock().await;
        fsm.context.reasoning = Some(reasoning.clone());

        if reasoning.needs_clarification {
            drop(fsm);
            self.bus.emit(
                Event::new(EventType::NeedMoreInfo, "agent")
                    .with_task(&handle.id)
                    .with_payload(EventPayload::Reasoning { reasoning }),
            );
            return Ok(());
        }

        // Tool requests enter the conversation as an assistant message
        // so the follow-up round sees call and result paired.
        if !reasoning.tool_calls.is_empty() {
            let message = Message::assistant_tool_calls(
                reasoning.response.clone().unwrap_or_default(),
                reasoning.tool_calls.clone(),
            );
            fsm.context.messages.push(message.clone());
            if let Err(e) = self.session.append(&message, None) {
                tracing::warn!(error = %e, "failed to persist assistant tool calls");
            }
        }

        let plan = self.planner.run(&fsm.context, &reasoning);
        fsm.context.plan = Some(plan);
        drop(fsm);

        self.bus.emit(
            Event::new(EventType::ReasonDone, "agent")
                .with_task(&handle.id)
                .with_payload(EventPayload::Reasoning { reasoning }),
        );
        Ok(())
    }

    /// Execute the current plan step, or emit `ACT_DONE` when none
    /// remains.
    async fn run_acting(&self, handle: &Arc<TaskHandle>) -> Result<()> {
        let step = {
            let fsm = handle.fsm.lock().await;
            fsm.context
                .plan
                .as_ref()
                .and_then(|p| p.current_step().cloned())
        };
        let Some(step) = step else {
            self.bus
                .emit(Event::new(EventType::ActDone, "agent").with_task(&handle.id));
            return Ok(());
        };

        match step.action_type {
            ActionType::Respond => {
                let ctx = handle.fsm.lock().await.context.clone();
                let action = self.actor.respond(&ctx, &step);
                self.record_assistant_step(handle, &step, action).await;
            }
            ActionType::Generate => {
                let ctx = handle.fsm.lock().await.context.clone();
                let action = self.actor.generate(&ctx, &step).await;
                self.record_assistant_step(handle, &step, action).await;
            }
            ActionType::ToolCall => self.run_tool_step(handle, &step).await,
            ActionType::SubTask => {
                let now = chrono::Utc::now();
                let action = ActionResult {
                    step_index: step.index,
                    action_type: ActionType::SubTask,
                    input: step.action_params.clone(),
                    result: None,
                    error: Some("sub-tasks are not supported".into()),
                    success: false,
                    started_at: now,
                    completed_at: now,
                    duration_ms: 0,
                };
                let mut fsm = handle.fsm.lock().await;
                complete_step(&mut fsm.context, step.index);
                fsm.context.actions_done.push(action);
                drop(fsm);
                self.bus.emit(
                    Event::new(EventType::StepCompleted, "agent")
                        .with_task(&handle.id)
                        .with_payload(EventPayload::Step { index: step.index }),
                );
            }
        }
        Ok(())
    }

    /// Record a respond/generate action: append the assistant message,
    /// mark the step complete, emit `STEP_COMPLETED`.
    async fn record_assistant_step(
        &self,
        handle: &Arc<TaskHandle>,
        step: &pg_domain::task::PlanStep,
        action: ActionResult,
    ) {
        let reply = action
            .result
            .as_ref()
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();

        {
            let mut fsm = handle.fsm.lock().await;
            complete_step(&mut fsm.context, step.index);
            if action.success && !reply.is_empty() {
                let message = Message::assistant(&reply);
                fsm.context.messages.push(message.clone());
                if let Err(e) = self.session.append(&message, None) {
                    tracing::warn!(error = %e, "failed to persist assistant message");
                }
            }
            fsm.context.actions_done.push(action);
        }

        self.bus.emit(
            Event::new(EventType::StepCompleted, "agent")
                .with_task(&handle.id)
                .with_payload(EventPayload::Step { index: step.index }),
        );
    }

    /// Background tool execution under the tool semaphore. The task
    /// context is updated before the completion event is emitted.
    async fn run_tool_step(&self, handle: &Arc<TaskHandle>, step: &pg_domain::task::PlanStep) {
        let name = step
            .action_params
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();
        let call_id = step
            .action_params
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();
        let args = step
            .action_params
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let result = {
            let _permit = self
                .tool_permits
                .acquire()
                .await
                .expect("tool semaphore closed");
            self.executor
                .execute(
                    &name,
                    args.clone(),
                    ToolContext {
                        task_id: Some(handle.id.clone()),
                        data_dir: self.data_dir.clone(),
                        memory_dir: self.memory_dir.clone(),
                    },
                )
                .await
        };

        let action = ActionResult {
            step_index: step.index,
            action_type: ActionType::ToolCall,
            input: serde_json::json!({ "name": name, "arguments": args }),
            result: result.result.clone(),
            error: result.error.clone(),
            success: result.success,
            started_at: result.started_at,
            completed_at: result.completed_at,
            duration_ms: result.duration_ms,
        };

        let message = Message::tool_result(&call_id, result.content());
        {
            let mut fsm = handle.fsm.lock().await;
            complete_step(&mut fsm.context, step.index);
            fsm.context.messages.push(message.clone());
            fsm.context.actions_done.push(action);
        }
        if let Err(e) = self.session.append(&message, None) {
            tracing::warn!(error = %e, "failed to persist tool result");
        }

        let event_type = if result.success {
            EventType::ToolCallCompleted
        } else {
            EventType::ToolCallFailed
        };
        self.bus.emit(
            Event::new(event_type, "agent")
                .with_task(&handle.id)
                .with_payload(EventPayload::Tool {
                    outcome: ToolOutcome {
                        tool: name,
                        success: result.success,
                        result: result.result,
                        error: result.error,
                        started_at: result.started_at,
                        completed_at: result.completed_at,
                        duration_ms: result.duration_ms,
                    },
                }),
        );
    }

    /// Reflector; on `complete`, compile the final result.
    async fn run_reflecting(&self, handle: &Arc<TaskHandle>) -> Result<()> {
        let reflection = {
            let mut fsm = handle.fsm.lock().await;
            let reflection = self.reflector.run(&fsm.context);
            fsm.context.reflections.push(reflection.clone());
            if reflection.verdict == Verdict::Complete {
                fsm.context.final_result = Some(fsm.context.compile_result());
            }
            reflection
        };

        self.bus.emit(
            Event::new(EventType::ReflectDone, "agent")
                .with_task(&handle.id)
                .with_payload(EventPayload::Reflection { reflection }),
        );
        Ok(())
    }

    async fn finish_completed(&self, handle: &Arc<TaskHandle>) {
        self.registry.mark_terminal(&handle.id);

        let (result, source) = {
            let fsm = handle.fsm.lock().await;
            (
                fsm.context
                    .final_result
                    .clone()
                    .unwrap_or_else(|| fsm.context.compile_result()),
                fsm.context.source.clone(),
            )
        };
        tracing::info!(task_id = %handle.id, iterations = result.iterations, "task completed");

        if let Some(response) = result.response.clone().filter(|r| !r.is_empty()) {
            let _ = self
                .outbound
                .send(OutboundMessage {
                    text: response,
                    source,
                    task_id: Some(handle.id.clone()),
                })
                .await;
        }

        self.bus.emit(
            Event::new(EventType::TaskCompleted, "agent")
                .with_task(&handle.id)
                .with_payload(EventPayload::Completed { result }),
        );
    }

    async fn finish_failed(&self, handle: &Arc<TaskHandle>, trigger: &Event) {
        self.registry.mark_terminal(&handle.id);

        let (error, source) = {
            let fsm = handle.fsm.lock().await;
            (
                fsm.context
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".into()),
                fsm.context.source.clone(),
            )
        };
        tracing::warn!(task_id = %handle.id, error = %error, "task failed");

        let _ = self
            .outbound
            .send(OutboundMessage {
                text: format!("I couldn't finish that request ({error})."),
                source,
                task_id: Some(handle.id.clone()),
            })
            .await;

        // The trigger may already be the public TASK_FAILED event; emit
        // the completion notification only when it isn't.
        if trigger.event_type != EventType::TaskFailed {
            self.bus.emit(
                Event::new(EventType::TaskFailed, "agent")
                    .with_task(&handle.id)
                    .with_payload(EventPayload::Failed { error }),
            );
        }
    }

    /// A suspended task waits for external input; surface the
    /// clarification question when there is one.
    async fn notify_suspended(&self, handle: &Arc<TaskHandle>) {
        let (question, source) = {
            let fsm = handle.fsm.lock().await;
            (
                fsm.context.suspend_reason.clone(),
                fsm.context.source.clone(),
            )
        };
        if let Some(question) = question {
            let _ = self
                .outbound
                .send(OutboundMessage {
                    text: question,
                    source,
                    task_id: Some(handle.id.clone()),
                })
                .await;
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Session compaction
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Compact the session log when it approaches the context window.
    async fn maybe_compact(&self) {
        let Some(window) = self.settings.context_window else {
            return;
        };
        let Ok(messages) = self.session.load() else {
            return;
        };
        if messages.len() < 2 {
            return;
        }

        let tokens = SessionStore::estimate_tokens(&messages, &HeuristicCounter);
        let limit = (window as f64 * self.settings.compact_threshold) as usize;
        if tokens < limit {
            return;
        }

        tracing::info!(tokens, limit, "session log near context window, compacting");
        let summary = match self.summarise(&messages).await {
            Ok(summary) if !summary.is_empty() => summary,
            Ok(_) => format!("Conversation compacted ({} messages).", messages.len()),
            Err(e) => {
                tracing::warn!(error = %e, "summary generation failed, using fallback");
                format!("Conversation compacted ({} messages).", messages.len())
            }
        };

        let prev = self
            .session
            .list_archives()
            .ok()
            .and_then(|archives| archives.last().cloned());
        if let Err(e) = self.session.compact(&summary, prev.as_deref()) {
            tracing::warn!(error = %e, "compaction failed, continuing with full history");
        }
    }

    async fn summarise(&self, messages: &[Message]) -> Result<String> {
        let mut conversation = String::new();
        for message in messages {
            conversation.push_str(&format!("{}: ", message.role));
            if message.content.len() > 2000 {
                conversation.push_str(&message.content[..1000]);
                conversation.push_str(" [...]");
            } else {
                conversation.push_str(&message.content);
            }
            conversation.push('\n');
        }

        let prompt = format!(
            "Summarize the following conversation history into a concise \
             summary that preserves the current goal, key decisions, open \
             questions, and important facts about the user. Be concise but \
             keep all actionable context.\n\nCONVERSATION:\n{conversation}"
        );

        let req = GenerateRequest {
            messages: vec![Message::user(prompt)],
            temperature: Some(0.1),
            max_tokens: Some(2_000),
            ..Default::default()
        };

        let _permit = self.llm_permits.acquire().await.expect("semaphore closed");
        Ok(self.model.generate(req).await?.text)
    }
}

enum StageKind {
    Reasoning,
    Acting,
    Reflecting,
}

fn complete_step(ctx: &mut TaskContext, index: usize) {
    if let Some(plan) = ctx.plan.as_mut() {
        if let Some(step) = plan.steps.iter_mut().find(|s| s.index == index) {
            step.completed = true;
        }
    }
}
