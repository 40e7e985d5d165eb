//! The per-task finite state machine.
//!
//! One instance per task, owning the `TaskContext` exclusively. The
//! transition table is closed: anything not listed is an
//! `InvalidStateTransition`, and terminal states ignore every event.

use pg_domain::error::{Error, Result};
use pg_domain::event::{Event, EventPayload, EventType};
use pg_domain::message::Message;
use pg_domain::task::{TaskContext, TaskState, Verdict};
use pg_domain::trace::TraceEvent;

/// What a transition did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Changed(TaskState),
    /// The task is terminal; the event was dropped without effect.
    Ignored,
}

#[derive(Debug)]
pub struct TaskFsm {
    state: TaskState,
    /// State to restore when a suspended task resumes.
    resume_state: Option<TaskState>,
    max_iterations: u32,
    pub context: TaskContext,
}

impl TaskFsm {
    pub fn new(context: TaskContext, max_iterations: u32) -> Self {
        Self {
            state: TaskState::Created,
            resume_state: None,
            max_iterations,
            context,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Apply one event to the state machine.
    ///
    /// Returns the transition outcome, or `InvalidStateTransition` when
    /// the (state, event) pair is not in the table — the caller logs and
    /// drops the event, leaving the task untouched.
    pub fn transition(&mut self, event: &Event) -> Result<TransitionOutcome> {
        use EventType::*;
        use TaskState::*;

        if self.state.is_terminal() {
            return Ok(TransitionOutcome::Ignored);
        }

        let next = match (self.state, event.event_type) {
            // Any non-terminal state can fail.
            (_, TaskFailed) => {
                if let EventPayload::Failed { error } = &event.payload {
                    self.context.error = Some(error.clone());
                }
                Failed
            }

            (Created, TaskCreated) => Reasoning,

            (Reasoning, ReasonDone) => Acting,
            (Reasoning, NeedMoreInfo) => self.suspend(event),
            (Reasoning | Acting | Reflecting, TaskSuspended) => self.suspend(event),

            (Acting, StepCompleted | ToolCallCompleted | ToolCallFailed) => {
                match self.context.plan.as_ref() {
                    Some(plan) if plan.current_step().is_some() => Acting,
                    _ => Reflecting,
                }
            }
            (Acting, ActDone) => Reflecting,

            (Reflecting, ReflectDone) => match self.reflect_verdict(event) {
                Verdict::Complete => Completed,
                Verdict::Continue | Verdict::Replan => {
                    if self.context.iteration < self.max_iterations {
                        Reasoning
                    } else {
                        self.context.error = Some("max iterations".into());
                        Failed
                    }
                }
            },

            (Suspended, TaskResumed) => self.resume_state.take().unwrap_or(Reasoning),

            (state, event_type) => {
                return Err(Error::InvalidStateTransition {
                    state,
                    event: event_type,
                })
            }
        };

        if next == Reasoning {
            self.context.iteration += 1;
        }
        if next != Suspended {
            self.context.suspended_state = None;
        }

        TraceEvent::TaskTransition {
            task_id: self.context.id.clone(),
            from: self.state.to_string(),
            to: next.to_string(),
            trigger: event.event_type.to_string(),
        }
        .emit();

        self.state = next;
        Ok(TransitionOutcome::Changed(next))
    }

    /// Rewind a completed task so it can run again with fresh input.
    ///
    /// The FSM parks in `Suspended` with `Reasoning` as the recorded
    /// prior state, so the caller's `TASK_RESUMED` event drives it
    /// through the normal table row.
    pub fn reset_for_resume(&mut self, new_input: &str) {
        self.context.input_text = new_input.to_owned();
        self.context.messages.push(Message::user(new_input));
        self.context.iteration = 0;
        self.context.plan = None;
        self.context.reasoning = None;
        self.context.actions_done.clear();
        self.context.final_result = None;
        self.context.error = None;
        self.context.suspend_reason = None;

        self.state = TaskState::Suspended;
        self.resume_state = Some(TaskState::Reasoning);
    }

    fn suspend(&mut self, event: &Event) -> TaskState {
        self.resume_state = Some(self.state);
        self.context.suspended_state = Some(self.state);
        if let EventPayload::Reasoning { reasoning } = &event.payload {
            self.context.suspend_reason = reasoning.response.clone();
        }
        TaskState::Suspended
    }

    /// Verdict carried on the `REFLECT_DONE` event, falling back to the
    /// last recorded reflection.
    fn reflect_verdict(&self, event: &Event) -> Verdict {
        if let EventPayload::Reflection { reflection } = &event.payload {
            return reflection.verdict;
        }
        self.context
            .reflections
            .last()
            .map(|r| r.verdict)
            .unwrap_or(Verdict::Complete)
    }
}
