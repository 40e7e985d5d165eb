//! Task records: lifecycle states, the per-task context, plans, action
//! results, and reflections.
//!
//! Stage outputs are tagged structs rather than free-form maps so the
//! agent can dispatch on them without re-parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Message, ToolCall};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Created,
    Reasoning,
    Acting,
    Reflecting,
    Suspended,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Created => "CREATED",
            TaskState::Reasoning => "REASONING",
            TaskState::Acting => "ACTING",
            TaskState::Reflecting => "REFLECTING",
            TaskState::Suspended => "SUSPENDED",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plans
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ToolCall,
    Respond,
    Generate,
    SubTask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: usize,
    pub description: String,
    pub action_type: ActionType,
    pub action_params: serde_json::Value,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub reasoning: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// The current step is the first incomplete step in index order.
    pub fn current_step(&self) -> Option<&PlanStep> {
        self.steps.iter().find(|s| !s.completed)
    }

    pub fn current_step_mut(&mut self) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|s| !s.completed)
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.completed)
    }

    /// Whether any step invokes a tool.
    pub fn has_tool_calls(&self) -> bool {
        self.steps
            .iter()
            .any(|s| s.action_type == ActionType::ToolCall)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Output of the reasoning stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reasoning {
    /// Free-text response (the answer for conversation tasks).
    #[serde(default)]
    pub response: Option<String>,
    /// How the model intends to approach the task.
    #[serde(default)]
    pub approach: Option<String>,
    #[serde(default)]
    pub needs_clarification: bool,
    /// Tool calls the model requested, in order.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// Snapshot of one executed plan step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub step_index: usize,
    pub action_type: ActionType,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Complete,
    Continue,
    Replan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    pub verdict: Verdict,
    pub assessment: String,
    #[serde(default)]
    pub lessons: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task context and result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The compiled outcome of a completed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub input: String,
    pub response: Option<String>,
    pub actions: Vec<ActionResult>,
    pub reflections: Vec<Reflection>,
    pub iterations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Conversation,
    Generation,
}

/// Mutable per-task record. Owned exclusively by the task's FSM; the
/// agent only touches it through the registry's per-task lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub id: String,
    pub input_text: String,
    #[serde(default)]
    pub input_metadata: serde_json::Value,
    pub source: String,
    #[serde(default)]
    pub perception: Option<String>,
    #[serde(default)]
    pub reasoning: Option<Reasoning>,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub actions_done: Vec<ActionResult>,
    #[serde(default)]
    pub reflections: Vec<Reflection>,
    /// Conversation shared with the LLM, ordered by append time.
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default)]
    pub final_result: Option<TaskResult>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub suspended_state: Option<TaskState>,
    #[serde(default)]
    pub suspend_reason: Option<String>,
}

impl TaskContext {
    pub fn new(id: impl Into<String>, input_text: impl Into<String>, source: impl Into<String>) -> Self {
        let input_text = input_text.into();
        let source = source.into();
        Self {
            id: id.into(),
            perception: Some(format!("{source}: {}", input_text.trim())),
            input_text,
            input_metadata: serde_json::Value::Null,
            source,
            reasoning: None,
            plan: None,
            actions_done: Vec::new(),
            reflections: Vec::new(),
            messages: Vec::new(),
            iteration: 0,
            final_result: None,
            error: None,
            suspended_state: None,
            suspend_reason: None,
        }
    }

    /// Conversation tasks answer directly; anything else goes through a
    /// generation step. The kind can be forced via the `taskType`
    /// metadata key.
    pub fn kind(&self) -> TaskKind {
        match self
            .input_metadata
            .get("taskType")
            .and_then(|v| v.as_str())
        {
            Some("generation") => TaskKind::Generation,
            _ => TaskKind::Conversation,
        }
    }

    /// Compile the final result from the accumulated stage outputs.
    ///
    /// The response is the output of the last successful respond/generate
    /// action, falling back to the last reasoning response.
    pub fn compile_result(&self) -> TaskResult {
        let response = self
            .actions_done
            .iter()
            .rev()
            .find(|a| {
                a.success
                    && matches!(a.action_type, ActionType::Respond | ActionType::Generate)
            })
            .and_then(|a| a.result.as_ref())
            .and_then(|v| v.as_str().map(str::to_owned))
            .or_else(|| self.reasoning.as_ref().and_then(|r| r.response.clone()));

        TaskResult {
            task_id: self.id.clone(),
            input: self.input_text.clone(),
            response,
            actions: self.actions_done.clone(),
            reflections: self.reflections.clone(),
            iterations: self.iteration,
        }
    }
}
