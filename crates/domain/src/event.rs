//! The event model: everything that happens in the runtime is an
//! immutable [`Event`] fanned out over the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{Reasoning, Reflection, TaskResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Closed enumeration of event types. Wire names are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    MessageReceived,
    WebhookTriggered,
    ScheduleFired,
    SystemStarted,
    TaskCreated,
    TaskSuspended,
    TaskResumed,
    TaskCompleted,
    TaskFailed,
    ReasonDone,
    ActDone,
    StepCompleted,
    ToolCallCompleted,
    ToolCallFailed,
    ReflectDone,
    NeedMoreInfo,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::MessageReceived => "MESSAGE_RECEIVED",
            EventType::WebhookTriggered => "WEBHOOK_TRIGGERED",
            EventType::ScheduleFired => "SCHEDULE_FIRED",
            EventType::SystemStarted => "SYSTEM_STARTED",
            EventType::TaskCreated => "TASK_CREATED",
            EventType::TaskSuspended => "TASK_SUSPENDED",
            EventType::TaskResumed => "TASK_RESUMED",
            EventType::TaskCompleted => "TASK_COMPLETED",
            EventType::TaskFailed => "TASK_FAILED",
            EventType::ReasonDone => "REASON_DONE",
            EventType::ActDone => "ACT_DONE",
            EventType::StepCompleted => "STEP_COMPLETED",
            EventType::ToolCallCompleted => "TOOL_CALL_COMPLETED",
            EventType::ToolCallFailed => "TOOL_CALL_FAILED",
            EventType::ReflectDone => "REFLECT_DONE",
            EventType::NeedMoreInfo => "NEED_MORE_INFO",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of one tool execution, as carried on
/// `TOOL_CALL_COMPLETED` / `TOOL_CALL_FAILED` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutcome {
    pub tool: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Typed event payloads. One variant per payload shape; events with no
/// payload use [`EventPayload::None`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    None,
    /// Inbound text (`MESSAGE_RECEIVED`, `WEBHOOK_TRIGGERED`,
    /// `SCHEDULE_FIRED`). The event `source` carries the channel.
    Message { text: String },
    /// Reasoning-stage output (`REASON_DONE`, `NEED_MORE_INFO`).
    Reasoning { reasoning: Reasoning },
    /// A plan step finished (`STEP_COMPLETED`).
    Step { index: usize },
    /// Tool execution outcome.
    Tool {
        #[serde(flatten)]
        outcome: ToolOutcome,
    },
    /// Reflection-stage output (`REFLECT_DONE`).
    Reflection { reflection: Reflection },
    /// Terminal success (`TASK_COMPLETED`).
    Completed { result: TaskResult },
    /// Terminal failure (`TASK_FAILED`).
    Failed { error: String },
    /// A completed task was resumed with fresh input (`TASK_RESUMED`).
    Resumed { input: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An immutable runtime event. Never mutated after emission; retained in
/// the bus history until evicted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: EventType,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Causal parent, for tracing an event back to what triggered it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            source: source.into(),
            timestamp: Utc::now(),
            task_id: None,
            parent_event_id: None,
            payload: EventPayload::None,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_parent(mut self, parent_event_id: impl Into<String>) -> Self {
        self.parent_event_id = Some(parent_event_id.into());
        self
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = payload;
        self
    }
}

/// Anything that accepts events for publication. Implemented by the
/// event bus; leaf crates hold an `Arc<dyn EventSink>` so they can
/// publish without depending on the bus itself.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_wire_names() {
        let json = serde_json::to_string(&EventType::ToolCallCompleted).unwrap();
        assert_eq!(json, "\"TOOL_CALL_COMPLETED\"");
        assert_eq!(EventType::NeedMoreInfo.to_string(), "NEED_MORE_INFO");
    }

    #[test]
    fn message_payload_shape() {
        let event = Event::new(EventType::MessageReceived, "terminal")
            .with_payload(EventPayload::Message { text: "hi".into() });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["text"], "hi");
        assert_eq!(json["event_type"], "MESSAGE_RECEIVED");
    }

    #[test]
    fn tool_outcome_fields_are_flattened() {
        let now = Utc::now();
        let payload = EventPayload::Tool {
            outcome: ToolOutcome {
                tool: "current_time".into(),
                success: true,
                result: Some(serde_json::json!("12:00")),
                error: None,
                started_at: now,
                completed_at: now,
                duration_ms: 3,
            },
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["durationMs"], 3);
        assert!(json.get("outcome").is_none());
    }

    #[test]
    fn builder_sets_task_and_parent() {
        let event = Event::new(EventType::TaskCreated, "agent")
            .with_task("t1")
            .with_parent("e0");
        assert_eq!(event.task_id.as_deref(), Some("t1"));
        assert_eq!(event.parent_event_id.as_deref(), Some("e0"));
    }
}
