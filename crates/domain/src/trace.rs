use serde::Serialize;

/// Structured trace events emitted across all Pegasus crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    TaskTransition {
        task_id: String,
        from: String,
        to: String,
        trigger: String,
    },
    SessionAppend {
        entries: usize,
    },
    SessionCompacted {
        archive: String,
        entries: usize,
    },
    ToolExecuted {
        tool: String,
        task_id: Option<String>,
        success: bool,
        duration_ms: u64,
    },
    LlmRequest {
        model: String,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    WorkerStarted {
        project_id: String,
    },
    WorkerStopped {
        project_id: String,
        forced: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "pg_event");
    }
}
