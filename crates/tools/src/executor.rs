//! Timeout-bounded tool execution.
//!
//! Every failure mode is in-band: unknown tools, handler errors, and
//! timeouts all come back as a `ToolResult { success: false, .. }` with
//! wall-clock timings stamped, never as an `Err`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pg_domain::trace::TraceEvent;

use crate::registry::{ToolContext, ToolRegistry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolResult
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ToolResult {
    /// The text handed back to the LLM as the tool result.
    pub fn content(&self) -> String {
        if self.success {
            match &self.result {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => String::new(),
            }
        } else {
            format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runs tools against the registry under a per-invocation wall-clock
/// timeout. Concurrency is capped by the caller (the agent holds its
/// tool semaphore around each `execute`).
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_sec: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_sec),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn execute(&self, name: &str, args: Value, ctx: ToolContext) -> ToolResult {
        let started_at = Utc::now();

        let Some(spec) = self.registry.get(name) else {
            return ToolResult {
                success: false,
                result: None,
                error: Some(format!("unknown tool: {name}")),
                started_at,
                completed_at: started_at,
                duration_ms: 0,
            };
        };

        let task_id = ctx.task_id.clone();
        let clock = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, spec.handler.call(args, ctx)).await;
        let completed_at = Utc::now();
        let duration_ms = clock.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(value)) => ToolResult {
                success: true,
                result: Some(value),
                error: None,
                started_at,
                completed_at,
                duration_ms,
            },
            Ok(Err(e)) => ToolResult {
                success: false,
                result: None,
                error: Some(e.to_string()),
                started_at,
                completed_at,
                duration_ms,
            },
            Err(_) => ToolResult {
                success: false,
                result: None,
                error: Some(format!("timeout after {}s", self.timeout.as_secs())),
                started_at,
                completed_at,
                duration_ms,
            },
        };

        TraceEvent::ToolExecuted {
            tool: name.to_owned(),
            task_id,
            success: result.success,
            duration_ms,
        }
        .emit();

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolSpec;
    use pg_domain::error::Error;

    fn executor_with(specs: Vec<ToolSpec>, timeout_sec: u64) -> ToolExecutor {
        let registry = Arc::new(ToolRegistry::new());
        registry.register_many(specs);
        ToolExecutor::new(registry, timeout_sec)
    }

    #[tokio::test]
    async fn unknown_tool_fails_in_band_with_zero_duration() {
        let executor = executor_with(vec![], 5);
        let result = executor
            .execute("nonexistent_tool_xyz", serde_json::json!({}), ToolContext::default())
            .await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("unknown tool"));
        assert_eq!(result.duration_ms, 0);
    }

    #[tokio::test]
    async fn handler_value_comes_back_as_success() {
        let spec = ToolSpec::from_fn(
            "answer",
            "returns 42",
            serde_json::json!({ "type": "object" }),
            |_args, _ctx| async { Ok(serde_json::json!(42)) },
        );
        let executor = executor_with(vec![spec], 5);
        let result = executor
            .execute("answer", serde_json::json!({}), ToolContext::default())
            .await;
        assert!(result.success);
        assert_eq!(result.result, Some(serde_json::json!(42)));
        assert!(result.completed_at >= result.started_at);
    }

    #[tokio::test]
    async fn handler_error_is_in_band() {
        let spec = ToolSpec::from_fn(
            "broken",
            "always fails",
            serde_json::json!({ "type": "object" }),
            |_args, _ctx| async { Err(Error::Tool("disk on fire".into())) },
        );
        let executor = executor_with(vec![spec], 5);
        let result = executor
            .execute("broken", serde_json::json!({}), ToolContext::default())
            .await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("disk on fire"));
        assert!(result.content().starts_with("Error:"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let spec = ToolSpec::from_fn(
            "sleepy",
            "sleeps forever",
            serde_json::json!({ "type": "object" }),
            |_args, _ctx| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(serde_json::json!(null))
            },
        );
        let executor = executor_with(vec![spec], 1);
        let result = executor
            .execute("sleepy", serde_json::json!({}), ToolContext::default())
            .await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn string_results_are_passed_through_verbatim() {
        let spec = ToolSpec::from_fn(
            "clock",
            "fixed time",
            serde_json::json!({ "type": "object" }),
            |_args, _ctx| async { Ok(serde_json::json!("2026-02-28T14:30:05Z")) },
        );
        let executor = executor_with(vec![spec], 5);
        let result = executor
            .execute("clock", serde_json::json!({}), ToolContext::default())
            .await;
        assert_eq!(result.content(), "2026-02-28T14:30:05Z");
    }
}
