//! Worker protocol: message types exchanged between the host and a
//! project worker.
//!
//! Workers are isolated schedulers hosting one project's agent. All
//! LLM calls proxy back to the host, where the shared model registry
//! and concurrency limits live; the `request_id` correlates each
//! `llm_request` with its `llm_response`/`llm_error`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use pg_providers::{GenerateRequest, GenerateResponse};

/// A message crossing the project boundary in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMessage {
    pub text: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Host → worker envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// First message after spawn: where the project lives.
    Init {
        project_path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_window: Option<u32>,
    },

    /// Deliver an outbound message into the project's agent.
    Message { message: ProjectMessage },

    /// Successful answer to a proxied LLM request.
    LlmResponse {
        request_id: String,
        result: GenerateResponse,
    },

    /// Failed answer to a proxied LLM request.
    LlmError { request_id: String, error: String },

    /// Ask the worker to stop cleanly.
    Shutdown,
}

/// Worker → host envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Init finished; the worker accepts messages.
    Ready,

    Error { message: String },

    /// The project's agent produced a message for the host.
    Notify { message: ProjectMessage },

    /// Proxy an LLM call to the host's model registry.
    LlmRequest {
        request_id: String,
        options: GenerateRequest,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_override: Option<String>,
    },

    /// Clean shutdown finished; the worker is about to exit.
    #[serde(rename = "shutdown-complete")]
    ShutdownComplete,
}

/// Allocates request ids unique within one worker.
#[derive(Debug, Default)]
pub struct RequestIdAllocator {
    next: AtomicU64,
}

impl RequestIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("req-{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_message_tags() {
        let json = serde_json::to_value(&HostMessage::Shutdown).unwrap();
        assert_eq!(json["type"], "shutdown");

        let json = serde_json::to_value(&HostMessage::Init {
            project_path: PathBuf::from("/projects/demo"),
            context_window: None,
        })
        .unwrap();
        assert_eq!(json["type"], "init");
        assert!(json.get("context_window").is_none());
    }

    #[test]
    fn shutdown_complete_wire_name() {
        let json = serde_json::to_value(&WorkerMessage::ShutdownComplete).unwrap();
        assert_eq!(json["type"], "shutdown-complete");
    }

    #[test]
    fn llm_request_round_trip() {
        let msg = WorkerMessage::LlmRequest {
            request_id: "req-7".into(),
            options: GenerateRequest {
                system: Some("be brief".into()),
                messages: vec![pg_domain::message::Message::user("hi")],
                ..Default::default()
            },
            model_override: Some("openai/gpt-4o".into()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: WorkerMessage = serde_json::from_str(&json).unwrap();
        match back {
            WorkerMessage::LlmRequest {
                request_id,
                options,
                model_override,
            } => {
                assert_eq!(request_id, "req-7");
                assert_eq!(options.messages.len(), 1);
                assert_eq!(model_override.as_deref(), Some("openai/gpt-4o"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn allocator_ids_are_unique() {
        let alloc = RequestIdAllocator::new();
        let a = alloc.next();
        let b = alloc.next();
        assert_ne!(a, b);
    }
}
