use crate::event::EventType;
use crate::task::TaskState;

/// Shared error type used across all Pegasus crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("llm {provider}: {message}")]
    Llm { provider: String, message: String },

    #[error("llm {provider} rate limited: {message}")]
    LlmRateLimited { provider: String, message: String },

    #[error("llm {provider} timed out after {ms} ms")]
    LlmTimeout { provider: String, ms: u64 },

    #[error("tool: {0}")]
    Tool(String),

    #[error("invalid transition: {event} in state {state}")]
    InvalidStateTransition { state: TaskState, event: EventType },

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task registry full: {active}/{max} active tasks")]
    RegistryFull { active: usize, max: usize },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("worker: {0}")]
    Worker(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
