use serde::{Deserialize, Serialize};

use pg_domain::error::Result;
use pg_domain::message::{Message, ToolCall, ToolDefinition, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic generation request.
///
/// Serializable so it can cross the host↔worker boundary unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// System prompt, kept separate from the message list (Anthropic
    /// requires it there; OpenAI adapters fold it back in).
    #[serde(default)]
    pub system: Option<String>,
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    /// Tool definitions the model may invoke.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    /// `"auto"`, `"none"`, or a tool name. `None` lets the provider choose.
    #[serde(default)]
    pub tool_choice: Option<String>,
}

/// A provider-agnostic generation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// Textual content of the response.
    pub text: String,
    /// Tool calls emitted by the model, in order.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Why the model stopped (e.g. "stop", "tool_calls").
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
    /// The model that actually produced the response.
    pub model: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core model trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter implements.
///
/// Implementations translate between these types and the wire format of
/// a concrete endpoint. The project-worker LLM proxy also implements
/// this trait, forwarding calls to the host.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send one generation request and wait for the full response.
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse>;

    /// The `"<provider>/<model>"` spec this instance serves.
    fn model_id(&self) -> &str;
}
