//! The reasoning stage: one model call that either answers directly,
//! requests tool calls, or asks for clarification.

use std::sync::Arc;

use tokio::sync::Semaphore;

use pg_domain::error::Result;
use pg_domain::message::ToolDefinition;
use pg_domain::task::{Reasoning, TaskContext};
use pg_providers::{GenerateRequest, GenerateResponse, LanguageModel};

use super::{system_prompt, Persona};

const REASONING_INSTRUCTION: &str = "\
Work out how to handle the user's latest message.
- If you can answer directly, just answer.
- If a tool would help, call it.
- If the request is ambiguous, reply with a JSON object \
  {\"response\": \"<your clarifying question>\", \"needs_clarification\": true}.";

pub struct Thinker {
    model: Arc<dyn LanguageModel>,
    persona: Persona,
    llm_permits: Arc<Semaphore>,
}

impl Thinker {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        persona: Persona,
        llm_permits: Arc<Semaphore>,
    ) -> Self {
        Self {
            model,
            persona,
            llm_permits,
        }
    }

    /// One reasoning round over the task's conversation.
    ///
    /// `memory_index` is only supplied on the first iteration, giving
    /// the model a view of the knowledge files it can ask for.
    pub async fn run(
        &self,
        ctx: &TaskContext,
        tools: Vec<ToolDefinition>,
        memory_index: Option<String>,
    ) -> Result<Reasoning> {
        let mut system = system_prompt(&self.persona, REASONING_INSTRUCTION);
        if let Some(index) = memory_index {
            system.push_str("\n\n");
            system.push_str(&index);
        }

        let req = GenerateRequest {
            system: Some(system),
            messages: ctx.messages.clone(),
            temperature: Some(0.2),
            tools,
            ..Default::default()
        };

        let _permit = self.llm_permits.acquire().await.expect("semaphore closed");
        let resp = self.model.generate(req).await?;
        Ok(parse_reasoning(resp))
    }
}

/// Turn a raw model response into a tagged [`Reasoning`].
fn parse_reasoning(resp: GenerateResponse) -> Reasoning {
    if !resp.tool_calls.is_empty() {
        return Reasoning {
            response: (!resp.text.is_empty()).then(|| resp.text),
            approach: None,
            needs_clarification: false,
            tool_calls: resp.tool_calls,
        };
    }

    // Models asked for clarification answer with a small JSON object;
    // anything else is a plain answer.
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&resp.text) {
        if parsed.is_object() {
            let response = parsed
                .get("response")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
                .or_else(|| Some(resp.text.clone()));
            return Reasoning {
                response,
                approach: parsed
                    .get("approach")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned),
                needs_clarification: parsed
                    .get("needs_clarification")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                tool_calls: Vec::new(),
            };
        }
    }

    Reasoning {
        response: Some(resp.text),
        approach: None,
        needs_clarification: false,
        tool_calls: Vec::new(),
    }
}
