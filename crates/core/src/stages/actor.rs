//! The acting stage: executes respond and generate steps. Tool steps
//! are dispatched by the agent's background tool path.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;

use pg_domain::message::Message;
use pg_domain::task::{ActionResult, ActionType, PlanStep, TaskContext};
use pg_providers::{GenerateRequest, LanguageModel};

use super::{system_prompt, Persona};

const GENERATE_INSTRUCTION: &str = "\
Produce the content the user asked for. Output only the content itself, \
no preamble and no commentary.";

pub struct Actor {
    model: Arc<dyn LanguageModel>,
    persona: Persona,
    llm_permits: Arc<Semaphore>,
}

impl Actor {
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

    /// `respond`: answer with the reasoning stage's response. Runs
    /// synchronously — no model call.
    pub fn respond(&self, ctx: &TaskContext, step: &PlanStep) -> ActionResult {
        let started_at = Utc::now();
        let response = ctx
            .reasoning
            .as_ref()
            .and_then(|r| r.response.clone())
            .unwrap_or_default();

        let completed_at = Utc::now();
        ActionResult {
            step_index: step.index,
            action_type: ActionType::Respond,
            input: serde_json::json!({ "text": ctx.input_text }),
            result: Some(serde_json::json!(response)),
            error: None,
            success: true,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
        }
    }

    /// `generate`: one model call with the step's prompt.
    pub async fn generate(&self, ctx: &TaskContext, step: &PlanStep) -> ActionResult {
        let started_at = Utc::now();
        let prompt = step
            .action_params
            .get("prompt")
            .and_then(|v| v.as_str())
            .unwrap_or(&ctx.input_text)
            .to_owned();

        let req = GenerateRequest {
            system: Some(system_prompt(&self.persona, GENERATE_INSTRUCTION)),
            messages: vec![Message::user(&prompt)],
            temperature: Some(0.7),
            ..Default::default()
        };

        let outcome = {
            let _permit = self.llm_permits.acquire().await.expect("semaphore closed");
            self.model.generate(req).await
        };

        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        match outcome {
            Ok(resp) => ActionResult {
                step_index: step.index,
                action_type: ActionType::Generate,
                input: serde_json::json!({ "prompt": prompt }),
                result: Some(serde_json::json!(resp.text)),
                error: None,
                success: true,
                started_at,
                completed_at,
                duration_ms,
            },
            Err(e) => ActionResult {
                step_index: step.index,
                action_type: ActionType::Generate,
                input: serde_json::json!({ "prompt": prompt }),
                result: None,
                error: Some(e.to_string()),
                success: false,
                started_at,
                completed_at,
                duration_ms,
            },
        }
    }
}
