//! Anthropic Messages API adapter.
//!
//! Translates between the provider-agnostic request types and the
//! `/v1/messages` wire format: system prompt as a top-level field, tool
//! results as user content blocks, tool calls as `tool_use` blocks.

use std::time::Duration;

use serde_json::Value;

use pg_domain::error::{Error, Result};
use pg_domain::message::{Message, Role, ToolCall, ToolDefinition, Usage};

use crate::traits::{GenerateRequest, GenerateResponse, LanguageModel};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4_096;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnthropicModel {
    spec: String,
    provider: String,
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicModel {
    pub fn new(
        spec: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout_ms: u64,
    ) -> Result<Self> {
        let spec = spec.into();
        let (provider, model) = spec
            .split_once('/')
            .ok_or_else(|| Error::Config(format!("bad model spec '{spec}'")))?;
        let provider = provider.to_owned();
        let model = model.to_owned();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            spec,
            provider,
            model,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            client,
        })
    }

    fn build_body(&self, req: &GenerateRequest) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages_to_anthropic(&req.messages),
        });
        if let Some(system) = &req.system {
            body["system"] = Value::String(system.clone());
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(top_p) = req.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_anthropic).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(choice) = &req.tool_choice {
            body["tool_choice"] = match choice.as_str() {
                "auto" => serde_json::json!({ "type": "auto" }),
                "none" => serde_json::json!({ "type": "none" }),
                name => serde_json::json!({ "type": "tool", "name": name }),
            };
        }
        body
    }
}

#[async_trait::async_trait]
impl LanguageModel for AnthropicModel {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&req);
        let started = std::time::Instant::now();

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::LlmTimeout {
                        provider: self.provider.clone(),
                        ms: started.elapsed().as_millis() as u64,
                    }
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::LlmRateLimited {
                provider: self.provider.clone(),
                message,
            });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Llm {
                provider: self.provider.clone(),
                message: format!("status {status}: {message}"),
            });
        }

        let json: Value = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        let parsed = parse_response(&self.provider, &json)?;

        pg_domain::trace::TraceEvent::LlmRequest {
            model: self.spec.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            prompt_tokens: parsed.usage.map(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.map(|u| u.completion_tokens),
        }
        .emit();

        Ok(parsed)
    }

    fn model_id(&self) -> &str {
        &self.spec
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn messages_to_anthropic(messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.role {
            // System prompts travel in the top-level `system` field.
            Role::System => continue,
            Role::Tool => out.push(serde_json::json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.as_deref().unwrap_or(""),
                    "content": msg.content,
                }],
            })),
            Role::Assistant => {
                let mut blocks: Vec<Value> = Vec::new();
                if !msg.content.is_empty() {
                    blocks.push(serde_json::json!({ "type": "text", "text": msg.content }));
                }
                if let Some(calls) = msg.tool_calls.as_deref() {
                    for tc in calls {
                        blocks.push(serde_json::json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.arguments,
                        }));
                    }
                }
                out.push(serde_json::json!({ "role": "assistant", "content": blocks }));
            }
            Role::User => out.push(serde_json::json!({
                "role": "user",
                "content": msg.content,
            })),
        }
    }
    out
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

fn parse_response(provider: &str, body: &Value) -> Result<GenerateResponse> {
    let blocks = body
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| Error::Llm {
            provider: provider.to_owned(),
            message: "no content in response".into(),
        })?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_owned();
                let name = block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_owned();
                let arguments = block.get("input").cloned().unwrap_or(Value::Null);
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments,
                });
            }
            _ => {}
        }
    }

    let finish_reason = body
        .get("stop_reason")
        .and_then(|v| v.as_str())
        .map(String::from);
    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_owned();
    let usage = body.get("usage").and_then(|u| {
        let prompt = u.get("input_tokens")?.as_u64()? as u32;
        let completion = u.get("output_tokens")?.as_u64()? as u32;
        Some(Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        })
    });

    Ok(GenerateResponse {
        text,
        tool_calls,
        finish_reason,
        usage,
        model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_results_become_user_blocks() {
        let messages = vec![Message::tool_result("c1", "result text")];
        let wire = messages_to_anthropic(&messages);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[0]["content"][0]["type"], "tool_result");
        assert_eq!(wire[0]["content"][0]["tool_use_id"], "c1");
    }

    #[test]
    fn system_messages_are_elided_from_the_list() {
        let messages = vec![Message::system("be brief"), Message::user("hi")];
        let wire = messages_to_anthropic(&messages);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
    }

    #[test]
    fn parse_tool_use_blocks() {
        let body = serde_json::json!({
            "model": "claude-sonnet-4",
            "stop_reason": "tool_use",
            "content": [
                { "type": "text", "text": "let me check" },
                { "type": "tool_use", "id": "c1", "name": "current_time", "input": {} }
            ],
            "usage": { "input_tokens": 12, "output_tokens": 7 }
        });
        let resp = parse_response("anthropic", &body).unwrap();
        assert_eq!(resp.text, "let me check");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.usage.unwrap().total_tokens, 19);
    }
}
