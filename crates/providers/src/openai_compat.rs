//! OpenAI-compatible adapter.
//!
//! Works with OpenAI and any endpoint following the chat completions
//! contract. The OAuth-backed providers (`codex`, `copilot`) speak the
//! same wire format with a [`TokenSource`] that refreshes per request.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use pg_domain::error::{Error, Result};
use pg_domain::message::{Message, Role, ToolCall, ToolDefinition, Usage};

use crate::oauth::TokenSource;
use crate::traits::{GenerateRequest, GenerateResponse, LanguageModel};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatModel {
    /// Full `"<provider>/<model>"` spec.
    spec: String,
    provider: String,
    model: String,
    base_url: String,
    token: Arc<dyn TokenSource>,
    client: reqwest::Client,
}

impl OpenAiCompatModel {
    pub fn new(
        spec: impl Into<String>,
        base_url: impl Into<String>,
        token: Arc<dyn TokenSource>,
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
            token,
            client,
        })
    }

    fn build_body(&self, req: &GenerateRequest) -> Value {
        let mut messages: Vec<Value> = Vec::with_capacity(req.messages.len() + 1);
        if let Some(system) = &req.system {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.extend(req.messages.iter().map(msg_to_openai));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(choice) = &req.tool_choice {
            body["tool_choice"] = tool_choice_to_openai(choice);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(top_p) = req.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        body
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiCompatModel {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req);
        let bearer = self.token.bearer_token().await?;
        let started = std::time::Instant::now();

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {bearer}"))
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
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "content": msg.content,
        }),
        Role::Assistant => {
            let mut obj = serde_json::json!({ "role": "assistant" });
            obj["content"] = if msg.content.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            if let Some(calls) = msg.tool_calls.as_deref().filter(|c| !c.is_empty()) {
                let calls: Vec<Value> = calls
                    .iter()
                    .map(|tc| {
                        serde_json::json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                obj["tool_calls"] = Value::Array(calls);
            }
            obj
        }
        _ => serde_json::json!({
            "role": msg.role.to_string(),
            "content": msg.content,
        }),
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn tool_choice_to_openai(choice: &str) -> Value {
    match choice {
        "auto" | "none" | "required" => Value::String(choice.to_owned()),
        name => serde_json::json!({ "type": "function", "function": { "name": name } }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_response(provider: &str, body: &Value) -> Result<GenerateResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Llm {
            provider: provider.to_owned(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Llm {
        provider: provider.to_owned(),
        message: "no message in choice".into(),
    })?;

    let text = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_owned();
    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);
    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_owned();

    Ok(GenerateResponse {
        text,
        tool_calls: parse_tool_calls(message),
        finish_reason,
        usage: body.get("usage").and_then(parse_usage),
        model,
    })
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(arr) = message.get("tool_calls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|tc| {
            let id = tc.get("id")?.as_str()?.to_owned();
            let func = tc.get("function")?;
            let name = func.get("name")?.as_str()?.to_owned();
            let args_str = func.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
            let arguments: Value =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall {
                id,
                name,
                arguments,
            })
        })
        .collect()
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}
