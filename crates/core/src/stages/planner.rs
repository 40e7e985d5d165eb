//! The planning stage: turns a reasoning result into an ordered plan.
//!
//! Purely rule-driven — tool calls become one step each, conversation
//! tasks answer with a single respond step, everything else becomes one
//! generation step.

use pg_domain::task::{ActionType, Plan, PlanStep, Reasoning, TaskContext, TaskKind};

pub struct Planner;

impl Planner {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self, ctx: &TaskContext, reasoning: &Reasoning) -> Plan {
        let goal = ctx.input_text.trim().to_owned();
        let plan_reasoning = reasoning
            .approach
            .clone()
            .or_else(|| reasoning.response.clone())
            .unwrap_or_default();

        let steps = if !reasoning.tool_calls.is_empty() {
            reasoning
                .tool_calls
                .iter()
                .enumerate()
                .map(|(index, call)| PlanStep {
                    index,
                    description: format!("call {}", call.name),
                    action_type: ActionType::ToolCall,
                    action_params: serde_json::json!({
                        "id": call.id,
                        "name": call.name,
                        "arguments": call.arguments,
                    }),
                    completed: false,
                })
                .collect()
        } else if ctx.kind() == TaskKind::Conversation {
            vec![PlanStep {
                index: 0,
                description: "respond to the user".into(),
                action_type: ActionType::Respond,
                action_params: serde_json::json!({}),
                completed: false,
            }]
        } else {
            vec![PlanStep {
                index: 0,
                description: "generate the requested content".into(),
                action_type: ActionType::Generate,
                action_params: serde_json::json!({ "prompt": ctx.input_text }),
                completed: false,
            }]
        };

        Plan {
            goal,
            reasoning: plan_reasoning,
            steps,
        }
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}
