//! The reflection stage: judges the round's actions and decides whether
//! the task is done.
//!
//! The verdict is rule-driven. A fully successful tool round continues
//! into one more reasoning pass so the model can turn raw tool output
//! into an answer; the iteration cap bounds that loop.

use pg_domain::task::{ActionType, Reflection, TaskContext, Verdict};

pub struct Reflector;

impl Reflector {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self, ctx: &TaskContext) -> Reflection {
        let Some(plan) = ctx.plan.as_ref() else {
            return Reflection {
                verdict: Verdict::Complete,
                assessment: "nothing was planned".into(),
                lessons: vec![],
            };
        };

        // The actions of the current round are the tail matching the
        // plan's steps; earlier entries belong to previous iterations.
        let round_start = ctx.actions_done.len().saturating_sub(plan.steps.len());
        let round = &ctx.actions_done[round_start..];
        let all_succeeded = round.iter().all(|a| a.success);

        let lessons: Vec<String> = round
            .iter()
            .filter(|a| !a.success)
            .map(|a| {
                format!(
                    "step {} failed: {}",
                    a.step_index,
                    a.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();

        if plan.has_tool_calls() && all_succeeded {
            return Reflection {
                verdict: Verdict::Continue,
                assessment: format!(
                    "{} tool call(s) succeeded; another reasoning round will \
                     turn the results into an answer",
                    round
                        .iter()
                        .filter(|a| a.action_type == ActionType::ToolCall)
                        .count()
                ),
                lessons,
            };
        }

        let pure_conversation = plan
            .steps
            .iter()
            .all(|s| s.action_type == ActionType::Respond);
        if pure_conversation {
            return Reflection {
                verdict: Verdict::Complete,
                assessment: "conversation answered".into(),
                lessons,
            };
        }

        if all_succeeded {
            Reflection {
                verdict: Verdict::Complete,
                assessment: format!("all {} action(s) succeeded", round.len()),
                lessons,
            }
        } else {
            Reflection {
                verdict: Verdict::Continue,
                assessment: "some actions failed; retrying with what was learned".into(),
                lessons,
            }
        }
    }
}

impl Default for Reflector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pg_domain::task::{ActionResult, Plan, PlanStep};

    fn plan(kinds: &[ActionType]) -> Plan {
        Plan {
            goal: "g".into(),
            reasoning: "r".into(),
            steps: kinds
                .iter()
                .enumerate()
                .map(|(index, &action_type)| PlanStep {
                    index,
                    description: "s".into(),
                    action_type,
                    action_params: serde_json::json!({}),
                    completed: true,
                })
                .collect(),
        }
    }

    fn action(index: usize, action_type: ActionType, success: bool) -> ActionResult {
        let now = Utc::now();
        ActionResult {
            step_index: index,
            action_type,
            input: serde_json::json!({}),
            result: success.then(|| serde_json::json!("ok")),
            error: (!success).then(|| "boom".to_owned()),
            success,
            started_at: now,
            completed_at: now,
            duration_ms: 1,
        }
    }

    fn ctx_with(plan_kinds: &[ActionType], successes: &[bool]) -> TaskContext {
        let mut ctx = TaskContext::new("t1", "input", "test");
        ctx.plan = Some(plan(plan_kinds));
        ctx.actions_done = successes
            .iter()
            .enumerate()
            .map(|(i, &ok)| action(i, plan_kinds[i], ok))
            .collect();
        ctx
    }

    #[test]
    fn successful_tool_round_continues_for_a_summary() {
        let ctx = ctx_with(&[ActionType::ToolCall], &[true]);
        let reflection = Reflector::new().run(&ctx);
        assert_eq!(reflection.verdict, Verdict::Continue);
        assert!(reflection.lessons.is_empty());
    }

    #[test]
    fn pure_conversation_completes() {
        let ctx = ctx_with(&[ActionType::Respond], &[true]);
        assert_eq!(Reflector::new().run(&ctx).verdict, Verdict::Complete);
    }

    #[test]
    fn failed_tool_round_continues_with_lessons() {
        let ctx = ctx_with(&[ActionType::ToolCall], &[false]);
        let reflection = Reflector::new().run(&ctx);
        assert_eq!(reflection.verdict, Verdict::Continue);
        assert_eq!(reflection.lessons.len(), 1);
        assert!(reflection.lessons[0].contains("boom"));
    }

    #[test]
    fn successful_generation_completes() {
        let ctx = ctx_with(&[ActionType::Generate], &[true]);
        assert_eq!(Reflector::new().run(&ctx).verdict, Verdict::Complete);
    }

    #[test]
    fn failed_generation_continues() {
        let ctx = ctx_with(&[ActionType::Generate], &[false]);
        assert_eq!(Reflector::new().run(&ctx).verdict, Verdict::Continue);
    }

    #[test]
    fn only_the_current_round_is_judged() {
        // A failed tool round from iteration 1, then a clean respond
        // round: the old failure must not block completion.
        let mut ctx = ctx_with(&[ActionType::Respond], &[true]);
        ctx.actions_done.insert(0, action(0, ActionType::ToolCall, false));
        assert_eq!(Reflector::new().run(&ctx).verdict, Verdict::Complete);
    }
}
