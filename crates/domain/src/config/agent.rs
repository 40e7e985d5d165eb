use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent scheduling limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Concurrency and lifecycle limits for the cognitive task core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on tasks in non-terminal states.
    #[serde(default = "d_5")]
    pub max_active_tasks: usize,
    /// Hard cap on concurrently executing tools.
    #[serde(default = "d_3")]
    pub max_concurrent_tools: usize,
    /// Maximum reason/act/reflect rounds before a task is failed.
    #[serde(default = "d_5u32")]
    pub max_cognitive_iterations: u32,
    /// Deadline honoured by `wait_for_task` (the task itself keeps
    /// running past it).
    #[serde(default = "d_120")]
    pub task_timeout_sec: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_active_tasks: d_5(),
            max_concurrent_tools: d_3(),
            max_cognitive_iterations: d_5u32(),
            task_timeout_sec: d_120(),
        }
    }
}

fn d_5() -> usize {
    5
}
fn d_5u32() -> u32 {
    5
}
fn d_3() -> usize {
    3
}
fn d_120() -> u64 {
    120
}
