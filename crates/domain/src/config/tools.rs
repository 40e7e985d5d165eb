use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Wall-clock timeout per tool invocation, in seconds.
    #[serde(default = "d_30")]
    pub timeout_sec: u64,
    /// Paths filesystem tools may read from. Empty = deny all.
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_sec: d_30(),
            allowed_paths: Vec::new(),
        }
    }
}

fn d_30() -> u64 {
    30
}
