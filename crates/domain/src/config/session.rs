use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Fraction of the model context window (0 < x ≤ 1) at which the
    /// current log is compacted into an archive.
    #[serde(default = "d_threshold")]
    pub compact_threshold: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            compact_threshold: d_threshold(),
        }
    }
}

fn d_threshold() -> f64 {
    0.8
}
