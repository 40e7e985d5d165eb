use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model spec for the `default` tier, `"<provider>/<model>"`.
    /// Required; validation rejects an empty value.
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub tiers: TiersConfig,
    /// Registered providers, keyed by the name used in model specs.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default = "d_3")]
    pub max_concurrent_calls: usize,
    #[serde(default = "d_60000u")]
    pub timeout_ms: u64,
    /// Context window (tokens) assumed for compaction decisions.
    #[serde(default)]
    pub context_window: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default: String::new(),
            tiers: TiersConfig::default(),
            providers: HashMap::new(),
            max_concurrent_calls: d_3(),
            timeout_ms: d_60000u(),
            context_window: None,
        }
    }
}

/// Logical tiers resolved to model specs at runtime. A missing tier
/// falls back to `default`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TiersConfig {
    #[serde(default)]
    pub fast: Option<String>,
    #[serde(default)]
    pub balanced: Option<String>,
    #[serde(default)]
    pub powerful: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Wire protocol spoken by this provider.
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Env var to read the key from when `api_key` is unset.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Openai,
    Anthropic,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Openai => f.write_str("openai"),
            ProviderKind::Anthropic => f.write_str("anthropic"),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_3() -> usize {
    3
}
fn d_60000u() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = LlmConfig::default();
        assert_eq!(cfg.max_concurrent_calls, 3);
        assert_eq!(cfg.timeout_ms, 60_000);
        assert!(cfg.tiers.fast.is_none());
    }

    #[test]
    fn provider_kind_uses_type_key() {
        let toml = r#"
            default = "openai/gpt-4o-mini"

            [providers.openai]
            type = "openai"
            api_key_env = "OPENAI_API_KEY"

            [tiers]
            powerful = "anthropic/claude-sonnet-4"
        "#;
        let cfg: LlmConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.providers["openai"].kind, ProviderKind::Openai);
        assert_eq!(
            cfg.tiers.powerful.as_deref(),
            Some("anthropic/claude-sonnet-4")
        );
    }
}
