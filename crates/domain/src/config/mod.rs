mod agent;
mod llm;
mod session;
mod tools;

pub use agent::*;
pub use llm::*;
pub use session::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Root of the agent's persistent state (session log, memory files).
    #[serde(default)]
    pub data_dir: PathBuf,
    /// Where OAuth credentials are stored.
    #[serde(default)]
    pub auth_dir: PathBuf,
    #[serde(default = "d_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Line,
}

fn d_log_level() -> String {
    "info".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let mut error = |field: &str, message: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message,
            });
        };

        if self.data_dir.as_os_str().is_empty() {
            error("data_dir", "required".into());
        }
        if self.auth_dir.as_os_str().is_empty() {
            error("auth_dir", "required".into());
        }
        if self.llm.default.is_empty() {
            error("llm.default", "required (\"<provider>/<model>\")".into());
        }
        if self.agent.max_active_tasks == 0 {
            error("agent.max_active_tasks", "must be greater than 0".into());
        }
        if self.llm.max_concurrent_calls == 0 {
            error("llm.max_concurrent_calls", "must be greater than 0".into());
        }
        if self.agent.max_concurrent_tools == 0 {
            error("agent.max_concurrent_tools", "must be greater than 0".into());
        }
        if !(self.session.compact_threshold > 0.0 && self.session.compact_threshold <= 1.0) {
            error(
                "session.compact_threshold",
                "must be in (0, 1]".into(),
            );
        }

        // Tier specs must name a configured provider (or a built-in
        // OAuth provider), warn otherwise.
        let mut check_spec = |field: &str, spec: &str| {
            let provider = spec.split('/').next().unwrap_or(spec);
            let known = self.llm.providers.contains_key(provider)
                || matches!(provider, "codex" | "copilot");
            if !spec.is_empty() && !known {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: field.into(),
                    message: format!("provider '{provider}' is not configured"),
                });
            }
        };
        check_spec("llm.default", &self.llm.default);
        if let Some(spec) = &self.llm.tiers.fast {
            check_spec("llm.tiers.fast", spec);
        }
        if let Some(spec) = &self.llm.tiers.balanced {
            check_spec("llm.tiers.balanced", spec);
        }
        if let Some(spec) = &self.llm.tiers.powerful {
            check_spec("llm.tiers.powerful", spec);
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        let mut config = Config::default();
        config.data_dir = PathBuf::from("/tmp/pegasus/data");
        config.auth_dir = PathBuf::from("/tmp/pegasus/auth");
        config.llm.default = "openai/gpt-4o-mini".into();
        config.llm.providers.insert(
            "openai".into(),
            ProviderConfig {
                kind: ProviderKind::Openai,
                api_key: Some("sk-test".into()),
                api_key_env: None,
                base_url: None,
            },
        );
        config
    }

    #[test]
    fn minimal_config_is_valid() {
        let issues = minimal().validate();
        assert!(
            issues.iter().all(|i| i.severity != ConfigSeverity::Error),
            "unexpected errors: {issues:?}"
        );
    }

    #[test]
    fn missing_required_fields_are_errors() {
        let issues = Config::default().validate();
        let fields: Vec<_> = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .map(|i| i.field.as_str())
            .collect();
        assert!(fields.contains(&"data_dir"));
        assert!(fields.contains(&"auth_dir"));
        assert!(fields.contains(&"llm.default"));
    }

    #[test]
    fn unknown_tier_provider_warns() {
        let mut config = minimal();
        config.llm.tiers.fast = Some("mystery/model".into());
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Warning && i.field == "llm.tiers.fast"));
    }

    #[test]
    fn oauth_providers_need_no_config_block() {
        let mut config = minimal();
        config.llm.tiers.powerful = Some("codex/gpt-5".into());
        let issues = config.validate();
        assert!(!issues
            .iter()
            .any(|i| i.field == "llm.tiers.powerful"));
    }

    #[test]
    fn bad_compact_threshold_is_error() {
        let mut config = minimal();
        config.session.compact_threshold = 1.5;
        assert!(config
            .validate()
            .iter()
            .any(|i| i.field == "session.compact_threshold"));
    }

    #[test]
    fn parses_full_toml() {
        let toml = r#"
            data_dir = "/var/lib/pegasus"
            auth_dir = "/var/lib/pegasus/auth"
            log_level = "debug"
            log_format = "json"

            [llm]
            default = "openai/gpt-4o-mini"
            max_concurrent_calls = 4

            [llm.tiers]
            fast = "openai/gpt-4o-mini"
            powerful = "anthropic/claude-sonnet-4"

            [llm.providers.openai]
            type = "openai"
            api_key_env = "OPENAI_API_KEY"

            [llm.providers.anthropic]
            type = "anthropic"
            api_key_env = "ANTHROPIC_API_KEY"

            [agent]
            max_active_tasks = 8

            [tools]
            timeout_sec = 10
            allowed_paths = ["/var/lib/pegasus"]

            [session]
            compact_threshold = 0.75
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.agent.max_active_tasks, 8);
        assert_eq!(config.llm.max_concurrent_calls, 4);
        assert_eq!(config.tools.timeout_sec, 10);
        assert!(config
            .validate()
            .iter()
            .all(|i| i.severity != ConfigSeverity::Error));
    }
}
