//! Model registry.
//!
//! Resolves a logical tier (`default`, `fast`, `balanced`, `powerful`,
//! plus legacy aliases) to a concrete [`LanguageModel`] instance,
//! constructing lazily and caching per model spec. Credential rotation
//! evicts every cached model of the rotated provider so the next
//! resolution picks up the new token.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use pg_domain::config::{LlmConfig, ProviderKind};
use pg_domain::error::{Error, Result};

use crate::anthropic::AnthropicModel;
use crate::oauth::{CredentialStore, OAuthTokenSource, OAuthTokens, StaticToken};
use crate::openai_compat::OpenAiCompatModel;
use crate::traits::LanguageModel;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const CODEX_BASE_URL: &str = "https://api.openai.com/v1";
const COPILOT_BASE_URL: &str = "https://api.githubcopilot.com";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ModelRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CachedModel {
    model: Arc<dyn LanguageModel>,
    /// Provider name, used to evict on credential rotation.
    provider: String,
}

pub struct ModelRegistry {
    config: LlmConfig,
    credentials: Arc<CredentialStore>,
    /// Per-provider base-URL overrides set alongside OAuth credentials.
    base_urls: RwLock<HashMap<String, String>>,
    cache: RwLock<HashMap<String, CachedModel>>,
}

impl ModelRegistry {
    pub fn new(config: LlmConfig, auth_dir: PathBuf) -> Self {
        Self {
            config,
            credentials: Arc::new(CredentialStore::new(auth_dir)),
            base_urls: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn credentials(&self) -> Arc<CredentialStore> {
        self.credentials.clone()
    }

    /// Resolve a tier to a model instance, constructing and caching it
    /// on first use.
    pub fn get(&self, tier: &str) -> Result<Arc<dyn LanguageModel>> {
        let spec = self.resolve_tier(tier);
        if spec.is_empty() {
            return Err(Error::Config("llm.default is not configured".into()));
        }

        let (provider, _model) = spec
            .split_once('/')
            .ok_or_else(|| Error::Config(format!("bad model spec '{spec}'")))?;

        let key = self.cache_key(spec, provider);
        if let Some(cached) = self.cache.read().get(&key) {
            return Ok(cached.model.clone());
        }

        let model = self.construct(spec, provider)?;
        tracing::info!(tier, spec, "constructed model");
        self.cache.write().insert(
            key,
            CachedModel {
                model: model.clone(),
                provider: provider.to_owned(),
            },
        );
        Ok(model)
    }

    /// Store rotated OAuth credentials and evict every cached model of
    /// that provider. Subsequent `get`s rebuild with the new token.
    pub fn set_oauth_credentials(
        &self,
        provider: &str,
        tokens: OAuthTokens,
        path: Option<PathBuf>,
        base_url: Option<String>,
    ) -> Result<()> {
        self.credentials.store(provider, tokens, path)?;
        if let Some(url) = base_url {
            self.base_urls.write().insert(provider.to_owned(), url);
        }

        let mut cache = self.cache.write();
        let before = cache.len();
        cache.retain(|_, entry| entry.provider != provider);
        let evicted = before - cache.len();
        tracing::info!(provider, evicted, "credentials rotated");
        Ok(())
    }

    /// Number of cached model instances.
    pub fn cached_models(&self) -> usize {
        self.cache.read().len()
    }

    // ── Internal ──────────────────────────────────────────────────

    /// Tier → model spec. Unknown tiers (and the legacy aliases'
    /// missing targets) fall back to `default`.
    fn resolve_tier(&self, tier: &str) -> &str {
        let canonical = match tier {
            "cheap" => "fast",
            "smart" => "powerful",
            other => other,
        };
        let tiers = &self.config.tiers;
        match canonical {
            "fast" => tiers.fast.as_deref(),
            "balanced" => tiers.balanced.as_deref(),
            "powerful" => tiers.powerful.as_deref(),
            _ => None,
        }
        .unwrap_or(&self.config.default)
    }

    /// Cache key is the spec; a protocol override (a provider block
    /// whose `type` differs from its name) is part of the key.
    fn cache_key(&self, spec: &str, provider: &str) -> String {
        match self.config.providers.get(provider) {
            Some(pc) if pc.kind.to_string() != provider => {
                format!("{spec}@{}", pc.kind)
            }
            _ => spec.to_owned(),
        }
    }

    fn construct(&self, spec: &str, provider: &str) -> Result<Arc<dyn LanguageModel>> {
        let timeout_ms = self.config.timeout_ms;

        // Account-based providers: stored OAuth credentials, refreshed
        // per request inside the token source.
        if matches!(provider, "codex" | "copilot") {
            if !self.credentials.has(provider) {
                return Err(Error::Auth(format!(
                    "provider '{provider}' requires stored OAuth credentials"
                )));
            }
            let base_url = self.base_urls.read().get(provider).cloned().unwrap_or_else(|| {
                match provider {
                    "copilot" => COPILOT_BASE_URL.to_owned(),
                    _ => CODEX_BASE_URL.to_owned(),
                }
            });
            let token = Arc::new(OAuthTokenSource::new(provider, self.credentials.clone()));
            let model = OpenAiCompatModel::new(spec, base_url, token, timeout_ms)?;
            return Ok(Arc::new(model));
        }

        let pc = self.config.providers.get(provider).ok_or_else(|| {
            Error::Config(format!("provider '{provider}' is not configured"))
        })?;

        let api_key = match (&pc.api_key, &pc.api_key_env) {
            (Some(key), _) => key.clone(),
            (None, Some(env)) => std::env::var(env).map_err(|_| {
                Error::Auth(format!("env var {env} for provider '{provider}' is unset"))
            })?,
            (None, None) => {
                return Err(Error::Auth(format!(
                    "provider '{provider}' has neither api_key nor api_key_env"
                )))
            }
        };

        match pc.kind {
            ProviderKind::Openai => {
                let base_url = pc
                    .base_url
                    .clone()
                    .unwrap_or_else(|| OPENAI_BASE_URL.to_owned());
                let model = OpenAiCompatModel::new(
                    spec,
                    base_url,
                    Arc::new(StaticToken(api_key)),
                    timeout_ms,
                )?;
                Ok(Arc::new(model))
            }
            ProviderKind::Anthropic => {
                let base_url = pc
                    .base_url
                    .clone()
                    .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_owned());
                let model = AnthropicModel::new(spec, base_url, api_key, timeout_ms)?;
                Ok(Arc::new(model))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pg_domain::config::{ProviderConfig, TiersConfig};

    fn config_with_openai() -> LlmConfig {
        let mut config = LlmConfig {
            default: "openai/gpt-4o-mini".into(),
            tiers: TiersConfig {
                fast: Some("openai/gpt-4o-mini".into()),
                balanced: None,
                powerful: Some("openai/gpt-4o".into()),
            },
            ..Default::default()
        };
        config.providers.insert(
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

    fn registry(config: LlmConfig) -> ModelRegistry {
        let dir = tempfile::tempdir().unwrap();
        ModelRegistry::new(config, dir.path().to_path_buf())
    }

    #[test]
    fn resolves_tiers_and_falls_back_to_default() {
        let reg = registry(config_with_openai());
        assert_eq!(reg.resolve_tier("fast"), "openai/gpt-4o-mini");
        assert_eq!(reg.resolve_tier("powerful"), "openai/gpt-4o");
        // "balanced" is unset, unknown tiers likewise fall back.
        assert_eq!(reg.resolve_tier("balanced"), "openai/gpt-4o-mini");
        assert_eq!(reg.resolve_tier("does-not-exist"), "openai/gpt-4o-mini");
    }

    #[test]
    fn legacy_aliases_map_onto_tiers() {
        let reg = registry(config_with_openai());
        assert_eq!(reg.resolve_tier("cheap"), reg.resolve_tier("fast"));
        assert_eq!(reg.resolve_tier("smart"), reg.resolve_tier("powerful"));
    }

    #[test]
    fn same_tier_returns_cached_instance() {
        let reg = registry(config_with_openai());
        let a = reg.get("default").unwrap();
        let b = reg.get("default").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.cached_models(), 1);
    }

    #[test]
    fn tiers_sharing_a_spec_share_the_instance() {
        let reg = registry(config_with_openai());
        let a = reg.get("default").unwrap();
        let b = reg.get("fast").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unconfigured_provider_is_config_error() {
        let config = LlmConfig {
            default: "mystery/model".into(),
            ..Default::default()
        };
        assert!(matches!(
            registry(config).get("default"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn oauth_provider_without_credentials_is_auth_error() {
        let config = LlmConfig {
            default: "codex/gpt-5-codex".into(),
            ..Default::default()
        };
        assert!(matches!(
            registry(config).get("default"),
            Err(Error::Auth(_))
        ));
    }

    #[test]
    fn protocol_override_lands_in_cache_key() {
        let mut config = config_with_openai();
        config.providers.insert(
            "proxy".into(),
            ProviderConfig {
                kind: ProviderKind::Openai,
                api_key: Some("sk-proxy".into()),
                api_key_env: None,
                base_url: Some("http://localhost:8000/v1".into()),
            },
        );
        let reg = registry(config);
        assert_eq!(reg.cache_key("proxy/llama", "proxy"), "proxy/llama@openai");
        assert_eq!(
            reg.cache_key("openai/gpt-4o-mini", "openai"),
            "openai/gpt-4o-mini"
        );
    }
}
