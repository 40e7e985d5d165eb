//! Credential rotation: rotating OAuth tokens must evict cached models
//! so the next resolution is a fresh instance using the new token.

use std::sync::Arc;

use chrono::Utc;
use pg_domain::config::LlmConfig;
use pg_providers::oauth::OAuthTokens;
use pg_providers::ModelRegistry;

fn tokens(access: &str) -> OAuthTokens {
    OAuthTokens {
        access_token: access.into(),
        refresh_token: "rt".into(),
        // Far in the future so no refresh HTTP round-trip happens.
        expires_at: Utc::now().timestamp() + 86_400,
        email: Some("dev@example.com".into()),
    }
}

#[tokio::test]
async fn rotation_invalidates_cached_models() {
    let auth_dir = tempfile::tempdir().unwrap();
    let config = LlmConfig {
        default: "codex/gpt-5-codex".into(),
        ..Default::default()
    };
    let registry = ModelRegistry::new(config, auth_dir.path().to_path_buf());

    // No credentials yet: resolution fails.
    assert!(registry.get("default").is_err());

    registry
        .set_oauth_credentials("codex", tokens("token-one"), None, None)
        .unwrap();

    let first = registry.get("default").unwrap();
    let again = registry.get("default").unwrap();
    assert!(Arc::ptr_eq(&first, &again), "expected the cached instance");
    assert_eq!(registry.cached_models(), 1);

    // Rotate: the cache entry for the provider is evicted.
    registry
        .set_oauth_credentials("codex", tokens("token-two"), None, None)
        .unwrap();
    assert_eq!(registry.cached_models(), 0);

    let fresh = registry.get("default").unwrap();
    assert!(
        !Arc::ptr_eq(&first, &fresh),
        "rotation must produce a fresh model instance"
    );
    assert_eq!(fresh.model_id(), "codex/gpt-5-codex");

    // The next request will carry the rotated token.
    let client = reqwest::Client::new();
    let token = registry
        .credentials()
        .access_token("codex", &client)
        .await
        .unwrap();
    assert_eq!(token, "token-two");
}

#[tokio::test]
async fn rotation_leaves_other_providers_cached() {
    let auth_dir = tempfile::tempdir().unwrap();
    let mut config = LlmConfig {
        default: "openai/gpt-4o-mini".into(),
        ..Default::default()
    };
    config.tiers.powerful = Some("codex/gpt-5-codex".into());
    config.providers.insert(
        "openai".into(),
        pg_domain::config::ProviderConfig {
            kind: pg_domain::config::ProviderKind::Openai,
            api_key: Some("sk-test".into()),
            api_key_env: None,
            base_url: None,
        },
    );
    let registry = ModelRegistry::new(config, auth_dir.path().to_path_buf());
    registry
        .set_oauth_credentials("codex", tokens("t"), None, None)
        .unwrap();

    let openai_model = registry.get("default").unwrap();
    let _codex_model = registry.get("powerful").unwrap();
    assert_eq!(registry.cached_models(), 2);

    registry
        .set_oauth_credentials("codex", tokens("t2"), None, None)
        .unwrap();

    // Only the codex entry was evicted.
    assert_eq!(registry.cached_models(), 1);
    let openai_again = registry.get("default").unwrap();
    assert!(Arc::ptr_eq(&openai_model, &openai_again));
}
