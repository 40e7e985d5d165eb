//! Stored OAuth credentials for account-based providers (`codex`,
//! `copilot`).
//!
//! Token lifecycle:
//! - Credentials are persisted per provider under the auth directory
//!   with `0o600` permissions on Unix.
//! - Each request obtains a fresh access token; a proactive refresh
//!   runs when less than 5 minutes of validity remain.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use pg_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const CODEX_TOKEN_URL: &str = "https://auth.openai.com/oauth/token";
const CODEX_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";

const COPILOT_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const COPILOT_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";

/// Proactive refresh window: refresh when less than 5 minutes remain.
const REFRESH_WINDOW_SECS: i64 = 300;

/// Default `expires_in` when the token response omits it.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3_600;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stored OAuth tokens for a single provider.
///
/// `Debug` is manually implemented to redact secrets.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds) when the access token expires.
    pub expires_at: i64,
    #[serde(default)]
    pub email: Option<String>,
}

impl std::fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("email", &self.email)
            .finish()
    }
}

/// Response from a token refresh endpoint.
///
/// `Debug` is manually implemented to redact secrets.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token sources
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Yields the bearer token for the next request. API-key providers use
/// [`StaticToken`]; OAuth providers refresh on demand.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    async fn bearer_token(&self) -> Result<String>;
}

pub struct StaticToken(pub String);

#[async_trait::async_trait]
impl TokenSource for StaticToken {
    async fn bearer_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Reads the credential store on every request, refreshing when the
/// access token nears expiry.
pub struct OAuthTokenSource {
    provider: String,
    store: Arc<CredentialStore>,
    client: reqwest::Client,
}

impl OAuthTokenSource {
    pub fn new(provider: impl Into<String>, store: Arc<CredentialStore>) -> Self {
        Self {
            provider: provider.into(),
            store,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl TokenSource for OAuthTokenSource {
    async fn bearer_token(&self) -> Result<String> {
        self.store.access_token(&self.provider, &self.client).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credential store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-provider OAuth token persistence under the auth directory.
pub struct CredentialStore {
    auth_dir: PathBuf,
    /// Explicit path overrides (from `set_oauth_credentials`).
    paths: RwLock<HashMap<String, PathBuf>>,
    cache: RwLock<HashMap<String, OAuthTokens>>,
}

impl CredentialStore {
    pub fn new(auth_dir: PathBuf) -> Self {
        Self {
            auth_dir,
            paths: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn path_for(&self, provider: &str) -> PathBuf {
        self.paths
            .read()
            .get(provider)
            .cloned()
            .unwrap_or_else(|| self.auth_dir.join(format!("{provider}.json")))
    }

    /// Persist tokens for a provider and update the in-memory copy.
    pub fn store(
        &self,
        provider: &str,
        tokens: OAuthTokens,
        path: Option<PathBuf>,
    ) -> Result<()> {
        if let Some(path) = path {
            self.paths.write().insert(provider.to_owned(), path);
        }
        let path = self.path_for(provider);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let json = serde_json::to_string_pretty(&tokens)?;
        std::fs::write(&path, json).map_err(Error::Io)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .map_err(Error::Io)?;
        }
        self.cache.write().insert(provider.to_owned(), tokens);
        Ok(())
    }

    /// Load tokens for a provider (memory first, then disk).
    pub fn load(&self, provider: &str) -> Result<OAuthTokens> {
        if let Some(tokens) = self.cache.read().get(provider) {
            return Ok(tokens.clone());
        }
        let path = self.path_for(provider);
        let raw = std::fs::read_to_string(&path).map_err(|_| {
            Error::Auth(format!(
                "no stored credentials for '{provider}' (expected {})",
                path.display()
            ))
        })?;
        let tokens: OAuthTokens = serde_json::from_str(&raw)?;
        self.cache.write().insert(provider.to_owned(), tokens.clone());
        Ok(tokens)
    }

    pub fn has(&self, provider: &str) -> bool {
        self.cache.read().contains_key(provider) || self.path_for(provider).exists()
    }

    /// A currently valid access token, refreshing first when less than
    /// [`REFRESH_WINDOW_SECS`] of validity remain.
    pub async fn access_token(
        &self,
        provider: &str,
        client: &reqwest::Client,
    ) -> Result<String> {
        let tokens = self.load(provider)?;
        if Utc::now().timestamp() + REFRESH_WINDOW_SECS < tokens.expires_at {
            return Ok(tokens.access_token);
        }

        tracing::info!(provider, "access token near expiry, refreshing");
        let refreshed = refresh(provider, &tokens, client).await?;
        let access = refreshed.access_token.clone();
        self.store(provider, refreshed, None)?;
        Ok(access)
    }
}

async fn refresh(
    provider: &str,
    tokens: &OAuthTokens,
    client: &reqwest::Client,
) -> Result<OAuthTokens> {
    let (url, client_id) = match provider {
        "codex" => (CODEX_TOKEN_URL, CODEX_CLIENT_ID),
        "copilot" => (COPILOT_TOKEN_URL, COPILOT_CLIENT_ID),
        other => {
            return Err(Error::Auth(format!(
                "provider '{other}' has no token endpoint"
            )))
        }
    };

    let body = serde_json::json!({
        "grant_type": "refresh_token",
        "refresh_token": tokens.refresh_token,
        "client_id": client_id,
    });

    let resp = client
        .post(url)
        .header("Accept", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(Error::Auth(format!(
            "token refresh for '{provider}' failed with status {}",
            resp.status()
        )));
    }

    let parsed: TokenResponse = resp
        .json()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;

    Ok(OAuthTokens {
        access_token: parsed.access_token,
        refresh_token: parsed
            .refresh_token
            .unwrap_or_else(|| tokens.refresh_token.clone()),
        expires_at: Utc::now().timestamp() + parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        email: tokens.email.clone(),
    })
}
