//! OAuth 2.1 support for HTTP upstreams.
//!
//! Handles metadata discovery, dynamic client registration, PKCE, token
//! exchange and refresh. Token persistence goes through the injected
//! [`TokenStore`]; the browser/callback side lives outside the core and is
//! reached through the injected `on_redirect` callback, which must never
//! block the JSON-RPC path.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use mcpman_config::OAuthSettings;
use mcpman_types::{AppError, AppResult};
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::token_store::{ClientInformation, OAuthTokens, StoredAuth, TokenStore};

/// Callback invoked when the operator must visit an authorization URL.
pub type RedirectCallback = Arc<dyn Fn(String) + Send + Sync>;

/// OAuth authorization-server metadata (discovery response).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthServerMetadata {
    pub authorization_endpoint: String,

    pub token_endpoint: String,

    #[serde(default)]
    pub registration_endpoint: Option<String>,

    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

/// OAuth token endpoint response.
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,

    token_type: String,

    #[serde(default)]
    expires_in: Option<i64>,

    #[serde(default)]
    refresh_token: Option<String>,

    #[serde(default)]
    scope: Option<String>,
}

/// Dynamic client registration response.
#[derive(Debug, Clone, Deserialize)]
struct RegistrationResponse {
    client_id: String,

    #[serde(default)]
    client_secret: Option<String>,
}

/// PKCE (Proof Key for Code Exchange) data.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Code verifier (random string, 43-128 characters)
    pub code_verifier: String,

    /// Code challenge (BASE64URL(SHA256(code_verifier)))
    pub code_challenge: String,

    /// Challenge method (always "S256")
    pub code_challenge_method: String,
}

fn random_token(len: usize) -> String {
    let mut rng = thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..62u8);
            match idx {
                0..=25 => (b'A' + idx) as char,
                26..=51 => (b'a' + (idx - 26)) as char,
                _ => (b'0' + (idx - 52)) as char,
            }
        })
        .collect()
}

/// Generate a PKCE challenge for the authorization code flow.
pub fn generate_pkce_challenge() -> PkceChallenge {
    let code_verifier = random_token(64);

    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    let hash = hasher.finalize();
    let code_challenge = URL_SAFE_NO_PAD.encode(hash);

    PkceChallenge {
        code_verifier,
        code_challenge,
        code_challenge_method: "S256".to_string(),
    }
}

/// Generate a random state string for CSRF protection.
pub fn generate_state() -> String {
    random_token(32)
}

/// Build the authorization URL for the code flow with PKCE.
pub fn build_authorization_url(
    auth_url: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    pkce: &PkceChallenge,
    state: &str,
) -> String {
    let scope_str = scopes.join(" ");

    format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&code_challenge={}&code_challenge_method={}&state={}",
        auth_url,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scope_str),
        urlencoding::encode(&pkce.code_challenge),
        urlencoding::encode(&pkce.code_challenge_method),
        urlencoding::encode(state),
    )
}

/// OAuth provider bound to one upstream server.
pub struct OAuthProvider {
    server_name: String,

    server_url: String,

    settings: OAuthSettings,

    store: Arc<dyn TokenStore>,

    on_redirect: RedirectCallback,

    http: reqwest::Client,

    metadata: Mutex<Option<AuthServerMetadata>>,
}

impl OAuthProvider {
    pub fn new(
        server_name: &str,
        server_url: &str,
        settings: OAuthSettings,
        store: Arc<dyn TokenStore>,
        on_redirect: RedirectCallback,
    ) -> Self {
        Self {
            server_name: server_name.to_string(),
            server_url: server_url.to_string(),
            settings,
            store,
            on_redirect,
            http: reqwest::Client::new(),
            metadata: Mutex::new(None),
        }
    }

    /// Return a fresh access token, refreshing when possible.
    ///
    /// With no usable token, an authorization is started (state + PKCE are
    /// minted, the redirect callback fires) and `Unauthorized` is returned so
    /// the caller can surface the re-auth instructions. The connection is not
    /// retried automatically.
    pub async fn access_token(&self) -> AppResult<String> {
        let stored = self.store.load(&self.server_name)?.unwrap_or_default();

        if let Some(tokens) = &stored.tokens {
            if tokens.is_fresh() {
                return Ok(tokens.access_token.clone());
            }
            if tokens.refresh_token.is_some() {
                match self.refresh(&stored).await {
                    Ok(token) => return Ok(token),
                    Err(e) => {
                        tracing::warn!(
                            "Token refresh failed for {}: {}, re-authorization required",
                            self.server_name,
                            e
                        );
                    }
                }
            }
        }

        self.begin_authorization().await?;
        Err(AppError::Unauthorized(self.server_name.clone()))
    }

    /// Discover authorization-server metadata, caching the result.
    async fn metadata(&self) -> AppResult<AuthServerMetadata> {
        let mut cached = self.metadata.lock().await;
        if let Some(metadata) = cached.as_ref() {
            return Ok(metadata.clone());
        }

        let origin = origin_of(&self.server_url)?;
        let discovery_url = format!("{}/.well-known/oauth-authorization-server", origin);
        tracing::info!("Discovering OAuth metadata at: {}", discovery_url);

        let response = self
            .http
            .get(&discovery_url)
            .send()
            .await
            .map_err(|e| AppError::OAuth(format!("OAuth discovery failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::OAuth(format!(
                "OAuth discovery returned {} for {}",
                response.status(),
                discovery_url
            )));
        }

        let metadata: AuthServerMetadata = response
            .json()
            .await
            .map_err(|e| AppError::OAuth(format!("Failed to parse OAuth metadata: {}", e)))?;

        *cached = Some(metadata.clone());
        Ok(metadata)
    }

    /// Resolve client credentials: configured, previously registered, or
    /// freshly registered via dynamic registration.
    async fn client_information(&self, stored: &StoredAuth) -> AppResult<ClientInformation> {
        if let Some(client_id) = &self.settings.client_id {
            return Ok(ClientInformation {
                client_id: client_id.clone(),
                client_secret: self.settings.client_secret.clone(),
            });
        }

        if let Some(info) = &stored.client_information {
            return Ok(info.clone());
        }

        let metadata = self.metadata().await?;
        let registration_endpoint = metadata.registration_endpoint.ok_or_else(|| {
            AppError::OAuth(format!(
                "Server {} requires OAuth but offers no registration endpoint and no client_id is configured",
                self.server_name
            ))
        })?;

        let body = serde_json::json!({
            "client_name": self.settings.client_name,
            "redirect_uris": [self.settings.redirect_url],
            "grant_types": ["authorization_code", "refresh_token"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "client_secret_post",
            "scope": self.settings.scopes.join(" "),
        });

        let response = self
            .http
            .post(&registration_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::OAuth(format!("Client registration failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::OAuth(format!(
                "Client registration failed with {}: {}",
                status, body
            )));
        }

        let registered: RegistrationResponse = response
            .json()
            .await
            .map_err(|e| AppError::OAuth(format!("Failed to parse registration response: {}", e)))?;

        tracing::info!(
            "Registered OAuth client for {}: {}",
            self.server_name,
            registered.client_id
        );

        Ok(ClientInformation {
            client_id: registered.client_id,
            client_secret: registered.client_secret,
        })
    }

    /// Mint state + PKCE, persist them, and fire the redirect callback.
    async fn begin_authorization(&self) -> AppResult<()> {
        let metadata = self.metadata().await?;
        let mut stored = self.store.load(&self.server_name)?.unwrap_or_default();
        let client = self.client_information(&stored).await?;

        let pkce = generate_pkce_challenge();
        let state = generate_state();

        let url = build_authorization_url(
            &metadata.authorization_endpoint,
            &client.client_id,
            &self.settings.redirect_url,
            &self.settings.scopes,
            &pkce,
            &state,
        );

        stored.client_information = Some(client);
        stored.code_verifier = Some(pkce.code_verifier);
        stored.pending_state = Some(state);
        self.store.save(&self.server_name, &stored)?;

        tracing::info!(
            "Authorization required for {}; opening redirect",
            self.server_name
        );
        (self.on_redirect)(url);
        Ok(())
    }

    /// Complete the code flow: called by the external callback server once
    /// the operator has authorized.
    pub async fn finish_authorization(&self, code: &str, state: &str) -> AppResult<()> {
        let metadata = self.metadata().await?;
        let mut stored = self.store.load(&self.server_name)?.unwrap_or_default();

        match stored.pending_state.as_deref() {
            Some(expected) if expected == state => {}
            _ => {
                return Err(AppError::OAuth(format!(
                    "State mismatch in OAuth callback for {}",
                    self.server_name
                )))
            }
        }

        let client = stored.client_information.clone().ok_or_else(|| {
            AppError::OAuth("No client information for pending authorization".to_string())
        })?;
        let code_verifier = stored.code_verifier.clone().ok_or_else(|| {
            AppError::OAuth("No code verifier for pending authorization".to_string())
        })?;

        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("grant_type", "authorization_code".to_string());
        params.insert("code", code.to_string());
        params.insert("redirect_uri", self.settings.redirect_url.clone());
        params.insert("client_id", client.client_id.clone());
        params.insert("code_verifier", code_verifier);
        if let Some(secret) = &client.client_secret {
            params.insert("client_secret", secret.clone());
        }

        let tokens = self.token_request(&metadata.token_endpoint, &params).await?;

        stored.tokens = Some(tokens);
        stored.code_verifier = None;
        stored.pending_state = None;
        self.store.save(&self.server_name, &stored)?;

        tracing::info!("OAuth tokens acquired for {}", self.server_name);
        Ok(())
    }

    async fn refresh(&self, stored: &StoredAuth) -> AppResult<String> {
        let metadata = self.metadata().await?;
        let tokens = stored
            .tokens
            .as_ref()
            .ok_or_else(|| AppError::OAuth("No tokens to refresh".to_string()))?;
        let refresh_token = tokens
            .refresh_token
            .clone()
            .ok_or_else(|| AppError::OAuth("No refresh token available".to_string()))?;
        let client = self.client_information(stored).await?;

        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("grant_type", "refresh_token".to_string());
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", client.client_id.clone());
        if let Some(secret) = &client.client_secret {
            params.insert("client_secret", secret.clone());
        }

        let new_tokens = self.token_request(&metadata.token_endpoint, &params).await?;
        let access_token = new_tokens.access_token.clone();

        let mut updated = stored.clone();
        updated.tokens = Some(new_tokens);
        self.store.save(&self.server_name, &updated)?;

        tracing::info!("OAuth token refreshed for {}", self.server_name);
        Ok(access_token)
    }

    async fn token_request(
        &self,
        token_endpoint: &str,
        params: &HashMap<&str, String>,
    ) -> AppResult<OAuthTokens> {
        let response = self
            .http
            .post(token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| AppError::OAuth(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::OAuth(format!(
                "Token request failed with {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::OAuth(format!("Failed to parse token response: {}", e)))?;

        let expires_at = token
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        Ok(OAuthTokens {
            access_token: token.access_token,
            token_type: Some(token.token_type),
            expires_at,
            refresh_token: token.refresh_token,
            scope: token.scope,
        })
    }
}

/// `scheme://host[:port]` of a URL.
fn origin_of(url: &str) -> AppResult<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| AppError::Config(format!("Invalid server URL '{}': {}", url, e)))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::Config(format!("Server URL '{}' has no host", url)))?;
    let origin = match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    };
    Ok(origin)
}
