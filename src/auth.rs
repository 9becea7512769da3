//! Credential lifecycle for the remote services
//!
//! The search engine, the bulk executor and every tool handler obtain their
//! credential through the [`Authenticator`] seam and never refresh or retry
//! on their own. Outlook uses the Microsoft identity platform
//! (authorization-code grant plus refresh grant, tokens persisted to a JSON
//! file); Zendesk uses a static API token presented as HTTP Basic.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{OutlookConfig, ZendeskConfig};
use crate::errors::{AppError, AppResult};

/// Instruction returned when Outlook has never been authorized
const OUTLOOK_LOGIN_HINT: &str =
    "no Outlook token is stored. Call outlook_authenticate and open the returned URL, then call outlook_complete_authentication with the code.";

/// How the secret is presented in the `Authorization` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScheme {
    Bearer,
    Basic,
}

impl TokenScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bearer => "Bearer",
            Self::Basic => "Basic",
        }
    }
}

/// A credential ready to present on remote calls
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub scheme: TokenScheme,
    pub secret: SecretString,
    /// `None` for credentials that never expire
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn bearer(secret: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            scheme: TokenScheme::Bearer,
            secret: SecretString::new(secret.into().into()),
            expires_at,
        }
    }

    pub fn basic(encoded: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            scheme: TokenScheme::Basic,
            secret: SecretString::new(encoded.into().into()),
            expires_at,
        }
    }
}

/// Yields a credential or fails with `AuthRequired`
///
/// `ensure_authenticated` never returns a token whose `expires_at` has
/// passed. Callers propagate its errors untouched.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn has_valid_token(&self) -> bool;
    async fn ensure_authenticated(&self) -> AppResult<AccessToken>;
}

/// On-disk token record
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// JSON token file
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored tokens
    ///
    /// A missing file is `Ok(None)`. A file that cannot be parsed is logged
    /// and also treated as absent, so the user is asked to authenticate again.
    pub async fn load(&self) -> AppResult<Option<StoredTokens>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "failed to read token file {}: {e}",
                    self.path.display()
                )));
            }
        };
        match serde_json::from_str(&raw) {
            Ok(tokens) => Ok(Some(tokens)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable token file");
                Ok(None)
            }
        }
    }

    pub async fn save(&self, tokens: &StoredTokens) -> AppResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Internal(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let json = serde_json::to_string_pretty(tokens)
            .map_err(|e| AppError::Internal(format!("failed to encode tokens: {e}")))?;
        tokio::fs::write(&self.path, json).await.map_err(|e| {
            AppError::Internal(format!(
                "failed to write token file {}: {e}",
                self.path.display()
            ))
        })?;
        restrict_permissions(&self.path).await;
        Ok(())
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    if let Err(e) = tokio::fs::set_permissions(path, perms).await {
        warn!(path = %path.display(), error = %e, "could not restrict token file permissions");
    }
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) {}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Default)]
struct TokenCache {
    loaded: bool,
    tokens: Option<StoredTokens>,
}

/// Microsoft identity platform authenticator with a file-backed cache
pub struct OAuthAuthenticator {
    config: OutlookConfig,
    client: Client,
    store: TokenStore,
    cache: Mutex<TokenCache>,
}

impl OAuthAuthenticator {
    /// # Errors
    ///
    /// Returns `Internal` if the HTTP client cannot be built.
    pub fn new(config: OutlookConfig, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        let store = TokenStore::new(config.token_path.clone());
        Ok(Self {
            config,
            client,
            store,
            cache: Mutex::new(TokenCache::default()),
        })
    }

    pub fn token_path(&self) -> &Path {
        self.store.path()
    }

    fn endpoint(&self, leaf: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/{leaf}",
            self.config.authority_url.trim_end_matches('/'),
            self.config.tenant_id
        )
    }

    /// Consent URL the user opens in a browser
    pub fn authorization_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&response_mode=query&scope={}&state={}",
            self.endpoint("authorize"),
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&self.config.scopes),
            urlencoding::encode(state),
        )
    }

    /// Redeem an authorization code and persist the resulting tokens
    ///
    /// # Errors
    ///
    /// Returns `Api` if the identity platform rejects the code.
    pub async fn exchange_code(&self, code: &str) -> AppResult<DateTime<Utc>> {
        let tokens = self
            .request_tokens(vec![
                ("grant_type", "authorization_code".to_owned()),
                ("code", code.to_owned()),
                ("redirect_uri", self.config.redirect_uri.clone()),
            ])
            .await?;
        let expires_at = tokens.expires_at;
        self.store.save(&tokens).await?;

        let mut cache = self.cache.lock().await;
        cache.loaded = true;
        cache.tokens = Some(tokens);
        info!(path = %self.store.path().display(), "stored new Outlook tokens");
        Ok(expires_at)
    }

    async fn refresh(&self, refresh_token: &str) -> AppResult<StoredTokens> {
        let mut tokens = self
            .request_tokens(vec![
                ("grant_type", "refresh_token".to_owned()),
                ("refresh_token", refresh_token.to_owned()),
            ])
            .await?;
        // The platform may omit a rotated refresh token; keep the old one.
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_owned());
        }
        Ok(tokens)
    }

    async fn request_tokens(&self, mut form: Vec<(&str, String)>) -> AppResult<StoredTokens> {
        form.push(("client_id", self.config.client_id.clone()));
        form.push(("scope", self.config.scopes.clone()));
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.expose_secret().to_owned()));
        }

        let response = self
            .client
            .post(self.endpoint("token"))
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| match e.error_description {
                    Some(description) => format!("{}: {description}", e.error),
                    None => e.error,
                })
                .unwrap_or_else(|_| body.trim().chars().take(200).collect());
            return Err(AppError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::Internal(format!("invalid token response: {e}")))?;
        let expires_at = TimeDelta::try_seconds(parsed.expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "token response has an out-of-range expires_in ({})",
                    parsed.expires_in
                ))
            })?;
        Ok(StoredTokens {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            expires_at,
            scope: parsed.scope,
        })
    }

    /// A skew too large to represent makes every token stale
    fn is_fresh(&self, tokens: &StoredTokens) -> bool {
        i64::try_from(self.config.refresh_skew_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|skew| tokens.expires_at.checked_sub_signed(skew))
            .is_some_and(|deadline| deadline > Utc::now())
    }

    async fn loaded<'a>(
        &self,
        cache: &'a mut TokenCache,
    ) -> AppResult<&'a mut Option<StoredTokens>> {
        if !cache.loaded {
            cache.tokens = self.store.load().await?;
            cache.loaded = true;
        }
        Ok(&mut cache.tokens)
    }
}

#[async_trait]
impl Authenticator for OAuthAuthenticator {
    async fn has_valid_token(&self) -> bool {
        let mut cache = self.cache.lock().await;
        match self.loaded(&mut cache).await {
            Ok(Some(tokens)) => self.is_fresh(tokens),
            _ => false,
        }
    }

    async fn ensure_authenticated(&self) -> AppResult<AccessToken> {
        let mut cache = self.cache.lock().await;
        let slot = self.loaded(&mut cache).await?;
        let Some(current) = slot.as_ref() else {
            return Err(AppError::AuthRequired(OUTLOOK_LOGIN_HINT.to_owned()));
        };

        if self.is_fresh(current) {
            return Ok(AccessToken::bearer(
                current.access_token.clone(),
                Some(current.expires_at),
            ));
        }

        let Some(refresh_token) = current.refresh_token.clone() else {
            return Err(AppError::AuthRequired(
                "the Outlook token has expired and no refresh token is stored. Call outlook_authenticate."
                    .to_owned(),
            ));
        };

        debug!("refreshing Outlook access token");
        let refreshed = match self.refresh(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Outlook token refresh failed");
                return Err(AppError::AuthRequired(format!(
                    "the Outlook token could not be refreshed ({e}). Call outlook_authenticate."
                )));
            }
        };
        self.store.save(&refreshed).await?;
        let token = AccessToken::bearer(
            refreshed.access_token.clone(),
            Some(refreshed.expires_at),
        );
        *slot = Some(refreshed);
        info!("refreshed Outlook access token");
        Ok(token)
    }
}

/// Zendesk API-token credentials (`{email}/token:{api_key}` as Basic auth)
pub struct BasicAuthenticator {
    encoded: Option<SecretString>,
}

impl BasicAuthenticator {
    pub fn new(config: Option<&ZendeskConfig>) -> Self {
        let encoded = config.map(|c| {
            let raw = format!("{}/token:{}", c.email, c.api_key.expose_secret());
            SecretString::new(BASE64.encode(raw).into())
        });
        Self { encoded }
    }
}

#[async_trait]
impl Authenticator for BasicAuthenticator {
    async fn has_valid_token(&self) -> bool {
        self.encoded.is_some()
    }

    async fn ensure_authenticated(&self) -> AppResult<AccessToken> {
        match &self.encoded {
            Some(secret) => Ok(AccessToken::basic(secret.expose_secret(), None)),
            None => Err(AppError::AuthRequired(
                "Zendesk credentials are not configured. Set ZENDESK_SUBDOMAIN, ZENDESK_EMAIL and ZENDESK_API_KEY."
                    .to_owned(),
            )),
        }
    }
}
