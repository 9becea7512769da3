//! Configuration module for service credentials and server settings
//!
//! All configuration is loaded from environment variables. Outlook settings
//! use the `OUTLOOK_*` prefix, Zendesk settings `ZENDESK_*`, and server-wide
//! tuning `MCP_*`. A service whose required variables are absent is left
//! unconfigured and its tools answer with setup instructions.

use std::env;
use std::env::VarError;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::errors::{AppError, AppResult};
use crate::query::TermField;

/// Microsoft Graph API root
const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
/// Microsoft identity platform root
const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";
/// Redirect URI registered for the Outlook app
const DEFAULT_REDIRECT_URI: &str = "http://localhost:3333/auth/callback";
/// Delegated scopes requested during consent
const DEFAULT_SCOPES: &str =
    "offline_access User.Read Mail.ReadWrite Mail.Send Calendars.ReadWrite MailboxSettings.ReadWrite";
/// Upper bound for `OUTLOOK_TOKEN_REFRESH_SKEW_SECONDS`
const MAX_REFRESH_SKEW_SECONDS: u64 = 86_400;
/// Token file name placed in the home directory
const DEFAULT_TOKEN_FILE: &str = ".outlook-mcp-tokens.json";

/// Outlook (Microsoft Graph) configuration
///
/// The client secret is optional: public-client app registrations exchange
/// codes without one.
#[derive(Debug, Clone)]
pub struct OutlookConfig {
    /// Azure app registration client ID
    pub client_id: String,
    /// Client secret stored in a type that prevents accidental logging
    pub client_secret: Option<SecretString>,
    /// Directory tenant (`common`, `organizations`, or a tenant GUID)
    pub tenant_id: String,
    /// OAuth redirect URI
    pub redirect_uri: String,
    /// Space-separated delegated scopes
    pub scopes: String,
    /// Path of the JSON token file
    pub token_path: PathBuf,
    /// Graph API base URL
    pub graph_base_url: String,
    /// Identity platform base URL
    pub authority_url: String,
    /// Seconds before expiry at which a token is treated as expired
    pub refresh_skew_seconds: u64,
}

/// Zendesk configuration
#[derive(Debug, Clone)]
pub struct ZendeskConfig {
    /// Account subdomain (`acme` for `acme.zendesk.com`)
    pub subdomain: String,
    /// Agent email used with API token authentication
    pub email: String,
    /// API token stored in a type that prevents accidental logging
    pub api_key: SecretString,
    /// REST API base URL
    pub base_url: String,
}

/// Search Strategy Engine tuning
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Ceiling every requested result count is clamped to
    pub max_results: usize,
    /// Result count used when the caller passes none
    pub default_results: i64,
    /// Priority order of the single-term rungs
    pub term_order: Vec<TermField>,
}

/// Server-wide configuration
///
/// Wraps both service configs and global settings. Cloned into MCP tool
/// handlers via `Arc` for thread-safe shared access.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Outlook settings, `None` when `OUTLOOK_CLIENT_ID` is unset
    pub outlook: Option<OutlookConfig>,
    /// Zendesk settings, `None` unless subdomain, email and key are all set
    pub zendesk: Option<ZendeskConfig>,
    /// Search ladder settings
    pub search: SearchConfig,
    /// Whether mutating tools (send, move, create, update, delete) are enabled
    pub write_enabled: bool,
    /// Maximum number of per-item failures detailed in bulk reports
    pub bulk_failure_details: usize,
    /// Per-request HTTP timeout in milliseconds
    pub http_timeout_ms: u64,
    /// Retries for 429/5xx responses
    pub http_max_retries: u32,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a variable is set to a malformed value, or
    /// if the Zendesk variables are only partially configured.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// OUTLOOK_CLIENT_ID=00000000-0000-0000-0000-000000000000
    /// OUTLOOK_CLIENT_SECRET=app-secret
    /// ZENDESK_SUBDOMAIN=acme
    /// ZENDESK_EMAIL=agent@acme.com
    /// ZENDESK_API_KEY=token
    /// MCP_SEARCH_MAX_RESULTS=50
    /// MCP_WRITE_ENABLED=false
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let max_results = parse_usize_env("MCP_SEARCH_MAX_RESULTS", 50)?;
        if max_results == 0 {
            return Err(AppError::InvalidInput(
                "MCP_SEARCH_MAX_RESULTS must be at least 1".to_owned(),
            ));
        }

        let term_order = match optional_env("MCP_SEARCH_TERM_ORDER")? {
            Some(raw) => parse_term_order(&raw)?,
            None => TermField::DEFAULT_ORDER.to_vec(),
        };

        Ok(Self {
            outlook: load_outlook()?,
            zendesk: load_zendesk()?,
            search: SearchConfig {
                max_results,
                default_results: parse_u64_env("MCP_SEARCH_DEFAULT_RESULTS", 10)? as i64,
                term_order,
            },
            write_enabled: parse_bool_env("MCP_WRITE_ENABLED", true)?,
            bulk_failure_details: parse_usize_env("MCP_BULK_FAILURE_DETAILS", 3)?,
            http_timeout_ms: parse_u64_env("MCP_HTTP_TIMEOUT_MS", 30_000)?,
            http_max_retries: parse_u64_env("MCP_HTTP_MAX_RETRIES", 2)?.min(10) as u32,
        })
    }

    /// HTTP timeout as a `Duration`
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

fn load_outlook() -> AppResult<Option<OutlookConfig>> {
    let Some(client_id) = optional_env("OUTLOOK_CLIENT_ID")? else {
        return Ok(None);
    };

    let token_path = match optional_env("OUTLOOK_TOKEN_PATH")? {
        Some(path) => PathBuf::from(path),
        None => default_token_path(),
    };

    Ok(Some(OutlookConfig {
        client_id,
        client_secret: optional_env("OUTLOOK_CLIENT_SECRET")?
            .map(|secret| SecretString::new(secret.into())),
        tenant_id: optional_env("OUTLOOK_TENANT_ID")?.unwrap_or_else(|| "common".to_owned()),
        redirect_uri: optional_env("OUTLOOK_REDIRECT_URI")?
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_owned()),
        scopes: optional_env("OUTLOOK_SCOPES")?.unwrap_or_else(|| DEFAULT_SCOPES.to_owned()),
        token_path,
        graph_base_url: optional_env("OUTLOOK_GRAPH_BASE_URL")?
            .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_owned()),
        authority_url: optional_env("OUTLOOK_AUTHORITY_URL")?
            .unwrap_or_else(|| DEFAULT_AUTHORITY_URL.to_owned()),
        refresh_skew_seconds: validate_refresh_skew(parse_u64_env(
            "OUTLOOK_TOKEN_REFRESH_SKEW_SECONDS",
            300,
        )?)?,
    }))
}

/// Reject a refresh skew longer than one day
fn validate_refresh_skew(seconds: u64) -> AppResult<u64> {
    if seconds > MAX_REFRESH_SKEW_SECONDS {
        return Err(AppError::InvalidInput(format!(
            "OUTLOOK_TOKEN_REFRESH_SKEW_SECONDS must be at most {MAX_REFRESH_SKEW_SECONDS}"
        )));
    }
    Ok(seconds)
}

fn load_zendesk() -> AppResult<Option<ZendeskConfig>> {
    let subdomain = optional_env("ZENDESK_SUBDOMAIN")?;
    let email = optional_env("ZENDESK_EMAIL")?;
    let api_key = optional_env("ZENDESK_API_KEY")?;

    match (subdomain, email, api_key) {
        (None, None, None) => Ok(None),
        (Some(subdomain), Some(email), Some(api_key)) => {
            let subdomain = sanitize_subdomain(&subdomain)?;
            let base_url = optional_env("ZENDESK_BASE_URL")?
                .unwrap_or_else(|| format!("https://{subdomain}.zendesk.com/api/v2"));
            Ok(Some(ZendeskConfig {
                subdomain,
                email,
                api_key: SecretString::new(api_key.into()),
                base_url,
            }))
        }
        _ => Err(AppError::InvalidInput(
            "ZENDESK_SUBDOMAIN, ZENDESK_EMAIL and ZENDESK_API_KEY must be set together".to_owned(),
        )),
    }
}

fn default_token_path() -> PathBuf {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_TOKEN_FILE)
}

/// Validate a Zendesk subdomain and normalize it to lowercase
///
/// Accepts a bare subdomain or a full `*.zendesk.com` host.
fn sanitize_subdomain(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim().trim_start_matches("https://");
    let sub = trimmed
        .strip_suffix(".zendesk.com")
        .unwrap_or(trimmed)
        .to_ascii_lowercase();
    if sub.is_empty() || !sub.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-') {
        return Err(AppError::InvalidInput(format!(
            "invalid ZENDESK_SUBDOMAIN: '{raw}'"
        )));
    }
    Ok(sub)
}

/// Parse a comma-separated single-term rung order
///
/// Every field must appear at most once; omitted fields are never tried as
/// single-term rungs.
fn parse_term_order(raw: &str) -> AppResult<Vec<TermField>> {
    let mut order = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let field = TermField::parse(name).ok_or_else(|| {
            AppError::InvalidInput(format!(
                "invalid MCP_SEARCH_TERM_ORDER entry '{name}'; expected subject, from, to or query"
            ))
        })?;
        if order.contains(&field) {
            return Err(AppError::InvalidInput(format!(
                "MCP_SEARCH_TERM_ORDER lists '{name}' more than once"
            )));
        }
        order.push(field);
    }
    Ok(order)
}

/// Read an optional environment variable; empty values count as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v.trim().to_owned())),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a boolean environment variable with flexible values
///
/// Accepts: `1`, `true`, `yes`, `y`, `on` (truthy) or `0`, `false`, `no`,
/// `n`, `off` (falsy). Case-insensitive. Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set to an unrecognized value.
fn parse_bool_env(key: &str, default: bool) -> AppResult<bool> {
    match optional_env(key)? {
        Some(v) => parse_bool_value(&v).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid boolean environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match optional_env(key)? {
        Some(v) => v.parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

/// Parse a `usize` environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `usize`.
fn parse_usize_env(key: &str, default: usize) -> AppResult<usize> {
    match optional_env(key)? {
        Some(v) => v.parse::<usize>().map_err(|_| {
            AppError::InvalidInput(format!("invalid usize environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}
