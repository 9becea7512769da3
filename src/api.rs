//! Remote REST API client
//!
//! [`RemoteApi`] is the narrow collaborator the search engine, the bulk
//! executor and the service adapters talk to: one call takes a method, a
//! path, an optional JSON body and query parameters, and yields parsed JSON
//! or a typed [`AppError`]. [`HttpApiClient`] is the `reqwest`
//! implementation; it owns the timeout and retry policy so callers never
//! retry on their own.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::AccessToken;
use crate::errors::{AppError, AppResult};

/// Upper bound on a server-requested `Retry-After` delay
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);
/// First backoff delay; doubled on every further retry
const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(500);
/// Maximum characters of an error body echoed into messages
const ERROR_BODY_MAX_CHARS: usize = 300;

/// One REST call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the service base URL, or an absolute URL
    pub path: String,
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).json(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).json(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, path).json(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn queries(mut self, params: Vec<(String, String)>) -> Self {
        self.query.extend(params);
        self
    }
}

/// Remote API collaborator
///
/// Any non-2xx response is an [`AppError::Api`]; a 401 is auth-related.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn call(&self, token: &AccessToken, request: ApiRequest) -> AppResult<Value>;
}

/// Call and deserialize the response into a typed structure
pub async fn fetch<T: DeserializeOwned>(
    api: &dyn RemoteApi,
    token: &AccessToken,
    request: ApiRequest,
) -> AppResult<T> {
    let path = request.path.clone();
    let value = api.call(token, request).await?;
    serde_json::from_value(value)
        .map_err(|e| AppError::Internal(format!("unexpected response shape from {path}: {e}")))
}

/// Collection envelope used by Graph (`value`, `@odata.nextLink`)
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ODataPage<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
}

/// `reqwest`-backed [`RemoteApi`]
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    client: Client,
    base_url: String,
    max_retries: u32,
    retry_base: Duration,
}

impl HttpApiClient {
    /// Create a client for one service
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the HTTP client cannot be built (TLS backend
    /// initialization failure).
    pub fn new(base_url: &str, timeout: Duration, max_retries: u32) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            max_retries,
            retry_base: DEFAULT_RETRY_BASE,
        })
    }

    #[cfg(test)]
    fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_owned()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after
            .map(|d| d.min(MAX_RETRY_AFTER))
            .unwrap_or_else(|| self.retry_base.saturating_mul(2u32.saturating_pow(attempt)))
    }
}

#[async_trait]
impl RemoteApi for HttpApiClient {
    async fn call(&self, token: &AccessToken, request: ApiRequest) -> AppResult<Value> {
        let url = self.url_for(&request.path);
        let mut attempt = 0u32;

        loop {
            let mut builder = self
                .client
                .request(request.method.clone(), &url)
                .header(
                    AUTHORIZATION,
                    format!("{} {}", token.scheme.as_str(), token.secret.expose_secret()),
                )
                .header("accept", "application/json");
            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            debug!(method = %request.method, path = %request.path, attempt, "remote call");
            let response = builder.send().await?;
            let status = response.status();

            if status.is_success() {
                let body = response.text().await?;
                if body.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return serde_json::from_str(&body).map_err(|e| {
                    AppError::Internal(format!("invalid JSON from {}: {e}", request.path))
                });
            }

            if is_retryable(status) && attempt < self.max_retries {
                let delay = self.backoff(attempt, retry_after(&response));
                warn!(
                    status = status.as_u16(),
                    path = %request.path,
                    delay_ms = delay.as_millis() as u64,
                    "retrying remote call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Api {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Extract the provider's error message from a failure body
///
/// Understands Graph (`{"error":{"code","message"}}`) and Zendesk
/// (`{"error":"…","description":"…"}` or `{"error":{"title","message"}}`)
/// shapes, falling back to the raw body.
fn error_message(status: StatusCode, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|json| {
        let error = json.get("error")?;
        if let Some(message) = error.get("message").and_then(Value::as_str) {
            let code = error
                .get("code")
                .or_else(|| error.get("title"))
                .and_then(Value::as_str);
            return Some(match code {
                Some(code) => format!("{code}: {message}"),
                None => message.to_owned(),
            });
        }
        let error = error.as_str()?;
        Some(match json.get("description").and_then(Value::as_str) {
            Some(description) => format!("{error}: {description}"),
            None => error.to_owned(),
        })
    });

    from_json.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_owned()
        } else {
            trimmed.chars().take(ERROR_BODY_MAX_CHARS).collect()
        }
    })
}
