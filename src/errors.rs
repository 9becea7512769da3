//! Application error model with tool-result mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to the text an agent sees in the tool response.

use thiserror::Error;

/// HTTP status the remote services use for rejected credentials
const UNAUTHORIZED: u16 = 401;

/// Application error type
///
/// Covers every failure the tool handlers, the search engine, the bulk
/// executor and the remote collaborators can produce.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, malformed request)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Resource not found (folder, rule, ticket)
    #[error("not found: {0}")]
    NotFound(String),
    /// No valid credential is available; the user must authenticate
    #[error("authentication required: {0}")]
    AuthRequired(String),
    /// Remote service answered with a non-2xx status
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    /// Remote call exceeded its deadline
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Network-level failure (connect, TLS, body read)
    #[error("transport error: {0}")]
    Transport(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// True for failures that only re-authentication can fix
    ///
    /// Callers must propagate these untouched instead of treating them as
    /// "no results" or per-item failures.
    pub fn is_auth_related(&self) -> bool {
        matches!(
            self,
            Self::AuthRequired(_) | Self::Api { status: UNAUTHORIZED, .. }
        )
    }

    /// True for errors that describe bad caller input rather than a failure
    ///
    /// These are surfaced as ordinary tool output so the agent can correct
    /// its arguments.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::NotFound(_))
    }

    /// Human-readable text for the tool response
    pub fn to_tool_text(&self) -> String {
        match self {
            Self::InvalidInput(msg) => msg.clone(),
            Self::NotFound(msg) => format!("Not found: {msg}"),
            Self::AuthRequired(msg) => format!("Authentication required: {msg}"),
            Self::Api {
                status: UNAUTHORIZED,
                message,
            } => format!(
                "Authentication required: the service rejected the stored credentials ({message}). Re-authenticate and try again."
            ),
            Self::Api { status, message } => format!("Request failed ({status}): {message}"),
            Self::Timeout(msg) => format!("Request timed out: {msg}"),
            Self::Transport(msg) => format!("Network error: {msg}"),
            Self::Internal(msg) => format!("Error: {msg}"),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Internal(format!("response decode failure: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;
