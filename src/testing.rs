//! In-memory fakes for the `RemoteApi` and `Authenticator` seams

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{ApiRequest, RemoteApi};
use crate::auth::{AccessToken, Authenticator};
use crate::errors::{AppError, AppResult};

type Responder = Box<dyn Fn(&ApiRequest) -> AppResult<Value> + Send + Sync>;

/// Records every request and answers through a closure
pub struct ScriptedApi {
    calls: Mutex<Vec<ApiRequest>>,
    responder: Responder,
}

impl ScriptedApi {
    pub fn new(responder: impl Fn(&ApiRequest) -> AppResult<Value> + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl RemoteApi for ScriptedApi {
    async fn call(&self, _token: &AccessToken, request: ApiRequest) -> AppResult<Value> {
        let response = (self.responder)(&request);
        self.calls.lock().expect("calls lock").push(request);
        response
    }
}

/// Look up a query parameter of a recorded request
pub fn query_param<'a>(request: &'a ApiRequest, key: &str) -> Option<&'a str> {
    request
        .query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Authenticator that always succeeds or always requires login
pub struct StaticAuth {
    logged_in: bool,
    calls: AtomicUsize,
}

impl StaticAuth {
    pub fn valid() -> Self {
        Self {
            logged_in: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn missing() -> Self {
        Self {
            logged_in: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for StaticAuth {
    async fn has_valid_token(&self) -> bool {
        self.logged_in
    }

    async fn ensure_authenticated(&self) -> AppResult<AccessToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.logged_in {
            Ok(AccessToken::bearer("test-token", None))
        } else {
            Err(AppError::AuthRequired("log in first".to_owned()))
        }
    }
}

/// Graph-style page of message stubs with the given ids
pub fn message_page(ids: &[&str]) -> Value {
    let value: Vec<Value> = ids
        .iter()
        .map(|id| serde_json::json!({ "id": id, "subject": format!("subject {id}") }))
        .collect();
    serde_json::json!({ "value": value })
}
