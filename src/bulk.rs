//! Per-item bulk mutations with failure isolation
//!
//! The executor applies one [`BulkMutation`] to an ordered list of ids,
//! one remote call per id, strictly in input order. A failing item is
//! recorded and the batch moves on; only authentication and target
//! resolution failures stop the batch.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api::RemoteApi;
use crate::auth::{AccessToken, Authenticator};
use crate::errors::AppResult;

/// One id that could not be processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub id: String,
    pub message: String,
}

/// Per-item outcome partitions, both in input order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResult {
    pub successful: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

impl BulkResult {
    pub fn total(&self) -> usize {
        self.successful.len() + self.failed.len()
    }
}

/// A mutation applied to every id of a batch
///
/// `resolve_target` runs once before any item (e.g. looking up the
/// destination folder); `apply` runs once per id.
#[async_trait]
pub trait BulkMutation: Send + Sync {
    type Target: Send + Sync;

    /// Verb used in logs and reports ("moved", "marked as read")
    fn describe(&self) -> &str;

    async fn resolve_target(
        &self,
        api: &dyn RemoteApi,
        token: &AccessToken,
    ) -> AppResult<Self::Target>;

    async fn apply(
        &self,
        api: &dyn RemoteApi,
        token: &AccessToken,
        target: &Self::Target,
        id: &str,
    ) -> AppResult<()>;
}

/// Sequential bulk executor
#[derive(Debug, Clone, Copy)]
pub struct BulkExecutor {
    failure_detail_limit: usize,
}

impl BulkExecutor {
    pub fn new(failure_detail_limit: usize) -> Self {
        Self {
            failure_detail_limit,
        }
    }

    /// Apply `mutation` to every id
    ///
    /// An empty id list is a no-op that does not authenticate.
    ///
    /// # Errors
    ///
    /// Returns the authenticator's error, the target resolution error, or an
    /// auth-related error raised by any item. Other per-item errors are
    /// captured in the result.
    pub async fn execute<M: BulkMutation>(
        &self,
        auth: &dyn Authenticator,
        api: &dyn RemoteApi,
        mutation: &M,
        ids: &[String],
    ) -> AppResult<BulkResult> {
        let mut result = BulkResult::default();
        if ids.is_empty() {
            return Ok(result);
        }

        let token = auth.ensure_authenticated().await?;
        let target = mutation.resolve_target(api, &token).await?;

        for id in ids {
            match mutation.apply(api, &token, &target, id).await {
                Ok(()) => {
                    debug!(id = %id, action = mutation.describe(), "bulk item applied");
                    result.successful.push(id.clone());
                }
                Err(e) if e.is_auth_related() => return Err(e),
                Err(e) => {
                    warn!(id = %id, action = mutation.describe(), error = %e, "bulk item failed");
                    result.failed.push(BulkFailure {
                        id: id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(result)
    }

    /// Human-readable summary with a bounded number of failure details
    pub fn summarize(&self, result: &BulkResult, action: &str) -> String {
        let mut out = format!(
            "{} of {} item(s) {action}.",
            result.successful.len(),
            result.total()
        );
        if result.failed.is_empty() {
            return out;
        }

        out.push_str(&format!("\n{} failed:", result.failed.len()));
        for failure in result.failed.iter().take(self.failure_detail_limit) {
            out.push_str(&format!("\n- {}: {}", failure.id, failure.message));
        }
        let hidden = result.failed.len().saturating_sub(self.failure_detail_limit);
        if hidden > 0 {
            out.push_str(&format!("\n... and {hidden} more"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{BulkExecutor, BulkFailure, BulkMutation, BulkResult};
    use crate::api::{ApiRequest, RemoteApi};
    use crate::auth::AccessToken;
    use crate::errors::{AppError, AppResult};
    use crate::testing::{ScriptedApi, StaticAuth};

    /// Posts `{target}/{id}`; the fake API decides which ids fail
    struct Touch {
        target_fails: bool,
        resolved: Mutex<usize>,
    }

    impl Touch {
        fn new(target_fails: bool) -> Self {
            Self {
                target_fails,
                resolved: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl BulkMutation for Touch {
        type Target = String;

        fn describe(&self) -> &str {
            "touched"
        }

        async fn resolve_target(&self, _api: &dyn RemoteApi, _token: &AccessToken) -> AppResult<String> {
            *self.resolved.lock().expect("lock") += 1;
            if self.target_fails {
                Err(AppError::NotFound("folder 'Nowhere'".to_owned()))
            } else {
                Ok("dest".to_owned())
            }
        }

        async fn apply(
            &self,
            api: &dyn RemoteApi,
            token: &AccessToken,
            target: &String,
            id: &str,
        ) -> AppResult<()> {
            api.call(
                token,
                ApiRequest::post(format!("{target}/{id}"), serde_json::json!({})),
            )
            .await
            .map(|_| ())
        }
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_owned()).collect()
    }

    fn fail_on(bad: &'static str, err: fn() -> AppError) -> ScriptedApi {
        ScriptedApi::new(move |call| {
            if call.path.ends_with(&format!("/{bad}")) {
                Err(err())
            } else {
                Ok(serde_json::Value::Null)
            }
        })
    }

    #[tokio::test]
    async fn failing_item_is_isolated() {
        let api = fail_on("b", || AppError::Transport("connection reset".to_owned()));
        let result = BulkExecutor::new(3)
            .execute(&StaticAuth::valid(), &api, &Touch::new(false), &ids(&["a", "b", "c"]))
            .await
            .expect("batch");

        assert_eq!(result.successful, ids(&["a", "c"]));
        assert_eq!(
            result.failed,
            vec![BulkFailure {
                id: "b".to_owned(),
                message: "transport error: connection reset".to_owned(),
            }]
        );
        let paths: Vec<String> = api.calls().into_iter().map(|c| c.path).collect();
        assert_eq!(paths, vec!["dest/a", "dest/b", "dest/c"]);
    }

    #[tokio::test]
    async fn duplicates_are_processed_independently() {
        let api = fail_on("x", || AppError::Api {
            status: 404,
            message: "ErrorItemNotFound".to_owned(),
        });
        let result = BulkExecutor::new(3)
            .execute(&StaticAuth::valid(), &api, &Touch::new(false), &ids(&["x", "a", "x"]))
            .await
            .expect("batch");
        assert_eq!(result.successful, ids(&["a"]));
        assert_eq!(result.failed.len(), 2);
        assert_eq!(api.call_count(), 3);
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let api = ScriptedApi::new(|_| Ok(serde_json::Value::Null));
        let auth = StaticAuth::missing();
        let mutation = Touch::new(false);
        let result = BulkExecutor::new(3)
            .execute(&auth, &api, &mutation, &[])
            .await
            .expect("no-op");
        assert_eq!(result, BulkResult::default());
        assert_eq!(auth.calls(), 0);
        assert_eq!(*mutation.resolved.lock().expect("lock"), 0);
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_authentication_touches_nothing() {
        let api = ScriptedApi::new(|_| Ok(serde_json::Value::Null));
        let mutation = Touch::new(false);
        let err = BulkExecutor::new(3)
            .execute(&StaticAuth::missing(), &api, &mutation, &ids(&["a"]))
            .await
            .expect_err("auth required");
        assert!(matches!(err, AppError::AuthRequired(_)));
        assert_eq!(*mutation.resolved.lock().expect("lock"), 0);
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn unresolvable_target_short_circuits_the_batch() {
        let api = ScriptedApi::new(|_| Ok(serde_json::Value::Null));
        let err = BulkExecutor::new(3)
            .execute(&StaticAuth::valid(), &api, &Touch::new(true), &ids(&["a", "b"]))
            .await
            .expect_err("target failure");
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn auth_failure_mid_batch_aborts() {
        let api = fail_on("b", || AppError::Api {
            status: 401,
            message: "expired".to_owned(),
        });
        let err = BulkExecutor::new(3)
            .execute(&StaticAuth::valid(), &api, &Touch::new(false), &ids(&["a", "b", "c"]))
            .await
            .expect_err("auth must propagate");
        assert!(err.is_auth_related());
        assert_eq!(api.call_count(), 2);
    }

    #[test]
    fn summary_caps_failure_details() {
        let result = BulkResult {
            successful: ids(&["ok"]),
            failed: (1..=5)
                .map(|i| BulkFailure {
                    id: format!("id{i}"),
                    message: "boom".to_owned(),
                })
                .collect(),
        };
        let text = BulkExecutor::new(3).summarize(&result, "moved");
        assert!(text.starts_with("1 of 6 item(s) moved."));
        assert!(text.contains("- id3: boom"));
        assert!(!text.contains("id4"));
        assert!(text.ends_with("... and 2 more"));
    }

    #[test]
    fn summary_without_failures_is_one_line() {
        let result = BulkResult {
            successful: ids(&["a", "b"]),
            failed: Vec::new(),
        };
        assert_eq!(
            BulkExecutor::new(3).summarize(&result, "marked as read"),
            "2 of 2 item(s) marked as read."
        );
    }
}
