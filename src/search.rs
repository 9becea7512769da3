//! Progressive search with degrading fallback
//!
//! A search runs a ladder of increasingly permissive queries against one
//! message collection and stops at the first rung that yields anything:
//!
//! 1. every present term plus every active filter,
//! 2. each present term alone (in the configured priority order) plus the filters,
//! 3. the filters alone,
//! 4. the most recent items of the collection.
//!
//! "No results" is never an error. A failing rung before the last one is
//! recorded and skipped; a failing recency rung propagates. Authentication
//! failures abort the ladder wherever they appear.

use std::fmt;
use std::slice;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::api::{ApiRequest, ODataPage, RemoteApi, fetch};
use crate::auth::{AccessToken, Authenticator};
use crate::errors::AppResult;
use crate::query::{BooleanFilter, Query, QueryDialect, SearchTerm, TermField};

/// One rung of the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    Combined,
    SingleTerm(TermField),
    BooleanFiltersOnly,
    RecencyFallback,
}

impl SearchStrategy {
    pub fn name(self) -> &'static str {
        match self {
            Self::Combined => "combined",
            Self::SingleTerm(TermField::Subject) => "single-term-subject",
            Self::SingleTerm(TermField::From) => "single-term-from",
            Self::SingleTerm(TermField::To) => "single-term-to",
            Self::SingleTerm(TermField::FreeText) => "single-term-query",
            Self::BooleanFiltersOnly => "boolean-filters-only",
            Self::RecencyFallback => "recency-fallback",
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Caller's search criteria, fixed for one invocation
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub free_text: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub has_attachment: Option<bool>,
    pub unread_only: Option<bool>,
    /// Raw requested count; clamped before use
    pub max_results: i64,
    /// Collection path the queries run against
    pub scope_endpoint: String,
}

impl SearchRequest {
    /// Effective per-rung limit: `max_results` clamped to `[1, ceiling]`
    pub fn cap(&self, ceiling: usize) -> usize {
        clamp_limit(self.max_results, ceiling)
    }

    /// Present terms; blank strings count as absent
    pub fn terms(&self) -> Vec<SearchTerm> {
        [
            (TermField::Subject, &self.subject),
            (TermField::From, &self.from),
            (TermField::To, &self.to),
            (TermField::FreeText, &self.free_text),
        ]
        .into_iter()
        .filter_map(|(field, value)| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| SearchTerm::new(field, v))
        })
        .collect()
    }

    /// Active filters; only an explicit `true` activates one
    pub fn filters(&self) -> Vec<BooleanFilter> {
        let mut filters = Vec::new();
        if self.has_attachment == Some(true) {
            filters.push(BooleanFilter::HasAttachment);
        }
        if self.unread_only == Some(true) {
            filters.push(BooleanFilter::UnreadOnly);
        }
        filters
    }
}

/// Clamp a caller-supplied count to `[1, ceiling]`
pub fn clamp_limit(raw: i64, ceiling: usize) -> usize {
    let ceiling = ceiling.max(1);
    usize::try_from(raw.max(1)).unwrap_or(ceiling).min(ceiling)
}

/// Diagnostic record of one executed rung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchAttempt {
    pub strategy: SearchStrategy,
    pub succeeded: bool,
    pub result_count: usize,
}

/// Items found plus the path taken to find them
#[derive(Debug, Clone)]
pub struct SearchOutcome<T> {
    pub items: Vec<T>,
    pub attempts: Vec<SearchAttempt>,
    pub used_strategy: SearchStrategy,
}

/// Runs the search ladder
#[derive(Debug, Clone)]
pub struct SearchEngine {
    ceiling: usize,
    term_order: Vec<TermField>,
}

impl SearchEngine {
    pub fn new(ceiling: usize, term_order: Vec<TermField>) -> Self {
        Self {
            ceiling: ceiling.max(1),
            term_order,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Search `request.scope_endpoint`, degrading until something matches
    ///
    /// # Errors
    ///
    /// Returns the authenticator's error (with zero remote calls made), any
    /// auth-related error raised by a rung, or the recency rung's error.
    pub async fn search<T: DeserializeOwned + Send>(
        &self,
        auth: &dyn Authenticator,
        api: &dyn RemoteApi,
        dialect: &dyn QueryDialect,
        request: &SearchRequest,
    ) -> AppResult<SearchOutcome<T>> {
        let token = auth.ensure_authenticated().await?;
        let cap = request.cap(self.ceiling);
        let mut attempts = Vec::new();

        for (strategy, query) in self.rungs(request) {
            match self
                .run_rung::<T>(api, &token, dialect, request, Some(&query), cap)
                .await
            {
                Ok(items) => {
                    debug!(strategy = %strategy, count = items.len(), "search rung finished");
                    attempts.push(SearchAttempt {
                        strategy,
                        succeeded: !items.is_empty(),
                        result_count: items.len(),
                    });
                    if !items.is_empty() {
                        return Ok(SearchOutcome {
                            items,
                            attempts,
                            used_strategy: strategy,
                        });
                    }
                }
                Err(e) if e.is_auth_related() => return Err(e),
                Err(e) => {
                    warn!(strategy = %strategy, error = %e, "search rung failed, degrading");
                    attempts.push(SearchAttempt {
                        strategy,
                        succeeded: false,
                        result_count: 0,
                    });
                }
            }
        }

        let items = self
            .run_rung::<T>(api, &token, dialect, request, None, cap)
            .await?;
        debug!(count = items.len(), "recency fallback finished");
        attempts.push(SearchAttempt {
            strategy: SearchStrategy::RecencyFallback,
            succeeded: !items.is_empty(),
            result_count: items.len(),
        });
        Ok(SearchOutcome {
            items,
            attempts,
            used_strategy: SearchStrategy::RecencyFallback,
        })
    }

    /// Term and filter rungs in execution order, excluding the recency rung
    fn rungs(&self, request: &SearchRequest) -> Vec<(SearchStrategy, Query)> {
        let terms = request.terms();
        let filters = request.filters();
        let mut rungs = Vec::new();

        if !terms.is_empty() {
            rungs.push((SearchStrategy::Combined, Query::all_of(&terms, &filters)));
        }
        for field in &self.term_order {
            if let Some(term) = terms.iter().find(|t| t.field == *field) {
                rungs.push((
                    SearchStrategy::SingleTerm(*field),
                    Query::all_of(slice::from_ref(term), &filters),
                ));
            }
        }
        if !filters.is_empty() {
            rungs.push((
                SearchStrategy::BooleanFiltersOnly,
                Query::all_of(&[], &filters),
            ));
        }
        rungs
    }

    async fn run_rung<T: DeserializeOwned + Send>(
        &self,
        api: &dyn RemoteApi,
        token: &AccessToken,
        dialect: &dyn QueryDialect,
        request: &SearchRequest,
        query: Option<&Query>,
        cap: usize,
    ) -> AppResult<Vec<T>> {
        let call = ApiRequest::get(request.scope_endpoint.clone()).queries(dialect.render(query, cap));
        let page: ODataPage<T> = fetch(api, token, call).await?;
        let mut items = page.value;
        items.truncate(cap);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::{SearchEngine, SearchRequest, SearchStrategy};
    use crate::api::ApiRequest;
    use crate::errors::AppError;
    use crate::query::{GraphDialect, TermField};
    use crate::testing::{ScriptedApi, StaticAuth, message_page, query_param};

    #[derive(Debug, Deserialize)]
    struct Item {
        id: String,
    }

    fn engine() -> SearchEngine {
        SearchEngine::new(50, TermField::DEFAULT_ORDER.to_vec())
    }

    fn request() -> SearchRequest {
        SearchRequest {
            max_results: 10,
            scope_endpoint: "me/mailFolders/inbox/messages".to_owned(),
            ..SearchRequest::default()
        }
    }

    fn strategies(outcome_attempts: &[super::SearchAttempt]) -> Vec<SearchStrategy> {
        outcome_attempts.iter().map(|a| a.strategy).collect()
    }

    fn is_recency(call: &ApiRequest) -> bool {
        query_param(call, "$search").is_none() && query_param(call, "$filter").is_none()
    }

    #[tokio::test]
    async fn empty_term_rungs_degrade_to_recency_fallback() {
        let api = ScriptedApi::new(|call| {
            Ok(if is_recency(call) {
                message_page(&["r1", "r2", "r3"])
            } else {
                message_page(&[])
            })
        });
        let req = SearchRequest {
            subject: Some("invoice".to_owned()),
            from: Some(String::new()),
            ..request()
        };

        let outcome = engine()
            .search::<Item>(&StaticAuth::valid(), &api, &GraphDialect::default(), &req)
            .await
            .expect("search");

        assert_eq!(outcome.used_strategy, SearchStrategy::RecencyFallback);
        assert_eq!(
            strategies(&outcome.attempts),
            vec![
                SearchStrategy::Combined,
                SearchStrategy::SingleTerm(TermField::Subject),
                SearchStrategy::RecencyFallback,
            ]
        );
        assert_eq!(outcome.items.len(), 3);
        assert_eq!(
            query_param(&api.calls()[0], "$search"),
            Some("\"subject:invoice\"")
        );
    }

    #[tokio::test]
    async fn first_rung_with_results_wins() {
        let api = ScriptedApi::new(|_| Ok(message_page(&["a", "b"])));
        let req = SearchRequest {
            from: Some("alice@example.com".to_owned()),
            ..request()
        };

        let outcome = engine()
            .search::<Item>(&StaticAuth::valid(), &api, &GraphDialect::default(), &req)
            .await
            .expect("search");

        assert_eq!(outcome.used_strategy, SearchStrategy::Combined);
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.attempts[0].succeeded);
        assert_eq!(outcome.attempts[0].result_count, 2);
        assert_eq!(api.call_count(), 1);
        assert_eq!(outcome.items[1].id, "b");
    }

    #[tokio::test]
    async fn single_term_rungs_follow_priority_order() {
        let api = ScriptedApi::new(|_| Ok(message_page(&[])));
        let req = SearchRequest {
            free_text: Some("budget".to_owned()),
            to: Some("bob".to_owned()),
            from: Some("alice".to_owned()),
            subject: Some("q3".to_owned()),
            ..request()
        };

        let outcome = engine()
            .search::<Item>(&StaticAuth::valid(), &api, &GraphDialect::default(), &req)
            .await
            .expect("search");

        assert_eq!(
            strategies(&outcome.attempts),
            vec![
                SearchStrategy::Combined,
                SearchStrategy::SingleTerm(TermField::Subject),
                SearchStrategy::SingleTerm(TermField::From),
                SearchStrategy::SingleTerm(TermField::To),
                SearchStrategy::SingleTerm(TermField::FreeText),
                SearchStrategy::RecencyFallback,
            ]
        );
        assert!(outcome.items.is_empty());
        assert!(outcome.attempts.iter().all(|a| !a.succeeded));
    }

    #[tokio::test]
    async fn configured_term_order_is_respected() {
        let api = ScriptedApi::new(|call| {
            Ok(match query_param(call, "$search") {
                Some("\"from:alice\"") => message_page(&["hit"]),
                _ => message_page(&[]),
            })
        });
        let req = SearchRequest {
            from: Some("alice".to_owned()),
            subject: Some("q3".to_owned()),
            ..request()
        };
        let engine = SearchEngine::new(50, vec![TermField::From, TermField::Subject]);

        let outcome = engine
            .search::<Item>(&StaticAuth::valid(), &api, &GraphDialect::default(), &req)
            .await
            .expect("search");

        assert_eq!(
            outcome.used_strategy,
            SearchStrategy::SingleTerm(TermField::From)
        );
        assert_eq!(outcome.attempts.len(), 2);
    }

    #[tokio::test]
    async fn filters_apply_to_term_rungs_and_get_their_own_rung() {
        let api = ScriptedApi::new(|call| {
            Ok(match (query_param(call, "$search"), query_param(call, "$filter")) {
                (None, Some(_)) => message_page(&["unread"]),
                _ => message_page(&[]),
            })
        });
        let req = SearchRequest {
            subject: Some("report".to_owned()),
            unread_only: Some(true),
            has_attachment: Some(false),
            ..request()
        };

        let outcome = engine()
            .search::<Item>(&StaticAuth::valid(), &api, &GraphDialect::default(), &req)
            .await
            .expect("search");

        assert_eq!(outcome.used_strategy, SearchStrategy::BooleanFiltersOnly);
        for call in api.calls() {
            assert_eq!(query_param(&call, "$filter"), Some("isRead eq false"));
        }
    }

    #[tokio::test]
    async fn failing_rungs_are_recorded_and_skipped() {
        let api = ScriptedApi::new(|call| {
            if is_recency(call) {
                Ok(message_page(&["recent"]))
            } else {
                Err(AppError::Api {
                    status: 400,
                    message: "Syntax error in $search".to_owned(),
                })
            }
        });
        let req = SearchRequest {
            subject: Some("x".to_owned()),
            ..request()
        };

        let outcome = engine()
            .search::<Item>(&StaticAuth::valid(), &api, &GraphDialect::default(), &req)
            .await
            .expect("search");

        assert_eq!(outcome.used_strategy, SearchStrategy::RecencyFallback);
        assert_eq!(outcome.attempts.len(), 3);
        assert!(
            outcome.attempts[..2]
                .iter()
                .all(|a| !a.succeeded && a.result_count == 0)
        );
    }

    #[tokio::test]
    async fn recency_rung_errors_propagate() {
        let api = ScriptedApi::new(|_| Err(AppError::Transport("connection reset".to_owned())));
        let err = engine()
            .search::<Item>(
                &StaticAuth::valid(),
                &api,
                &GraphDialect::default(),
                &request(),
            )
            .await
            .expect_err("recency failure must propagate");
        assert!(matches!(err, AppError::Transport(_)));
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn auth_failure_on_a_rung_aborts_the_ladder() {
        let api = ScriptedApi::new(|_| {
            Err(AppError::Api {
                status: 401,
                message: "expired".to_owned(),
            })
        });
        let req = SearchRequest {
            subject: Some("x".to_owned()),
            from: Some("y".to_owned()),
            ..request()
        };
        let err = engine()
            .search::<Item>(&StaticAuth::valid(), &api, &GraphDialect::default(), &req)
            .await
            .expect_err("401 must propagate");
        assert!(err.is_auth_related());
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_authentication_makes_no_remote_calls() {
        let api = ScriptedApi::new(|_| Ok(message_page(&["a"])));
        let auth = StaticAuth::missing();
        let err = engine()
            .search::<Item>(&auth, &api, &GraphDialect::default(), &request())
            .await
            .expect_err("must require auth");
        assert!(matches!(err, AppError::AuthRequired(_)));
        assert_eq!(api.call_count(), 0);
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test]
    async fn every_rung_uses_the_clamped_cap() {
        let api = ScriptedApi::new(|_| Ok(message_page(&[])));
        let req = SearchRequest {
            subject: Some("x".to_owned()),
            has_attachment: Some(true),
            max_results: 500,
            ..request()
        };
        engine()
            .search::<Item>(&StaticAuth::valid(), &api, &GraphDialect::default(), &req)
            .await
            .expect("search");

        let calls = api.calls();
        assert_eq!(calls.len(), 4);
        for call in &calls {
            assert_eq!(query_param(call, "$top"), Some("50"));
        }
    }

    #[tokio::test]
    async fn oversized_pages_are_truncated_to_the_cap() {
        let api = ScriptedApi::new(|_| {
            Ok(json!({ "value": (0..8).map(|i| json!({"id": i.to_string()})).collect::<Vec<_>>() }))
        });
        let req = SearchRequest {
            max_results: 5,
            ..request()
        };
        let outcome = engine()
            .search::<Item>(&StaticAuth::valid(), &api, &GraphDialect::default(), &req)
            .await
            .expect("search");
        assert_eq!(outcome.items.len(), 5);
        assert_eq!(outcome.attempts.len(), 1);
    }

    #[test]
    fn cap_clamps_to_range() {
        let mut req = request();
        for (raw, expected) in [(-3, 1), (0, 1), (1, 1), (25, 25), (50, 50), (500, 50)] {
            req.max_results = raw;
            assert_eq!(req.cap(50), expected, "raw {raw}");
        }
    }

    #[test]
    fn blank_terms_and_false_filters_are_absent() {
        let req = SearchRequest {
            subject: Some("   ".to_owned()),
            to: Some(" bob ".to_owned()),
            has_attachment: Some(false),
            unread_only: None,
            ..request()
        };
        let terms = req.terms();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].value, "bob");
        assert!(req.filters().is_empty());
    }
}
