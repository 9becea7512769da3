//! Zendesk tickets and comments over the REST API v2
//!
//! Authentication is API-token basic auth supplied by the injected
//! [`Authenticator`]; paths are relative to the configured `/api/v2` base.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::api::{ApiRequest, RemoteApi, fetch};
use crate::auth::Authenticator;
use crate::errors::{AppError, AppResult};
use crate::format;
use crate::models::{CreateCommentInput, GetTicketsInput, UpdateTicketInput};

const DEFAULT_PER_PAGE: u32 = 25;
const MAX_PER_PAGE: u32 = 100;
/// Upper bound on followed `next_page` links for one comment thread
const MAX_COMMENT_PAGES: usize = 20;
const MAX_COMMENT_CHARS: usize = 65_000;

const SORT_FIELDS: [&str; 5] = ["created_at", "updated_at", "priority", "status", "id"];
const SORT_ORDERS: [&str; 2] = ["asc", "desc"];
const STATUSES: [&str; 6] = ["new", "open", "pending", "hold", "solved", "closed"];
const PRIORITIES: [&str; 4] = ["low", "normal", "high", "urgent"];

#[derive(Debug, Clone, Deserialize)]
pub struct Ticket {
    pub id: u64,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, rename = "type")]
    pub ticket_type: Option<String>,
    #[serde(default)]
    pub requester_id: Option<u64>,
    #[serde(default)]
    pub assignee_id: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TicketComment {
    pub id: u64,
    #[serde(default)]
    pub author_id: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default = "default_public")]
    pub public: bool,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub plain_body: Option<String>,
    #[serde(default)]
    pub html_body: Option<String>,
}

fn default_public() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct TicketEnvelope {
    ticket: Ticket,
}

#[derive(Debug, Deserialize)]
struct TicketPage {
    #[serde(default)]
    tickets: Vec<Ticket>,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentPage {
    #[serde(default)]
    comments: Vec<TicketComment>,
    #[serde(default)]
    next_page: Option<String>,
}

/// Zendesk tool implementations
pub struct ZendeskService {
    auth: Arc<dyn Authenticator>,
    api: Arc<dyn RemoteApi>,
}

impl ZendeskService {
    pub fn new(auth: Arc<dyn Authenticator>, api: Arc<dyn RemoteApi>) -> Self {
        Self { auth, api }
    }

    pub async fn get_ticket(&self, ticket_id: u64) -> AppResult<String> {
        validate_ticket_id(ticket_id)?;
        let token = self.auth.ensure_authenticated().await?;
        let envelope: TicketEnvelope = fetch(
            self.api.as_ref(),
            &token,
            ApiRequest::get(format!("tickets/{ticket_id}.json")),
        )
        .await?;
        Ok(format::ticket_detail(&envelope.ticket))
    }

    pub async fn get_tickets(&self, input: GetTicketsInput) -> AppResult<String> {
        let page = input.page.unwrap_or(1);
        if page == 0 {
            return Err(AppError::invalid("page starts at 1"));
        }
        let per_page = input.per_page.unwrap_or(DEFAULT_PER_PAGE);
        if !(1..=MAX_PER_PAGE).contains(&per_page) {
            return Err(AppError::invalid(format!(
                "per_page must be between 1 and {MAX_PER_PAGE}"
            )));
        }
        let sort_by = one_of(input.sort_by.as_deref(), "sort_by", &SORT_FIELDS)?
            .unwrap_or("created_at");
        let sort_order = one_of(input.sort_order.as_deref(), "sort_order", &SORT_ORDERS)?
            .unwrap_or("desc");

        let token = self.auth.ensure_authenticated().await?;
        let listing: TicketPage = fetch(
            self.api.as_ref(),
            &token,
            ApiRequest::get("tickets.json")
                .query("page", page.to_string())
                .query("per_page", per_page.to_string())
                .query("sort_by", sort_by)
                .query("sort_order", sort_order),
        )
        .await?;
        Ok(format::ticket_list(
            &listing.tickets,
            page,
            listing.next_page.is_some(),
        ))
    }

    pub async fn get_ticket_comments(&self, ticket_id: u64) -> AppResult<String> {
        validate_ticket_id(ticket_id)?;
        let token = self.auth.ensure_authenticated().await?;

        let mut comments = Vec::new();
        let mut next = Some(format!("tickets/{ticket_id}/comments.json"));
        let mut pages = 0;
        while let Some(path) = next.take() {
            let page: CommentPage = fetch(self.api.as_ref(), &token, ApiRequest::get(path)).await?;
            comments.extend(page.comments);
            pages += 1;
            next = page.next_page;
            if pages >= MAX_COMMENT_PAGES {
                break;
            }
        }

        let mut text = format::comment_list(ticket_id, &comments);
        if next.is_some() {
            debug!(ticket_id, pages, "comment page limit reached");
            text.push_str(&format!(
                "\n\n(showing the first {MAX_COMMENT_PAGES} pages of comments; later pages were not fetched)"
            ));
        }
        Ok(text)
    }

    pub async fn create_ticket_comment(&self, input: CreateCommentInput) -> AppResult<String> {
        validate_ticket_id(input.ticket_id)?;
        let comment = input.comment.trim();
        if comment.is_empty() {
            return Err(AppError::invalid("comment is required"));
        }
        if comment.chars().count() > MAX_COMMENT_CHARS {
            return Err(AppError::invalid(format!(
                "comment must be at most {MAX_COMMENT_CHARS} characters"
            )));
        }
        let public = input.public.unwrap_or(true);

        let token = self.auth.ensure_authenticated().await?;
        self.api
            .call(
                &token,
                ApiRequest::put(
                    format!("tickets/{}.json", input.ticket_id),
                    json!({ "ticket": { "comment": { "html_body": comment, "public": public } } }),
                ),
            )
            .await?;
        let kind = if public { "Public comment" } else { "Internal note" };
        Ok(format!("{kind} added to ticket #{}.", input.ticket_id))
    }

    pub async fn update_ticket(&self, input: UpdateTicketInput) -> AppResult<String> {
        validate_ticket_id(input.ticket_id)?;
        let status = one_of(input.status.as_deref(), "status", &STATUSES)?;
        let priority = one_of(input.priority.as_deref(), "priority", &PRIORITIES)?;

        let mut fields = Map::new();
        if let Some(status) = status {
            fields.insert("status".to_owned(), json!(status));
        }
        if let Some(priority) = priority {
            fields.insert("priority".to_owned(), json!(priority));
        }
        if fields.is_empty() {
            return Err(AppError::invalid(
                "nothing to update: provide status and/or priority",
            ));
        }

        let token = self.auth.ensure_authenticated().await?;
        let envelope: TicketEnvelope = fetch(
            self.api.as_ref(),
            &token,
            ApiRequest::put(
                format!("tickets/{}.json", input.ticket_id),
                json!({ "ticket": Value::Object(fields) }),
            ),
        )
        .await?;
        let ticket = envelope.ticket;
        Ok(format!(
            "Ticket #{} updated: status {}, priority {}.",
            ticket.id,
            ticket.status.as_deref().unwrap_or("-"),
            ticket.priority.as_deref().unwrap_or("-")
        ))
    }
}

fn validate_ticket_id(ticket_id: u64) -> AppResult<()> {
    if ticket_id == 0 {
        return Err(AppError::invalid("ticket_id is required"));
    }
    Ok(())
}

/// Match an optional value case-insensitively against the allowed set
fn one_of(
    value: Option<&str>,
    field: &str,
    allowed: &[&'static str],
) -> AppResult<Option<&'static str>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    allowed
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(value))
        .map(|candidate| Some(*candidate))
        .ok_or_else(|| {
            AppError::invalid(format!(
                "{field} must be one of {} (got '{value}')",
                allowed.join(", ")
            ))
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{MAX_COMMENT_PAGES, ZendeskService};
    use crate::errors::AppError;
    use crate::models::{CreateCommentInput, GetTicketsInput, UpdateTicketInput};
    use crate::testing::{ScriptedApi, StaticAuth, query_param};

    fn service(api: Arc<ScriptedApi>) -> ZendeskService {
        ZendeskService::new(Arc::new(StaticAuth::valid()), api)
    }

    #[tokio::test]
    async fn get_ticket_renders_details() {
        let api = Arc::new(ScriptedApi::new(|call| {
            assert_eq!(call.path, "tickets/42.json");
            Ok(json!({ "ticket": {
                "id": 42,
                "subject": "Printer on fire",
                "status": "open",
                "priority": "urgent",
                "type": "incident",
                "requester_id": 7,
                "tags": ["hardware"],
                "description": "Smoke everywhere"
            }}))
        }));
        let text = service(api).get_ticket(42).await.expect("ticket");
        assert!(text.starts_with("Ticket #42: Printer on fire"));
        assert!(text.contains("Type: incident"));
        assert!(text.contains("Requester ID: 7"));
        assert!(text.contains("Tags: hardware"));
    }

    #[tokio::test]
    async fn ticket_listing_validates_and_forwards_paging() {
        let api = Arc::new(ScriptedApi::new(|_| {
            Ok(json!({
                "tickets": [{ "id": 1, "subject": "A", "status": "new" }],
                "next_page": "https://acme.zendesk.com/api/v2/tickets.json?page=3"
            }))
        }));
        let svc = service(api.clone());

        let err = svc
            .get_tickets(GetTicketsInput {
                per_page: Some(101),
                ..Default::default()
            })
            .await
            .expect_err("per_page bound");
        assert!(err.is_validation());
        let err = svc
            .get_tickets(GetTicketsInput {
                sort_by: Some("subject".to_owned()),
                ..Default::default()
            })
            .await
            .expect_err("sort field");
        assert!(err.to_string().contains("sort_by must be one of"));
        assert_eq!(api.call_count(), 0);

        let text = svc
            .get_tickets(GetTicketsInput {
                page: Some(2),
                per_page: Some(10),
                sort_by: Some("Updated_At".to_owned()),
                sort_order: Some("asc".to_owned()),
            })
            .await
            .expect("listing");
        assert!(text.contains("#1 [new] A"));
        assert!(text.contains("request page 3"));
        let call = &api.calls()[0];
        assert_eq!(query_param(call, "page"), Some("2"));
        assert_eq!(query_param(call, "per_page"), Some("10"));
        assert_eq!(query_param(call, "sort_by"), Some("updated_at"));
    }

    #[tokio::test]
    async fn comments_follow_next_page_links() {
        let api = Arc::new(ScriptedApi::new(|call| {
            Ok(if call.path == "tickets/9/comments.json" {
                json!({
                    "comments": [{ "id": 1, "author_id": 5, "plain_body": "first" }],
                    "next_page": "https://acme.zendesk.com/api/v2/tickets/9/comments.json?page=2"
                })
            } else {
                json!({
                    "comments": [{ "id": 2, "public": false, "html_body": "<p>second</p>" }],
                    "next_page": null
                })
            })
        }));
        let text = service(api.clone())
            .get_ticket_comments(9)
            .await
            .expect("comments");
        assert!(text.contains("comments (2)"));
        assert!(text.contains("first"));
        assert!(text.contains("(internal)"));
        assert!(text.contains("second"));
        assert!(!text.contains("pages of comments"));
        assert_eq!(api.call_count(), 2);
    }

    #[tokio::test]
    async fn comment_page_limit_is_reported() {
        let api = Arc::new(ScriptedApi::new(|call| {
            Ok(json!({
                "comments": [{ "id": 1, "plain_body": "again" }],
                "next_page": format!("https://acme.zendesk.com/api/v2/{}?more", call.path)
            }))
        }));
        let text = service(api.clone())
            .get_ticket_comments(9)
            .await
            .expect("comments");
        assert_eq!(api.call_count(), MAX_COMMENT_PAGES);
        assert!(text.contains(&format!("comments ({MAX_COMMENT_PAGES})")));
        assert!(text.ends_with(&format!(
            "(showing the first {MAX_COMMENT_PAGES} pages of comments; later pages were not fetched)"
        )));
    }

    #[tokio::test]
    async fn comment_is_put_as_html_body() {
        let api = Arc::new(ScriptedApi::new(|_| Ok(json!({ "ticket": { "id": 3 } }))));
        let text = service(api.clone())
            .create_ticket_comment(CreateCommentInput {
                ticket_id: 3,
                comment: "<b>Fixed</b>".to_owned(),
                public: Some(false),
            })
            .await
            .expect("comment");
        assert_eq!(text, "Internal note added to ticket #3.");
        let call = &api.calls()[0];
        assert_eq!(call.method.as_str(), "PUT");
        assert_eq!(
            call.body,
            Some(json!({ "ticket": { "comment": { "html_body": "<b>Fixed</b>", "public": false } } }))
        );
    }

    #[tokio::test]
    async fn update_rejects_unknown_enums_and_empty_updates() {
        let api = Arc::new(ScriptedApi::new(|call| {
            let ticket = call.body.as_ref().map(|b| b["ticket"].clone()).unwrap_or_default();
            Ok(json!({ "ticket": { "id": 8, "status": ticket["status"], "priority": "normal" } }))
        }));
        let svc = service(api.clone());

        let err = svc
            .update_ticket(UpdateTicketInput {
                ticket_id: 8,
                status: Some("done".to_owned()),
                priority: None,
            })
            .await
            .expect_err("bad status");
        assert!(matches!(err, AppError::InvalidInput(_)));

        let err = svc
            .update_ticket(UpdateTicketInput {
                ticket_id: 8,
                status: None,
                priority: None,
            })
            .await
            .expect_err("empty update");
        assert!(err.to_string().contains("nothing to update"));
        assert_eq!(api.call_count(), 0);

        let text = svc
            .update_ticket(UpdateTicketInput {
                ticket_id: 8,
                status: Some("Solved".to_owned()),
                priority: None,
            })
            .await
            .expect("update");
        assert_eq!(text, "Ticket #8 updated: status solved, priority normal.");
        assert_eq!(api.calls()[0].body, Some(json!({ "ticket": { "status": "solved" } })));
    }

    #[tokio::test]
    async fn missing_credentials_surface_as_auth_required() {
        let api = Arc::new(ScriptedApi::new(|_| Ok(json!({}))));
        let svc = ZendeskService::new(Arc::new(StaticAuth::missing()), api.clone());
        let err = svc.get_ticket(1).await.expect_err("no credentials");
        assert!(err.is_auth_related());
        assert_eq!(api.call_count(), 0);
    }
}
