//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers the Outlook and Zendesk
//! tools. Every handler returns a single text content: validation problems
//! are answered as ordinary output, everything else as an error result.

use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{ServerHandler, tool, tool_handler, tool_router};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::api::HttpApiClient;
use crate::auth::{Authenticator, BasicAuthenticator, OAuthAuthenticator};
use crate::bulk::BulkExecutor;
use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{
    ApplyRuleInput, AuthenticateInput, CompleteAuthInput, CreateCommentInput, CreateEventInput,
    CreateFolderInput, CreateRuleInput, DeleteEventInput, GetTicketsInput, ListEmailsInput,
    ListEventsInput, ListFoldersInput, ListRulesInput, MarkAsReadInput, MoveEmailsInput,
    ReadEmailInput, SearchEmailsInput, SendEmailInput, TicketIdInput, UpdateTicketInput,
};
use crate::outlook::OutlookService;
use crate::search::SearchEngine;
use crate::zendesk::ZendeskService;

/// Maximum accepted length of an authorization code or redirect URL
const MAX_AUTH_CODE_LEN: usize = 8192;

/// Outlook login state plus the tool implementations
pub struct OutlookTools {
    oauth: Arc<OAuthAuthenticator>,
    service: OutlookService,
    /// `state` of the consent URL most recently handed out
    pending_state: Mutex<Option<String>>,
}

impl OutlookTools {
    pub fn new(oauth: Arc<OAuthAuthenticator>, service: OutlookService) -> Self {
        Self {
            oauth,
            service,
            pending_state: Mutex::new(None),
        }
    }
}

/// Outlook + Zendesk MCP server
///
/// Cheap to clone; HTTP mode hands a clone to every session.
#[derive(Clone)]
pub struct OutlookZendeskServer {
    /// Server config (write flag, limits)
    config: Arc<ServerConfig>,
    /// `None` when `OUTLOOK_CLIENT_ID` is unset
    outlook: Option<Arc<OutlookTools>>,
    /// `None` when the `ZENDESK_*` credentials are unset
    zendesk: Option<Arc<ZendeskService>>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl OutlookZendeskServer {
    /// Wire the configured services to HTTP clients and authenticators
    ///
    /// # Errors
    ///
    /// Returns `Internal` if an HTTP client cannot be built.
    pub fn new(config: ServerConfig) -> AppResult<Self> {
        let timeout = config.http_timeout();

        let outlook = match &config.outlook {
            Some(outlook_config) => {
                let oauth = Arc::new(OAuthAuthenticator::new(outlook_config.clone(), timeout)?);
                let api = Arc::new(HttpApiClient::new(
                    &outlook_config.graph_base_url,
                    timeout,
                    config.http_max_retries,
                )?);
                let service = OutlookService::new(
                    oauth.clone(),
                    api,
                    SearchEngine::new(config.search.max_results, config.search.term_order.clone()),
                    BulkExecutor::new(config.bulk_failure_details),
                    config.search.default_results,
                );
                Some(OutlookTools::new(oauth, service))
            }
            None => None,
        };

        let zendesk = match &config.zendesk {
            Some(zendesk_config) => {
                let api = Arc::new(HttpApiClient::new(
                    &zendesk_config.base_url,
                    timeout,
                    config.http_max_retries,
                )?);
                let auth = Arc::new(BasicAuthenticator::new(Some(zendesk_config)));
                Some(ZendeskService::new(auth, api))
            }
            None => None,
        };

        Ok(Self::with_services(config, outlook, zendesk))
    }

    /// Assemble a server from prebuilt services
    pub fn with_services(
        config: ServerConfig,
        outlook: Option<OutlookTools>,
        zendesk: Option<ZendeskService>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            outlook: outlook.map(Arc::new),
            zendesk: zendesk.map(Arc::new),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "outlook_authenticate",
        description = "Start Outlook authorization. Returns a Microsoft consent URL to open in a browser; afterwards call outlook_complete_authentication with the full redirect URL. Reports the existing login unless force is true."
    )]
    async fn authenticate(
        &self,
        Parameters(input): Parameters<AuthenticateInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        finalize_tool("outlook_authenticate", started, self.authenticate_impl(input).await)
    }

    #[tool(
        name = "outlook_complete_authentication",
        description = "Finish Outlook authorization with the full redirect URL obtained after consent (a bare code is accepted only when no consent URL is outstanding). Stores the tokens for later calls."
    )]
    async fn complete_authentication(
        &self,
        Parameters(input): Parameters<CompleteAuthInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            "outlook_complete_authentication",
            started,
            self.complete_authentication_impl(input).await,
        )
    }

    #[tool(
        name = "outlook_check_auth_status",
        description = "Report whether a valid Outlook token is available (refreshing it if needed)"
    )]
    async fn check_auth_status(&self) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            "outlook_check_auth_status",
            started,
            self.check_auth_status_impl().await,
        )
    }

    #[tool(
        name = "outlook_list_emails",
        description = "List the most recent messages of a folder (default inbox; `all` for every folder)"
    )]
    async fn list_emails(
        &self,
        Parameters(input): Parameters<ListEmailsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.outlook() {
            Ok(tools) => tools.service.list_emails(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("outlook_list_emails", started, result)
    }

    #[tool(
        name = "outlook_search_emails",
        description = "Search messages by free text, sender, recipient, subject, attachments and read state. If the full combination finds nothing the search relaxes step by step (single criteria, then filters only, then most recent messages) and reports which strategy produced the results."
    )]
    async fn search_emails(
        &self,
        Parameters(input): Parameters<SearchEmailsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.outlook() {
            Ok(tools) => tools.service.search_emails(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("outlook_search_emails", started, result)
    }

    #[tool(
        name = "outlook_read_email",
        description = "Read one message including its body (HTML converted to text)"
    )]
    async fn read_email(
        &self,
        Parameters(input): Parameters<ReadEmailInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.outlook() {
            Ok(tools) => tools.service.read_email(&input.id).await,
            Err(e) => Err(e),
        };
        finalize_tool("outlook_read_email", started, result)
    }

    #[tool(
        name = "outlook_send_email",
        description = "Send a message. Recipients are comma-separated addresses; HTML bodies are detected automatically."
    )]
    async fn send_email(
        &self,
        Parameters(input): Parameters<SendEmailInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.writable_outlook() {
            Ok(tools) => tools.service.send_email(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("outlook_send_email", started, result)
    }

    #[tool(
        name = "outlook_mark_as_read",
        description = "Mark messages as read (or unread with is_read=false). Each id is processed independently; failures are listed."
    )]
    async fn mark_as_read(
        &self,
        Parameters(input): Parameters<MarkAsReadInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.writable_outlook() {
            Ok(tools) => tools.service.mark_as_read(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("outlook_mark_as_read", started, result)
    }

    #[tool(
        name = "outlook_move_emails",
        description = "Move messages to a folder (name or alias such as archive, trash, junk). Each id is processed independently; failures are listed."
    )]
    async fn move_emails(
        &self,
        Parameters(input): Parameters<MoveEmailsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.writable_outlook() {
            Ok(tools) => tools.service.move_emails(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("outlook_move_emails", started, result)
    }

    #[tool(
        name = "outlook_list_folders",
        description = "List mail folders, optionally with item counts and child folders"
    )]
    async fn list_folders(
        &self,
        Parameters(input): Parameters<ListFoldersInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.outlook() {
            Ok(tools) => tools.service.list_folders(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("outlook_list_folders", started, result)
    }

    #[tool(
        name = "outlook_create_folder",
        description = "Create a mail folder at the top level or under a parent folder"
    )]
    async fn create_folder(
        &self,
        Parameters(input): Parameters<CreateFolderInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.writable_outlook() {
            Ok(tools) => tools.service.create_folder(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("outlook_create_folder", started, result)
    }

    #[tool(
        name = "outlook_list_rules",
        description = "List inbox rules in execution order"
    )]
    async fn list_rules(
        &self,
        Parameters(input): Parameters<ListRulesInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.outlook() {
            Ok(tools) => tools.service.list_rules(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("outlook_list_rules", started, result)
    }

    #[tool(
        name = "outlook_create_rule",
        description = "Create an inbox rule with at least one condition (senders, subject keywords, attachments) and at least one action (move to folder, mark as read)"
    )]
    async fn create_rule(
        &self,
        Parameters(input): Parameters<CreateRuleInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.writable_outlook() {
            Ok(tools) => tools.service.create_rule(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("outlook_create_rule", started, result)
    }

    #[tool(
        name = "outlook_apply_rule",
        description = "Run an existing inbox rule over messages already in a folder, applying its move and mark-as-read actions to every match"
    )]
    async fn apply_rule(
        &self,
        Parameters(input): Parameters<ApplyRuleInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.writable_outlook() {
            Ok(tools) => tools.service.apply_rule(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("outlook_apply_rule", started, result)
    }

    #[tool(
        name = "outlook_list_events",
        description = "List upcoming calendar events"
    )]
    async fn list_events(
        &self,
        Parameters(input): Parameters<ListEventsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.outlook() {
            Ok(tools) => tools.service.list_events(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("outlook_list_events", started, result)
    }

    #[tool(
        name = "outlook_create_event",
        description = "Create a calendar event. start and end are ISO 8601 date-times; time_zone applies to times without an offset."
    )]
    async fn create_event(
        &self,
        Parameters(input): Parameters<CreateEventInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.writable_outlook() {
            Ok(tools) => tools.service.create_event(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("outlook_create_event", started, result)
    }

    #[tool(name = "outlook_delete_event", description = "Delete a calendar event")]
    async fn delete_event(
        &self,
        Parameters(input): Parameters<DeleteEventInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.writable_outlook() {
            Ok(tools) => tools.service.delete_event(&input.event_id).await,
            Err(e) => Err(e),
        };
        finalize_tool("outlook_delete_event", started, result)
    }

    #[tool(name = "zendesk_get_ticket", description = "Get a Zendesk ticket by number")]
    async fn get_ticket(
        &self,
        Parameters(input): Parameters<TicketIdInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.zendesk() {
            Ok(service) => service.get_ticket(input.ticket_id).await,
            Err(e) => Err(e),
        };
        finalize_tool("zendesk_get_ticket", started, result)
    }

    #[tool(
        name = "zendesk_get_tickets",
        description = "List Zendesk tickets page by page (per_page up to 100)"
    )]
    async fn get_tickets(
        &self,
        Parameters(input): Parameters<GetTicketsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.zendesk() {
            Ok(service) => service.get_tickets(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("zendesk_get_tickets", started, result)
    }

    #[tool(
        name = "zendesk_get_ticket_comments",
        description = "Get every comment of a Zendesk ticket, oldest first"
    )]
    async fn get_ticket_comments(
        &self,
        Parameters(input): Parameters<TicketIdInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.zendesk() {
            Ok(service) => service.get_ticket_comments(input.ticket_id).await,
            Err(e) => Err(e),
        };
        finalize_tool("zendesk_get_ticket_comments", started, result)
    }

    #[tool(
        name = "zendesk_create_ticket_comment",
        description = "Add a comment to a Zendesk ticket; public=false creates an internal note"
    )]
    async fn create_ticket_comment(
        &self,
        Parameters(input): Parameters<CreateCommentInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.writable_zendesk() {
            Ok(service) => service.create_ticket_comment(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("zendesk_create_ticket_comment", started, result)
    }

    #[tool(
        name = "zendesk_update_ticket",
        description = "Update the status and/or priority of a Zendesk ticket"
    )]
    async fn update_ticket(
        &self,
        Parameters(input): Parameters<UpdateTicketInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match self.writable_zendesk() {
            Ok(service) => service.update_ticket(input).await,
            Err(e) => Err(e),
        };
        finalize_tool("zendesk_update_ticket", started, result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for OutlookZendeskServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_instructions("Outlook mail/calendar and Zendesk ticket tools. Call outlook_authenticate once to authorize Outlook. Email search relaxes its criteria automatically when nothing matches and reports the strategy used. Write tools can be disabled with MCP_WRITE_ENABLED=false.")
    }
}

/// Tool implementation methods
///
/// Login handling lives here because it needs the concrete OAuth
/// authenticator and the pending consent state.
impl OutlookZendeskServer {
    fn outlook(&self) -> AppResult<&OutlookTools> {
        self.outlook.as_deref().ok_or_else(|| {
            AppError::AuthRequired(
                "Outlook is not configured. Set OUTLOOK_CLIENT_ID (and OUTLOOK_CLIENT_SECRET for confidential apps), then restart the server.".to_owned(),
            )
        })
    }

    fn writable_outlook(&self) -> AppResult<&OutlookTools> {
        require_write_enabled(&self.config)?;
        self.outlook()
    }

    fn zendesk(&self) -> AppResult<&ZendeskService> {
        self.zendesk.as_deref().ok_or_else(|| {
            AppError::AuthRequired(
                "Zendesk is not configured. Set ZENDESK_SUBDOMAIN, ZENDESK_EMAIL and ZENDESK_API_KEY, then restart the server.".to_owned(),
            )
        })
    }

    fn writable_zendesk(&self) -> AppResult<&ZendeskService> {
        require_write_enabled(&self.config)?;
        self.zendesk()
    }

    async fn authenticate_impl(&self, input: AuthenticateInput) -> AppResult<String> {
        let tools = self.outlook()?;
        if !input.force && tools.oauth.has_valid_token().await {
            return Ok(format!(
                "Already authenticated with Outlook (tokens in {}). Pass force=true to authorize again.",
                tools.oauth.token_path().display()
            ));
        }

        let state = uuid::Uuid::new_v4().simple().to_string();
        let url = tools.oauth.authorization_url(&state);
        *tools.pending_state.lock().await = Some(state);
        info!("issued Outlook consent URL");
        Ok(format!(
            "Open this URL in a browser and sign in:\n{url}\n\nAfter consenting you are redirected to a URL containing `code=...&state=...`. Call outlook_complete_authentication with that whole redirect URL."
        ))
    }

    async fn complete_authentication_impl(&self, input: CompleteAuthInput) -> AppResult<String> {
        let tools = self.outlook()?;
        let (code, state) = extract_auth_code(&input.code)?;

        // A bare code is only accepted when no consent URL is outstanding.
        let mut pending = tools.pending_state.lock().await;
        if let Some(expected) = pending.as_deref() {
            match state.as_deref() {
                None => {
                    return Err(AppError::invalid(
                        "pass the whole redirect URL (including state=) so the login attempt can be verified",
                    ));
                }
                Some(returned) if returned != expected => {
                    return Err(AppError::invalid(
                        "the redirect URL belongs to a different login attempt; call outlook_authenticate again",
                    ));
                }
                Some(_) => {}
            }
        }

        let expires_at = tools.oauth.exchange_code(&code).await?;
        *pending = None;
        Ok(format!(
            "Outlook authentication complete. Access token valid until {}; it is refreshed automatically.",
            expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        ))
    }

    async fn check_auth_status_impl(&self) -> AppResult<String> {
        let tools = self.outlook()?;
        // A stale access token is refreshed here when possible.
        match tools.oauth.ensure_authenticated().await {
            Ok(token) => Ok(match token.expires_at {
                Some(at) => format!(
                    "Outlook: authenticated. Access token valid until {}.",
                    at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                None => "Outlook: authenticated.".to_owned(),
            }),
            Err(e) if e.is_auth_related() => Ok(format!(
                "Outlook: not authenticated. {}",
                e.to_tool_text()
            )),
            Err(e) => Err(e),
        }
    }
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Turn business logic output into a single-text tool result
///
/// Validation errors become ordinary output so the agent can correct its
/// arguments; every other failure is an error result. Never a protocol fault.
fn finalize_tool(
    tool: &str,
    started: Instant,
    result: AppResult<String>,
) -> Result<CallToolResult, ErrorData> {
    let elapsed = duration_ms(started);
    match result {
        Ok(text) => {
            info!(tool, duration_ms = elapsed, "tool completed");
            Ok(CallToolResult::success(vec![Content::text(text)]))
        }
        Err(e) if e.is_validation() => {
            info!(tool, duration_ms = elapsed, reason = %e, "tool rejected input");
            Ok(CallToolResult::success(vec![Content::text(e.to_tool_text())]))
        }
        Err(e) => {
            warn!(tool, duration_ms = elapsed, error = %e, "tool failed");
            Ok(CallToolResult::error(vec![Content::text(e.to_tool_text())]))
        }
    }
}

/// Accept a bare code, a `code=..&state=..` query string, or a full redirect URL
fn extract_auth_code(raw: &str) -> AppResult<(String, Option<String>)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::invalid("code is required"));
    }
    if raw.len() > MAX_AUTH_CODE_LEN {
        return Err(AppError::invalid(format!(
            "code must be at most {MAX_AUTH_CODE_LEN} characters"
        )));
    }
    if raw.chars().any(|ch| ch.is_control()) {
        return Err(AppError::invalid("code must not contain control characters"));
    }

    if !raw.contains("code=") && !raw.contains("error=") {
        if raw.contains(char::is_whitespace) {
            return Err(AppError::invalid("code must not contain whitespace"));
        }
        return Ok((raw.to_owned(), None));
    }

    let url = if raw.starts_with("http://") || raw.starts_with("https://") {
        reqwest::Url::parse(raw)
    } else {
        reqwest::Url::parse(&format!("http://localhost/?{}", raw.trim_start_matches('?')))
    }
    .map_err(|e| AppError::invalid(format!("could not parse the redirect URL: {e}")))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(AppError::invalid(format!(
            "authorization was denied ({error}): {}",
            description.unwrap_or_default()
        )));
    }
    match code.filter(|c| !c.is_empty()) {
        Some(code) => Ok((code, state)),
        None => Err(AppError::invalid("the redirect URL does not contain a code")),
    }
}

/// Check if write operations are enabled
fn require_write_enabled(config: &ServerConfig) -> AppResult<()> {
    if !config.write_enabled {
        return Err(AppError::InvalidInput(
            "write tools are disabled; set MCP_WRITE_ENABLED=true".to_owned(),
        ));
    }
    Ok(())
}
