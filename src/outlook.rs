//! Outlook mail, folders, rules and calendar over Microsoft Graph
//!
//! [`OutlookService`] holds the collaborators (authenticator, remote API,
//! search engine, bulk executor) and implements every Outlook tool as a
//! method returning report text. Message ids and folder ids are treated as
//! opaque and percent-encoded into paths.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use urlencoding::encode;

use crate::api::{ApiRequest, ODataPage, RemoteApi, fetch};
use crate::auth::{AccessToken, Authenticator};
use crate::bulk::{BulkExecutor, BulkMutation, BulkResult};
use crate::errors::{AppError, AppResult};
use crate::format;
use crate::models::{
    ApplyRuleInput, CreateEventInput, CreateFolderInput, CreateRuleInput, ListEmailsInput,
    ListEventsInput, ListFoldersInput, ListRulesInput, MarkAsReadInput, MoveEmailsInput,
    SendEmailInput, SearchEmailsInput,
};
use crate::query::{BooleanFilter, GraphDialect, Query, QueryDialect, SearchTerm, TermField};
use crate::search::{SearchEngine, SearchRequest, clamp_limit};

/// Folder page size; mailboxes rarely exceed this per level
const FOLDER_PAGE_SIZE: usize = 250;
const MAX_FOLDER_PAGES: usize = 8;
/// Fields fetched for a full message
const MESSAGE_DETAIL_SELECT: &str = "id,subject,from,toRecipients,ccRecipients,receivedDateTime,bodyPreview,body,hasAttachments,importance,isRead";
const FOLDER_SELECT: &str =
    "id,displayName,parentFolderId,childFolderCount,totalItemCount,unreadItemCount";
const EVENT_SELECT: &str = "id,subject,start,end,location,organizer,isAllDay,bodyPreview";
/// Scope name that searches every folder
const ALL_FOLDERS: &str = "all";
const MAX_ID_LEN: usize = 1024;
const MAX_NAME_LEN: usize = 255;

static ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[^@\s<>,;"]+@[^@\s<>,;"]+\.[^@\s<>,;"]+$"#).expect("valid address pattern")
});

static HTML_TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").expect("valid HTML tag pattern"));

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    #[serde(default)]
    pub email_address: Option<EmailAddress>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<Recipient>,
    #[serde(default)]
    pub to_recipients: Vec<Recipient>,
    #[serde(default)]
    pub cc_recipients: Vec<Recipient>,
    #[serde(default)]
    pub received_date_time: Option<String>,
    #[serde(default)]
    pub body_preview: Option<String>,
    #[serde(default)]
    pub body: Option<ItemBody>,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub importance: Option<String>,
    #[serde(default)]
    pub is_read: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailFolder {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub parent_folder_id: Option<String>,
    #[serde(default)]
    pub child_folder_count: Option<i64>,
    #[serde(default)]
    pub total_item_count: Option<i64>,
    #[serde(default)]
    pub unread_item_count: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePredicates {
    #[serde(default)]
    pub from_addresses: Vec<Recipient>,
    #[serde(default)]
    pub subject_contains: Vec<String>,
    #[serde(default)]
    pub has_attachments: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleActions {
    #[serde(default)]
    pub move_to_folder: Option<String>,
    #[serde(default)]
    pub mark_as_read: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRule {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub sequence: Option<i32>,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub conditions: Option<RulePredicates>,
    #[serde(default)]
    pub actions: Option<RuleActions>,
}

impl MessageRule {
    fn sender_addresses(&self) -> Vec<String> {
        self.conditions
            .as_ref()
            .map(|c| {
                c.from_addresses
                    .iter()
                    .filter_map(|r| r.email_address.as_ref()?.address.clone())
                    .filter(|a| !a.trim().is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn subject_keywords(&self) -> Vec<String> {
        self.conditions
            .as_ref()
            .map(|c| {
                c.subject_contains
                    .iter()
                    .filter(|s| !s.trim().is_empty())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn requires_attachments(&self) -> bool {
        self.conditions
            .as_ref()
            .and_then(|c| c.has_attachments)
            .unwrap_or(false)
    }

    fn move_target(&self) -> Option<&str> {
        self.actions
            .as_ref()
            .and_then(|a| a.move_to_folder.as_deref())
            .filter(|id| !id.is_empty())
    }

    fn marks_read(&self) -> bool {
        self.actions
            .as_ref()
            .and_then(|a| a.mark_as_read)
            .unwrap_or(false)
    }

    pub fn condition_summary(&self) -> Vec<String> {
        let mut out = Vec::new();
        let senders = self.sender_addresses();
        if !senders.is_empty() {
            out.push(format!("from {}", senders.join(", ")));
        }
        let subjects = self.subject_keywords();
        if !subjects.is_empty() {
            out.push(format!("subject contains {}", subjects.join(", ")));
        }
        if self.requires_attachments() {
            out.push("has attachments".to_owned());
        }
        out
    }

    pub fn action_summary(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(folder) = self.move_target() {
            out.push(format!("move to folder {folder}"));
        }
        if self.marks_read() {
            out.push("mark as read".to_owned());
        }
        out
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateTimeTimeZone {
    pub date_time: String,
    #[serde(default)]
    pub time_zone: Option<String>,
}

impl DateTimeTimeZone {
    pub fn label(&self) -> String {
        match self.time_zone.as_deref() {
            Some(tz) => format!("{} ({tz})", self.date_time),
            None => self.date_time.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub start: Option<DateTimeTimeZone>,
    #[serde(default)]
    pub end: Option<DateTimeTimeZone>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub organizer: Option<Recipient>,
}

/// A resolved mail folder; `id` may be a Graph well-known name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRef {
    pub id: String,
    pub display_name: String,
}

impl FolderRef {
    pub fn messages_path(&self) -> String {
        format!("me/mailFolders/{}/messages", encode(&self.id))
    }
}

/// Map a user-facing alias to a Graph well-known folder name
pub fn well_known_folder(name: &str) -> Option<&'static str> {
    match name.trim().to_ascii_lowercase().as_str() {
        "inbox" => Some("inbox"),
        "drafts" => Some("drafts"),
        "sent" | "sentitems" | "sent items" => Some("sentitems"),
        "deleted" | "deleteditems" | "deleted items" | "trash" => Some("deleteditems"),
        "archive" => Some("archive"),
        "junk" | "junkemail" | "junk email" | "spam" => Some("junkemail"),
        _ => None,
    }
}

/// Resolve a folder name: alias, then top-level folders, then their children
///
/// # Errors
///
/// Returns `NotFound` when no folder matches, or the remote error of a
/// folder listing.
pub async fn resolve_folder(
    api: &dyn RemoteApi,
    token: &AccessToken,
    name: Option<&str>,
) -> AppResult<FolderRef> {
    let name = name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or("inbox");
    if let Some(well_known) = well_known_folder(name) {
        return Ok(FolderRef {
            id: well_known.to_owned(),
            display_name: name.to_owned(),
        });
    }

    let top = list_folders_at(api, token, "me/mailFolders").await?;
    if let Some(found) = top.iter().find(|f| f.display_name.eq_ignore_ascii_case(name)) {
        return Ok(FolderRef {
            id: found.id.clone(),
            display_name: found.display_name.clone(),
        });
    }

    for parent in top.iter().filter(|f| f.child_folder_count.unwrap_or(0) > 0) {
        let children = list_folders_at(api, token, &child_folders_path(&parent.id)).await?;
        if let Some(found) = children
            .iter()
            .find(|f| f.display_name.eq_ignore_ascii_case(name))
        {
            return Ok(FolderRef {
                id: found.id.clone(),
                display_name: format!("{}/{}", parent.display_name, found.display_name),
            });
        }
    }

    Err(AppError::NotFound(format!("folder '{name}'")))
}

fn child_folders_path(folder_id: &str) -> String {
    format!("me/mailFolders/{}/childFolders", encode(folder_id))
}

async fn list_folders_at(
    api: &dyn RemoteApi,
    token: &AccessToken,
    path: &str,
) -> AppResult<Vec<MailFolder>> {
    let mut folders = Vec::new();
    let mut request = ApiRequest::get(path)
        .query("$top", FOLDER_PAGE_SIZE.to_string())
        .query("$select", FOLDER_SELECT);
    for _ in 0..MAX_FOLDER_PAGES {
        let page: ODataPage<MailFolder> = fetch(api, token, request).await?;
        folders.extend(page.value);
        match page.next_link {
            // The link already carries every query option.
            Some(next) => request = ApiRequest::get(next),
            None => break,
        }
    }
    Ok(folders)
}

/// Where a move sends its messages
#[derive(Debug, Clone)]
pub enum Destination {
    /// User-facing folder name or alias
    Named(String),
    /// Graph folder id taken from a rule
    Id(String),
}

/// Bulk move: `POST me/messages/{id}/move`
pub struct MoveToFolder {
    destination: Destination,
}

impl MoveToFolder {
    pub fn new(destination: Destination) -> Self {
        Self { destination }
    }
}

#[async_trait]
impl BulkMutation for MoveToFolder {
    type Target = FolderRef;

    fn describe(&self) -> &str {
        "moved"
    }

    async fn resolve_target(&self, api: &dyn RemoteApi, token: &AccessToken) -> AppResult<FolderRef> {
        match &self.destination {
            Destination::Named(name) => resolve_folder(api, token, Some(name)).await,
            Destination::Id(id) => {
                let folder: MailFolder = fetch(
                    api,
                    token,
                    ApiRequest::get(format!("me/mailFolders/{}", encode(id)))
                        .query("$select", "id,displayName"),
                )
                .await?;
                Ok(FolderRef {
                    id: folder.id,
                    display_name: folder.display_name,
                })
            }
        }
    }

    async fn apply(
        &self,
        api: &dyn RemoteApi,
        token: &AccessToken,
        target: &FolderRef,
        id: &str,
    ) -> AppResult<()> {
        api.call(
            token,
            ApiRequest::post(
                format!("me/messages/{}/move", encode(id)),
                json!({ "destinationId": target.id }),
            ),
        )
        .await?;
        Ok(())
    }
}

/// Bulk read-state change: `PATCH me/messages/{id}`
pub struct MarkRead {
    is_read: bool,
}

impl MarkRead {
    pub fn new(is_read: bool) -> Self {
        Self { is_read }
    }
}

#[async_trait]
impl BulkMutation for MarkRead {
    type Target = ();

    fn describe(&self) -> &str {
        if self.is_read {
            "marked as read"
        } else {
            "marked as unread"
        }
    }

    async fn resolve_target(&self, _api: &dyn RemoteApi, _token: &AccessToken) -> AppResult<()> {
        Ok(())
    }

    async fn apply(
        &self,
        api: &dyn RemoteApi,
        token: &AccessToken,
        _target: &(),
        id: &str,
    ) -> AppResult<()> {
        api.call(
            token,
            ApiRequest::patch(
                format!("me/messages/{}", encode(id)),
                json!({ "isRead": self.is_read }),
            ),
        )
        .await?;
        Ok(())
    }
}

/// Outlook tool implementations
pub struct OutlookService {
    auth: Arc<dyn Authenticator>,
    api: Arc<dyn RemoteApi>,
    dialect: GraphDialect,
    search: SearchEngine,
    bulk: BulkExecutor,
    default_count: i64,
}

impl OutlookService {
    pub fn new(
        auth: Arc<dyn Authenticator>,
        api: Arc<dyn RemoteApi>,
        search: SearchEngine,
        bulk: BulkExecutor,
        default_count: i64,
    ) -> Self {
        Self {
            auth,
            api,
            dialect: GraphDialect::default(),
            search,
            bulk,
            default_count,
        }
    }

    fn limit(&self, count: Option<i64>) -> usize {
        clamp_limit(count.unwrap_or(self.default_count), self.search.ceiling())
    }

    /// Message collection path for a folder name; `all` means every folder
    async fn scope_path(&self, token: &AccessToken, folder: Option<&str>) -> AppResult<(String, String)> {
        if folder.is_some_and(|f| f.trim().eq_ignore_ascii_case(ALL_FOLDERS)) {
            return Ok(("me/messages".to_owned(), "all folders".to_owned()));
        }
        let folder = resolve_folder(self.api.as_ref(), token, folder).await?;
        Ok((folder.messages_path(), folder.display_name))
    }

    pub async fn list_emails(&self, input: ListEmailsInput) -> AppResult<String> {
        let token = self.auth.ensure_authenticated().await?;
        let (path, label) = self.scope_path(&token, input.folder.as_deref()).await?;
        let params = self.dialect.render(None, self.limit(input.count));
        let page: ODataPage<Message> =
            fetch(self.api.as_ref(), &token, ApiRequest::get(path).queries(params)).await?;
        Ok(format::message_list(&format!("Messages in {label}"), &page.value))
    }

    pub async fn search_emails(&self, input: SearchEmailsInput) -> AppResult<String> {
        for value in [&input.query, &input.from, &input.to, &input.subject]
            .into_iter()
            .flatten()
            .filter(|v| !v.trim().is_empty())
        {
            validate_text(value, "search text", 256)?;
        }
        let token = self.auth.ensure_authenticated().await?;
        let (scope_endpoint, _) = self.scope_path(&token, input.folder.as_deref()).await?;

        let request = SearchRequest {
            free_text: input.query,
            from: input.from,
            to: input.to,
            subject: input.subject,
            has_attachment: input.has_attachments,
            unread_only: input.unread_only,
            max_results: input.count.unwrap_or(self.default_count),
            scope_endpoint,
        };
        let outcome = self
            .search
            .search::<Message>(self.auth.as_ref(), self.api.as_ref(), &self.dialect, &request)
            .await?;
        info!(
            strategy = %outcome.used_strategy,
            attempts = outcome.attempts.len(),
            count = outcome.items.len(),
            "email search finished"
        );
        Ok(format::search_report(&outcome))
    }

    pub async fn read_email(&self, id: &str) -> AppResult<String> {
        validate_item_id(id, "id")?;
        let token = self.auth.ensure_authenticated().await?;
        let msg: Message = fetch(
            self.api.as_ref(),
            &token,
            ApiRequest::get(format!("me/messages/{}", encode(id)))
                .query("$select", MESSAGE_DETAIL_SELECT),
        )
        .await?;
        Ok(format::message_detail(&msg))
    }

    pub async fn send_email(&self, input: SendEmailInput) -> AppResult<String> {
        let to = parse_addresses(&input.to, "to")?;
        if to.is_empty() {
            return Err(AppError::invalid("to must list at least one recipient"));
        }
        let cc = parse_addresses(input.cc.as_deref().unwrap_or_default(), "cc")?;
        let bcc = parse_addresses(input.bcc.as_deref().unwrap_or_default(), "bcc")?;
        if input.subject.trim().is_empty() {
            return Err(AppError::invalid("subject is required"));
        }
        if input.body.trim().is_empty() {
            return Err(AppError::invalid("body is required"));
        }
        let importance = match input.importance.as_deref().map(str::to_ascii_lowercase) {
            None => "normal".to_owned(),
            Some(v) if matches!(v.as_str(), "low" | "normal" | "high") => v,
            Some(v) => {
                return Err(AppError::invalid(format!(
                    "importance must be low, normal or high (got '{v}')"
                )));
            }
        };
        let content_type = if looks_like_html(&input.body) { "HTML" } else { "Text" };

        let token = self.auth.ensure_authenticated().await?;
        let payload = json!({
            "message": {
                "subject": input.subject,
                "body": { "contentType": content_type, "content": input.body },
                "toRecipients": recipients_json(&to),
                "ccRecipients": recipients_json(&cc),
                "bccRecipients": recipients_json(&bcc),
                "importance": importance,
            },
            "saveToSentItems": input.save_to_sent_items.unwrap_or(true),
        });
        self.api
            .call(&token, ApiRequest::post("me/sendMail", payload))
            .await?;
        let total = to.len() + cc.len() + bcc.len();
        Ok(format!(
            "Email sent to {total} recipient(s): {}",
            to.join(", ")
        ))
    }

    pub async fn mark_as_read(&self, input: MarkAsReadInput) -> AppResult<String> {
        validate_ids(&input.ids)?;
        let mutation = MarkRead::new(input.is_read.unwrap_or(true));
        let result = self
            .bulk
            .execute(self.auth.as_ref(), self.api.as_ref(), &mutation, &input.ids)
            .await?;
        Ok(self.bulk.summarize(&result, mutation.describe()))
    }

    pub async fn move_emails(&self, input: MoveEmailsInput) -> AppResult<String> {
        validate_ids(&input.ids)?;
        let target = input.target_folder.trim();
        if target.is_empty() {
            return Err(AppError::invalid("target_folder is required"));
        }
        if target.eq_ignore_ascii_case(ALL_FOLDERS) {
            return Err(AppError::invalid("target_folder must name a single folder"));
        }
        let mutation = MoveToFolder::new(Destination::Named(target.to_owned()));
        let result = self
            .bulk
            .execute(self.auth.as_ref(), self.api.as_ref(), &mutation, &input.ids)
            .await?;
        Ok(format!(
            "{} (destination: {target})",
            self.bulk.summarize(&result, mutation.describe())
        ))
    }

    pub async fn list_folders(&self, input: ListFoldersInput) -> AppResult<String> {
        let token = self.auth.ensure_authenticated().await?;
        let api = self.api.as_ref();
        let top = list_folders_at(api, &token, "me/mailFolders").await?;
        let mut tree = Vec::with_capacity(top.len());
        for folder in top {
            let children = if input.include_children && folder.child_folder_count.unwrap_or(0) > 0 {
                list_folders_at(api, &token, &child_folders_path(&folder.id)).await?
            } else {
                Vec::new()
            };
            tree.push((folder, children));
        }
        Ok(format::folder_list(&tree, input.include_item_counts))
    }

    pub async fn create_folder(&self, input: CreateFolderInput) -> AppResult<String> {
        let name = input.name.trim();
        validate_text(name, "name", MAX_NAME_LEN)?;
        let token = self.auth.ensure_authenticated().await?;
        let api = self.api.as_ref();

        let (siblings_path, parent_label) = match input.parent_folder.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(parent) => {
                let parent = resolve_folder(api, &token, Some(parent)).await?;
                (child_folders_path(&parent.id), Some(parent.display_name))
            }
            None => ("me/mailFolders".to_owned(), None),
        };

        let siblings = list_folders_at(api, &token, &siblings_path).await?;
        if siblings.iter().any(|f| f.display_name.eq_ignore_ascii_case(name)) {
            return Err(AppError::invalid(format!("a folder named '{name}' already exists")));
        }

        let created: MailFolder = fetch(
            api,
            &token,
            ApiRequest::post(siblings_path, json!({ "displayName": name })),
        )
        .await?;
        Ok(match parent_label {
            Some(parent) => format!(
                "Folder '{}' created under '{parent}' [ID: {}]",
                created.display_name, created.id
            ),
            None => format!("Folder '{}' created [ID: {}]", created.display_name, created.id),
        })
    }

    async fn fetch_rules(&self, token: &AccessToken) -> AppResult<Vec<MessageRule>> {
        let page: ODataPage<MessageRule> = fetch(
            self.api.as_ref(),
            token,
            ApiRequest::get("me/mailFolders/inbox/messageRules"),
        )
        .await?;
        let mut rules = page.value;
        rules.sort_by_key(|r| r.sequence.unwrap_or(i32::MAX));
        Ok(rules)
    }

    pub async fn list_rules(&self, input: ListRulesInput) -> AppResult<String> {
        let token = self.auth.ensure_authenticated().await?;
        let rules = self.fetch_rules(&token).await?;
        Ok(format::rule_list(&rules, input.include_details))
    }

    pub async fn create_rule(&self, input: CreateRuleInput) -> AppResult<String> {
        let name = input.name.trim();
        validate_text(name, "name", MAX_NAME_LEN)?;
        let senders = parse_addresses(input.from_addresses.as_deref().unwrap_or_default(), "from_addresses")?;
        let subjects = split_list(input.contains_subject.as_deref().unwrap_or_default());
        let has_attachments = input.has_attachments == Some(true);
        if senders.is_empty() && subjects.is_empty() && !has_attachments {
            return Err(AppError::invalid(
                "at least one condition is required: from_addresses, contains_subject or has_attachments",
            ));
        }
        let move_to = input
            .move_to_folder
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty());
        let mark_as_read = input.mark_as_read == Some(true);
        if move_to.is_none() && !mark_as_read {
            return Err(AppError::invalid(
                "at least one action is required: move_to_folder or mark_as_read",
            ));
        }
        if let Some(sequence) = input.sequence
            && sequence < 1
        {
            return Err(AppError::invalid("sequence must be at least 1"));
        }

        let token = self.auth.ensure_authenticated().await?;
        let api = self.api.as_ref();
        let existing = self.fetch_rules(&token).await?;
        if existing.iter().any(|r| r.display_name.eq_ignore_ascii_case(name)) {
            return Err(AppError::invalid(format!("a rule named '{name}' already exists")));
        }
        let sequence = input.sequence.unwrap_or_else(|| {
            existing
                .iter()
                .filter_map(|r| r.sequence)
                .max()
                .unwrap_or(0)
                + 1
        });

        let mut conditions = serde_json::Map::new();
        if !senders.is_empty() {
            conditions.insert("fromAddresses".to_owned(), recipients_json(&senders));
        }
        if !subjects.is_empty() {
            conditions.insert("subjectContains".to_owned(), json!(subjects));
        }
        if has_attachments {
            conditions.insert("hasAttachments".to_owned(), json!(true));
        }

        let mut actions = serde_json::Map::new();
        let mut destination_label = None;
        if let Some(folder) = move_to {
            let resolved = resolve_folder(api, &token, Some(folder)).await?;
            // Rules need the real folder id, not a well-known name.
            let real: MailFolder = fetch(
                api,
                &token,
                ApiRequest::get(format!("me/mailFolders/{}", encode(&resolved.id)))
                    .query("$select", "id,displayName"),
            )
            .await?;
            actions.insert("moveToFolder".to_owned(), json!(real.id));
            destination_label = Some(real.display_name);
        }
        if mark_as_read {
            actions.insert("markAsRead".to_owned(), json!(true));
        }

        let created: MessageRule = fetch(
            api,
            &token,
            ApiRequest::post(
                "me/mailFolders/inbox/messageRules",
                json!({
                    "displayName": name,
                    "sequence": sequence,
                    "isEnabled": input.is_enabled.unwrap_or(true),
                    "conditions": Value::Object(conditions),
                    "actions": Value::Object(actions),
                }),
            ),
        )
        .await?;

        let mut out = format!(
            "Rule '{}' created with sequence {sequence} [ID: {}]",
            created.display_name, created.id
        );
        if let Some(label) = destination_label {
            out.push_str(&format!("\nMatching messages will be moved to '{label}'."));
        }
        Ok(out)
    }

    /// Run an inbox rule over existing messages of a folder
    ///
    /// The rule's conditions become strict queries (no degrading): every
    /// sender is combined with every subject keyword, plus the attachment
    /// filter. Matches are de-duplicated, marked read first if requested,
    /// then moved.
    pub async fn apply_rule(&self, input: ApplyRuleInput) -> AppResult<String> {
        let name = input.name.trim();
        validate_text(name, "name", MAX_NAME_LEN)?;
        let token = self.auth.ensure_authenticated().await?;
        let api = self.api.as_ref();

        let rules = self.fetch_rules(&token).await?;
        let rule = rules
            .into_iter()
            .find(|r| r.display_name.eq_ignore_ascii_case(name))
            .ok_or_else(|| AppError::NotFound(format!("rule '{name}'")))?;

        let senders = rule.sender_addresses();
        let subjects = rule.subject_keywords();
        let filters: Vec<BooleanFilter> = if rule.requires_attachments() {
            vec![BooleanFilter::HasAttachment]
        } else {
            Vec::new()
        };
        if senders.is_empty() && subjects.is_empty() && filters.is_empty() {
            return Err(AppError::invalid(format!(
                "rule '{}' has no sender, subject or attachment conditions to evaluate",
                rule.display_name
            )));
        }
        let move_target = rule.move_target().map(str::to_owned);
        let marks_read = rule.marks_read();
        if move_target.is_none() && !marks_read {
            return Err(AppError::invalid(format!(
                "rule '{}' has no move or mark-as-read action to apply",
                rule.display_name
            )));
        }

        let (scope, scope_label) = self.scope_path(&token, input.folder.as_deref()).await?;
        let cap = self.limit(input.count);

        let mut matched = Vec::new();
        let mut seen = HashSet::new();
        for query in rule_queries(&senders, &subjects, &filters) {
            let page: ODataPage<Message> = fetch(
                api,
                &token,
                ApiRequest::get(scope.clone()).queries(self.dialect.render(Some(&query), cap)),
            )
            .await?;
            for msg in page.value {
                if seen.insert(msg.id.clone()) {
                    matched.push(msg.id);
                }
            }
        }

        let mut out = format!(
            "Rule '{}' matched {} message(s) in {scope_label}.",
            rule.display_name,
            matched.len()
        );
        if matched.is_empty() {
            return Ok(out);
        }

        if marks_read {
            let result = self
                .bulk
                .execute(self.auth.as_ref(), api, &MarkRead::new(true), &matched)
                .await?;
            out.push('\n');
            out.push_str(&self.bulk.summarize(&result, "marked as read"));
        }
        if let Some(folder_id) = move_target {
            let result: BulkResult = self
                .bulk
                .execute(
                    self.auth.as_ref(),
                    api,
                    &MoveToFolder::new(Destination::Id(folder_id)),
                    &matched,
                )
                .await?;
            out.push('\n');
            out.push_str(&self.bulk.summarize(&result, "moved"));
        }
        Ok(out)
    }

    pub async fn list_events(&self, input: ListEventsInput) -> AppResult<String> {
        let token = self.auth.ensure_authenticated().await?;
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let page: ODataPage<CalendarEvent> = fetch(
            self.api.as_ref(),
            &token,
            ApiRequest::get("me/events")
                .query("$top", self.limit(input.count).to_string())
                .query("$select", EVENT_SELECT)
                .query("$orderby", "start/dateTime")
                .query("$filter", format!("start/dateTime ge '{now}'")),
        )
        .await?;
        Ok(format::event_list(&page.value))
    }

    pub async fn create_event(&self, input: CreateEventInput) -> AppResult<String> {
        let subject = input.subject.trim();
        validate_text(subject, "subject", MAX_NAME_LEN)?;
        let (start, start_utc) = parse_event_time(&input.start, "start")?;
        let (end, end_utc) = parse_event_time(&input.end, "end")?;
        if start_utc != end_utc {
            return Err(AppError::invalid(
                "start and end must both carry a UTC offset or both be local times in time_zone",
            ));
        }
        if end <= start {
            return Err(AppError::invalid("end must be after start"));
        }
        // Offsets in the input are authoritative; such times are sent as UTC.
        let time_zone = if start_utc {
            "UTC".to_owned()
        } else {
            input
                .time_zone
                .as_deref()
                .map(str::trim)
                .filter(|tz| !tz.is_empty())
                .unwrap_or("UTC")
                .to_owned()
        };
        let attendees = parse_addresses(input.attendees.as_deref().unwrap_or_default(), "attendees")?;

        let mut payload = json!({
            "subject": subject,
            "start": { "dateTime": format_graph_time(start), "timeZone": time_zone },
            "end": { "dateTime": format_graph_time(end), "timeZone": time_zone },
        });
        if let Some(location) = input.location.as_deref().filter(|l| !l.trim().is_empty()) {
            payload["location"] = json!({ "displayName": location.trim() });
        }
        if let Some(body) = input.body.as_deref().filter(|b| !b.trim().is_empty()) {
            payload["body"] = json!({ "contentType": "Text", "content": body });
        }
        if !attendees.is_empty() {
            payload["attendees"] = Value::Array(
                attendees
                    .iter()
                    .map(|a| json!({ "emailAddress": { "address": a }, "type": "required" }))
                    .collect(),
            );
        }

        let token = self.auth.ensure_authenticated().await?;
        let created: CalendarEvent =
            fetch(self.api.as_ref(), &token, ApiRequest::post("me/events", payload)).await?;
        Ok(format!(
            "Event '{}' created for {} -> {} ({time_zone}) [ID: {}]",
            subject,
            format_graph_time(start),
            format_graph_time(end),
            created.id
        ))
    }

    pub async fn delete_event(&self, event_id: &str) -> AppResult<String> {
        validate_item_id(event_id, "event_id")?;
        let token = self.auth.ensure_authenticated().await?;
        self.api
            .call(
                &token,
                ApiRequest::delete(format!("me/events/{}", encode(event_id))),
            )
            .await?;
        Ok(format!("Event {event_id} deleted."))
    }
}

/// Strict queries for a rule: senders x subject keywords, each with the filters
fn rule_queries(senders: &[String], subjects: &[String], filters: &[BooleanFilter]) -> Vec<Query> {
    let sender_terms: Vec<Option<SearchTerm>> = if senders.is_empty() {
        vec![None]
    } else {
        senders
            .iter()
            .map(|s| Some(SearchTerm::new(TermField::From, s.as_str())))
            .collect()
    };
    let subject_terms: Vec<Option<SearchTerm>> = if subjects.is_empty() {
        vec![None]
    } else {
        subjects
            .iter()
            .map(|s| Some(SearchTerm::new(TermField::Subject, s.as_str())))
            .collect()
    };

    let mut queries = Vec::new();
    for sender in &sender_terms {
        for subject in &subject_terms {
            let terms: Vec<SearchTerm> = sender.iter().chain(subject.iter()).cloned().collect();
            queries.push(Query::all_of(&terms, filters));
        }
    }
    queries
}

fn recipients_json(addresses: &[String]) -> Value {
    Value::Array(
        addresses
            .iter()
            .map(|a| json!({ "emailAddress": { "address": a } }))
            .collect(),
    )
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Split and validate a comma or semicolon separated address list
fn parse_addresses(raw: &str, field: &str) -> AppResult<Vec<String>> {
    let addresses = split_list(raw);
    if let Some(bad) = addresses.iter().find(|a| !ADDRESS_PATTERN.is_match(a)) {
        return Err(AppError::invalid(format!(
            "{field} contains an invalid email address: '{bad}'"
        )));
    }
    Ok(addresses)
}

fn looks_like_html(body: &str) -> bool {
    HTML_TAG_PATTERN.is_match(body)
}

/// Parse an event time; the flag is true when the input carried an offset
fn parse_event_time(raw: &str, field: &str) -> AppResult<(NaiveDateTime, bool)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::invalid(format!("{field} is required")));
    }
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Ok((with_offset.with_timezone(&Utc).naive_utc(), true));
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, pattern) {
            return Ok((parsed, false));
        }
    }
    Err(AppError::invalid(format!(
        "{field} must be an ISO 8601 date-time such as 2024-05-01T09:00:00 (got '{raw}')"
    )))
}

fn format_graph_time(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn validate_text(value: &str, field: &str, max: usize) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::invalid(format!("{field} is required")));
    }
    if value.chars().count() > max {
        return Err(AppError::invalid(format!(
            "{field} must be at most {max} characters"
        )));
    }
    if value.chars().any(|ch| ch.is_control()) {
        return Err(AppError::invalid(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

fn validate_item_id(id: &str, field: &str) -> AppResult<()> {
    validate_text(id, field, MAX_ID_LEN)
}

fn validate_ids(ids: &[String]) -> AppResult<()> {
    for id in ids {
        validate_item_id(id, "ids")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value, json};

    use super::{
        OutlookService, format_graph_time, looks_like_html, parse_addresses, parse_event_time,
        resolve_folder, rule_queries,
    };
    use crate::auth::AccessToken;
    use crate::bulk::BulkExecutor;
    use crate::errors::AppError;
    use crate::models::{
        ApplyRuleInput, CreateEventInput, CreateRuleInput, ListEmailsInput, MarkAsReadInput,
        MoveEmailsInput, SendEmailInput,
    };
    use crate::query::{BooleanFilter, GraphDialect, QueryDialect, TermField};
    use crate::search::SearchEngine;
    use crate::testing::{ScriptedApi, StaticAuth, message_page, query_param};

    fn folders() -> Value {
        json!({ "value": [
            { "id": "F-INBOX", "displayName": "Inbox", "childFolderCount": 1 },
            { "id": "F-PROJ", "displayName": "Projects", "childFolderCount": 0 },
        ]})
    }

    fn service(api: Arc<ScriptedApi>) -> OutlookService {
        OutlookService::new(
            Arc::new(StaticAuth::valid()),
            api,
            SearchEngine::new(50, TermField::DEFAULT_ORDER.to_vec()),
            BulkExecutor::new(3),
            10,
        )
    }

    fn folder_api() -> ScriptedApi {
        ScriptedApi::new(|call| match call.path.as_str() {
            "me/mailFolders" => Ok(folders()),
            "me/mailFolders/F-INBOX/childFolders" => Ok(json!({ "value": [
                { "id": "F-CLIENTS", "displayName": "Clients", "childFolderCount": 0 }
            ]})),
            other => Err(AppError::Api {
                status: 404,
                message: format!("no route {other}"),
            }),
        })
    }

    #[tokio::test]
    async fn aliases_resolve_without_remote_calls() {
        let api = folder_api();
        let token = AccessToken::bearer("t", None);
        for (alias, id) in [("Sent", "sentitems"), ("trash", "deleteditems"), ("spam", "junkemail")] {
            let folder = resolve_folder(&api, &token, Some(alias)).await.expect("alias");
            assert_eq!(folder.id, id);
        }
        let default = resolve_folder(&api, &token, None).await.expect("default");
        assert_eq!(default.messages_path(), "me/mailFolders/inbox/messages");
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn names_match_top_level_then_children_case_insensitively() {
        let api = folder_api();
        let token = AccessToken::bearer("t", None);

        let top = resolve_folder(&api, &token, Some("projects")).await.expect("top");
        assert_eq!(top.id, "F-PROJ");

        let child = resolve_folder(&api, &token, Some("CLIENTS")).await.expect("child");
        assert_eq!(child.id, "F-CLIENTS");
        assert_eq!(child.display_name, "Inbox/Clients");

        let err = resolve_folder(&api, &token, Some("Nope"))
            .await
            .expect_err("unknown folder");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_emails_scopes_all_folders() {
        let api = Arc::new(ScriptedApi::new(|_| Ok(message_page(&["m1"]))));
        let text = service(api.clone())
            .list_emails(ListEmailsInput {
                folder: Some("all".to_owned()),
                count: Some(3),
            })
            .await
            .expect("list");
        assert!(text.contains("ID: m1"));
        let calls = api.calls();
        assert_eq!(calls[0].path, "me/messages");
        assert_eq!(query_param(&calls[0], "$top"), Some("3"));
    }

    #[tokio::test]
    async fn move_reports_partial_failures() {
        let api = Arc::new(ScriptedApi::new(|call| {
            if call.path == "me/messages/b/move" {
                Err(AppError::Api {
                    status: 404,
                    message: "ErrorItemNotFound: not found".to_owned(),
                })
            } else {
                assert_eq!(call.body, Some(json!({ "destinationId": "archive" })));
                Ok(json!({ "id": "moved" }))
            }
        }));
        let text = service(api.clone())
            .move_emails(MoveEmailsInput {
                ids: vec!["a".to_owned(), "b".to_owned(), "c".to_owned()],
                target_folder: "Archive".to_owned(),
            })
            .await
            .expect("move");
        assert!(text.starts_with("2 of 3 item(s) moved."));
        assert!(text.contains("- b: api error (404)"));
        assert_eq!(api.call_count(), 3);
    }

    #[tokio::test]
    async fn move_to_unknown_folder_fails_before_any_item() {
        let api = Arc::new(folder_api());
        let err = service(api.clone())
            .move_emails(MoveEmailsInput {
                ids: vec!["a".to_owned()],
                target_folder: "Missing".to_owned(),
            })
            .await
            .expect_err("target resolution");
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(api.calls().iter().all(|c| !c.path.starts_with("me/messages")));
    }

    #[tokio::test]
    async fn mark_as_read_patches_each_message() {
        let api = Arc::new(ScriptedApi::new(|_| Ok(Value::Null)));
        let text = service(api.clone())
            .mark_as_read(MarkAsReadInput {
                ids: vec!["x".to_owned(), "y".to_owned()],
                is_read: Some(false),
            })
            .await
            .expect("mark");
        assert_eq!(text, "2 of 2 item(s) marked as unread.");
        let calls = api.calls();
        assert_eq!(calls[1].path, "me/messages/y");
        assert_eq!(calls[1].body, Some(json!({ "isRead": false })));
    }

    #[tokio::test]
    async fn send_email_validates_and_posts_message() {
        let api = Arc::new(ScriptedApi::new(|_| Ok(Value::Null)));
        let svc = service(api.clone());

        let err = svc
            .send_email(SendEmailInput {
                to: "not-an-address".to_owned(),
                cc: None,
                bcc: None,
                subject: "Hi".to_owned(),
                body: "Body".to_owned(),
                importance: None,
                save_to_sent_items: None,
            })
            .await
            .expect_err("bad address");
        assert!(err.is_validation());
        assert_eq!(api.call_count(), 0);

        let text = svc
            .send_email(SendEmailInput {
                to: "a@example.com; b@example.com".to_owned(),
                cc: Some("c@example.com".to_owned()),
                bcc: None,
                subject: "Status".to_owned(),
                body: "<p>Done</p>".to_owned(),
                importance: Some("High".to_owned()),
                save_to_sent_items: Some(false),
            })
            .await
            .expect("send");
        assert!(text.contains("3 recipient(s)"));
        let call = &api.calls()[0];
        assert_eq!(call.path, "me/sendMail");
        let body = call.body.as_ref().expect("payload");
        assert_eq!(body["message"]["body"]["contentType"], "HTML");
        assert_eq!(body["message"]["importance"], "high");
        assert_eq!(body["message"]["toRecipients"][1]["emailAddress"]["address"], "b@example.com");
        assert_eq!(body["saveToSentItems"], false);
    }

    #[tokio::test]
    async fn create_rule_requires_condition_and_action() {
        let api = Arc::new(ScriptedApi::new(|_| Ok(json!({ "value": [] }))));
        let svc = service(api.clone());
        let base = CreateRuleInput {
            name: "Invoices".to_owned(),
            from_addresses: None,
            contains_subject: Some("invoice".to_owned()),
            has_attachments: None,
            move_to_folder: None,
            mark_as_read: None,
            is_enabled: None,
            sequence: None,
        };
        let err = svc.create_rule(base.clone()).await.expect_err("no action");
        assert!(err.to_string().contains("at least one action"));

        let err = svc
            .create_rule(CreateRuleInput {
                contains_subject: None,
                mark_as_read: Some(true),
                ..base
            })
            .await
            .expect_err("no condition");
        assert!(err.to_string().contains("at least one condition"));
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn create_rule_appends_after_existing_rules() {
        let api = Arc::new(ScriptedApi::new(|call| match (call.method.as_str(), call.path.as_str()) {
            ("GET", "me/mailFolders/inbox/messageRules") => Ok(json!({ "value": [
                { "id": "r1", "displayName": "First", "sequence": 1, "isEnabled": true },
                { "id": "r2", "displayName": "Second", "sequence": 4, "isEnabled": true },
            ]})),
            ("GET", "me/mailFolders/archive") => Ok(json!({ "id": "REAL-ARCHIVE", "displayName": "Archive" })),
            ("POST", "me/mailFolders/inbox/messageRules") => {
                let body = call.body.clone().unwrap_or_default();
                Ok(json!({ "id": "r3", "displayName": body["displayName"] }))
            }
            (method, path) => panic!("unexpected {method} {path}"),
        }));
        let text = service(api.clone())
            .create_rule(CreateRuleInput {
                name: "Newsletters".to_owned(),
                from_addresses: Some("news@example.com".to_owned()),
                contains_subject: None,
                has_attachments: None,
                move_to_folder: Some("archive".to_owned()),
                mark_as_read: Some(true),
                is_enabled: None,
                sequence: None,
            })
            .await
            .expect("create");
        assert!(text.contains("sequence 5"));

        let post = api
            .calls()
            .into_iter()
            .find(|c| c.method.as_str() == "POST")
            .expect("post call");
        let body = post.body.expect("payload");
        assert_eq!(body["sequence"], 5);
        assert_eq!(body["actions"]["moveToFolder"], "REAL-ARCHIVE");
        assert_eq!(body["actions"]["markAsRead"], true);
        assert_eq!(
            body["conditions"]["fromAddresses"][0]["emailAddress"]["address"],
            "news@example.com"
        );
    }

    #[tokio::test]
    async fn apply_rule_runs_strict_queries_and_dedups_matches() {
        let api = Arc::new(ScriptedApi::new(|call| match (call.method.as_str(), call.path.as_str()) {
            ("GET", "me/mailFolders/inbox/messageRules") => Ok(json!({ "value": [{
                "id": "r1",
                "displayName": "Vendors",
                "sequence": 1,
                "isEnabled": true,
                "conditions": {
                    "fromAddresses": [
                        { "emailAddress": { "address": "a@v.com" } },
                        { "emailAddress": { "address": "b@v.com" } }
                    ],
                    "subjectContains": ["invoice"]
                },
                "actions": { "markAsRead": true }
            }]})),
            ("GET", "me/mailFolders/inbox/messages") => {
                Ok(match query_param(call, "$search") {
                    Some("\"from:a@v.com AND subject:invoice\"") => message_page(&["m1", "m2"]),
                    Some("\"from:b@v.com AND subject:invoice\"") => message_page(&["m2", "m3"]),
                    other => panic!("unexpected search {other:?}"),
                })
            }
            ("PATCH", _) => Ok(Value::Null),
            (method, path) => panic!("unexpected {method} {path}"),
        }));
        let text = service(api.clone())
            .apply_rule(ApplyRuleInput {
                name: "vendors".to_owned(),
                folder: None,
                count: None,
            })
            .await
            .expect("apply");
        assert!(text.contains("matched 3 message(s)"));
        assert!(text.contains("3 of 3 item(s) marked as read."));
        let patched: Vec<String> = api
            .calls()
            .into_iter()
            .filter(|c| c.method.as_str() == "PATCH")
            .map(|c| c.path)
            .collect();
        assert_eq!(patched, vec!["me/messages/m1", "me/messages/m2", "me/messages/m3"]);
    }

    #[tokio::test]
    async fn apply_unknown_rule_is_not_found() {
        let api = Arc::new(ScriptedApi::new(|_| Ok(json!({ "value": [] }))));
        let err = service(api)
            .apply_rule(ApplyRuleInput {
                name: "Ghost".to_owned(),
                folder: None,
                count: None,
            })
            .await
            .expect_err("missing rule");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn rule_queries_cross_senders_and_subjects() {
        let queries = rule_queries(
            &["a@x.com".to_owned()],
            &["one".to_owned(), "two".to_owned()],
            &[BooleanFilter::HasAttachment],
        );
        assert_eq!(queries.len(), 2);
        let params = GraphDialect::default().render(Some(&queries[1]), 10);
        assert!(params.contains(&("$search".to_owned(), "\"from:a@x.com AND subject:two\"".to_owned())));
        assert!(params.contains(&("$filter".to_owned(), "hasAttachments eq true".to_owned())));

        let only_filter = rule_queries(&[], &[], &[BooleanFilter::HasAttachment]);
        assert_eq!(only_filter.len(), 1);
    }

    #[test]
    fn address_lists_accept_commas_and_semicolons() {
        let parsed = parse_addresses(" a@x.com, b@y.org ;", "to").expect("valid");
        assert_eq!(parsed, vec!["a@x.com", "b@y.org"]);
        assert!(parse_addresses("a@x.com, nobody", "to").is_err());
        assert!(parse_addresses("", "cc").expect("empty").is_empty());
    }

    #[test]
    fn event_times_accept_local_and_offset_forms() {
        let (local, offset) = parse_event_time("2024-05-01T09:30", "start").expect("local");
        assert!(!offset);
        assert_eq!(format_graph_time(local), "2024-05-01T09:30:00");

        let (utc, offset) = parse_event_time("2024-05-01T09:30:00+02:00", "start").expect("rfc3339");
        assert!(offset);
        assert_eq!(format_graph_time(utc), "2024-05-01T07:30:00");

        assert!(parse_event_time("tomorrow", "start").is_err());
    }

    fn event(start: &str, end: &str, time_zone: Option<&str>) -> CreateEventInput {
        CreateEventInput {
            subject: "Planning".to_owned(),
            start: start.to_owned(),
            end: end.to_owned(),
            time_zone: time_zone.map(str::to_owned),
            location: None,
            body: None,
            attendees: None,
        }
    }

    #[tokio::test]
    async fn event_rejects_offset_mixed_with_local_time() {
        let api = Arc::new(ScriptedApi::new(|_| Ok(json!({ "id": "ev-1" }))));
        let svc = service(api.clone());

        let err = svc
            .create_event(event(
                "2024-05-01T09:00:00+02:00",
                "2024-05-01T10:00:00",
                Some("Europe/Berlin"),
            ))
            .await
            .expect_err("mixed forms");
        assert!(err.is_validation());
        assert!(err.to_string().contains("both"));
        assert_eq!(api.call_count(), 0);

        svc.create_event(event(
            "2024-05-01T09:00:00+02:00",
            "2024-05-01T10:00:00+02:00",
            Some("Europe/Berlin"),
        ))
        .await
        .expect("both offsets");
        svc.create_event(event("2024-05-01T09:00:00", "2024-05-01T10:00:00", Some("Europe/Berlin")))
            .await
            .expect("both local");

        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        let offsets = calls[0].body.as_ref().expect("payload");
        assert_eq!(offsets["start"]["dateTime"], "2024-05-01T07:00:00");
        assert_eq!(offsets["end"]["dateTime"], "2024-05-01T08:00:00");
        assert_eq!(offsets["end"]["timeZone"], "UTC");
        let local = calls[1].body.as_ref().expect("payload");
        assert_eq!(local["start"]["dateTime"], "2024-05-01T09:00:00");
        assert_eq!(local["start"]["timeZone"], "Europe/Berlin");
    }

    #[test]
    fn html_detection_needs_a_tag() {
        assert!(looks_like_html("<p>Done</p>"));
        assert!(looks_like_html("line<br/>break"));
        assert!(!looks_like_html("2 < 3 and 4 > 1"));
        assert!(!looks_like_html("plain text"));
    }
}
