//! Tool input DTOs
//!
//! Defines the argument object of every MCP tool. Each type is annotated with
//! `JsonSchema` for automatic schema generation. Required string arguments
//! still default to empty so that a missing value reaches validation and is
//! answered with explanatory text instead of a protocol error.

use schemars::JsonSchema;
use serde::Deserialize;

/// Input: start Outlook authorization
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct AuthenticateInput {
    /// Issue a new consent URL even if a valid token exists
    #[serde(default)]
    pub force: bool,
}

/// Input: finish Outlook authorization
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CompleteAuthInput {
    /// Full redirect URL reached after consent; a bare `code=` value is accepted only
    /// when no consent URL is outstanding
    #[serde(default)]
    pub code: String,
}

/// Input: list recent messages of a folder
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListEmailsInput {
    /// Folder name or well-known alias (`inbox`, `sent`, `drafts`, `archive`, ...); defaults to `inbox`
    pub folder: Option<String>,
    /// Number of messages (clamped to the configured maximum)
    pub count: Option<i64>,
}

/// Input: search messages
///
/// Every criterion is optional. The search degrades from all criteria
/// combined to single criteria, then to filters only, then to the most
/// recent messages.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct SearchEmailsInput {
    /// Free-text query
    pub query: Option<String>,
    /// Sender address or name
    pub from: Option<String>,
    /// Recipient address or name
    pub to: Option<String>,
    /// Subject text
    pub subject: Option<String>,
    /// Folder name or alias (`all` searches every folder); defaults to `inbox`
    pub folder: Option<String>,
    /// Only messages with attachments
    pub has_attachments: Option<bool>,
    /// Only unread messages
    pub unread_only: Option<bool>,
    /// Number of messages (clamped to the configured maximum)
    pub count: Option<i64>,
}

/// Input: read one message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReadEmailInput {
    /// Message ID as returned by list or search
    #[serde(default)]
    pub id: String,
}

/// Input: send a message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SendEmailInput {
    /// Comma-separated recipient addresses
    #[serde(default)]
    pub to: String,
    /// Comma-separated CC addresses
    pub cc: Option<String>,
    /// Comma-separated BCC addresses
    pub bcc: Option<String>,
    /// Subject line
    #[serde(default)]
    pub subject: String,
    /// Body; sent as HTML when it contains HTML tags, plain text otherwise
    #[serde(default)]
    pub body: String,
    /// `low`, `normal` or `high` (default `normal`)
    pub importance: Option<String>,
    /// Keep a copy in Sent Items (default true)
    pub save_to_sent_items: Option<bool>,
}

/// Input: mark messages read or unread
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MarkAsReadInput {
    /// Message IDs, processed in order
    #[serde(default)]
    pub ids: Vec<String>,
    /// `true` marks read (default), `false` marks unread
    pub is_read: Option<bool>,
}

/// Input: move messages to a folder
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MoveEmailsInput {
    /// Message IDs, processed in order
    #[serde(default)]
    pub ids: Vec<String>,
    /// Destination folder name or alias
    #[serde(default)]
    pub target_folder: String,
}

/// Input: list mail folders
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListFoldersInput {
    /// Include total and unread counts
    #[serde(default)]
    pub include_item_counts: bool,
    /// Include direct child folders
    #[serde(default)]
    pub include_children: bool,
}

/// Input: create a mail folder
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateFolderInput {
    /// New folder name
    #[serde(default)]
    pub name: String,
    /// Parent folder name or alias (top level when omitted)
    pub parent_folder: Option<String>,
}

/// Input: list inbox rules
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListRulesInput {
    /// Include conditions and actions
    #[serde(default)]
    pub include_details: bool,
}

/// Input: create an inbox rule
///
/// Requires at least one condition (`from_addresses`, `contains_subject`,
/// `has_attachments`) and at least one action (`move_to_folder`,
/// `mark_as_read`).
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateRuleInput {
    /// Rule display name
    #[serde(default)]
    pub name: String,
    /// Comma-separated sender addresses
    pub from_addresses: Option<String>,
    /// Comma-separated subject keywords
    pub contains_subject: Option<String>,
    /// Match messages with attachments
    pub has_attachments: Option<bool>,
    /// Destination folder name or alias
    pub move_to_folder: Option<String>,
    /// Mark matching messages as read
    pub mark_as_read: Option<bool>,
    /// Whether the rule is active (default true)
    pub is_enabled: Option<bool>,
    /// Execution order (default: after all existing rules)
    pub sequence: Option<i32>,
}

/// Input: run an existing rule over a folder
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ApplyRuleInput {
    /// Rule display name (case-insensitive)
    #[serde(default)]
    pub name: String,
    /// Folder to scan (default `inbox`)
    pub folder: Option<String>,
    /// Messages to scan per condition (clamped to the configured maximum)
    pub count: Option<i64>,
}

/// Input: list calendar events
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListEventsInput {
    /// Number of events (clamped to the configured maximum)
    pub count: Option<i64>,
}

/// Input: create a calendar event
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateEventInput {
    /// Event title
    #[serde(default)]
    pub subject: String,
    /// Start, ISO 8601 local date-time (`2024-05-01T09:00:00`)
    #[serde(default)]
    pub start: String,
    /// End, ISO 8601 local date-time
    #[serde(default)]
    pub end: String,
    /// IANA or Windows time zone name (default `UTC`)
    pub time_zone: Option<String>,
    /// Location display name
    pub location: Option<String>,
    /// Event description
    pub body: Option<String>,
    /// Comma-separated attendee addresses
    pub attendees: Option<String>,
}

/// Input: delete a calendar event
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DeleteEventInput {
    /// Event ID as returned by `outlook_list_events`
    #[serde(default)]
    pub event_id: String,
}

/// Input: single Zendesk ticket
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TicketIdInput {
    /// Ticket number
    #[serde(default)]
    pub ticket_id: u64,
}

/// Input: list Zendesk tickets
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct GetTicketsInput {
    /// Page number, starting at 1
    pub page: Option<u32>,
    /// Tickets per page (1..100, default 25)
    pub per_page: Option<u32>,
    /// `created_at`, `updated_at`, `priority`, `status` or `id` (default `created_at`)
    pub sort_by: Option<String>,
    /// `asc` or `desc` (default `desc`)
    pub sort_order: Option<String>,
}

/// Input: comment on a Zendesk ticket
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateCommentInput {
    /// Ticket number
    #[serde(default)]
    pub ticket_id: u64,
    /// Comment text; HTML is accepted
    #[serde(default)]
    pub comment: String,
    /// Visible to the requester (default true); `false` makes an internal note
    pub public: Option<bool>,
}

/// Input: update Zendesk ticket fields
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateTicketInput {
    /// Ticket number
    #[serde(default)]
    pub ticket_id: u64,
    /// `new`, `open`, `pending`, `hold`, `solved` or `closed`
    pub status: Option<String>,
    /// `low`, `normal`, `high` or `urgent`
    pub priority: Option<String>,
}
