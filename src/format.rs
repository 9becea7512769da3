//! Text rendering of remote resources
//!
//! Tool responses are plain text meant for an agent to read. These helpers
//! turn typed Graph and Zendesk records into compact, stable reports.

use std::fmt::Write as _;

use tracing::debug;

use crate::outlook::{CalendarEvent, MailFolder, Message, MessageRule, Recipient};
use crate::search::{SearchAttempt, SearchOutcome};
use crate::zendesk::{Ticket, TicketComment};

/// Wrap width used when converting HTML bodies to text
const HTML_WRAP_WIDTH: usize = 100;
/// Maximum body characters shown by `outlook_read_email`
pub const BODY_MAX_CHARS: usize = 20_000;
/// Maximum preview characters shown in listings
const PREVIEW_MAX_CHARS: usize = 160;

/// Truncate a string to at most `max_chars` Unicode scalar values
pub fn truncate_chars(input: String, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input;
    }
    let mut out: String = input.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Convert an HTML fragment to wrapped plain text
///
/// Falls back to the raw markup if conversion fails.
pub fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), HTML_WRAP_WIDTH) {
        Ok(text) => text
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_owned(),
        Err(e) => {
            debug!(error = %e, "html conversion failed, returning raw body");
            html.to_owned()
        }
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn recipient_label(recipient: &Recipient) -> String {
    let Some(email) = &recipient.email_address else {
        return "(unknown)".to_owned();
    };
    match (email.name.as_deref(), email.address.as_deref()) {
        (Some(name), Some(address)) if !name.is_empty() && name != address => {
            format!("{name} <{address}>")
        }
        (_, Some(address)) => address.to_owned(),
        (Some(name), None) => name.to_owned(),
        (None, None) => "(unknown)".to_owned(),
    }
}

fn recipient_list(recipients: &[Recipient]) -> String {
    recipients
        .iter()
        .map(recipient_label)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Numbered message listing
pub fn message_list(title: &str, messages: &[Message]) -> String {
    if messages.is_empty() {
        return format!("{title}: no messages found.");
    }
    let mut out = format!("{title} ({} message(s)):\n", messages.len());
    for (idx, msg) in messages.iter().enumerate() {
        let _ = write!(
            out,
            "\n{}. {}{}\n   From: {}\n   Date: {}\n   ID: {}",
            idx + 1,
            if msg.is_read { "" } else { "[UNREAD] " },
            msg.subject.as_deref().unwrap_or("(no subject)"),
            msg.from
                .as_ref()
                .map(recipient_label)
                .unwrap_or_else(|| "(unknown)".to_owned()),
            msg.received_date_time.as_deref().unwrap_or("-"),
            msg.id,
        );
        if msg.has_attachments {
            out.push_str("\n   Attachments: yes");
        }
        if let Some(preview) = msg.body_preview.as_deref().filter(|p| !p.trim().is_empty()) {
            let _ = write!(
                out,
                "\n   Preview: {}",
                truncate_chars(single_line(preview), PREVIEW_MAX_CHARS)
            );
        }
        out.push('\n');
    }
    out.trim_end().to_owned()
}

/// One line describing which rungs ran
pub fn search_diagnostics(attempts: &[SearchAttempt]) -> String {
    let steps = attempts
        .iter()
        .map(|a| format!("{} ({})", a.strategy, a.result_count))
        .collect::<Vec<_>>()
        .join(" -> ");
    format!("Search path: {steps}")
}

/// Search results plus the strategy that produced them
pub fn search_report(outcome: &SearchOutcome<Message>) -> String {
    let mut out = message_list("Search results", &outcome.items);
    let _ = write!(
        out,
        "\n\nMatched by: {}\n{}",
        outcome.used_strategy,
        search_diagnostics(&outcome.attempts)
    );
    out
}

/// Full message with headers and a text body
pub fn message_detail(msg: &Message) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Subject: {}",
        msg.subject.as_deref().unwrap_or("(no subject)")
    );
    let _ = writeln!(
        out,
        "From: {}",
        msg.from
            .as_ref()
            .map(recipient_label)
            .unwrap_or_else(|| "(unknown)".to_owned())
    );
    if !msg.to_recipients.is_empty() {
        let _ = writeln!(out, "To: {}", recipient_list(&msg.to_recipients));
    }
    if !msg.cc_recipients.is_empty() {
        let _ = writeln!(out, "Cc: {}", recipient_list(&msg.cc_recipients));
    }
    let _ = writeln!(
        out,
        "Date: {}",
        msg.received_date_time.as_deref().unwrap_or("-")
    );
    if let Some(importance) = msg.importance.as_deref().filter(|i| *i != "normal") {
        let _ = writeln!(out, "Importance: {importance}");
    }
    let _ = writeln!(out, "Read: {}", if msg.is_read { "yes" } else { "no" });
    if msg.has_attachments {
        out.push_str("Attachments: yes\n");
    }
    let _ = writeln!(out, "ID: {}", msg.id);

    let body = msg
        .body
        .as_ref()
        .and_then(|b| {
            let content = b.content.as_deref()?;
            Some(
                if b
                    .content_type
                    .as_deref()
                    .is_some_and(|kind| kind.eq_ignore_ascii_case("html"))
                {
                    html_to_text(content)
                } else {
                    content.trim().to_owned()
                },
            )
        })
        .or_else(|| msg.body_preview.clone())
        .unwrap_or_default();
    let _ = write!(out, "\n{}", truncate_chars(body, BODY_MAX_CHARS));
    out.trim_end().to_owned()
}

/// Folder tree; children are indented under their parent
pub fn folder_list(folders: &[(MailFolder, Vec<MailFolder>)], include_counts: bool) -> String {
    if folders.is_empty() {
        return "No mail folders found.".to_owned();
    }
    let mut out = format!("Mail folders ({}):\n", folders.len());
    for (folder, children) in folders {
        out.push_str(&folder_line(folder, include_counts, 0));
        for child in children {
            out.push_str(&folder_line(child, include_counts, 1));
        }
    }
    out.trim_end().to_owned()
}

fn folder_line(folder: &MailFolder, include_counts: bool, depth: usize) -> String {
    let mut line = format!("{}- {}", "  ".repeat(depth), folder.display_name);
    if include_counts {
        let _ = write!(
            line,
            " ({} items, {} unread)",
            folder.total_item_count.unwrap_or(0),
            folder.unread_item_count.unwrap_or(0)
        );
    }
    let _ = writeln!(line, " [ID: {}]", folder.id);
    line
}

/// Inbox rules in execution order
pub fn rule_list(rules: &[MessageRule], include_details: bool) -> String {
    if rules.is_empty() {
        return "No inbox rules found.".to_owned();
    }
    let mut out = format!("Inbox rules ({}):\n", rules.len());
    for rule in rules {
        let _ = write!(
            out,
            "\n{}. {}{}",
            rule.sequence.unwrap_or(0),
            rule.display_name,
            if rule.is_enabled { "" } else { " (disabled)" }
        );
        if include_details {
            let conditions = rule.condition_summary();
            let actions = rule.action_summary();
            let _ = write!(
                out,
                "\n   Conditions: {}\n   Actions: {}",
                if conditions.is_empty() {
                    "none".to_owned()
                } else {
                    conditions.join("; ")
                },
                if actions.is_empty() {
                    "none".to_owned()
                } else {
                    actions.join("; ")
                }
            );
        }
    }
    out
}

/// Calendar events with their time span
pub fn event_list(events: &[CalendarEvent]) -> String {
    if events.is_empty() {
        return "No upcoming events found.".to_owned();
    }
    let mut out = format!("Upcoming events ({}):\n", events.len());
    for (idx, event) in events.iter().enumerate() {
        let _ = write!(
            out,
            "\n{}. {}\n   When: {} -> {}",
            idx + 1,
            event.subject.as_deref().unwrap_or("(no subject)"),
            event.start.as_ref().map(|t| t.label()).unwrap_or_default(),
            event.end.as_ref().map(|t| t.label()).unwrap_or_default(),
        );
        if let Some(location) = event
            .location
            .as_ref()
            .and_then(|l| l.display_name.as_deref())
            .filter(|l| !l.is_empty())
        {
            let _ = write!(out, "\n   Location: {location}");
        }
        if let Some(organizer) = &event.organizer {
            let _ = write!(out, "\n   Organizer: {}", recipient_label(organizer));
        }
        let _ = writeln!(out, "\n   ID: {}", event.id);
    }
    out.trim_end().to_owned()
}

/// Ticket header block
pub fn ticket_detail(ticket: &Ticket) -> String {
    let mut out = format!(
        "Ticket #{}: {}\nStatus: {}\nPriority: {}\nType: {}\nRequester ID: {}\nAssignee ID: {}\nCreated: {}\nUpdated: {}",
        ticket.id,
        ticket.subject.as_deref().unwrap_or("(no subject)"),
        ticket.status.as_deref().unwrap_or("-"),
        ticket.priority.as_deref().unwrap_or("-"),
        ticket.ticket_type.as_deref().unwrap_or("-"),
        opt_id(ticket.requester_id),
        opt_id(ticket.assignee_id),
        ticket.created_at.as_deref().unwrap_or("-"),
        ticket.updated_at.as_deref().unwrap_or("-"),
    );
    if !ticket.tags.is_empty() {
        let _ = write!(out, "\nTags: {}", ticket.tags.join(", "));
    }
    if let Some(description) = ticket.description.as_deref().filter(|d| !d.trim().is_empty()) {
        let _ = write!(
            out,
            "\n\n{}",
            truncate_chars(description.trim().to_owned(), BODY_MAX_CHARS)
        );
    }
    out
}

fn opt_id(id: Option<u64>) -> String {
    id.map_or_else(|| "-".to_owned(), |id| id.to_string())
}

/// One-line-per-ticket listing
pub fn ticket_list(tickets: &[Ticket], page: u32, has_more: bool) -> String {
    if tickets.is_empty() {
        return format!("No tickets on page {page}.");
    }
    let mut out = format!("Tickets (page {page}, {} shown):\n", tickets.len());
    for ticket in tickets {
        let _ = write!(
            out,
            "\n#{} [{}] {} (priority: {}, updated: {})",
            ticket.id,
            ticket.status.as_deref().unwrap_or("-"),
            ticket.subject.as_deref().unwrap_or("(no subject)"),
            ticket.priority.as_deref().unwrap_or("-"),
            ticket.updated_at.as_deref().unwrap_or("-"),
        );
    }
    if has_more {
        let _ = write!(out, "\n\nMore tickets available: request page {}.", page + 1);
    }
    out
}

/// Comment thread, oldest first
pub fn comment_list(ticket_id: u64, comments: &[TicketComment]) -> String {
    if comments.is_empty() {
        return format!("Ticket #{ticket_id} has no comments.");
    }
    let mut out = format!("Ticket #{ticket_id} comments ({}):\n", comments.len());
    for comment in comments {
        let text = match (comment.plain_body.as_deref(), comment.html_body.as_deref()) {
            (Some(plain), _) if !plain.trim().is_empty() => plain.trim().to_owned(),
            (_, Some(html)) => html_to_text(html),
            _ => comment.body.clone().unwrap_or_default(),
        };
        let _ = write!(
            out,
            "\n--- Comment {} by author {} at {}{} ---\n{}\n",
            comment.id,
            opt_id(comment.author_id),
            comment.created_at.as_deref().unwrap_or("-"),
            if comment.public { "" } else { " (internal)" },
            truncate_chars(text, BODY_MAX_CHARS)
        );
    }
    out.trim_end().to_owned()
}

#[cfg(test)]
mod tests {
    use super::{html_to_text, search_diagnostics, truncate_chars};
    use crate::query::TermField;
    use crate::search::{SearchAttempt, SearchStrategy};

    #[test]
    fn truncates_unicode_by_character() {
        assert_eq!(truncate_chars("héllo".to_owned(), 10), "héllo");
        assert_eq!(truncate_chars("héllo".to_owned(), 2), "hé…");
    }

    #[test]
    fn html_bodies_become_text() {
        let text = html_to_text("<html><body><p>Hello <b>team</b></p><p>Thanks</p></body></html>");
        assert!(text.contains("Hello"));
        assert!(text.contains("Thanks"));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn diagnostics_list_rungs_in_order() {
        let line = search_diagnostics(&[
            SearchAttempt {
                strategy: SearchStrategy::Combined,
                succeeded: false,
                result_count: 0,
            },
            SearchAttempt {
                strategy: SearchStrategy::SingleTerm(TermField::Subject),
                succeeded: true,
                result_count: 4,
            },
        ]);
        assert_eq!(
            line,
            "Search path: combined (0) -> single-term-subject (4)"
        );
    }
}
