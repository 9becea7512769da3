//! Backend-agnostic search query model and dialect rendering
//!
//! The search ladder builds [`Query`] values; a [`QueryDialect`] turns them
//! into the query parameters a particular REST backend understands. The
//! Microsoft Graph dialect is the only production dialect.

use std::fmt;

/// A scoped or unscoped text term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermField {
    /// Subject line
    Subject,
    /// Sender address or name
    From,
    /// Recipient address or name
    To,
    /// Unscoped free text
    FreeText,
}

impl TermField {
    /// Default priority order of the single-term rungs
    ///
    /// Scoped fields carry higher precision than free text and are tried first.
    pub const DEFAULT_ORDER: [TermField; 4] = [
        TermField::Subject,
        TermField::From,
        TermField::To,
        TermField::FreeText,
    ];

    /// Parse a field name as used in configuration
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "subject" => Some(Self::Subject),
            "from" => Some(Self::From),
            "to" => Some(Self::To),
            "query" | "text" | "freetext" => Some(Self::FreeText),
            _ => None,
        }
    }

    /// Short name used in strategy labels
    pub fn label(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::From => "from",
            Self::To => "to",
            Self::FreeText => "query",
        }
    }
}

impl fmt::Display for TermField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A text term bound to a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerm {
    pub field: TermField,
    pub value: String,
}

impl SearchTerm {
    pub fn new(field: TermField, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}

/// Boolean filters independent of text terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanFilter {
    HasAttachment,
    UnreadOnly,
}

/// Tagged query tree
///
/// `Combined` means logical AND of its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Term(SearchTerm),
    Filter(BooleanFilter),
    Combined(Vec<Query>),
}

impl Query {
    /// Combine terms and filters; a single part collapses to itself
    pub fn all_of(terms: &[SearchTerm], filters: &[BooleanFilter]) -> Self {
        let mut parts: Vec<Query> = terms.iter().cloned().map(Query::Term).collect();
        parts.extend(filters.iter().copied().map(Query::Filter));
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Query::Combined(parts)
        }
    }

    /// Flatten the tree into its terms and filters, in order
    pub fn parts(&self) -> (Vec<&SearchTerm>, Vec<BooleanFilter>) {
        let mut terms = Vec::new();
        let mut filters = Vec::new();
        self.collect(&mut terms, &mut filters);
        (terms, filters)
    }

    fn collect<'a>(&'a self, terms: &mut Vec<&'a SearchTerm>, filters: &mut Vec<BooleanFilter>) {
        match self {
            Query::Term(term) => terms.push(term),
            Query::Filter(filter) => filters.push(*filter),
            Query::Combined(children) => {
                for child in children {
                    child.collect(terms, filters);
                }
            }
        }
    }
}

/// Renders queries into backend query parameters
///
/// `None` means "no query": the most recent items of the scope, newest first.
pub trait QueryDialect: Send + Sync {
    fn render(&self, query: Option<&Query>, limit: usize) -> Vec<(String, String)>;
}

/// Fields requested for message listings
pub const GRAPH_MESSAGE_SELECT: &str =
    "id,subject,from,toRecipients,ccRecipients,receivedDateTime,bodyPreview,hasAttachments,importance,isRead";

/// Microsoft Graph `$search` / `$filter` dialect
#[derive(Debug, Clone)]
pub struct GraphDialect {
    select: String,
}

impl Default for GraphDialect {
    fn default() -> Self {
        Self {
            select: GRAPH_MESSAGE_SELECT.to_owned(),
        }
    }
}

impl QueryDialect for GraphDialect {
    fn render(&self, query: Option<&Query>, limit: usize) -> Vec<(String, String)> {
        let mut params = vec![
            ("$top".to_owned(), limit.to_string()),
            ("$select".to_owned(), self.select.clone()),
        ];

        let (terms, filters) = query.map(Query::parts).unwrap_or_default();

        if !terms.is_empty() {
            let kql = terms
                .iter()
                .map(|term| render_kql_term(term))
                .collect::<Vec<_>>()
                .join(" AND ");
            params.push(("$search".to_owned(), format!("\"{kql}\"")));
        } else {
            // Graph rejects $orderby together with $search; search hits are
            // already returned newest first.
            params.push(("$orderby".to_owned(), "receivedDateTime desc".to_owned()));
        }

        if !filters.is_empty() {
            let filter = filters
                .iter()
                .map(|filter| match filter {
                    BooleanFilter::HasAttachment => "hasAttachments eq true",
                    BooleanFilter::UnreadOnly => "isRead eq false",
                })
                .collect::<Vec<_>>()
                .join(" and ");
            params.push(("$filter".to_owned(), filter));
        }

        params
    }
}

fn render_kql_term(term: &SearchTerm) -> String {
    let value = escape_kql(&term.value);
    match term.field {
        TermField::Subject => format!("subject:{value}"),
        TermField::From => format!("from:{value}"),
        TermField::To => format!("to:{value}"),
        TermField::FreeText => value,
    }
}

/// Strip characters that would terminate the quoted `$search` expression
fn escape_kql(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|ch| if ch == '"' || ch.is_control() { ' ' } else { ch })
        .collect::<String>()
        .replace('\\', "")
}
