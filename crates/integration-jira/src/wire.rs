//! Jira REST v3 payloads and their conversion into core models.

use deskbridge_core::loop_guard::UNKNOWN_TRACKER_USER;
use deskbridge_core::text::parse_timestamp;
use deskbridge_core::{NewTrackerTicket, RemoteAttachment, TrackerComment, TrackerTicket};
use serde::Deserialize;
use serde_json::{json, Value};
use time::Date;
use tracing::warn;

pub(crate) const SEARCH_FIELDS: &str =
    "summary,description,status,comment,updated,created,priority,attachment";
pub(crate) const UNREADABLE_COMMENT: &str = "Não foi possível extrair o conteúdo.";

pub(crate) fn search_jql(project_key: &str, since: Date) -> String {
    let project = project_key.replace('\\', "\\\\").replace('\'', "\\'");
    format!("project = '{project}' AND updated >= '{since}' ORDER BY updated DESC")
}

/// Single-paragraph Atlassian Document Format body.
pub(crate) fn adf_document(text: &str) -> Value {
    json!({
        "type": "doc",
        "version": 1,
        "content": [
            {"type": "paragraph", "content": [{"type": "text", "text": text}]}
        ]
    })
}

pub(crate) fn create_issue_payload(project_key: &str, request: &NewTrackerTicket) -> Value {
    json!({
        "fields": {
            "project": {"key": project_key},
            "issuetype": {"name": request.issue_type},
            "summary": request.summary,
            "description": adf_document(&request.description),
            "priority": {"name": request.priority_name},
        }
    })
}

pub(crate) fn comment_payload(text: &str) -> Value {
    json!({ "body": adf_document(text) })
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchPage {
    #[serde(default)]
    pub issues: Vec<IssueWire>,
    #[serde(default, rename = "startAt")]
    pub start_at: u32,
    #[serde(default)]
    pub total: u32,
}

impl SearchPage {
    /// Offset of the following page, if the search has more results.
    pub fn next_start_at(&self) -> Option<u32> {
        let fetched = u32::try_from(self.issues.len()).ok()?;
        if fetched == 0 {
            return None;
        }
        let next = self.start_at.saturating_add(fetched);
        (next < self.total).then_some(next)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct IssueWire {
    pub key: String,
    #[serde(default)]
    pub fields: IssueFields,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct IssueFields {
    pub created: Option<String>,
    pub updated: Option<String>,
    pub status: Option<NamedField>,
    pub priority: Option<NamedField>,
    pub comment: Option<CommentPage>,
    #[serde(default)]
    pub attachment: Vec<AttachmentWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NamedField {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentPage {
    #[serde(default)]
    pub comments: Vec<CommentWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentWire {
    pub id: Option<Value>,
    pub author: Option<AuthorWire>,
    pub updated: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthorWire {
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AttachmentWire {
    pub id: Option<Value>,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedIssueWire {
    pub key: String,
}

/// Jira ids arrive as strings, older deployments sometimes send numbers.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_owned()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Text of the first text node in the first paragraph, or a placeholder.
pub(crate) fn comment_text(body: Option<&Value>) -> String {
    match body {
        Some(Value::String(text)) => text.clone(),
        Some(document) => document
            .pointer("/content/0/content/0/text")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| UNREADABLE_COMMENT.to_owned()),
        None => UNREADABLE_COMMENT.to_owned(),
    }
}

pub(crate) fn issue_to_ticket(issue: IssueWire) -> TrackerTicket {
    let IssueWire { key, fields } = issue;
    let updated_at = fields.updated.as_deref().and_then(parse_timestamp);
    if updated_at.is_none() {
        warn!(tracker_key = %key, raw = ?fields.updated, "unreadable tracker update timestamp");
    }

    let comments = fields
        .comment
        .map(|page| page.comments)
        .unwrap_or_default()
        .into_iter()
        .map(|comment| TrackerComment {
            id: comment
                .id
                .as_ref()
                .and_then(id_string)
                .unwrap_or_default(),
            author: comment
                .author
                .and_then(|author| author.display_name)
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_TRACKER_USER.to_owned()),
            updated_at: comment.updated.as_deref().and_then(parse_timestamp),
            body: comment_text(comment.body.as_ref()),
        })
        .collect();

    let attachments = fields
        .attachment
        .into_iter()
        .filter_map(|attachment| {
            let Some(id) = attachment.id.as_ref().and_then(id_string) else {
                warn!(tracker_key = %key, file = %attachment.filename, "tracker attachment without id; ignoring");
                return None;
            };
            Some(RemoteAttachment {
                id,
                file_name: attachment.filename,
                content_url: attachment.content,
            })
        })
        .collect();

    TrackerTicket {
        created_at: fields.created.as_deref().and_then(parse_timestamp),
        updated_at,
        status_name: fields
            .status
            .and_then(|status| status.name)
            .unwrap_or_default(),
        priority: fields.priority.and_then(|priority| priority.name),
        comments,
        attachments,
        key,
    }
}

/// First element id of the attachment upload response array.
pub(crate) fn uploaded_attachment_id(payload: &Value) -> Option<String> {
    payload
        .as_array()?
        .first()?
        .get("id")
        .and_then(id_string)
}
