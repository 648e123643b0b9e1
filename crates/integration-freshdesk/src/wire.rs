//! Freshdesk REST v2 payloads.

use deskbridge_core::text::parse_timestamp;
use deskbridge_core::{DeskConversation, DeskTicket, RemoteAttachment};
use serde::Deserialize;
use serde_json::{json, Value};
use time::Date;
use tracing::warn;

pub(crate) fn updated_since_param(since: Date) -> String {
    format!("{since}T00:00:00Z")
}

pub(crate) fn search_params(since: Date, company_id: Option<u64>, page: u32, per_page: u32) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("updated_since", updated_since_param(since)),
        ("order_by", "updated_at".to_owned()),
        ("order_type", "desc".to_owned()),
    ];
    if let Some(company_id) = company_id {
        params.push(("company_id", company_id.to_string()));
    }
    params.push(("page", page.to_string()));
    params.push(("per_page", per_page.to_string()));
    params
}

/// A page shorter than the requested size is the last one.
pub(crate) fn has_more_pages(received: usize, per_page: u32) -> bool {
    received > 0 && u32::try_from(received).is_ok_and(|received| received >= per_page)
}

pub(crate) fn private_note_payload(html_body: &str) -> Value {
    json!({ "body": html_body, "private": true })
}

pub(crate) fn status_payload(status_code: u8) -> Value {
    json!({ "status": status_code })
}

#[derive(Debug, Deserialize)]
pub(crate) struct AttachmentWire {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub attachment_url: String,
}

impl From<AttachmentWire> for RemoteAttachment {
    fn from(wire: AttachmentWire) -> Self {
        RemoteAttachment {
            id: wire.id.to_string(),
            file_name: wire.name,
            content_url: wire.attachment_url,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TicketWire {
    pub id: u64,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentWire>,
}

impl From<TicketWire> for DeskTicket {
    fn from(wire: TicketWire) -> Self {
        let updated_at = wire.updated_at.as_deref().and_then(parse_timestamp);
        if updated_at.is_none() {
            warn!(desk_id = wire.id, raw = ?wire.updated_at, "unreadable desk update timestamp");
        }
        DeskTicket {
            id: wire.id,
            subject: wire.subject,
            description_html: wire.description,
            priority: wire.priority,
            created_at: wire.created_at.as_deref().and_then(parse_timestamp),
            updated_at,
            attachments: wire.attachments.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConversationWire {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub body_text: Option<String>,
    /// Missing flag counts as private.
    #[serde(default = "default_private")]
    pub private: bool,
    pub user_id: Option<u64>,
    pub updated_at: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentWire>,
}

fn default_private() -> bool {
    true
}

impl From<ConversationWire> for DeskConversation {
    fn from(wire: ConversationWire) -> Self {
        DeskConversation {
            id: wire.id,
            updated_at: wire.updated_at.as_deref().and_then(parse_timestamp),
            body_html: wire.body.unwrap_or_default(),
            body_text: wire.body_text.unwrap_or_default(),
            private: wire.private,
            user_id: wire.user_id,
            attachments: wire.attachments.into_iter().map(Into::into).collect(),
        }
    }
}

/// Name from a contact (`{"name": ..}`) or agent (`{"contact": {"name": ..}}`) payload.
pub(crate) fn display_name(payload: &Value) -> Option<String> {
    payload
        .get("name")
        .or_else(|| payload.pointer("/contact/name"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
}
