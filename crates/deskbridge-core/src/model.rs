//! Service-neutral views of the tickets both remote clients return.
//!
//! Adapters are responsible for mapping their wire payloads into these types
//! and for degrading malformed fields to `None` or placeholders.

use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAttachment {
    pub id: String,
    pub file_name: String,
    pub content_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerComment {
    pub id: String,
    pub author: String,
    pub updated_at: Option<OffsetDateTime>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerTicket {
    pub key: String,
    pub created_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
    pub status_name: String,
    pub priority: Option<String>,
    pub comments: Vec<TrackerComment>,
    pub attachments: Vec<RemoteAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrackerTicket {
    pub summary: String,
    pub description: String,
    pub priority_name: String,
    pub issue_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTrackerTicket {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeskTicket {
    pub id: u64,
    pub subject: Option<String>,
    pub description_html: Option<String>,
    pub priority: Option<i64>,
    pub created_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
    pub attachments: Vec<RemoteAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeskConversation {
    pub id: u64,
    pub updated_at: Option<OffsetDateTime>,
    pub body_html: String,
    pub body_text: String,
    pub private: bool,
    pub user_id: Option<u64>,
    pub attachments: Vec<RemoteAttachment>,
}
