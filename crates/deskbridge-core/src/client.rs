use std::path::Path;

use async_trait::async_trait;
use time::Date;

use crate::error::CoreError;
use crate::model::{
    CreatedTrackerTicket, DeskConversation, DeskTicket, NewTrackerTicket, TrackerTicket,
};

/// Issue-tracker side of a tenant link.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    async fn search_updated_since(&self, since: Date) -> Result<Vec<TrackerTicket>, CoreError>;

    async fn create_ticket(
        &self,
        request: NewTrackerTicket,
    ) -> Result<CreatedTrackerTicket, CoreError>;

    async fn add_comment(&self, ticket_key: &str, text: &str) -> Result<(), CoreError>;

    /// Uploads `path` under `file_name` and returns the tracker's attachment id.
    async fn add_attachment(
        &self,
        ticket_key: &str,
        path: &Path,
        file_name: &str,
    ) -> Result<String, CoreError>;

    /// Streams `url` into `destination`, returning the number of bytes written.
    async fn download_attachment(&self, url: &str, destination: &Path) -> Result<u64, CoreError>;
}

/// Helpdesk side of a tenant link.
#[async_trait]
pub trait DeskClient: Send + Sync {
    async fn search_updated_since(
        &self,
        since: Date,
        company_id: Option<u64>,
    ) -> Result<Vec<DeskTicket>, CoreError>;

    async fn get_full_ticket(&self, ticket_id: u64) -> Result<DeskTicket, CoreError>;

    async fn get_conversations(&self, ticket_id: u64) -> Result<Vec<DeskConversation>, CoreError>;

    async fn add_private_note(&self, ticket_id: u64, html_body: &str) -> Result<(), CoreError>;

    async fn add_attachment_note(
        &self,
        ticket_id: u64,
        path: &Path,
        file_name: &str,
        body: &str,
    ) -> Result<(), CoreError>;

    async fn update_status(&self, ticket_id: u64, status_code: u8) -> Result<(), CoreError>;

    async fn user_display_name(&self, user_id: u64) -> Result<String, CoreError>;

    async fn download_attachment(&self, url: &str, destination: &Path) -> Result<u64, CoreError>;
}
