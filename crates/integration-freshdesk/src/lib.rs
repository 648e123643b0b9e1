use async_trait::async_trait;
use deskbridge_core::text::truncate_for_error;
use deskbridge_core::{CoreError, DeskClient, DeskConversation, DeskTicket};
use reqwest::{header, multipart, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use time::Date;
use tokio::io::AsyncWriteExt;
use tracing::debug;

mod wire;

use wire::{ConversationWire, TicketWire};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PAGE_SIZE: u32 = 100;
const MAX_PAGES: u32 = 300;
// Freshdesk's API key is the basic-auth user; the password is ignored.
const API_KEY_PASSWORD: &str = "X";

#[derive(Clone)]
pub struct FreshdeskConfig {
    /// Account subdomain: `acme` for `https://acme.freshdesk.com`.
    pub domain: String,
    pub api_key: String,
    pub request_timeout: Duration,
    pub page_size: u32,
}

impl fmt::Debug for FreshdeskConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FreshdeskConfig")
            .field("domain", &self.domain)
            .field("api_key", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl FreshdeskConfig {
    pub fn new(domain: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn api_base(&self) -> String {
        format!("https://{}.freshdesk.com/api/v2", self.domain.trim())
    }
}

/// `DeskClient` backed by the Freshdesk REST API (v2).
#[derive(Clone)]
pub struct FreshdeskDeskClient {
    config: FreshdeskConfig,
    client: Client,
}

impl fmt::Debug for FreshdeskDeskClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FreshdeskDeskClient")
            .field("config", &self.config)
            .finish()
    }
}

impl FreshdeskDeskClient {
    pub fn new(config: FreshdeskConfig) -> Result<Self, CoreError> {
        let domain = config.domain.trim();
        if domain.is_empty() || domain.contains(['/', ':', '.']) {
            return Err(CoreError::configuration(format!(
                "Freshdesk domain must be the bare account subdomain, got {:?}",
                config.domain
            )));
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder()
            .user_agent("deskbridge/integration-freshdesk")
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| {
                CoreError::configuration(format!("failed to build Freshdesk HTTP client: {error}"))
            })?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base(), path.trim_start_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.config.api_key, Some(API_KEY_PASSWORD))
    }

    async fn request_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CoreError> {
        let response = self.authorized(request).send().await.map_err(|error| {
            CoreError::dependency_unavailable(format!("Freshdesk API request failed: {error}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::for_http_status(
                status.as_u16(),
                format!(
                    "Freshdesk API request failed with status {status}: {}",
                    truncate_for_error(&body)
                ),
            ));
        }

        // The call was accepted; anything unreadable past this point is final.
        let body = response.text().await.map_err(|error| {
            CoreError::remote_rejected(format!("Freshdesk API response read failed: {error}"))
        })?;

        // Some write endpoints answer 201/204 without a body.
        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        serde_json::from_str(body).map_err(|error| {
            CoreError::remote_rejected(format!(
                "Freshdesk API response was malformed JSON: {error}"
            ))
        })
    }

    async fn fetch_pages<T: DeserializeOwned>(
        &self,
        path: &str,
        params: impl Fn(u32) -> Vec<(&'static str, String)>,
    ) -> Result<Vec<T>, CoreError> {
        let per_page = self.config.page_size.max(1);
        let mut items = Vec::new();
        for page in 1..=MAX_PAGES {
            let batch: Vec<T> = self
                .request_json(self.client.get(self.endpoint(path)).query(&params(page)))
                .await?;
            let received = batch.len();
            items.extend(batch);
            if !wire::has_more_pages(received, per_page) {
                break;
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl DeskClient for FreshdeskDeskClient {
    async fn search_updated_since(
        &self,
        since: Date,
        company_id: Option<u64>,
    ) -> Result<Vec<DeskTicket>, CoreError> {
        let per_page = self.config.page_size.max(1);
        let tickets: Vec<TicketWire> = self
            .fetch_pages("tickets", |page| {
                wire::search_params(since, company_id, page, per_page)
            })
            .await?;
        debug!(domain = %self.config.domain, %since, ?company_id, count = tickets.len(), "fetched updated desk tickets");
        Ok(tickets.into_iter().map(DeskTicket::from).collect())
    }

    async fn get_full_ticket(&self, ticket_id: u64) -> Result<DeskTicket, CoreError> {
        let ticket: TicketWire = self
            .request_json(self.client.get(self.endpoint(&format!("tickets/{ticket_id}"))))
            .await?;
        Ok(ticket.into())
    }

    async fn get_conversations(&self, ticket_id: u64) -> Result<Vec<DeskConversation>, CoreError> {
        let per_page = self.config.page_size.max(1);
        let conversations: Vec<ConversationWire> = self
            .fetch_pages(&format!("tickets/{ticket_id}/conversations"), |page| {
                vec![("page", page.to_string()), ("per_page", per_page.to_string())]
            })
            .await?;
        Ok(conversations.into_iter().map(DeskConversation::from).collect())
    }

    async fn add_private_note(&self, ticket_id: u64, html_body: &str) -> Result<(), CoreError> {
        let request = self
            .client
            .post(self.endpoint(&format!("tickets/{ticket_id}/notes")))
            .json(&wire::private_note_payload(html_body));
        let _: Value = self.request_json(request).await?;
        Ok(())
    }

    async fn add_attachment_note(
        &self,
        ticket_id: u64,
        path: &Path,
        file_name: &str,
        body: &str,
    ) -> Result<(), CoreError> {
        let bytes = tokio::fs::read(path).await.map_err(|error| {
            CoreError::dependency_unavailable(format!(
                "failed to read attachment {}: {error}",
                path.display()
            ))
        })?;
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_owned())
            .mime_str("application/octet-stream")
            .map_err(|error| {
                CoreError::dependency_unavailable(format!("invalid attachment part: {error}"))
            })?;
        let form = multipart::Form::new()
            .text("body", body.to_owned())
            .text("private", "true")
            .part("attachments[]", part);

        let request = self
            .client
            .post(self.endpoint(&format!("tickets/{ticket_id}/notes")))
            .multipart(form);
        let _: Value = self.request_json(request).await?;
        Ok(())
    }

    async fn update_status(&self, ticket_id: u64, status_code: u8) -> Result<(), CoreError> {
        let request = self
            .client
            .put(self.endpoint(&format!("tickets/{ticket_id}")))
            .json(&wire::status_payload(status_code));
        let _: Value = self.request_json(request).await?;
        Ok(())
    }

    async fn user_display_name(&self, user_id: u64) -> Result<String, CoreError> {
        // Conversation authors are either requesters (contacts) or agents.
        let contact: Result<Value, CoreError> = self
            .request_json(self.client.get(self.endpoint(&format!("contacts/{user_id}"))))
            .await;
        let payload = match contact {
            Ok(payload) => payload,
            Err(contact_error) => {
                debug!(user_id, error = %contact_error, "desk contact lookup failed; trying agents");
                self.request_json(self.client.get(self.endpoint(&format!("agents/{user_id}"))))
                    .await?
            }
        };

        wire::display_name(&payload).ok_or_else(|| {
            CoreError::dependency_unavailable(format!("desk user {user_id} has no display name"))
        })
    }

    async fn download_attachment(&self, url: &str, destination: &Path) -> Result<u64, CoreError> {
        // Attachment URLs are pre-signed; adding credentials makes the storage host reject them.
        let mut response = self.client.get(url).send().await.map_err(|error| {
            CoreError::dependency_unavailable(format!("desk attachment download failed: {error}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::for_http_status(
                status.as_u16(),
                format!("desk attachment download failed with status {status}"),
            ));
        }

        let mut file = tokio::fs::File::create(destination).await.map_err(|error| {
            CoreError::dependency_unavailable(format!(
                "failed to create {}: {error}",
                destination.display()
            ))
        })?;
        let mut written = 0_u64;
        while let Some(chunk) = response.chunk().await.map_err(|error| {
            CoreError::dependency_unavailable(format!("desk attachment stream failed: {error}"))
        })? {
            file.write_all(&chunk).await.map_err(|error| {
                CoreError::dependency_unavailable(format!(
                    "failed to write {}: {error}",
                    destination.display()
                ))
            })?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|error| {
            CoreError::dependency_unavailable(format!(
                "failed to flush {}: {error}",
                destination.display()
            ))
        })?;
        Ok(written)
    }
}
