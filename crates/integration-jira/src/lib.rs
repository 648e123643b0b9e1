use async_trait::async_trait;
use deskbridge_core::text::truncate_for_error;
use deskbridge_core::{CoreError, CreatedTrackerTicket, NewTrackerTicket, TrackerClient, TrackerTicket};
use reqwest::{header, multipart, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use time::Date;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

mod wire;

use wire::{CreatedIssueWire, SearchPage};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_SEARCH_PAGES: usize = 200;

#[derive(Clone)]
pub struct JiraConfig {
    /// Site root such as `https://acme.atlassian.net`.
    pub base_url: String,
    pub user_email: String,
    pub api_token: String,
    pub project_key: String,
    pub request_timeout: Duration,
    pub page_size: u32,
}

impl fmt::Debug for JiraConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("JiraConfig")
            .field("base_url", &self.base_url)
            .field("user_email", &self.user_email)
            .field("api_token", &"<redacted>")
            .field("project_key", &self.project_key)
            .field("request_timeout", &self.request_timeout)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl JiraConfig {
    pub fn new(
        base_url: impl Into<String>,
        user_email: impl Into<String>,
        api_token: impl Into<String>,
        project_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            user_email: user_email.into(),
            api_token: api_token.into(),
            project_key: project_key.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// `TrackerClient` backed by the Jira Cloud REST API (v3).
#[derive(Clone)]
pub struct JiraTrackerClient {
    config: JiraConfig,
    client: Client,
}

impl fmt::Debug for JiraTrackerClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("JiraTrackerClient")
            .field("config", &self.config)
            .finish()
    }
}

impl JiraTrackerClient {
    pub fn new(config: JiraConfig) -> Result<Self, CoreError> {
        if config.base_url.trim().is_empty() || config.project_key.trim().is_empty() {
            return Err(CoreError::configuration(
                "Jira base URL and project key must be non-empty.",
            ));
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder()
            .user_agent("deskbridge/integration-jira")
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| {
                CoreError::configuration(format!("failed to build Jira HTTP client: {error}"))
            })?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let suffix = path.trim_start_matches('/');
        format!("{base}/{suffix}")
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.config.user_email, Some(&self.config.api_token))
    }

    async fn request_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CoreError> {
        let response = self.authorized(request).send().await.map_err(|error| {
            CoreError::dependency_unavailable(format!("Jira API request failed: {error}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::for_http_status(
                status.as_u16(),
                format!(
                    "Jira API request failed with status {status}: {}",
                    truncate_for_error(&body)
                ),
            ));
        }

        // The call was accepted; anything unreadable past this point is final.
        let body = response.text().await.map_err(|error| {
            CoreError::remote_rejected(format!("Jira API response read failed: {error}"))
        })?;

        serde_json::from_str(&body).map_err(|error| {
            CoreError::remote_rejected(format!(
                "Jira API response was malformed JSON: {error}"
            ))
        })
    }

    async fn fetch_search_page(&self, jql: &str, start_at: u32) -> Result<SearchPage, CoreError> {
        let request = self.client.get(self.endpoint("rest/api/3/search")).query(&[
            ("jql", jql.to_owned()),
            ("fields", wire::SEARCH_FIELDS.to_owned()),
            ("startAt", start_at.to_string()),
            ("maxResults", self.config.page_size.max(1).to_string()),
        ]);
        self.request_json(request).await
    }
}

#[async_trait]
impl TrackerClient for JiraTrackerClient {
    async fn search_updated_since(&self, since: Date) -> Result<Vec<TrackerTicket>, CoreError> {
        let jql = wire::search_jql(&self.config.project_key, since);
        let mut tickets = Vec::new();
        let mut start_at = 0;

        for _ in 0..MAX_SEARCH_PAGES {
            let page = self.fetch_search_page(&jql, start_at).await?;
            let next = page.next_start_at();
            tickets.extend(page.issues.into_iter().map(wire::issue_to_ticket));
            match next {
                Some(offset) => start_at = offset,
                None => break,
            }
        }

        debug!(project = %self.config.project_key, %since, count = tickets.len(), "fetched updated tracker tickets");
        Ok(tickets)
    }

    async fn create_ticket(
        &self,
        request: NewTrackerTicket,
    ) -> Result<CreatedTrackerTicket, CoreError> {
        let payload = wire::create_issue_payload(&self.config.project_key, &request);
        let created: CreatedIssueWire = self
            .request_json(
                self.client
                    .post(self.endpoint("rest/api/3/issue"))
                    .json(&payload),
            )
            .await?;
        info!(tracker_key = %created.key, "created tracker ticket");
        Ok(CreatedTrackerTicket { key: created.key })
    }

    async fn add_comment(&self, ticket_key: &str, text: &str) -> Result<(), CoreError> {
        let request = self
            .client
            .post(self.endpoint(&format!("rest/api/3/issue/{ticket_key}/comment")))
            .json(&wire::comment_payload(text));
        let _: Value = self.request_json(request).await?;
        Ok(())
    }

    async fn add_attachment(
        &self,
        ticket_key: &str,
        path: &Path,
        file_name: &str,
    ) -> Result<String, CoreError> {
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

        let request = self
            .client
            .post(self.endpoint(&format!("rest/api/3/issue/{ticket_key}/attachments")))
            .header("X-Atlassian-Token", "no-check")
            .multipart(multipart::Form::new().part("file", part));
        let payload: Value = self.request_json(request).await?;

        wire::uploaded_attachment_id(&payload).ok_or_else(|| {
            CoreError::dependency_unavailable(format!(
                "Jira attachment upload for {ticket_key} returned no attachment id"
            ))
        })
    }

    async fn download_attachment(&self, url: &str, destination: &Path) -> Result<u64, CoreError> {
        let mut response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|error| {
                CoreError::dependency_unavailable(format!("Jira attachment download failed: {error}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::for_http_status(
                status.as_u16(),
                format!("Jira attachment download failed with status {status}"),
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
            CoreError::dependency_unavailable(format!("Jira attachment stream failed: {error}"))
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

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JiraConfig {
        JiraConfig::new("https://acme.atlassian.net/", "bot@acme.test", "secret-token", "SUP")
    }

    #[test]
    fn endpoint_joins_base_url_and_path() {
        let client = JiraTrackerClient::new(config()).expect("client");
        assert_eq!(
            client.endpoint("/rest/api/3/issue/SUP-1/comment"),
            "https://acme.atlassian.net/rest/api/3/issue/SUP-1/comment"
        );
    }

    #[test]
    fn new_rejects_missing_project_key() {
        let mut config = config();
        config.project_key = " ".to_owned();
        let err = JiraTrackerClient::new(config).expect_err("blank project");
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn debug_output_redacts_token() {
        let client = JiraTrackerClient::new(config()).expect("client");
        let rendered = format!("{client:?}");
        assert!(rendered.contains("bot@acme.test"));
        assert!(!rendered.contains("secret-token"));
    }

    #[test]
    fn defaults_use_thirty_second_timeout_and_fifty_item_pages() {
        let config = config();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.page_size, 50);
    }
}
