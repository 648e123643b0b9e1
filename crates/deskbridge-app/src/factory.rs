use std::sync::Arc;

use deskbridge_config::{FreshdeskCredentials, JiraCredentials};
use deskbridge_core::{CoreError, DeskClient, TrackerClient};
use integration_freshdesk::{FreshdeskConfig, FreshdeskDeskClient};
use integration_jira::{JiraConfig, JiraTrackerClient};

/// Builds remote clients from a tenant's credentials.
pub trait RemoteClientFactory: Send + Sync {
    fn tracker(&self, credentials: &JiraCredentials) -> Result<Arc<dyn TrackerClient>, CoreError>;
    fn desk(&self, credentials: &FreshdeskCredentials) -> Result<Arc<dyn DeskClient>, CoreError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpClientFactory;

impl RemoteClientFactory for HttpClientFactory {
    fn tracker(&self, credentials: &JiraCredentials) -> Result<Arc<dyn TrackerClient>, CoreError> {
        let mut config = JiraConfig::new(
            credentials.base_url.clone(),
            credentials.user_email.clone(),
            credentials.api_token.clone(),
            credentials.project_key.clone(),
        );
        config.request_timeout = credentials.request_timeout;
        Ok(Arc::new(JiraTrackerClient::new(config)?))
    }

    fn desk(&self, credentials: &FreshdeskCredentials) -> Result<Arc<dyn DeskClient>, CoreError> {
        let mut config = FreshdeskConfig::new(credentials.domain.clone(), credentials.api_key.clone());
        config.request_timeout = credentials.request_timeout;
        Ok(Arc::new(FreshdeskDeskClient::new(config)?))
    }
}
