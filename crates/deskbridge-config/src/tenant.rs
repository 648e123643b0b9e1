//! Per-tenant `config.json`: one flat JSON object with upper-case keys.
//!
//! The file is owned by whoever provisions the tenant. The only write this
//! module ever makes is recording `FIRST_RUN_TIMESTAMP` on the first load,
//! which keeps every other key and value intact.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use deskbridge_core::text::{format_timestamp, parse_timestamp};
use deskbridge_core::{LoopGuardMode, PriorityMap, RetryPolicy, StatusMap, SyncPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::ConfigError;

pub const TENANT_CONFIG_FILE: &str = "config.json";
pub const FIRST_RUN_TIMESTAMP_KEY: &str = "FIRST_RUN_TIMESTAMP";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Raw view of `config.json`. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TenantConfigFile {
    pub jira_url: Option<String>,
    pub jira_user_email: Option<String>,
    pub jira_api_token: Option<String>,
    pub jira_project_key: Option<String>,
    pub jira_default_issue_type: Option<String>,
    pub freshdesk_domain: Option<String>,
    pub freshdesk_api_key: Option<String>,
    /// Number, numeric string, or null.
    pub freshdesk_company_id: Option<Value>,
    pub sync_comments_jira_to_freshdesk: Option<bool>,
    pub sync_attachments_jira_to_freshdesk: Option<bool>,
    pub sync_status_jira_to_freshdesk: Option<bool>,
    pub sync_comments_freshdesk_to_jira: Option<bool>,
    pub sync_attachments_freshdesk_to_jira: Option<bool>,
    pub sync_days_ago: Option<u32>,
    pub first_run_timestamp: Option<String>,
    pub freshdesk_to_jira_priority: Option<BTreeMap<String, String>>,
    pub jira_to_freshdesk_status: Option<BTreeMap<String, u8>>,
    pub loop_guard_mode: Option<LoopGuardMode>,
    pub retry_max_attempts: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedTenantConfig {
    pub file: TenantConfigFile,
    /// True when this load recorded `FIRST_RUN_TIMESTAMP` for the first time.
    pub cutoff_recorded: bool,
}

/// Loads `config.json`, recording `now` as the import cutoff when the file has
/// none yet. Returns `Ok(None)` when the file does not exist.
pub fn load_tenant_config(
    path: &Path,
    now: OffsetDateTime,
) -> Result<Option<LoadedTenantConfig>, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(ConfigError::configuration(format!(
                "Failed to read tenant config from {}: {err}",
                path.display()
            )));
        }
    };

    let mut document: Map<String, Value> = serde_json::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to parse tenant config from {}: {err}",
            path.display()
        ))
    })?;

    let cutoff_recorded = !document.contains_key(FIRST_RUN_TIMESTAMP_KEY);
    if cutoff_recorded {
        let stamp = format_timestamp(now);
        info!(path = %path.display(), cutoff = %stamp, "first run detected; recording import cutoff");
        document.insert(FIRST_RUN_TIMESTAMP_KEY.to_owned(), Value::String(stamp));
        persist_document(path, &document)?;
    }

    let file = serde_json::from_value(Value::Object(document)).map_err(|err| {
        ConfigError::configuration(format!(
            "Invalid tenant config in {}: {err}",
            path.display()
        ))
    })?;
    Ok(Some(LoadedTenantConfig {
        file,
        cutoff_recorded,
    }))
}

fn persist_document(path: &Path, document: &Map<String, Value>) -> Result<(), ConfigError> {
    let mut rendered = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut rendered, formatter);
    document.serialize(&mut serializer).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to serialize tenant config for {}: {err}",
            path.display()
        ))
    })?;
    rendered.push(b'\n');

    std::fs::write(path, rendered).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to write tenant config to {}: {err}",
            path.display()
        ))
    })
}

#[derive(Clone, PartialEq, Eq)]
pub struct JiraCredentials {
    pub base_url: String,
    pub user_email: String,
    pub api_token: String,
    pub project_key: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for JiraCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JiraCredentials")
            .field("base_url", &self.base_url)
            .field("user_email", &self.user_email)
            .field("api_token", &"<redacted>")
            .field("project_key", &self.project_key)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct FreshdeskCredentials {
    /// Subdomain only: `acme` for `https://acme.freshdesk.com`.
    pub domain: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for FreshdeskCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreshdeskCredentials")
            .field("domain", &self.domain)
            .field("api_key", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Validated tenant configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSettings {
    pub jira: JiraCredentials,
    pub freshdesk: FreshdeskCredentials,
    pub policy: SyncPolicy,
}

impl TenantSettings {
    pub fn from_file(tenant: &str, file: &TenantConfigFile) -> Result<Self, ConfigError> {
        let request_timeout = Duration::from_secs(
            file.request_timeout_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        );

        let jira = JiraCredentials {
            base_url: required(&file.jira_url, "JIRA_URL")?
                .trim_end_matches('/')
                .to_owned(),
            user_email: required(&file.jira_user_email, "JIRA_USER_EMAIL")?,
            api_token: required(&file.jira_api_token, "JIRA_API_TOKEN")?,
            project_key: required(&file.jira_project_key, "JIRA_PROJECT_KEY")?,
            request_timeout,
        };
        let freshdesk = FreshdeskCredentials {
            domain: required(&file.freshdesk_domain, "FRESHDESK_DOMAIN")?,
            api_key: required(&file.freshdesk_api_key, "FRESHDESK_API_KEY")?,
            request_timeout,
        };

        let first_run_cutoff = match file.first_run_timestamp.as_deref() {
            Some(raw) => {
                let parsed = parse_timestamp(raw);
                if parsed.is_none() {
                    warn!(tenant, value = raw, "FIRST_RUN_TIMESTAMP is not a valid timestamp; new tickets will not be imported");
                }
                parsed
            }
            None => None,
        };

        let mut policy = SyncPolicy::new(tenant, first_run_cutoff);
        if let Some(days) = file.sync_days_ago {
            policy.lookback_days = days;
        }
        policy.desk_company_id = parse_company_id(tenant, file.freshdesk_company_id.as_ref());
        if let Some(issue_type) = optional(&file.jira_default_issue_type) {
            policy.default_issue_type = issue_type;
        }

        let toggles = &mut policy.toggles;
        apply_toggle(&mut toggles.tracker_to_desk_comments, file.sync_comments_jira_to_freshdesk);
        apply_toggle(&mut toggles.tracker_to_desk_attachments, file.sync_attachments_jira_to_freshdesk);
        apply_toggle(&mut toggles.tracker_to_desk_status, file.sync_status_jira_to_freshdesk);
        apply_toggle(&mut toggles.desk_to_tracker_comments, file.sync_comments_freshdesk_to_jira);
        apply_toggle(&mut toggles.desk_to_tracker_attachments, file.sync_attachments_freshdesk_to_jira);

        if let Some(priorities) = &file.freshdesk_to_jira_priority {
            policy.priority_map = PriorityMap::new(priorities.clone());
        }
        if let Some(statuses) = &file.jira_to_freshdesk_status {
            policy.status_map = StatusMap::new(statuses.clone());
        }
        if let Some(mode) = file.loop_guard_mode {
            policy.loop_guard = mode;
        }
        policy.retry = RetryPolicy::new(
            file.retry_max_attempts.unwrap_or(1),
            Duration::from_millis(file.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS)),
        );

        Ok(Self {
            jira,
            freshdesk,
            policy,
        })
    }
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn required(value: &Option<String>, key: &'static str) -> Result<String, ConfigError> {
    optional(value).ok_or(ConfigError::MissingKey { key })
}

fn apply_toggle(target: &mut bool, value: Option<bool>) {
    if let Some(value) = value {
        *target = value;
    }
}

// Zero, blank and null all mean "no company filter".
fn parse_company_id(tenant: &str, value: Option<&Value>) -> Option<u64> {
    let value = value?;
    let parsed = match value {
        Value::Null => return None,
        Value::Number(number) => number.as_u64(),
        Value::String(raw) if raw.trim().is_empty() => return None,
        Value::String(raw) => raw.trim().parse::<u64>().ok(),
        _ => None,
    };
    match parsed {
        Some(0) => None,
        Some(id) => Some(id),
        None => {
            warn!(tenant, value = %value, "FRESHDESK_COMPANY_ID is not a valid number; company filter ignored");
            None
        }
    }
}
