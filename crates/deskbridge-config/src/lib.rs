use deskbridge_core::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod tenant;

pub use tenant::{
    load_tenant_config, FreshdeskCredentials, JiraCredentials, LoadedTenantConfig,
    TenantConfigFile, TenantSettings, FIRST_RUN_TIMESTAMP_KEY, TENANT_CONFIG_FILE,
};

pub const ENV_DESKBRIDGE_CONFIG: &str = "DESKBRIDGE_CONFIG";

const DEFAULT_CLIENTS_ROOT: &str = "clients";
const DEFAULT_MAX_CONCURRENT_TENANTS: usize = 1;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
    #[error("required key {key} is missing or blank")]
    MissingKey { key: &'static str },
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl From<ConfigError> for CoreError {
    fn from(error: ConfigError) -> Self {
        CoreError::configuration(error.to_string())
    }
}

/// Process-wide settings read from the TOML file named by `DESKBRIDGE_CONFIG`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default = "default_clients_root")]
    pub clients_root: PathBuf,
    #[serde(default = "default_max_concurrent_tenants")]
    pub max_concurrent_tenants: usize,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            clients_root: default_clients_root(),
            max_concurrent_tenants: default_max_concurrent_tenants(),
            log_file: None,
            log_filter: default_log_filter(),
        }
    }
}

/// Reads the file named by `DESKBRIDGE_CONFIG`, or returns defaults when the
/// variable is unset or blank.
pub fn load_from_env() -> Result<AppConfig, ConfigError> {
    match config_path_from_env()? {
        Some(path) => load_from_path(path),
        None => Ok(AppConfig::default()),
    }
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to read DESKBRIDGE_CONFIG from {}: {err}",
            path.display()
        ))
    })?;

    let mut config: AppConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to parse DESKBRIDGE_CONFIG from {}: {err}",
            path.display()
        ))
    })?;
    normalize_app_config(&mut config);
    Ok(config)
}

fn config_path_from_env() -> Result<Option<PathBuf>, ConfigError> {
    match std::env::var(ENV_DESKBRIDGE_CONFIG) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => Ok(Some(raw.into())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(_) => Err(ConfigError::configuration(
            "DESKBRIDGE_CONFIG contained invalid UTF-8",
        )),
    }
}

fn default_clients_root() -> PathBuf {
    PathBuf::from(DEFAULT_CLIENTS_ROOT)
}

fn default_max_concurrent_tenants() -> usize {
    DEFAULT_MAX_CONCURRENT_TENANTS
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

fn normalize_app_config(config: &mut AppConfig) {
    if config.clients_root.as_os_str().is_empty() {
        config.clients_root = default_clients_root();
    }
    if config.max_concurrent_tenants == 0 {
        config.max_concurrent_tenants = DEFAULT_MAX_CONCURRENT_TENANTS;
    }
    if config.log_filter.trim().is_empty() {
        config.log_filter = default_log_filter();
    }
    if config
        .log_file
        .as_ref()
        .is_some_and(|path| path.as_os_str().is_empty())
    {
        config.log_file = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskbridge_core::test_support::{with_env_vars, TestDir};

    fn write_config_file(path: &Path, raw: &str) {
        std::fs::write(path, raw.as_bytes()).expect("write fixture config");
    }

    #[test]
    fn load_from_env_uses_defaults_when_unset() {
        let config = with_env_vars(&[(ENV_DESKBRIDGE_CONFIG, None)], || {
            load_from_env().expect("load defaults")
        });
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.clients_root, PathBuf::from("clients"));
        assert_eq!(config.max_concurrent_tenants, 1);
        assert_eq!(config.log_filter, "info");
        assert!(config.log_file.is_none());
    }

    #[test]
    fn load_from_env_treats_blank_path_as_unset() {
        let config = with_env_vars(&[(ENV_DESKBRIDGE_CONFIG, Some("   "))], || {
            load_from_env().expect("load defaults")
        });
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn load_from_env_honors_explicit_path() {
        let dir = TestDir::new("config-explicit");
        let path = dir.path().join("deskbridge.toml");
        write_config_file(
            &path,
            "clients_root = \"/srv/deskbridge/clients\"\nmax_concurrent_tenants = 4\nlog_file = \"/var/log/deskbridge.log\"\n",
        );

        let config = with_env_vars(
            &[(ENV_DESKBRIDGE_CONFIG, Some(path.to_str().expect("utf-8 path")))],
            || load_from_env().expect("load explicit config"),
        );

        assert_eq!(config.clients_root, PathBuf::from("/srv/deskbridge/clients"));
        assert_eq!(config.max_concurrent_tenants, 4);
        assert_eq!(config.log_file, Some(PathBuf::from("/var/log/deskbridge.log")));
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn load_from_path_normalizes_zero_concurrency_and_blank_values() {
        let dir = TestDir::new("config-normalize");
        let path = dir.path().join("deskbridge.toml");
        write_config_file(
            &path,
            "clients_root = \"\"\nmax_concurrent_tenants = 0\nlog_filter = \" \"\nlog_file = \"\"\n",
        );

        let config = load_from_path(&path).expect("load config");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn normalize_app_config_resets_blank_values_and_keeps_explicit_ones() {
        let mut config = AppConfig {
            clients_root: PathBuf::new(),
            max_concurrent_tenants: 0,
            log_file: Some(PathBuf::new()),
            log_filter: "  ".to_owned(),
        };
        normalize_app_config(&mut config);
        assert_eq!(config, AppConfig::default());

        let mut explicit = AppConfig {
            clients_root: PathBuf::from("/srv/tenants"),
            max_concurrent_tenants: 4,
            log_file: Some(PathBuf::from("/var/log/deskbridge.log")),
            log_filter: "debug".to_owned(),
        };
        let before = explicit.clone();
        normalize_app_config(&mut explicit);
        assert_eq!(explicit, before);
    }

    #[test]
    fn load_from_path_reports_missing_file() {
        let dir = TestDir::new("config-missing");
        let err = load_from_path(dir.path().join("absent.toml")).expect_err("missing file");
        assert!(err.to_string().contains("Failed to read DESKBRIDGE_CONFIG"));
    }

    #[test]
    fn load_from_path_returns_parse_error_for_invalid_toml() {
        let dir = TestDir::new("config-invalid");
        let path = dir.path().join("deskbridge.toml");
        write_config_file(&path, "max_concurrent_tenants = \"many\"\n");

        let err = load_from_path(&path).expect_err("invalid toml");
        assert!(err.to_string().contains("Failed to parse DESKBRIDGE_CONFIG"));
    }

    #[test]
    fn config_errors_become_core_configuration_errors() {
        let core: CoreError = ConfigError::MissingKey { key: "JIRA_URL" }.into();
        assert_eq!(
            core,
            CoreError::configuration("required key JIRA_URL is missing or blank")
        );
    }
}
