use anyhow::{Context, Result};
use deskbridge_app::{ensure_tenant_root, BatchRunner, HttpClientFactory, TenantDriver};
use deskbridge_config::AppConfig;
use std::process::ExitCode;
use std::sync::Arc;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

const BANNER_RULE: &str =
    "======================================================================";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let config = deskbridge_config::load_from_env()?;
    init_logging(&config)?;

    if let Err(error) = ensure_tenant_root(&config.clients_root) {
        tracing::error!(error = %error, "tenant root directory not found");
        eprintln!(
            "Tenant directory '{}' was not found. Create it and add one folder per tenant.",
            config.clients_root.display()
        );
        return Ok(ExitCode::from(1));
    }

    println!(
        "\n{BANNER_RULE}\nStarting synchronization run at {}\n{BANNER_RULE}",
        banner_stamp(OffsetDateTime::now_utc())
    );

    let driver = TenantDriver::new(Arc::new(HttpClientFactory));
    let runner = BatchRunner::new(driver, config.max_concurrent_tenants);
    let summary = match runner.run(&config.clients_root).await {
        Ok(summary) => summary,
        Err(error) => {
            tracing::error!(root = %config.clients_root.display(), error = %error, "cannot start batch");
            eprintln!("Could not list tenant directories: {error}");
            return Ok(ExitCode::from(1));
        }
    };

    println!(
        "\n{BANNER_RULE}\nSynchronization finished: {} synced, {} skipped, {} failed\n{BANNER_RULE}",
        summary.synced(),
        summary.skipped(),
        summary.failed()
    );
    Ok(ExitCode::SUCCESS)
}

fn banner_stamp(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second] UTC"
    ))
    .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(log_path) = &config.log_file else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(());
    };

    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create log directory '{}'", parent.display())
            })?;
        }
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("failed to open log file '{}'", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn banner_stamp_is_utc_wall_clock() {
        assert_eq!(
            banner_stamp(datetime!(2025-02-10 12:00:05 UTC)),
            "2025-02-10 12:00:05 UTC"
        );
    }
}
