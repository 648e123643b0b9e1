use std::path::{Path, PathBuf};

use deskbridge_core::CoreError;
use futures_util::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::driver::{TenantDriver, TenantOutcome};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Tenant name and outcome, in tenant name order.
    pub outcomes: Vec<(String, TenantOutcome)>,
}

impl BatchSummary {
    pub fn synced(&self) -> usize {
        self.count(|outcome| matches!(outcome, TenantOutcome::Synced(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, TenantOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, TenantOutcome::Failed(_)))
    }

    fn count(&self, predicate: impl Fn(&TenantOutcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| predicate(outcome))
            .count()
    }
}

/// Processes every tenant directory under a root, isolating failures per tenant.
pub struct BatchRunner {
    driver: TenantDriver,
    max_concurrent_tenants: usize,
}

impl BatchRunner {
    pub fn new(driver: TenantDriver, max_concurrent_tenants: usize) -> Self {
        Self {
            driver,
            max_concurrent_tenants: max_concurrent_tenants.max(1),
        }
    }

    /// Fails only when `root` cannot be listed.
    pub async fn run(&self, root: &Path) -> Result<BatchSummary, CoreError> {
        let tenants = tenant_dirs(root)?;
        if tenants.is_empty() {
            warn!(root = %root.display(), "no tenant directories found");
            return Ok(BatchSummary::default());
        }
        info!(root = %root.display(), tenants = tenants.len(), concurrency = self.max_concurrent_tenants, "starting batch");

        let outcomes = stream::iter(tenants)
            .map(|dir| {
                let driver = self.driver.clone();
                async move {
                    let name = dir
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let task_dir = dir.clone();
                    let outcome = match tokio::spawn(async move { driver.process(&task_dir).await }).await {
                        Ok(outcome) => outcome,
                        Err(join_error) => {
                            error!(tenant = %name, error = %join_error, "tenant task panicked or was cancelled");
                            TenantOutcome::Failed(CoreError::dependency_unavailable(format!(
                                "tenant task aborted: {join_error}"
                            )))
                        }
                    };
                    (name, outcome)
                }
            })
            .buffered(self.max_concurrent_tenants)
            .collect::<Vec<_>>()
            .await;

        let summary = BatchSummary { outcomes };
        info!(
            synced = summary.synced(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "batch finished"
        );
        Ok(summary)
    }
}

/// Fails with a configuration error when `root` is not an existing directory.
pub fn ensure_tenant_root(root: &Path) -> Result<(), CoreError> {
    if root.is_dir() {
        return Ok(());
    }
    Err(CoreError::configuration(format!(
        "tenant root directory {} does not exist",
        root.display()
    )))
}

fn tenant_dirs(root: &Path) -> Result<Vec<PathBuf>, CoreError> {
    ensure_tenant_root(root)?;
    let entries = std::fs::read_dir(root).map_err(|err| {
        CoreError::configuration(format!(
            "failed to list tenant root {}: {err}",
            root.display()
        ))
    })?;

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}
