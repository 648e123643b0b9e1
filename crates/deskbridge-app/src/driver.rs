use std::path::Path;
use std::sync::Arc;

use deskbridge_config::{load_tenant_config, TenantSettings, TENANT_CONFIG_FILE};
use deskbridge_core::{load_mapping, save_mapping, CoreError, CycleReport, ScratchDir, SyncEngine};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::factory::RemoteClientFactory;

pub const MAPPING_FILE: &str = "mapping.json";
pub const SCRATCH_DIR: &str = "temp_attachments";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantOutcome {
    Synced(CycleReport),
    /// No `config.json` in the tenant directory.
    Skipped,
    Failed(CoreError),
}

/// Runs one reconciliation cycle for one tenant directory.
#[derive(Clone)]
pub struct TenantDriver {
    factory: Arc<dyn RemoteClientFactory>,
}

impl TenantDriver {
    pub fn new(factory: Arc<dyn RemoteClientFactory>) -> Self {
        Self { factory }
    }

    pub async fn process(&self, tenant_dir: &Path) -> TenantOutcome {
        self.process_at(tenant_dir, OffsetDateTime::now_utc()).await
    }

    pub async fn process_at(&self, tenant_dir: &Path, now: OffsetDateTime) -> TenantOutcome {
        let tenant = tenant_name(tenant_dir);
        info!(tenant = %tenant, "processing tenant");

        match self.run(&tenant, tenant_dir, now).await {
            Ok(Some(report)) => {
                info!(
                    tenant = %tenant,
                    imported = report.tickets_imported,
                    comments_to_desk = report.comments_to_desk,
                    comments_to_tracker = report.comments_to_tracker,
                    attachments_to_desk = report.attachments_to_desk,
                    attachments_to_tracker = report.attachments_to_tracker,
                    statuses = report.statuses_pushed,
                    loop_guard_skips = report.loop_guard_skips,
                    failures = report.failures,
                    "tenant cycle finished"
                );
                TenantOutcome::Synced(report)
            }
            Ok(None) => {
                warn!(tenant = %tenant, file = TENANT_CONFIG_FILE, "tenant has no config file; skipping");
                TenantOutcome::Skipped
            }
            Err(err) => {
                error!(tenant = %tenant, error = %err, "tenant cycle failed");
                TenantOutcome::Failed(err)
            }
        }
    }

    async fn run(
        &self,
        tenant: &str,
        tenant_dir: &Path,
        now: OffsetDateTime,
    ) -> Result<Option<CycleReport>, CoreError> {
        let Some(loaded) = load_tenant_config(&tenant_dir.join(TENANT_CONFIG_FILE), now)? else {
            return Ok(None);
        };
        let settings = TenantSettings::from_file(tenant, &loaded.file)?;

        let mapping_path = tenant_dir.join(MAPPING_FILE);
        let table = load_mapping(&mapping_path);

        let tracker = self.factory.tracker(&settings.jira)?;
        let desk = self.factory.desk(&settings.freshdesk)?;
        let scratch = ScratchDir::create(tenant_dir.join(SCRATCH_DIR))?;

        let engine = SyncEngine::new(&settings.policy, tracker.as_ref(), desk.as_ref(), &scratch);
        let outcome = engine.run_cycle(table, now).await?;

        save_mapping(&mapping_path, &outcome.table)?;
        info!(tenant, pairs = outcome.table.len(), "mapping saved");
        Ok(Some(outcome.report))
    }
}

fn tenant_name(tenant_dir: &Path) -> String {
    tenant_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| tenant_dir.display().to_string())
}
