//! Tenant orchestration for the `deskbridge` binary.

mod batch;
mod driver;
mod factory;

pub use batch::{ensure_tenant_root, BatchRunner, BatchSummary};
pub use driver::{TenantDriver, TenantOutcome, MAPPING_FILE, SCRATCH_DIR};
pub use factory::{HttpClientFactory, RemoteClientFactory};
