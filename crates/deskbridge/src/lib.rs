//! Facade over the deskbridge workspace crates.

pub use deskbridge_app as app;
pub use deskbridge_config as config;
pub use deskbridge_core as core;
pub use integration_freshdesk as freshdesk;
pub use integration_jira as jira;
