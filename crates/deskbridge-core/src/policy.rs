//! Engine-facing view of one tenant's sync settings.

use std::collections::BTreeMap;

use time::OffsetDateTime;

use crate::loop_guard::LoopGuardMode;
use crate::retry::RetryPolicy;

pub const DEFAULT_LOOKBACK_DAYS: u32 = 1;
pub const DEFAULT_ISSUE_TYPE: &str = "Task";
pub const DEFAULT_TRACKER_PRIORITY: &str = "Medium";
/// Desk priority code assumed when a ticket does not report one ("Medium").
pub const DEFAULT_DESK_PRIORITY_CODE: i64 = 2;

const DEFAULT_STATUS_TABLE: &[(&str, u8)] = &[
    ("Done", 4),
    ("Concluído", 4),
    ("Resolved", 4),
    ("Closed", 5),
    ("Fechado", 5),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncToggles {
    pub tracker_to_desk_comments: bool,
    pub tracker_to_desk_attachments: bool,
    pub tracker_to_desk_status: bool,
    pub desk_to_tracker_comments: bool,
    pub desk_to_tracker_attachments: bool,
}

impl Default for SyncToggles {
    fn default() -> Self {
        Self {
            tracker_to_desk_comments: true,
            tracker_to_desk_attachments: true,
            tracker_to_desk_status: false,
            desk_to_tracker_comments: true,
            desk_to_tracker_attachments: true,
        }
    }
}

/// Tracker status name (case-sensitive) → desk status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMap {
    entries: BTreeMap<String, u8>,
}

impl Default for StatusMap {
    fn default() -> Self {
        Self {
            entries: DEFAULT_STATUS_TABLE
                .iter()
                .map(|(name, code)| ((*name).to_owned(), *code))
                .collect(),
        }
    }
}

impl StatusMap {
    pub fn new(entries: BTreeMap<String, u8>) -> Self {
        Self { entries }
    }

    pub fn desk_code_for(&self, tracker_status: &str) -> Option<u8> {
        self.entries.get(tracker_status).copied()
    }
}

/// Desk numeric priority code (as a string) → tracker priority name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorityMap {
    entries: BTreeMap<String, String>,
}

impl PriorityMap {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn tracker_priority_for(&self, desk_priority: Option<i64>) -> String {
        let code = desk_priority.unwrap_or(DEFAULT_DESK_PRIORITY_CODE).to_string();
        self.entries
            .get(&code)
            .cloned()
            .unwrap_or_else(|| DEFAULT_TRACKER_PRIORITY.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicy {
    pub tenant: String,
    pub lookback_days: u32,
    pub first_run_cutoff: Option<OffsetDateTime>,
    pub desk_company_id: Option<u64>,
    pub default_issue_type: String,
    pub toggles: SyncToggles,
    pub status_map: StatusMap,
    pub priority_map: PriorityMap,
    pub loop_guard: LoopGuardMode,
    pub retry: RetryPolicy,
}

impl SyncPolicy {
    pub fn new(tenant: impl Into<String>, first_run_cutoff: Option<OffsetDateTime>) -> Self {
        Self {
            tenant: tenant.into(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            first_run_cutoff,
            desk_company_id: None,
            default_issue_type: DEFAULT_ISSUE_TYPE.to_owned(),
            toggles: SyncToggles::default(),
            status_map: StatusMap::default(),
            priority_map: PriorityMap::default(),
            loop_guard: LoopGuardMode::default(),
            retry: RetryPolicy::default(),
        }
    }
}
