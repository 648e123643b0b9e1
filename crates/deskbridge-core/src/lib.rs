pub mod client;
pub mod engine;
pub mod error;
pub mod loop_guard;
pub mod mapping;
pub mod model;
pub mod policy;
pub mod retry;
pub mod scratch;
pub mod store;
pub mod text;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use client::{DeskClient, TrackerClient};
pub use engine::{CycleOutcome, CycleReport, SyncEngine};
pub use error::CoreError;
pub use loop_guard::{DeskEntryKind, LoopGuard, LoopGuardMode};
pub use mapping::{AttachmentOrigin, MappingRecord, MappingTable};
pub use model::{
    CreatedTrackerTicket, DeskConversation, DeskTicket, NewTrackerTicket, RemoteAttachment,
    TrackerComment, TrackerTicket,
};
pub use policy::{PriorityMap, StatusMap, SyncPolicy, SyncToggles};
pub use retry::RetryPolicy;
pub use scratch::{ScratchDir, ScratchFile};
pub use store::{load_mapping, save_mapping};
