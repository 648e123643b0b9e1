use std::collections::BTreeMap;

use deskbridge_core::loop_guard::{DESK_COMMENT_MARKER, TRACKER_COMMENT_MARKER, UNKNOWN_DESK_USER};
use deskbridge_core::test_support::{
    attachment, desk_conversation, desk_ticket, tracker_comment, tracker_ticket, StubDesk,
    StubTracker, TestDir,
};
use deskbridge_core::{
    CoreError, MappingRecord, MappingTable, PriorityMap, ScratchDir, SyncEngine, SyncPolicy,
};
use time::macros::{date, datetime};
use time::OffsetDateTime;

const CUTOFF: OffsetDateTime = datetime!(2025-01-01 00:00:00 UTC);
const NOW: OffsetDateTime = datetime!(2025-02-10 12:00:00 UTC);

fn policy() -> SyncPolicy {
    let mut policy = SyncPolicy::new("acme", Some(CUTOFF));
    policy.priority_map = PriorityMap::new(BTreeMap::from([("3".to_owned(), "High".to_owned())]));
    policy.toggles.tracker_to_desk_status = true;
    policy
}

struct Harness {
    _dir: TestDir,
    scratch: ScratchDir,
    policy: SyncPolicy,
    tracker: StubTracker,
    desk: StubDesk,
}

impl Harness {
    fn new(label: &str) -> Self {
        let dir = TestDir::new(label);
        let scratch = ScratchDir::create(dir.path().join("temp_attachments")).expect("scratch");
        Self {
            _dir: dir,
            scratch,
            policy: policy(),
            tracker: StubTracker::default(),
            desk: StubDesk::default(),
        }
    }

    async fn cycle(&self, table: MappingTable, now: OffsetDateTime) -> deskbridge_core::CycleOutcome {
        SyncEngine::new(&self.policy, &self.tracker, &self.desk, &self.scratch)
            .run_cycle(table, now)
            .await
            .expect("cycle succeeds")
    }

    fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.scratch.path())
            .expect("read scratch dir")
            .next()
            .is_none()
    }
}

fn mapped(key: &str, desk_id: u64, tracker_sync: OffsetDateTime, desk_sync: OffsetDateTime) -> MappingTable {
    let mut table = MappingTable::new();
    let mut record = MappingRecord::new(desk_id, tracker_sync);
    record.last_desk_sync = Some(desk_sync);
    table.insert(key, record).expect("insert mapping");
    table
}

#[tokio::test]
async fn new_desk_ticket_after_cutoff_creates_tracker_ticket_and_mapping() {
    let harness = Harness::new("cycle-import");
    harness.desk.set_tickets(vec![desk_ticket(
        501,
        datetime!(2025-01-10 09:00:00 UTC),
        datetime!(2025-01-10 09:00:00 UTC),
    )]);

    let outcome = harness.cycle(MappingTable::new(), NOW).await;

    let created = harness.tracker.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].summary, "Desk ticket 501");
    assert_eq!(created[0].description, "Customer cannot log in");
    assert_eq!(created[0].priority_name, "High");
    assert_eq!(created[0].issue_type, "Task");

    let record = outcome.table.get("SUP-1").expect("mapping for created ticket");
    assert_eq!(record.desk_ticket_id, 501);
    assert_eq!(record.last_tracker_sync, Some(NOW));
    assert_eq!(record.last_desk_sync, Some(NOW));
    assert!(record.synced_attachment_ids.is_empty());
    assert_eq!(outcome.report.tickets_imported, 1);
}

#[tokio::test]
async fn desk_tickets_at_or_before_cutoff_are_never_imported() {
    let harness = Harness::new("cycle-backfill");
    harness.desk.set_tickets(vec![
        desk_ticket(10, CUTOFF, NOW),
        desk_ticket(11, datetime!(2024-12-31 23:59:59 UTC), NOW),
        desk_ticket(12, CUTOFF + time::Duration::seconds(1), NOW),
    ]);

    let outcome = harness.cycle(MappingTable::new(), NOW).await;

    assert_eq!(harness.tracker.created().len(), 1);
    assert_eq!(outcome.table.len(), 1);
    assert!(outcome.table.contains_desk_ticket(12));
    assert!(!outcome.table.contains_desk_ticket(10));
    assert!(!outcome.table.contains_desk_ticket(11));
}

#[tokio::test]
async fn missing_cutoff_disables_import() {
    let mut harness = Harness::new("cycle-no-cutoff");
    harness.policy.first_run_cutoff = None;
    harness.desk.set_tickets(vec![desk_ticket(1, NOW, NOW)]);

    let outcome = harness.cycle(MappingTable::new(), NOW).await;

    assert!(harness.tracker.created().is_empty());
    assert!(outcome.table.is_empty());
}

#[tokio::test]
async fn import_transfers_existing_desk_attachments_and_tags_both_sides() {
    let harness = Harness::new("cycle-import-attachments");
    let mut ticket = desk_ticket(77, datetime!(2025-01-20 08:00:00 UTC), NOW);
    ticket.attachments = vec![attachment("9001", "screenshot.png")];
    harness.desk.set_tickets(vec![ticket]);

    let outcome = harness.cycle(MappingTable::new(), NOW).await;

    let record = outcome.table.get("SUP-1").expect("mapping");
    let tags: Vec<&str> = record.synced_attachment_ids.iter().map(String::as_str).collect();
    assert_eq!(tags, vec!["desk-9001", "tracker-10002"]);
    let uploads = harness.tracker.attachments();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].ticket, "SUP-1");
    assert_eq!(uploads[0].file_name, "screenshot.png");
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn failed_creation_leaves_ticket_unmapped_until_a_later_cycle() {
    let harness = Harness::new("cycle-create-retry");
    harness.desk.set_tickets(vec![desk_ticket(5, datetime!(2025-01-05 00:00:00 UTC), NOW)]);
    harness.tracker.set_fail_create(true);

    let first = harness.cycle(MappingTable::new(), NOW).await;
    assert!(first.table.is_empty());
    assert_eq!(first.report.failures, 1);

    harness.tracker.set_fail_create(false);
    let second = harness.cycle(first.table, NOW).await;
    assert!(second.table.contains_desk_ticket(5));
}

#[tokio::test]
async fn discovery_failure_aborts_without_side_effects() {
    let harness = Harness::new("cycle-discovery");
    harness.desk.set_tickets(vec![desk_ticket(501, datetime!(2025-01-10 09:00:00 UTC), NOW)]);
    harness.tracker.set_fail_search(true);

    let error = SyncEngine::new(&harness.policy, &harness.tracker, &harness.desk, &harness.scratch)
        .run_cycle(MappingTable::new(), NOW)
        .await
        .expect_err("tracker search failure aborts the cycle");

    assert!(matches!(error, CoreError::DependencyUnavailable(_)));
    assert!(harness.tracker.created().is_empty());
    assert!(harness.desk.notes().is_empty());
}

#[tokio::test]
async fn tracker_ticket_older_than_watermark_is_left_alone() {
    let harness = Harness::new("cycle-stale-tracker");
    let watermark = datetime!(2025-02-01 00:00:00 UTC);
    let mut ticket = tracker_ticket("SUP-7", datetime!(2025-01-31 23:59:59 UTC));
    ticket.status_name = "Closed".to_owned();
    ticket.comments = vec![tracker_comment("c1", "Ana", datetime!(2025-01-31 23:59:59 UTC), "late")];
    harness.tracker.set_tickets(vec![ticket]);
    let table = mapped("SUP-7", 70, watermark, watermark);

    let outcome = harness.cycle(table.clone(), NOW).await;

    assert!(harness.desk.notes().is_empty());
    assert!(harness.desk.status_updates().is_empty());
    assert_eq!(outcome.table, table);
}

#[tokio::test]
async fn tracker_changes_propagate_comments_attachments_and_status() {
    let harness = Harness::new("cycle-tracker-to-desk");
    let watermark = datetime!(2025-02-01 00:00:00 UTC);
    let updated = datetime!(2025-02-05 10:00:00 UTC);
    let mut ticket = tracker_ticket("SUP-7", updated);
    ticket.status_name = "Closed".to_owned();
    ticket.comments = vec![
        tracker_comment("c-old", "Ana", datetime!(2025-01-15 00:00:00 UTC), "already synced"),
        tracker_comment("c-new", "Ana", datetime!(2025-02-04 00:00:00 UTC), "fixed in build 42"),
    ];
    ticket.attachments = vec![attachment("300", "trace.log")];
    harness.tracker.set_tickets(vec![ticket]);

    let outcome = harness.cycle(mapped("SUP-7", 70, watermark, watermark), NOW).await;

    assert_eq!(
        harness.desk.notes(),
        vec![(
            70,
            "<i>Comentário de <b>Ana</b> no Jira:</i><br><hr>fixed in build 42".to_owned()
        )]
    );
    assert_eq!(harness.desk.status_updates(), vec![(70, 5)]);
    let uploads = harness.desk.attachment_notes();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].file_name, "trace.log");
    assert_eq!(uploads[0].body.as_deref(), Some("[Anexo Sincronizado do Jira] trace.log"));

    let record = outcome.table.get("SUP-7").expect("record");
    assert_eq!(record.last_tracker_sync, Some(updated));
    assert_eq!(record.last_desk_sync, Some(watermark));
    assert!(record.has_attachment("tracker-300"));
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn unmapped_status_makes_no_desk_call() {
    let harness = Harness::new("cycle-unmapped-status");
    let mut ticket = tracker_ticket("SUP-8", datetime!(2025-02-05 10:00:00 UTC));
    ticket.status_name = "Backlog".to_owned();
    harness.tracker.set_tickets(vec![ticket]);

    let watermark = datetime!(2025-02-01 00:00:00 UTC);
    let outcome = harness.cycle(mapped("SUP-8", 80, watermark, watermark), NOW).await;

    assert!(harness.desk.status_updates().is_empty());
    assert_eq!(outcome.report.statuses_pushed, 0);
    assert_eq!(outcome.report.failures, 0);
}

#[tokio::test]
async fn status_sync_respects_its_toggle() {
    let mut harness = Harness::new("cycle-status-off");
    harness.policy.toggles.tracker_to_desk_status = false;
    let mut ticket = tracker_ticket("SUP-8", datetime!(2025-02-05 10:00:00 UTC));
    ticket.status_name = "Closed".to_owned();
    harness.tracker.set_tickets(vec![ticket]);

    let watermark = datetime!(2025-02-01 00:00:00 UTC);
    harness.cycle(mapped("SUP-8", 80, watermark, watermark), NOW).await;

    assert!(harness.desk.status_updates().is_empty());
}

#[tokio::test]
async fn comments_carrying_the_desk_marker_are_not_sent_back() {
    let harness = Harness::new("cycle-guard-tracker");
    let mut ticket = tracker_ticket("SUP-9", datetime!(2025-02-05 10:00:00 UTC));
    ticket.comments = vec![tracker_comment(
        "c1",
        "Integration",
        datetime!(2025-02-05 09:00:00 UTC),
        "_Nota Privada de **Bruno** no Freshdesk:_\n\nprinter fixed",
    )];
    harness.tracker.set_tickets(vec![ticket]);

    let watermark = datetime!(2025-02-01 00:00:00 UTC);
    let outcome = harness.cycle(mapped("SUP-9", 90, watermark, watermark), NOW).await;

    assert!(harness.desk.notes().is_empty());
    assert_eq!(outcome.report.loop_guard_skips, 1);
}

#[tokio::test]
async fn desk_conversations_propagate_with_author_and_entry_type() {
    let harness = Harness::new("cycle-desk-to-tracker");
    let watermark = datetime!(2025-02-01 00:00:00 UTC);
    let updated = datetime!(2025-02-06 10:00:00 UTC);
    harness.desk.set_tickets(vec![desk_ticket(90, datetime!(2025-01-20 00:00:00 UTC), updated)]);
    harness.desk.set_user(4001, "Bruno Lima");
    let mut reply = desk_conversation(2, Some(4001), datetime!(2025-02-06 09:00:00 UTC), "Works now, thanks");
    reply.private = false;
    reply.attachments = vec![attachment("555", "invoice.pdf")];
    let unknown_user = desk_conversation(3, Some(4999), datetime!(2025-02-06 09:30:00 UTC), "internal note");
    let old = desk_conversation(1, Some(4001), datetime!(2025-01-25 00:00:00 UTC), "already synced");
    harness.desk.set_conversations(90, vec![old, reply, unknown_user]);

    let outcome = harness.cycle(mapped("SUP-9", 90, watermark, watermark), NOW).await;

    assert_eq!(
        harness.tracker.comments(),
        vec![
            (
                "SUP-9".to_owned(),
                "_Resposta Pública de **Bruno Lima** no Freshdesk:_\n\nWorks now, thanks".to_owned()
            ),
            (
                "SUP-9".to_owned(),
                format!("_Nota Privada de **{UNKNOWN_DESK_USER}** no Freshdesk:_\n\ninternal note")
            ),
        ]
    );
    let record = outcome.table.get("SUP-9").expect("record");
    assert_eq!(record.last_desk_sync, Some(updated));
    assert!(record.has_attachment("desk-555"));
    assert!(record.synced_attachment_ids.iter().any(|tag| tag.starts_with("tracker-")));
    assert_eq!(harness.desk.user_lookups(), vec![4001, 4999]);
}

#[tokio::test]
async fn propagated_comment_is_not_imported_back_on_the_next_cycle() {
    let harness = Harness::new("cycle-loop-roundtrip");
    let watermark = datetime!(2025-02-01 00:00:00 UTC);
    let mut ticket = tracker_ticket("SUP-3", datetime!(2025-02-05 10:00:00 UTC));
    ticket.comments = vec![tracker_comment("c1", "Ana", datetime!(2025-02-05 09:00:00 UTC), "patched")];
    harness.tracker.set_tickets(vec![ticket]);

    let first = harness.cycle(mapped("SUP-3", 30, watermark, watermark), NOW).await;
    let (_, note) = harness.desk.notes().pop().expect("note pushed to desk");
    assert!(note.contains(TRACKER_COMMENT_MARKER));

    let mut echoed = desk_conversation(8, Some(1), datetime!(2025-02-05 10:00:01 UTC), "");
    echoed.body_html = note;
    echoed.body_text = "Comentário de Ana no Jira: patched".to_owned();
    harness.desk.set_conversations(30, vec![echoed]);
    harness.desk.set_tickets(vec![desk_ticket(30, datetime!(2025-01-02 00:00:00 UTC), datetime!(2025-02-05 10:00:01 UTC))]);

    let second = harness.cycle(first.table, NOW).await;

    assert!(harness.tracker.comments().is_empty());
    assert_eq!(second.report.loop_guard_skips, 1);
}

#[tokio::test]
async fn desk_entry_propagated_to_tracker_carries_the_desk_marker() {
    let harness = Harness::new("cycle-loop-desk-marker");
    let watermark = datetime!(2025-02-01 00:00:00 UTC);
    harness.desk.set_tickets(vec![desk_ticket(40, datetime!(2025-01-20 00:00:00 UTC), datetime!(2025-02-06 00:00:00 UTC))]);
    harness.desk.set_conversations(40, vec![desk_conversation(1, None, datetime!(2025-02-05 00:00:00 UTC), "hello")]);

    harness.cycle(mapped("SUP-4", 40, watermark, watermark), NOW).await;

    let comments = harness.tracker.comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].1.contains(DESK_COMMENT_MARKER));
}

#[tokio::test]
async fn already_synced_attachments_are_not_downloaded_again() {
    let harness = Harness::new("cycle-attachment-idempotence");
    let watermark = datetime!(2025-02-01 00:00:00 UTC);
    let mut ticket = tracker_ticket("SUP-5", datetime!(2025-02-05 10:00:00 UTC));
    ticket.attachments = vec![attachment("300", "trace.log")];
    harness.tracker.set_tickets(vec![ticket]);
    let mut table = mapped("SUP-5", 50, watermark, watermark);
    table
        .get_mut("SUP-5")
        .expect("record")
        .record_attachment("tracker-300".to_owned());

    harness.cycle(table, NOW).await;

    assert!(harness.tracker.downloads().is_empty());
    assert!(harness.desk.attachment_notes().is_empty());
}

#[tokio::test]
async fn empty_downloads_are_not_uploaded_or_recorded() {
    let harness = Harness::new("cycle-empty-download");
    let watermark = datetime!(2025-02-01 00:00:00 UTC);
    harness.desk.set_empty_downloads(true);
    harness.desk.set_tickets(vec![desk_ticket(60, datetime!(2025-01-20 00:00:00 UTC), datetime!(2025-02-06 00:00:00 UTC))]);
    let mut conversation = desk_conversation(1, None, datetime!(2025-02-05 00:00:00 UTC), "");
    conversation.attachments = vec![attachment("8", "empty.txt")];
    harness.desk.set_conversations(60, vec![conversation]);

    let outcome = harness.cycle(mapped("SUP-6", 60, watermark, watermark), NOW).await;

    assert!(harness.tracker.attachments().is_empty());
    assert!(outcome.table.get("SUP-6").expect("record").synced_attachment_ids.is_empty());
    assert_eq!(outcome.report.failures, 1);
    assert!(harness.scratch_is_empty());
}

#[tokio::test]
async fn watermark_advances_even_when_every_push_fails() {
    let harness = Harness::new("cycle-partial-failure");
    harness.desk.set_fail_notes(true);
    let updated = datetime!(2025-02-05 10:00:00 UTC);
    let mut ticket = tracker_ticket("SUP-2", updated);
    ticket.comments = vec![tracker_comment("c1", "Ana", datetime!(2025-02-05 09:00:00 UTC), "hi")];
    harness.tracker.set_tickets(vec![ticket]);

    let watermark = datetime!(2025-02-01 00:00:00 UTC);
    let outcome = harness.cycle(mapped("SUP-2", 20, watermark, watermark), NOW).await;

    assert_eq!(outcome.report.failures, 1);
    assert_eq!(outcome.table.get("SUP-2").expect("record").last_tracker_sync, Some(updated));
}

#[tokio::test]
async fn consecutive_cycles_without_remote_changes_are_idempotent() {
    let harness = Harness::new("cycle-idempotent");
    let mut desk = desk_ticket(501, datetime!(2025-01-10 09:00:00 UTC), datetime!(2025-01-10 09:00:00 UTC));
    desk.attachments = vec![attachment("1", "a.txt")];
    harness.desk.set_tickets(vec![desk]);
    let mut tracker = tracker_ticket("SUP-1", datetime!(2025-02-09 00:00:00 UTC));
    tracker.attachments = vec![attachment("10002", "a.txt")];
    harness.tracker.set_tickets(vec![tracker]);

    let first = harness.cycle(MappingTable::new(), NOW).await;
    let later = NOW + time::Duration::hours(1);
    let second = harness.cycle(first.table.clone(), later).await;
    let third = harness.cycle(second.table.clone(), later).await;

    assert_eq!(harness.tracker.created().len(), 1);
    assert_eq!(first.table, second.table);
    assert_eq!(second.table, third.table);
    assert!(harness.desk.attachment_notes().is_empty());
    assert_eq!(third.report.tickets_imported, 0);
}

#[tokio::test]
async fn searches_use_lookback_date_and_company_filter() {
    let mut harness = Harness::new("cycle-search-args");
    harness.policy.lookback_days = 2;
    harness.policy.desk_company_id = Some(123);

    harness.cycle(MappingTable::new(), NOW).await;

    assert_eq!(harness.tracker.searches(), vec![date!(2025 - 02 - 08)]);
    assert_eq!(harness.desk.searches(), vec![(date!(2025 - 02 - 08), Some(123))]);
}
