//! One reconciliation cycle for one tenant.
//!
//! Order is fixed: discovery, desk → tracker import, tracker → desk updates,
//! desk → tracker updates. Only discovery can abort the cycle; every later
//! failure is logged and counted, and the affected ticket still has its
//! watermark advanced so a broken ticket cannot wedge the tenant.

use std::collections::HashMap;

use time::{Date, Duration, OffsetDateTime};
use tracing::{debug, error, info, warn};

use crate::client::{DeskClient, TrackerClient};
use crate::error::CoreError;
use crate::loop_guard::{DeskEntryKind, LoopGuard, UNKNOWN_DESK_USER};
use crate::mapping::{AttachmentOrigin, MappingRecord, MappingTable};
use crate::model::{DeskConversation, DeskTicket, NewTrackerTicket, RemoteAttachment, TrackerTicket};
use crate::policy::SyncPolicy;
use crate::scratch::ScratchDir;
use crate::text::html_to_text;

const MISSING_SUBJECT: &str = "Sem assunto";
const MISSING_DESCRIPTION: &str = "Descrição não fornecida.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub tracker_tickets_seen: usize,
    pub desk_tickets_seen: usize,
    pub tickets_imported: usize,
    pub tracker_tickets_synced: usize,
    pub desk_tickets_synced: usize,
    pub comments_to_desk: usize,
    pub comments_to_tracker: usize,
    pub attachments_to_desk: usize,
    pub attachments_to_tracker: usize,
    pub statuses_pushed: usize,
    pub loop_guard_skips: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub table: MappingTable,
    pub report: CycleReport,
}

pub struct SyncEngine<'a> {
    policy: &'a SyncPolicy,
    tracker: &'a dyn TrackerClient,
    desk: &'a dyn DeskClient,
    scratch: &'a ScratchDir,
    guard: LoopGuard,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        policy: &'a SyncPolicy,
        tracker: &'a dyn TrackerClient,
        desk: &'a dyn DeskClient,
        scratch: &'a ScratchDir,
    ) -> Self {
        Self {
            policy,
            tracker,
            desk,
            scratch,
            guard: LoopGuard::new(policy.loop_guard),
        }
    }

    /// First calendar day covered by the lookback window ending at `now`.
    pub fn lookback_start(&self, now: OffsetDateTime) -> Date {
        (now - Duration::days(i64::from(self.policy.lookback_days))).date()
    }

    pub async fn run_cycle(
        &self,
        mut table: MappingTable,
        now: OffsetDateTime,
    ) -> Result<CycleOutcome, CoreError> {
        let tenant = self.policy.tenant.as_str();
        let since = self.lookback_start(now);
        info!(tenant, %since, "fetching tickets updated in lookback window");

        let retry = self.policy.retry;
        let tracker_tickets = retry
            .run("tracker search", || self.tracker.search_updated_since(since))
            .await
            .inspect_err(|error| {
                error!(tenant, error = %error, "tracker ticket search failed; aborting cycle")
            })?;
        let desk_tickets = retry
            .run("desk search", || {
                self.desk
                    .search_updated_since(since, self.policy.desk_company_id)
            })
            .await
            .inspect_err(|error| {
                error!(tenant, error = %error, "desk ticket search failed; aborting cycle")
            })?;

        let mut report = CycleReport {
            tracker_tickets_seen: tracker_tickets.len(),
            desk_tickets_seen: desk_tickets.len(),
            ..CycleReport::default()
        };

        self.import_new_desk_tickets(&desk_tickets, &mut table, now, &mut report)
            .await;
        self.sync_tracker_to_desk(&tracker_tickets, &mut table, &mut report)
            .await;
        self.sync_desk_to_tracker(&desk_tickets, &mut table, &mut report)
            .await;

        Ok(CycleOutcome { table, report })
    }

    async fn import_new_desk_tickets(
        &self,
        desk_tickets: &[DeskTicket],
        table: &mut MappingTable,
        now: OffsetDateTime,
        report: &mut CycleReport,
    ) {
        let tenant = self.policy.tenant.as_str();
        let Some(cutoff) = self.policy.first_run_cutoff else {
            warn!(tenant, "first run cutoff is not set; new desk tickets will not be imported");
            return;
        };

        for summary in desk_tickets {
            if table.contains_desk_ticket(summary.id) {
                continue;
            }
            let Some(created_at) = summary.created_at else {
                warn!(tenant, desk_id = summary.id, "desk ticket has no readable creation date; skipping");
                continue;
            };
            if created_at <= cutoff {
                debug!(tenant, desk_id = summary.id, "desk ticket predates first run cutoff; not importing");
                continue;
            }

            info!(tenant, desk_id = summary.id, "new desk ticket; fetching details");
            let detail = match self
                .policy
                .retry
                .run("desk ticket detail", || self.desk.get_full_ticket(summary.id))
                .await
            {
                Ok(detail) => detail,
                Err(error) => {
                    error!(tenant, desk_id = summary.id, error = %error, "failed to fetch desk ticket details");
                    report.failures += 1;
                    continue;
                }
            };

            let request = self.tracker_ticket_request(&detail);
            let created = match self
                .policy
                .retry
                .run("tracker create", || self.tracker.create_ticket(request.clone()))
                .await
            {
                Ok(created) => created,
                Err(error) => {
                    error!(tenant, desk_id = summary.id, error = %error, "tracker ticket creation failed; will retry next cycle");
                    report.failures += 1;
                    continue;
                }
            };

            if let Err(error) = table.insert(created.key.clone(), MappingRecord::new(summary.id, now)) {
                error!(tenant, desk_id = summary.id, tracker_key = %created.key, error = %error, "could not record new mapping");
                report.failures += 1;
                continue;
            }
            report.tickets_imported += 1;
            info!(tenant, desk_id = summary.id, tracker_key = %created.key, "mapped new ticket pair");

            if !self.policy.toggles.desk_to_tracker_attachments || detail.attachments.is_empty() {
                continue;
            }
            let Some(record) = table.get_mut(&created.key) else {
                continue;
            };
            for attachment in &detail.attachments {
                self.transfer_desk_attachment(&created.key, attachment, record, report)
                    .await;
            }
        }
    }

    fn tracker_ticket_request(&self, detail: &DeskTicket) -> NewTrackerTicket {
        let summary = detail
            .subject
            .as_deref()
            .map(str::trim)
            .filter(|subject| !subject.is_empty())
            .unwrap_or(MISSING_SUBJECT)
            .to_owned();
        let description = detail
            .description_html
            .as_deref()
            .map(html_to_text)
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| MISSING_DESCRIPTION.to_owned());

        NewTrackerTicket {
            summary,
            description,
            priority_name: self.policy.priority_map.tracker_priority_for(detail.priority),
            issue_type: self.policy.default_issue_type.clone(),
        }
    }

    async fn sync_tracker_to_desk(
        &self,
        tracker_tickets: &[TrackerTicket],
        table: &mut MappingTable,
        report: &mut CycleReport,
    ) {
        let tenant = self.policy.tenant.as_str();
        for ticket in tracker_tickets {
            let Some(record) = table.get_mut(&ticket.key) else {
                continue;
            };
            let Some(updated_at) = ticket.updated_at else {
                warn!(tenant, tracker_key = %ticket.key, "tracker ticket has no readable update date; skipping");
                continue;
            };
            let last_sync = record.last_tracker_sync;
            if last_sync.is_some_and(|last| updated_at <= last) {
                continue;
            }

            let desk_id = record.desk_ticket_id;
            info!(tenant, tracker_key = %ticket.key, desk_id, "propagating tracker changes to desk");
            report.tracker_tickets_synced += 1;

            if self.policy.toggles.tracker_to_desk_comments {
                self.push_tracker_comments(ticket, desk_id, last_sync, report)
                    .await;
            }
            if self.policy.toggles.tracker_to_desk_attachments {
                for attachment in &ticket.attachments {
                    self.transfer_tracker_attachment(desk_id, attachment, record, report)
                        .await;
                }
            }
            if self.policy.toggles.tracker_to_desk_status {
                self.push_status(ticket, desk_id, report).await;
            }

            record.advance_tracker_sync(updated_at);
        }
    }

    async fn push_tracker_comments(
        &self,
        ticket: &TrackerTicket,
        desk_id: u64,
        last_sync: Option<OffsetDateTime>,
        report: &mut CycleReport,
    ) {
        let tenant = self.policy.tenant.as_str();
        for comment in &ticket.comments {
            if !is_newer(comment.updated_at, last_sync) {
                continue;
            }
            if self.guard.is_desk_origin(&comment.body) {
                debug!(tenant, tracker_key = %ticket.key, comment_id = %comment.id, "skipping comment that originated on desk");
                report.loop_guard_skips += 1;
                continue;
            }

            let note = self
                .guard
                .desk_note_for_tracker_comment(&comment.author, &comment.body);
            match self
                .policy
                .retry
                .run("desk private note", || self.desk.add_private_note(desk_id, &note))
                .await
            {
                Ok(()) => report.comments_to_desk += 1,
                Err(error) => {
                    warn!(tenant, tracker_key = %ticket.key, desk_id, comment_id = %comment.id, error = %error, "failed to copy tracker comment to desk");
                    report.failures += 1;
                }
            }
        }
    }

    async fn push_status(&self, ticket: &TrackerTicket, desk_id: u64, report: &mut CycleReport) {
        let tenant = self.policy.tenant.as_str();
        let Some(code) = self.policy.status_map.desk_code_for(&ticket.status_name) else {
            warn!(tenant, tracker_key = %ticket.key, status = %ticket.status_name, "tracker status has no desk mapping; leaving desk status unchanged");
            return;
        };

        match self
            .policy
            .retry
            .run("desk status update", || self.desk.update_status(desk_id, code))
            .await
        {
            Ok(()) => {
                info!(tenant, tracker_key = %ticket.key, desk_id, status = %ticket.status_name, code, "pushed status to desk");
                report.statuses_pushed += 1;
            }
            Err(error) => {
                warn!(tenant, tracker_key = %ticket.key, desk_id, code, error = %error, "failed to update desk status");
                report.failures += 1;
            }
        }
    }

    async fn transfer_tracker_attachment(
        &self,
        desk_id: u64,
        attachment: &RemoteAttachment,
        record: &mut MappingRecord,
        report: &mut CycleReport,
    ) {
        let tenant = self.policy.tenant.as_str();
        let tag = AttachmentOrigin::Tracker.tag(&attachment.id);
        if record.has_attachment(&tag) {
            return;
        }

        info!(tenant, desk_id, file = %attachment.file_name, "new tracker attachment");
        let file = self.scratch.reserve(&tag, &attachment.file_name);
        let downloaded = self
            .policy
            .retry
            .run("tracker attachment download", || {
                self.tracker
                    .download_attachment(&attachment.content_url, file.path())
            })
            .await;
        if !download_succeeded(tenant, &tag, downloaded) {
            report.failures += 1;
            return;
        }

        let body = self.guard.desk_attachment_note(&attachment.file_name);
        match self
            .policy
            .retry
            .run("desk attachment note", || {
                self.desk
                    .add_attachment_note(desk_id, file.path(), &attachment.file_name, &body)
            })
            .await
        {
            Ok(()) => {
                record.record_attachment(tag);
                report.attachments_to_desk += 1;
            }
            Err(error) => {
                warn!(tenant, desk_id, attachment = %tag, error = %error, "failed to upload attachment to desk");
                report.failures += 1;
            }
        }
    }

    async fn transfer_desk_attachment(
        &self,
        tracker_key: &str,
        attachment: &RemoteAttachment,
        record: &mut MappingRecord,
        report: &mut CycleReport,
    ) {
        let tenant = self.policy.tenant.as_str();
        let desk_tag = AttachmentOrigin::Desk.tag(&attachment.id);
        if record.has_attachment(&desk_tag) {
            return;
        }

        info!(tenant, tracker_key, file = %attachment.file_name, "new desk attachment");
        let file = self.scratch.reserve(&desk_tag, &attachment.file_name);
        let downloaded = self
            .policy
            .retry
            .run("desk attachment download", || {
                self.desk
                    .download_attachment(&attachment.content_url, file.path())
            })
            .await;
        if !download_succeeded(tenant, &desk_tag, downloaded) {
            report.failures += 1;
            return;
        }

        match self
            .policy
            .retry
            .run("tracker attachment upload", || {
                self.tracker
                    .add_attachment(tracker_key, file.path(), &attachment.file_name)
            })
            .await
        {
            Ok(tracker_attachment_id) => {
                let tracker_tag = AttachmentOrigin::Tracker.tag(&tracker_attachment_id);
                debug!(tenant, tracker_key, desk = %desk_tag, tracker = %tracker_tag, "linked attachment pair");
                record.record_attachment(desk_tag);
                record.record_attachment(tracker_tag);
                report.attachments_to_tracker += 1;
            }
            Err(error) => {
                warn!(tenant, tracker_key, attachment = %desk_tag, error = %error, "failed to upload attachment to tracker");
                report.failures += 1;
            }
        }
    }

    async fn sync_desk_to_tracker(
        &self,
        desk_tickets: &[DeskTicket],
        table: &mut MappingTable,
        report: &mut CycleReport,
    ) {
        let tenant = self.policy.tenant.as_str();
        let index = table.desk_index();
        let mut author_names: HashMap<u64, String> = HashMap::new();

        for ticket in desk_tickets {
            let Some(tracker_key) = index.get(&ticket.id) else {
                continue;
            };
            let Some(record) = table.get_mut(tracker_key) else {
                continue;
            };
            let Some(updated_at) = ticket.updated_at else {
                warn!(tenant, desk_id = ticket.id, "desk ticket has no readable update date; skipping");
                continue;
            };
            let last_sync = record.last_desk_sync;
            if last_sync.is_some_and(|last| updated_at <= last) {
                continue;
            }

            info!(tenant, desk_id = ticket.id, tracker_key = %tracker_key, "propagating desk changes to tracker");
            report.desk_tickets_synced += 1;

            let conversations = match self
                .policy
                .retry
                .run("desk conversations", || self.desk.get_conversations(ticket.id))
                .await
            {
                Ok(conversations) => conversations,
                Err(error) => {
                    warn!(tenant, desk_id = ticket.id, error = %error, "failed to fetch desk conversations");
                    report.failures += 1;
                    Vec::new()
                }
            };

            for conversation in &conversations {
                if self.guard.is_tracker_origin(conversation) {
                    debug!(tenant, desk_id = ticket.id, conversation_id = conversation.id, "skipping conversation that originated on tracker");
                    report.loop_guard_skips += 1;
                    continue;
                }
                if !is_newer(conversation.updated_at, last_sync) {
                    continue;
                }

                if self.policy.toggles.desk_to_tracker_comments {
                    self.push_desk_conversation(tracker_key, conversation, &mut author_names, report)
                        .await;
                }
                if self.policy.toggles.desk_to_tracker_attachments {
                    for attachment in &conversation.attachments {
                        self.transfer_desk_attachment(tracker_key, attachment, record, report)
                            .await;
                    }
                }
            }

            record.advance_desk_sync(updated_at);
        }
    }

    async fn push_desk_conversation(
        &self,
        tracker_key: &str,
        conversation: &DeskConversation,
        author_names: &mut HashMap<u64, String>,
        report: &mut CycleReport,
    ) {
        let tenant = self.policy.tenant.as_str();
        let body = conversation.body_text.trim();
        if body.is_empty() {
            return;
        }

        let author = self.resolve_author(conversation.user_id, author_names).await;
        let comment = self.guard.tracker_comment_for_desk_entry(
            DeskEntryKind::from_private_flag(conversation.private),
            &author,
            body,
        );
        match self
            .policy
            .retry
            .run("tracker comment", || self.tracker.add_comment(tracker_key, &comment))
            .await
        {
            Ok(()) => report.comments_to_tracker += 1,
            Err(error) => {
                warn!(tenant, tracker_key, conversation_id = conversation.id, error = %error, "failed to copy desk conversation to tracker");
                report.failures += 1;
            }
        }
    }

    async fn resolve_author(
        &self,
        user_id: Option<u64>,
        cache: &mut HashMap<u64, String>,
    ) -> String {
        let Some(user_id) = user_id else {
            return UNKNOWN_DESK_USER.to_owned();
        };
        if let Some(name) = cache.get(&user_id) {
            return name.clone();
        }

        let name = match self
            .policy
            .retry
            .run("desk user lookup", || self.desk.user_display_name(user_id))
            .await
        {
            Ok(name) if !name.trim().is_empty() => name.trim().to_owned(),
            Ok(_) => UNKNOWN_DESK_USER.to_owned(),
            Err(error) => {
                warn!(tenant = %self.policy.tenant, user_id, error = %error, "could not resolve desk user name");
                UNKNOWN_DESK_USER.to_owned()
            }
        };
        cache.insert(user_id, name.clone());
        name
    }
}

/// Entries are fresh when nothing was synced yet or they changed after the watermark.
fn is_newer(updated_at: Option<OffsetDateTime>, last_sync: Option<OffsetDateTime>) -> bool {
    match (last_sync, updated_at) {
        (None, _) => true,
        (Some(last), Some(at)) => at > last,
        (Some(_), None) => false,
    }
}

fn download_succeeded(tenant: &str, tag: &str, result: Result<u64, CoreError>) -> bool {
    match result {
        Ok(0) => {
            warn!(tenant, attachment = %tag, "downloaded attachment is empty");
            false
        }
        Ok(_) => true,
        Err(error) => {
            warn!(tenant, attachment = %tag, error = %error, "failed to download attachment");
            false
        }
    }
}
