//! In-memory remote clients and filesystem helpers for tests.

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use time::{Date, OffsetDateTime};

use crate::client::{DeskClient, TrackerClient};
use crate::error::CoreError;
use crate::model::{
    CreatedTrackerTicket, DeskConversation, DeskTicket, NewTrackerTicket, RemoteAttachment,
    TrackerComment, TrackerTicket,
};

static ENV_VAR_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
static TEST_PATH_COUNTER: AtomicU64 = AtomicU64::new(0);
thread_local! {
    static ENV_VAR_LOCK_DEPTH: Cell<u32> = const { Cell::new(0) };
}

pub const STUB_ATTACHMENT_BYTES: &[u8] = b"stub attachment payload";

/// Unique directory under the system temp dir, removed on drop.
pub struct TestDir {
    path: PathBuf,
}

impl TestDir {
    pub fn new(label: &str) -> Self {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let counter = TEST_PATH_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "deskbridge-{label}-{}-{stamp}-{counter}",
            std::process::id()
        ));
        std::fs::create_dir_all(&path).expect("create test dir");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

// Nested scopes on one thread reuse the outer guard.
struct EnvVarScope {
    _guard: Option<MutexGuard<'static, ()>>,
}

impl EnvVarScope {
    fn enter() -> Self {
        let depth_before = ENV_VAR_LOCK_DEPTH.with(|depth| {
            let current = depth.get();
            depth.set(current.saturating_add(1));
            current
        });
        if depth_before > 0 {
            return Self { _guard: None };
        }

        let guard = lock(ENV_VAR_LOCK.get_or_init(|| Mutex::new(())));
        Self {
            _guard: Some(guard),
        }
    }
}

impl Drop for EnvVarScope {
    fn drop(&mut self) {
        ENV_VAR_LOCK_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

struct EnvVarRestore {
    key: String,
    original: Option<OsString>,
}

impl EnvVarRestore {
    fn new(key: &str, value: Option<&str>) -> Self {
        let original = std::env::var_os(key);
        match value {
            Some(value) => unsafe { std::env::set_var(key, value) },
            None => unsafe { std::env::remove_var(key) },
        }
        Self {
            key: key.to_owned(),
            original,
        }
    }
}

impl Drop for EnvVarRestore {
    fn drop(&mut self) {
        match self.original.take() {
            Some(original) => unsafe { std::env::set_var(&self.key, original) },
            None => unsafe { std::env::remove_var(&self.key) },
        }
    }
}

/// Runs `run` with the given variables set (or removed), restoring them afterwards.
pub fn with_env_vars<R>(vars: &[(&str, Option<&str>)], run: impl FnOnce() -> R) -> R {
    let _scope = EnvVarScope::enter();
    let _restores: Vec<_> = vars
        .iter()
        .map(|(key, value)| EnvVarRestore::new(key, *value))
        .collect();
    run()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn stub_download(destination: &Path, payload: &[u8]) -> Result<u64, CoreError> {
    std::fs::write(destination, payload).map_err(|error| {
        CoreError::dependency_unavailable(format!("stub download failed: {error}"))
    })?;
    Ok(payload.len() as u64)
}

pub fn attachment(id: &str, file_name: &str) -> RemoteAttachment {
    RemoteAttachment {
        id: id.to_owned(),
        file_name: file_name.to_owned(),
        content_url: format!("https://files.example.test/{id}/{file_name}"),
    }
}

pub fn tracker_ticket(key: &str, updated_at: OffsetDateTime) -> TrackerTicket {
    TrackerTicket {
        key: key.to_owned(),
        created_at: Some(updated_at),
        updated_at: Some(updated_at),
        status_name: "In Progress".to_owned(),
        priority: Some("Medium".to_owned()),
        comments: Vec::new(),
        attachments: Vec::new(),
    }
}

pub fn tracker_comment(id: &str, author: &str, updated_at: OffsetDateTime, body: &str) -> TrackerComment {
    TrackerComment {
        id: id.to_owned(),
        author: author.to_owned(),
        updated_at: Some(updated_at),
        body: body.to_owned(),
    }
}

pub fn desk_ticket(id: u64, created_at: OffsetDateTime, updated_at: OffsetDateTime) -> DeskTicket {
    DeskTicket {
        id,
        subject: Some(format!("Desk ticket {id}")),
        description_html: Some("<p>Customer <b>cannot</b> log in</p>".to_owned()),
        priority: Some(3),
        created_at: Some(created_at),
        updated_at: Some(updated_at),
        attachments: Vec::new(),
    }
}

pub fn desk_conversation(
    id: u64,
    user_id: Option<u64>,
    updated_at: OffsetDateTime,
    body_text: &str,
) -> DeskConversation {
    DeskConversation {
        id,
        updated_at: Some(updated_at),
        body_html: format!("<div>{body_text}</div>"),
        body_text: body_text.to_owned(),
        private: true,
        user_id,
        attachments: Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAttachment {
    pub ticket: String,
    pub file_name: String,
    pub body: Option<String>,
}

#[derive(Default)]
pub struct StubTracker {
    pub tickets: Mutex<Vec<TrackerTicket>>,
    pub fail_search: Mutex<bool>,
    pub fail_create: Mutex<bool>,
    pub fail_comments: Mutex<bool>,
    pub created: Mutex<Vec<NewTrackerTicket>>,
    pub comments: Mutex<Vec<(String, String)>>,
    pub attachments: Mutex<Vec<UploadedAttachment>>,
    pub downloads: Mutex<Vec<String>>,
    pub searches: Mutex<Vec<Date>>,
    next_id: AtomicU64,
}

impl StubTracker {
    pub fn with_tickets(tickets: Vec<TrackerTicket>) -> Self {
        let stub = Self::default();
        *lock(&stub.tickets) = tickets;
        stub
    }

    pub fn set_tickets(&self, tickets: Vec<TrackerTicket>) {
        *lock(&self.tickets) = tickets;
    }

    pub fn set_fail_search(&self, fail: bool) {
        *lock(&self.fail_search) = fail;
    }

    pub fn set_fail_create(&self, fail: bool) {
        *lock(&self.fail_create) = fail;
    }

    pub fn set_fail_comments(&self, fail: bool) {
        *lock(&self.fail_comments) = fail;
    }

    pub fn created(&self) -> Vec<NewTrackerTicket> {
        lock(&self.created).clone()
    }

    pub fn comments(&self) -> Vec<(String, String)> {
        lock(&self.comments).clone()
    }

    pub fn attachments(&self) -> Vec<UploadedAttachment> {
        lock(&self.attachments).clone()
    }

    pub fn downloads(&self) -> Vec<String> {
        lock(&self.downloads).clone()
    }

    pub fn searches(&self) -> Vec<Date> {
        lock(&self.searches).clone()
    }
}

#[async_trait]
impl TrackerClient for StubTracker {
    async fn search_updated_since(&self, since: Date) -> Result<Vec<TrackerTicket>, CoreError> {
        lock(&self.searches).push(since);
        if *lock(&self.fail_search) {
            return Err(CoreError::dependency_unavailable("stub tracker search failed"));
        }
        Ok(lock(&self.tickets).clone())
    }

    async fn create_ticket(
        &self,
        request: NewTrackerTicket,
    ) -> Result<CreatedTrackerTicket, CoreError> {
        if *lock(&self.fail_create) {
            return Err(CoreError::dependency_unavailable("stub tracker create failed"));
        }
        lock(&self.created).push(request);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreatedTrackerTicket {
            key: format!("SUP-{id}"),
        })
    }

    async fn add_comment(&self, ticket_key: &str, text: &str) -> Result<(), CoreError> {
        if *lock(&self.fail_comments) {
            return Err(CoreError::dependency_unavailable("stub tracker comment failed"));
        }
        lock(&self.comments).push((ticket_key.to_owned(), text.to_owned()));
        Ok(())
    }

    async fn add_attachment(
        &self,
        ticket_key: &str,
        path: &Path,
        file_name: &str,
    ) -> Result<String, CoreError> {
        if !path.exists() {
            return Err(CoreError::dependency_unavailable(format!(
                "stub tracker upload missing file {}",
                path.display()
            )));
        }
        lock(&self.attachments).push(UploadedAttachment {
            ticket: ticket_key.to_owned(),
            file_name: file_name.to_owned(),
            body: None,
        });
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{}", 10_000 + id))
    }

    async fn download_attachment(&self, url: &str, destination: &Path) -> Result<u64, CoreError> {
        lock(&self.downloads).push(url.to_owned());
        stub_download(destination, STUB_ATTACHMENT_BYTES)
    }
}

#[derive(Default)]
pub struct StubDesk {
    pub tickets: Mutex<Vec<DeskTicket>>,
    pub full_tickets: Mutex<HashMap<u64, DeskTicket>>,
    pub conversations: Mutex<HashMap<u64, Vec<DeskConversation>>>,
    pub users: Mutex<HashMap<u64, String>>,
    pub fail_search: Mutex<bool>,
    pub fail_notes: Mutex<bool>,
    pub empty_downloads: Mutex<bool>,
    pub searches: Mutex<Vec<(Date, Option<u64>)>>,
    pub notes: Mutex<Vec<(u64, String)>>,
    pub attachment_notes: Mutex<Vec<UploadedAttachment>>,
    pub status_updates: Mutex<Vec<(u64, u8)>>,
    pub user_lookups: Mutex<Vec<u64>>,
    pub downloads: Mutex<Vec<String>>,
}

impl StubDesk {
    pub fn with_tickets(tickets: Vec<DeskTicket>) -> Self {
        let stub = Self::default();
        *lock(&stub.tickets) = tickets;
        stub
    }

    pub fn set_tickets(&self, tickets: Vec<DeskTicket>) {
        *lock(&self.tickets) = tickets;
    }

    pub fn set_full_ticket(&self, ticket: DeskTicket) {
        lock(&self.full_tickets).insert(ticket.id, ticket);
    }

    pub fn set_conversations(&self, ticket_id: u64, conversations: Vec<DeskConversation>) {
        lock(&self.conversations).insert(ticket_id, conversations);
    }

    pub fn set_user(&self, user_id: u64, name: &str) {
        lock(&self.users).insert(user_id, name.to_owned());
    }

    pub fn set_fail_search(&self, fail: bool) {
        *lock(&self.fail_search) = fail;
    }

    pub fn set_fail_notes(&self, fail: bool) {
        *lock(&self.fail_notes) = fail;
    }

    pub fn set_empty_downloads(&self, empty: bool) {
        *lock(&self.empty_downloads) = empty;
    }

    pub fn searches(&self) -> Vec<(Date, Option<u64>)> {
        lock(&self.searches).clone()
    }

    pub fn notes(&self) -> Vec<(u64, String)> {
        lock(&self.notes).clone()
    }

    pub fn attachment_notes(&self) -> Vec<UploadedAttachment> {
        lock(&self.attachment_notes).clone()
    }

    pub fn status_updates(&self) -> Vec<(u64, u8)> {
        lock(&self.status_updates).clone()
    }

    pub fn user_lookups(&self) -> Vec<u64> {
        lock(&self.user_lookups).clone()
    }

    pub fn downloads(&self) -> Vec<String> {
        lock(&self.downloads).clone()
    }
}

#[async_trait]
impl DeskClient for StubDesk {
    async fn search_updated_since(
        &self,
        since: Date,
        company_id: Option<u64>,
    ) -> Result<Vec<DeskTicket>, CoreError> {
        lock(&self.searches).push((since, company_id));
        if *lock(&self.fail_search) {
            return Err(CoreError::dependency_unavailable("stub desk search failed"));
        }
        Ok(lock(&self.tickets).clone())
    }

    async fn get_full_ticket(&self, ticket_id: u64) -> Result<DeskTicket, CoreError> {
        if let Some(ticket) = lock(&self.full_tickets).get(&ticket_id) {
            return Ok(ticket.clone());
        }
        lock(&self.tickets)
            .iter()
            .find(|ticket| ticket.id == ticket_id)
            .cloned()
            .ok_or_else(|| CoreError::dependency_unavailable(format!("stub desk ticket {ticket_id} not found")))
    }

    async fn get_conversations(&self, ticket_id: u64) -> Result<Vec<DeskConversation>, CoreError> {
        Ok(lock(&self.conversations)
            .get(&ticket_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_private_note(&self, ticket_id: u64, html_body: &str) -> Result<(), CoreError> {
        if *lock(&self.fail_notes) {
            return Err(CoreError::dependency_unavailable("stub desk note failed"));
        }
        lock(&self.notes).push((ticket_id, html_body.to_owned()));
        Ok(())
    }

    async fn add_attachment_note(
        &self,
        ticket_id: u64,
        path: &Path,
        file_name: &str,
        body: &str,
    ) -> Result<(), CoreError> {
        if !path.exists() {
            return Err(CoreError::dependency_unavailable(format!(
                "stub desk upload missing file {}",
                path.display()
            )));
        }
        lock(&self.attachment_notes).push(UploadedAttachment {
            ticket: ticket_id.to_string(),
            file_name: file_name.to_owned(),
            body: Some(body.to_owned()),
        });
        Ok(())
    }

    async fn update_status(&self, ticket_id: u64, status_code: u8) -> Result<(), CoreError> {
        lock(&self.status_updates).push((ticket_id, status_code));
        Ok(())
    }

    async fn user_display_name(&self, user_id: u64) -> Result<String, CoreError> {
        lock(&self.user_lookups).push(user_id);
        lock(&self.users)
            .get(&user_id)
            .cloned()
            .ok_or_else(|| CoreError::dependency_unavailable(format!("stub desk user {user_id} not found")))
    }

    async fn download_attachment(&self, url: &str, destination: &Path) -> Result<u64, CoreError> {
        lock(&self.downloads).push(url.to_owned());
        if *lock(&self.empty_downloads) {
            return stub_download(destination, b"");
        }
        stub_download(destination, STUB_ATTACHMENT_BYTES)
    }
}
