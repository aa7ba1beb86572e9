//! In-process doubles for the remote service, blob store, and credentials.
//!
//! Each fake comes with a `Shared*` newtype over `Arc<Fake*>` carrying the
//! trait impl, so a test hands the engine a wrapper and keeps the inner
//! handle for seeding and assertions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use quill_core::auth::CredentialProvider;
use quill_core::blob::BlobStore;
use quill_core::error::{Error, Result};
use quill_core::models::OwnerId;
use quill_core::remote::{AttachmentRow, NoteRow, NotebookRow, RemoteService};

static TRACING: Once = Once::new();

/// Install a test subscriber honoring `RUST_LOG`; safe to call repeatedly.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
struct RemoteTables {
    notebooks: HashMap<String, NotebookRow>,
    notes: HashMap<String, NoteRow>,
    attachments: HashMap<String, AttachmentRow>,
    clock: i64,
}

impl RemoteTables {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        1_000 + self.clock
    }
}

/// Fake remote service with server-assigned versions and timestamps.
#[derive(Default)]
pub struct FakeRemote {
    tables: Mutex<RemoteTables>,
    ops: Mutex<Vec<String>>,
    offline: AtomicBool,
    delay_ms: AtomicU64,
}

impl FakeRemote {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_delay_ms(&self, delay_ms: u64) {
        self.delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    /// Seed a row as if another device had pushed it; returns the assigned
    /// `updated_at`.
    pub fn insert_notebook(&self, mut row: NotebookRow) -> i64 {
        let mut tables = self.tables.lock().unwrap();
        row.updated_at = tables.tick();
        let updated_at = row.updated_at;
        tables
            .notebooks
            .insert(row.id.clone().expect("seeded row needs an id"), row);
        updated_at
    }

    pub fn insert_note(&self, mut row: NoteRow) -> i64 {
        let mut tables = self.tables.lock().unwrap();
        row.updated_at = tables.tick();
        if row.version == 0 {
            row.version = 1;
        }
        let updated_at = row.updated_at;
        tables
            .notes
            .insert(row.id.clone().expect("seeded row needs an id"), row);
        updated_at
    }

    pub fn insert_attachment(&self, mut row: AttachmentRow) -> i64 {
        let mut tables = self.tables.lock().unwrap();
        row.updated_at = tables.tick();
        let updated_at = row.updated_at;
        tables
            .attachments
            .insert(row.id.clone().expect("seeded row needs an id"), row);
        updated_at
    }

    pub fn notebook(&self, id: &str) -> Option<NotebookRow> {
        self.tables.lock().unwrap().notebooks.get(id).cloned()
    }

    pub fn note(&self, id: &str) -> Option<NoteRow> {
        self.tables.lock().unwrap().notes.get(id).cloned()
    }

    pub fn attachment(&self, id: &str) -> Option<AttachmentRow> {
        self.tables.lock().unwrap().attachments.get(id).cloned()
    }

    pub fn note_count(&self) -> usize {
        self.tables.lock().unwrap().notes.len()
    }

    pub fn attachment_count(&self) -> usize {
        self.tables.lock().unwrap().attachments.len()
    }

    pub fn op_count(&self, prefix: &str) -> usize {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.starts_with(prefix))
            .count()
    }

    /// Number of write operations (upserts and conditional updates) seen.
    pub fn write_count(&self) -> usize {
        self.op_count("upsert") + self.op_count("update")
    }

    async fn observe(&self, op: &str) -> Result<()> {
        self.ops.lock().unwrap().push(op.to_string());
        let delay_ms = self.delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Transport("remote unreachable (simulated)".to_string()));
        }
        Ok(())
    }
}

fn ascending<T: Clone>(
    rows: impl Iterator<Item = T>,
    owner_of: impl Fn(&T) -> &str,
    updated_at_of: impl Fn(&T) -> i64,
    owner: &OwnerId,
    since: Option<i64>,
) -> Vec<T> {
    let mut selected: Vec<T> = rows
        .filter(|row| owner_of(row) == owner.as_str())
        .filter(|row| since.map_or(true, |bound| updated_at_of(row) > bound))
        .collect();
    selected.sort_by_key(|row| updated_at_of(row));
    selected
}

/// Engine-facing handle over a shared [`FakeRemote`].
#[derive(Clone)]
pub struct SharedRemote(pub Arc<FakeRemote>);

impl RemoteService for SharedRemote {
    async fn select_notebooks(&self, owner: &OwnerId, since: Option<i64>) -> Result<Vec<NotebookRow>> {
        self.0.observe("select_notebooks").await?;
        let tables = self.0.tables.lock().unwrap();
        Ok(ascending(
            tables.notebooks.values().cloned(),
            |row| row.owner_id.as_str(),
            |row| row.updated_at,
            owner,
            since,
        ))
    }

    async fn select_notes(&self, owner: &OwnerId, since: Option<i64>) -> Result<Vec<NoteRow>> {
        self.0.observe("select_notes").await?;
        let tables = self.0.tables.lock().unwrap();
        Ok(ascending(
            tables.notes.values().cloned(),
            |row| row.owner_id.as_str(),
            |row| row.updated_at,
            owner,
            since,
        ))
    }

    async fn select_attachments(
        &self,
        owner: &OwnerId,
        since: Option<i64>,
    ) -> Result<Vec<AttachmentRow>> {
        self.0.observe("select_attachments").await?;
        let tables = self.0.tables.lock().unwrap();
        Ok(ascending(
            tables.attachments.values().cloned(),
            |row| row.owner_id.as_str(),
            |row| row.updated_at,
            owner,
            since,
        ))
    }

    async fn upsert_notebook(&self, row: &NotebookRow) -> Result<NotebookRow> {
        self.0.observe("upsert_notebook").await?;
        let mut tables = self.0.tables.lock().unwrap();
        let mut stored = row.clone();
        stored.updated_at = tables.tick();
        let id = stored.id.clone().ok_or_else(|| {
            Error::InvalidInput("notebook upsert without id".to_string())
        })?;
        tables.notebooks.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_note_where_version(
        &self,
        row: &NoteRow,
        expected_version: i64,
    ) -> Result<Option<NoteRow>> {
        self.0.observe("update_note_where_version").await?;
        let mut tables = self.0.tables.lock().unwrap();
        let Some(id) = row.id.clone() else {
            return Ok(None);
        };
        match tables.notes.get(&id) {
            Some(existing) if existing.version == expected_version => {
                let updated_at = tables.tick();
                let mut stored = row.clone();
                stored.version = expected_version + 1;
                stored.updated_at = updated_at;
                tables.notes.insert(id, stored.clone());
                Ok(Some(stored))
            }
            _ => Ok(None),
        }
    }

    async fn fetch_note(&self, owner: &OwnerId, id: &str) -> Result<Option<NoteRow>> {
        self.0.observe("fetch_note").await?;
        let tables = self.0.tables.lock().unwrap();
        Ok(tables
            .notes
            .get(id)
            .filter(|row| row.owner_id == owner.as_str())
            .cloned())
    }

    async fn upsert_note(&self, row: &NoteRow) -> Result<NoteRow> {
        self.0.observe("upsert_note").await?;
        let mut tables = self.0.tables.lock().unwrap();
        let id = row
            .id
            .clone()
            .ok_or_else(|| Error::InvalidInput("note upsert without id".to_string()))?;
        let next_version = tables.notes.get(&id).map_or(1, |existing| existing.version + 1);
        let updated_at = tables.tick();
        let mut stored = row.clone();
        stored.version = next_version;
        stored.updated_at = updated_at;
        tables.notes.insert(id, stored.clone());
        Ok(stored)
    }

    async fn upsert_attachment(&self, row: &AttachmentRow) -> Result<AttachmentRow> {
        self.0.observe("upsert_attachment").await?;
        let mut tables = self.0.tables.lock().unwrap();
        let mut stored = row.clone();
        stored.updated_at = tables.tick();
        let id = stored.id.clone().ok_or_else(|| {
            Error::InvalidInput("attachment upsert without id".to_string())
        })?;
        tables.attachments.insert(id, stored.clone());
        Ok(stored)
    }
}

/// Fake key-addressed blob store with scripted failures.
#[derive(Default)]
pub struct FakeBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
    fail_auth_puts: AtomicUsize,
    fail_permission_puts: AtomicUsize,
    fail_storage_puts: AtomicUsize,
}

impl FakeBlobStore {
    pub fn fail_next_puts_with_auth(&self, count: usize) {
        self.fail_auth_puts.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_puts_with_permission(&self, count: usize) {
        self.fail_permission_puts.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_puts_with_storage(&self, count: usize) {
        self.fail_storage_puts.store(count, Ordering::SeqCst);
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn seed_object(&self, key: &str, bytes: &[u8]) {
        self.objects.lock().unwrap().insert(key.to_string(), bytes.to_vec());
    }
}

fn consume(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| value.checked_sub(1))
        .is_ok()
}

/// Engine-facing handle over a shared [`FakeBlobStore`].
#[derive(Clone)]
pub struct SharedBlobStore(pub Arc<FakeBlobStore>);

impl BlobStore for SharedBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        self.0.puts.fetch_add(1, Ordering::SeqCst);
        if consume(&self.0.fail_auth_puts) {
            return Err(Error::Auth("object store rejected credential (simulated)".to_string()));
        }
        if consume(&self.0.fail_permission_puts) {
            return Err(Error::Permission("bucket write denied (simulated)".to_string()));
        }
        if consume(&self.0.fail_storage_puts) {
            return Err(Error::Storage("object store unavailable (simulated)".to_string()));
        }
        self.0.objects.lock().unwrap().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.0.gets.fetch_add(1, Ordering::SeqCst);
        self.0
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("no such object: {key}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.0.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Fake credential provider with a scriptable identity and expiry.
pub struct FakeCredentials {
    user: OwnerId,
    expired: AtomicBool,
    refresh_should_fail: AtomicBool,
    refreshes: AtomicUsize,
}

impl FakeCredentials {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: OwnerId::new(user),
            expired: AtomicBool::new(false),
            refresh_should_fail: AtomicBool::new(false),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn set_expired(&self, expired: bool) {
        self.expired.store(expired, Ordering::SeqCst);
    }

    pub fn fail_refreshes(&self, fail: bool) {
        self.refresh_should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

/// Engine-facing handle over a shared [`FakeCredentials`].
#[derive(Clone)]
pub struct SharedCredentials(pub Arc<FakeCredentials>);

impl CredentialProvider for SharedCredentials {
    fn user_id(&self) -> Result<OwnerId> {
        Ok(self.0.user.clone())
    }

    fn is_expired(&self) -> bool {
        self.0.expired.load(Ordering::SeqCst)
    }

    async fn refresh(&self) -> Result<()> {
        self.0.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.0.refresh_should_fail.load(Ordering::SeqCst) {
            return Err(Error::Auth("refresh rejected (simulated)".to_string()));
        }
        self.0.expired.store(false, Ordering::SeqCst);
        Ok(())
    }
}
