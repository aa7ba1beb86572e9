//! Sync engine orchestration.
//!
//! A run executes fixed phases: push notebooks, push notes (optimistic
//! concurrency), push attachments (two-phase), then pull all three entity
//! types incrementally from their watermarks. The engine is the single
//! writer of the local store; it owns the store between [`SyncEngine::configure`]
//! and [`SyncEngine::reset_for_sign_out`] and commits a snapshot after every
//! run that changed anything, even a failed one, so partial progress
//! (cleared flags, advanced watermarks) survives.

pub mod attachments;
mod conflict;
mod pull;
mod watermark;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::Mutex;

use crate::auth::CredentialProvider;
use crate::blob::BlobStore;
use crate::cache::AttachmentCache;
use crate::error::{Error, Result};
use crate::models::{AttachmentId, EntityKind, OwnerId};
use crate::remote::{NotebookRow, RemoteService};
use crate::store::LocalStore;
use crate::util::unix_millis_now;

use attachments::AttachmentSyncCoordinator;
use pull::{AttachmentPull, NotePull, NotebookPull};

/// Shared cooperative-cancellation flag.
///
/// Observed at phase boundaries, between batch items, and every few rows of a
/// pulled batch. Cancellation is not an error condition; a cancelled run ends
/// quietly and the next run picks up from the persisted flags.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the in-flight run.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn rearm(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SyncStatus {
    last_sync_at: Option<i64>,
    last_error: Option<String>,
}

struct EngineState {
    owner: OwnerId,
    store: LocalStore,
}

/// Offline-first synchronization engine.
///
/// Generic over its remote service, blob store, and credential provider so
/// tests run against in-process doubles. Wrap the engine in an `Arc` to share
/// it between the UI task and a background scheduler; overlapping
/// [`SyncEngine::sync_now`] calls coalesce into the run already in flight.
pub struct SyncEngine<R, B, C> {
    remote: R,
    blobs: B,
    credentials: C,
    cache: AttachmentCache,
    state: Mutex<Option<EngineState>>,
    in_flight: AtomicBool,
    cancel: CancelFlag,
    status: StdMutex<SyncStatus>,
}

impl<R, B, C> SyncEngine<R, B, C>
where
    R: RemoteService,
    B: BlobStore,
    C: CredentialProvider,
{
    pub fn new(remote: R, blobs: B, credentials: C, cache: AttachmentCache) -> Self {
        Self {
            remote,
            blobs,
            credentials,
            cache,
            state: Mutex::new(None),
            in_flight: AtomicBool::new(false),
            cancel: CancelFlag::new(),
            status: StdMutex::new(SyncStatus::default()),
        }
    }

    /// Hand the engine its owner identity and local store. Must be called
    /// after sign-in, before the first run.
    pub async fn configure(&self, owner: OwnerId, store: LocalStore) {
        let mut state = self.state.lock().await;
        *state = Some(EngineState { owner, store });
        self.cancel.rearm();
    }

    /// Handle for requesting cancellation of the in-flight run.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Whether a run is currently in flight.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Completion time of the last fully successful run (Unix ms).
    #[must_use]
    pub fn last_sync_at(&self) -> Option<i64> {
        self.status_snapshot().last_sync_at
    }

    /// Rendered error of the last failed run, cleared by the next success.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.status_snapshot().last_error
    }

    /// Execute one full sync run.
    ///
    /// Returns `Ok(())` immediately when a run is already in flight, and
    /// `Ok(())` for a cancelled run. Any other failure is recorded as the
    /// last error and returned.
    pub async fn sync_now(&self) -> Result<()> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Sync already in flight; request coalesced");
            return Ok(());
        }
        let _guard = InFlightGuard(&self.in_flight);

        let mut state = self.state.lock().await;
        let Some(state) = state.as_mut() else {
            let error = not_configured();
            self.record_failure(&error);
            return Err(error);
        };
        let owner = state.owner.clone();
        self.cancel.rearm();

        tracing::info!(owner = %owner, "Starting sync run");
        let mut outcome = self.run(&owner, &mut state.store).await;

        if let Err(commit_error) = state.store.commit() {
            tracing::error!(%commit_error, "Failed to commit store snapshot after sync run");
            if outcome.is_ok() {
                outcome = Err(commit_error);
            }
        }

        match outcome {
            Ok(()) => {
                self.record_success();
                tracing::info!(owner = %owner, "Sync run completed");
                Ok(())
            }
            Err(Error::Cancelled) => {
                tracing::info!(owner = %owner, "Sync run cancelled");
                Ok(())
            }
            Err(error) => {
                self.record_failure(&error);
                tracing::warn!(owner = %owner, %error, "Sync run failed");
                Err(error)
            }
        }
    }

    /// Cancel any in-flight run, commit and release the store, and forget the
    /// owner. The owner's watermarks are dropped so the next sign-in pulls
    /// from scratch, and the attachment content cache is wiped.
    pub async fn reset_for_sign_out(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock().await;
        if let Some(mut state) = state.take() {
            state.store.clear_watermarks(&state.owner);
            if let Err(error) = state.store.commit() {
                tracing::warn!(%error, "Failed to commit store on sign-out");
            }
            tracing::info!(owner = %state.owner, "Engine reset for sign-out");
        }
        if let Err(error) = self.cache.clear() {
            tracing::warn!(%error, "Failed to clear attachment cache on sign-out");
        }

        let mut status = self
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *status = SyncStatus::default();
    }

    /// Read from the store outside a sync run.
    pub async fn with_store<T>(&self, read: impl FnOnce(&OwnerId, &LocalStore) -> T) -> Result<T> {
        let state = self.state.lock().await;
        let state = state.as_ref().ok_or_else(not_configured)?;
        Ok(read(&state.owner, &state.store))
    }

    /// Mutate the store outside a sync run (local edits, tombstones) and
    /// commit the snapshot.
    pub async fn with_store_mut<T>(
        &self,
        edit: impl FnOnce(&OwnerId, &mut LocalStore) -> T,
    ) -> Result<T> {
        let mut state = self.state.lock().await;
        let state = state.as_mut().ok_or_else(not_configured)?;
        let value = edit(&state.owner, &mut state.store);
        state.store.commit()?;
        Ok(value)
    }

    /// Fetch attachment content, cache first.
    pub async fn load_attachment(&self, id: &AttachmentId) -> Result<Vec<u8>> {
        let attachment = {
            let state = self.state.lock().await;
            let state = state.as_ref().ok_or_else(not_configured)?;
            state
                .store
                .attachment(id)
                .cloned()
                .ok_or_else(|| Error::InvalidInput(format!("Unknown attachment: {id}")))?
        };

        let coordinator = AttachmentSyncCoordinator::new(
            &self.remote,
            &self.blobs,
            &self.credentials,
            &self.cache,
        );
        coordinator.load(&attachment).await
    }

    async fn run(&self, owner: &OwnerId, store: &mut LocalStore) -> Result<()> {
        let cancel = &self.cancel;
        cancel.check()?;

        self.push_notebooks(owner, store, cancel).await?;
        self.push_notes(owner, store, cancel).await?;

        let coordinator = AttachmentSyncCoordinator::new(
            &self.remote,
            &self.blobs,
            &self.credentials,
            &self.cache,
        );
        coordinator.push_pending(store, owner, cancel).await?;
        coordinator.push_dirty_metadata(store, owner, cancel).await?;

        cancel.check()?;
        let since = watermark::since(store, owner, EntityKind::Notebook);
        let rows = self.remote.select_notebooks(owner, since).await?;
        pull::apply_batch::<NotebookPull>(store, owner, &rows, cancel).await?;

        cancel.check()?;
        let since = watermark::since(store, owner, EntityKind::Note);
        let rows = self.remote.select_notes(owner, since).await?;
        pull::apply_batch::<NotePull>(store, owner, &rows, cancel).await?;

        cancel.check()?;
        let since = watermark::since(store, owner, EntityKind::Attachment);
        let rows = self.remote.select_attachments(owner, since).await?;
        pull::apply_batch::<AttachmentPull>(store, owner, &rows, cancel).await?;

        Ok(())
    }

    async fn push_notebooks(
        &self,
        owner: &OwnerId,
        store: &mut LocalStore,
        cancel: &CancelFlag,
    ) -> Result<()> {
        for id in store.dirty_notebook_ids(owner) {
            cancel.check()?;
            let Some(snapshot) = store.notebook(&id).cloned() else {
                continue;
            };
            let row = NotebookRow::from_local(&snapshot);
            let server = self.remote.upsert_notebook(&row).await?;
            if let Some(notebook) = store.notebook_mut(&id) {
                notebook.remote_updated_at = server.updated_at;
                notebook.is_dirty = false;
            }
        }
        Ok(())
    }

    async fn push_notes(
        &self,
        owner: &OwnerId,
        store: &mut LocalStore,
        cancel: &CancelFlag,
    ) -> Result<()> {
        for id in store.dirty_note_ids(owner) {
            cancel.check()?;
            conflict::push_note(&self.remote, store, id).await?;
        }
        Ok(())
    }

    fn record_success(&self) {
        let mut status = self
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        status.last_sync_at = Some(unix_millis_now());
        status.last_error = None;
    }

    fn record_failure(&self, error: &Error) {
        let mut status = self
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        status.last_error = Some(error.to_string());
    }

    fn status_snapshot(&self) -> SyncStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn not_configured() -> Error {
    Error::InvalidInput("Sync engine is not configured".to_string())
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_roundtrip() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        assert!(flag.check().is_ok());

        flag.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(Error::Cancelled)));

        flag.rearm();
        assert!(!flag.is_cancelled());
    }

    #[test]
    fn cancel_flag_clones_share_state() {
        let flag = CancelFlag::new();
        let handle = flag.clone();
        handle.cancel();
        assert!(flag.is_cancelled());
    }
}
