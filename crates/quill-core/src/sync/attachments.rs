//! Two-phase attachment sync and the cache-first read path.
//!
//! Upload order is fixed: blob bytes first, metadata row second. The
//! `is_uploaded` flag flips only after both phases succeeded, so a crash or
//! failure between them leaves the attachment pending and the next run
//! retries the whole sequence against the same deterministic object key.

use crate::auth::CredentialProvider;
use crate::blob::{self, BlobStore};
use crate::cache::AttachmentCache;
use crate::error::{Error, Result, UploadAuthFailure};
use crate::models::{Attachment, AttachmentId, OwnerId};
use crate::remote::{AttachmentRow, RemoteService};
use crate::store::LocalStore;

use super::CancelFlag;

/// Coordinates blob uploads, metadata commits, and content reads.
pub struct AttachmentSyncCoordinator<'a, R, B, C> {
    remote: &'a R,
    blobs: &'a B,
    credentials: &'a C,
    cache: &'a AttachmentCache,
}

impl<'a, R, B, C> AttachmentSyncCoordinator<'a, R, B, C>
where
    R: RemoteService,
    B: BlobStore,
    C: CredentialProvider,
{
    pub(crate) fn new(
        remote: &'a R,
        blobs: &'a B,
        credentials: &'a C,
        cache: &'a AttachmentCache,
    ) -> Self {
        Self {
            remote,
            blobs,
            credentials,
            cache,
        }
    }

    /// Push every attachment still waiting on its two-phase commit.
    ///
    /// One attachment's transport or storage failure is logged and the batch
    /// continues; authorization failures abort the run.
    pub(crate) async fn push_pending(
        &self,
        store: &mut LocalStore,
        owner: &OwnerId,
        cancel: &CancelFlag,
    ) -> Result<()> {
        for id in store.pending_upload_attachment_ids(owner) {
            cancel.check()?;
            match self.push_one(store, owner, id).await {
                Ok(()) => {}
                Err(
                    error @ (Error::UploadAuth { .. }
                    | Error::Auth(_)
                    | Error::Permission(_)
                    | Error::Cancelled),
                ) => return Err(error),
                Err(error) => {
                    tracing::warn!(
                        attachment = %id,
                        %error,
                        "Attachment push failed; flags left set for the next run"
                    );
                }
            }
        }
        Ok(())
    }

    /// Push metadata for dirty attachments that already completed the
    /// two-phase commit, e.g. tombstone propagation.
    pub(crate) async fn push_dirty_metadata(
        &self,
        store: &mut LocalStore,
        owner: &OwnerId,
        cancel: &CancelFlag,
    ) -> Result<()> {
        for id in store.dirty_uploaded_attachment_ids(owner) {
            cancel.check()?;
            let Some(snapshot) = store.attachment(&id).cloned() else {
                continue;
            };
            let row = AttachmentRow::from_local(&snapshot);
            match self.remote.upsert_attachment(&row).await {
                Ok(server) => {
                    if let Some(attachment) = store.attachment_mut(&id) {
                        attachment.remote_updated_at = server.updated_at;
                        attachment.is_dirty = false;
                    }
                }
                Err(error @ (Error::Auth(_) | Error::Permission(_) | Error::Cancelled)) => {
                    return Err(error)
                }
                Err(error) => {
                    tracing::warn!(
                        attachment = %id,
                        %error,
                        "Attachment metadata push failed; will retry next run"
                    );
                }
            }
        }
        Ok(())
    }

    /// Fetch attachment content, cache first, populating the cache on a miss.
    pub async fn load(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        if let Some(bytes) = self.cache.get(&attachment.id, &attachment.file_name)? {
            return Ok(bytes);
        }
        if attachment.storage_path.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Attachment {} has no uploaded content to fetch",
                attachment.id
            )));
        }

        let bytes = self.blobs.get(&attachment.storage_path).await?;
        self.cache.put(&attachment.id, &attachment.file_name, &bytes)?;
        Ok(bytes)
    }

    async fn push_one(&self, store: &mut LocalStore, owner: &OwnerId, id: AttachmentId) -> Result<()> {
        let Some(snapshot) = store.attachment(&id).cloned() else {
            return Ok(());
        };
        let key = blob::object_key(owner, &id, &snapshot.file_name)?;
        let bytes = self.local_bytes(&snapshot)?;

        self.upload_with_retry(owner, &key, &bytes, &snapshot.mime_type).await?;

        let mut row = AttachmentRow::from_local(&snapshot);
        row.storage_path = key.clone();
        let server = self.remote.upsert_attachment(&row).await?;

        if let Some(attachment) = store.attachment_mut(&id) {
            attachment.storage_path = key;
            attachment.is_uploaded = true;
            attachment.is_dirty = false;
            attachment.remote_updated_at = server.updated_at;
        }
        tracing::debug!(attachment = %id, "Attachment upload and metadata commit completed");
        Ok(())
    }

    /// Upload with exactly one credential refresh and retry on an
    /// authorization failure. A repeated failure is classified so callers can
    /// surface why attachment uploads are stuck.
    async fn upload_with_retry(
        &self,
        owner: &OwnerId,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<()> {
        let first = match self.blobs.put(key, bytes, content_type).await {
            Ok(()) => return Ok(()),
            Err(error) if error.is_authorization() => error,
            Err(error) => return Err(error),
        };

        tracing::info!(
            %key,
            %first,
            "Upload authorization failed; refreshing credential and retrying once"
        );
        if let Err(refresh_error) = self.credentials.refresh().await {
            return Err(self.classify(owner, refresh_error));
        }

        match self.blobs.put(key, bytes, content_type).await {
            Ok(()) => Ok(()),
            Err(retry_error) if retry_error.is_authorization() => {
                Err(self.classify(owner, retry_error))
            }
            Err(retry_error) => Err(retry_error),
        }
    }

    fn classify(&self, owner: &OwnerId, error: Error) -> Error {
        let kind = match &error {
            Error::Permission(_) => UploadAuthFailure::PermissionDenied,
            _ => match self.credentials.user_id() {
                Ok(identity) if &identity != owner => UploadAuthFailure::IdentityMismatch,
                _ if self.credentials.is_expired() => UploadAuthFailure::ExpiredCredential,
                _ => UploadAuthFailure::Unknown,
            },
        };
        Error::UploadAuth {
            kind,
            message: error.to_string(),
        }
    }

    fn local_bytes(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        if let Some(bytes) = self.cache.get(&attachment.id, &attachment.file_name)? {
            return Ok(bytes);
        }
        if let Some(path) = attachment.local_cache_path.as_deref() {
            return Ok(std::fs::read(path)?);
        }
        Err(Error::InvalidInput(format!(
            "No local content available for attachment {}",
            attachment.id
        )))
    }
}
