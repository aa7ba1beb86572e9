//! Blob storage abstraction for attachment bytes.
//!
//! Binary content travels out-of-band from the metadata rows: bytes go to a
//! key-addressed object store, namespaced per owner. The engine talks to the
//! [`BlobStore`] trait so tests can substitute an in-process double.

mod s3;

use crate::error::{Error, Result};
use crate::models::{AttachmentId, OwnerId};
use crate::util::sanitize_token;

pub use s3::{S3BlobStore, S3Config};

/// Key-addressed binary storage.
pub trait BlobStore: Send + Sync {
    /// Store bytes under a key with the given content type.
    fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Fetch bytes by key.
    fn get(&self, key: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;

    /// Delete the object under a key.
    fn delete(&self, key: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Deterministic object key for an attachment blob.
///
/// Derived from owner id, attachment id, and the file extension only, so a
/// retried upload lands on the same key and the second put is idempotent.
pub fn object_key(owner: &OwnerId, attachment_id: &AttachmentId, file_name: &str) -> Result<String> {
    let owner_token = sanitize_token(owner.as_str());
    if owner_token.is_empty() {
        return Err(Error::InvalidInput(
            "Blob owner namespace cannot be empty".to_string(),
        ));
    }

    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| sanitize_token(ext))
        .filter(|ext| !ext.is_empty());

    Ok(match extension {
        Some(ext) => format!("attachments/{owner_token}/{attachment_id}.{ext}"),
        None => format!("attachments/{owner_token}/{attachment_id}"),
    })
}
