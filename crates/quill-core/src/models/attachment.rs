//! Attachment metadata model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::entity::OwnerId;
use super::note::NoteId;

/// A unique identifier for an attachment, using UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentId(Uuid);

impl AttachmentId {
    /// Create a new unique attachment ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for AttachmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AttachmentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Attachment metadata persisted for a note.
///
/// Binary bytes live out-of-band in the blob store; `is_uploaded` tracks the
/// two-phase blob-then-metadata commit. While it is false the metadata row
/// must not exist remotely yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Unique attachment identifier.
    pub id: AttachmentId,
    /// Owning identity.
    pub owner_id: OwnerId,
    /// Parent note identifier.
    pub note_id: NoteId,
    /// Blob store object key; empty until the first upload.
    pub storage_path: String,
    /// Original file name.
    pub file_name: String,
    /// Content MIME type.
    pub mime_type: String,
    /// Attachment size in bytes.
    pub file_size: i64,
    /// Path of the locally cached content, when present.
    pub local_cache_path: Option<String>,
    /// Whether the blob upload and metadata commit both completed.
    pub is_uploaded: bool,
    /// Server-assigned timestamp of the last accepted remote write (Unix ms).
    pub remote_updated_at: i64,
    /// Soft-delete tombstone (Unix ms).
    pub deleted_at: Option<i64>,
    /// Local mutations not yet confirmed by the remote service.
    pub is_dirty: bool,
}

impl Attachment {
    /// Create attachment metadata for locally captured content.
    pub fn new(
        owner_id: OwnerId,
        note_id: NoteId,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        file_size: i64,
    ) -> Result<Self> {
        let file_name = file_name.into().trim().to_string();
        let mime_type = mime_type.into().trim().to_string();

        if file_name.is_empty() {
            return Err(Error::InvalidInput(
                "Attachment file_name cannot be empty".to_string(),
            ));
        }
        if mime_type.is_empty() {
            return Err(Error::InvalidInput(
                "Attachment mime_type cannot be empty".to_string(),
            ));
        }
        if file_size < 0 {
            return Err(Error::InvalidInput(
                "Attachment file_size cannot be negative".to_string(),
            ));
        }

        Ok(Self {
            id: AttachmentId::new(),
            owner_id,
            note_id,
            storage_path: String::new(),
            file_name,
            mime_type,
            file_size,
            local_cache_path: None,
            is_uploaded: false,
            remote_updated_at: 0,
            deleted_at: None,
            is_dirty: true,
        })
    }

    /// Whether this attachment carries a soft-delete tombstone.
    #[must_use]
    pub const fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Soft-delete at the given timestamp and queue for push.
    pub fn tombstone(&mut self, now_ms: i64) {
        self.deleted_at = Some(now_ms);
        self.is_dirty = true;
    }
}
