//! Remote data service abstraction.
//!
//! The remote service exposes three row collections (notebooks, notes,
//! attachment metadata) with filtered/ordered selects, a conditional update
//! for notes, and upsert-by-id. Every write returns the server-assigned
//! `updated_at` (and `version` for notes). The engine only talks to the
//! [`RemoteService`] trait so tests can substitute an in-process double.

mod postgrest;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Attachment, Note, Notebook, OwnerId};

pub use postgrest::PostgrestRemote;

/// Wire representation of a notebook row.
///
/// `id` is optional so malformed server rows deserialize and can be rejected
/// by identity validation instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookRow {
    /// Row identity
    pub id: Option<String>,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    /// Server-assigned write timestamp (Unix ms)
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl NotebookRow {
    /// Build the push payload for a local notebook.
    #[must_use]
    pub fn from_local(notebook: &Notebook) -> Self {
        Self {
            id: Some(notebook.id.as_str()),
            owner_id: notebook.owner_id.as_str().to_string(),
            title: notebook.title.clone(),
            color: notebook.color.clone(),
            icon: notebook.icon.clone(),
            updated_at: notebook.remote_updated_at,
            deleted_at: notebook.deleted_at,
        }
    }
}

/// Wire representation of a note row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRow {
    /// Row identity
    pub id: Option<String>,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub notebook_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub word_count: i64,
    #[serde(default)]
    pub char_count: i64,
    /// Server-assigned monotonic version
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub conflict_parent_id: Option<String>,
    /// Server-assigned write timestamp (Unix ms)
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl NoteRow {
    /// Build the push payload for a local note.
    #[must_use]
    pub fn from_local(note: &Note) -> Self {
        Self {
            id: Some(note.id.as_str()),
            owner_id: note.owner_id.as_str().to_string(),
            notebook_id: Some(note.notebook_id.as_str()),
            title: note.title.clone(),
            summary: note.summary.clone(),
            content: note.content.clone(),
            word_count: note.word_count,
            char_count: note.char_count,
            version: note.version,
            conflict_parent_id: note.conflict_parent_id.map(|id| id.as_str()),
            updated_at: note.remote_updated_at,
            deleted_at: note.deleted_at,
        }
    }
}

/// Wire representation of an attachment metadata row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRow {
    /// Row identity
    pub id: Option<String>,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub note_id: Option<String>,
    #[serde(default)]
    pub storage_path: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub file_size: i64,
    /// Server-assigned write timestamp (Unix ms)
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl AttachmentRow {
    /// Build the push payload for local attachment metadata.
    #[must_use]
    pub fn from_local(attachment: &Attachment) -> Self {
        Self {
            id: Some(attachment.id.as_str()),
            owner_id: attachment.owner_id.as_str().to_string(),
            note_id: Some(attachment.note_id.as_str()),
            storage_path: attachment.storage_path.clone(),
            file_name: attachment.file_name.clone(),
            mime_type: attachment.mime_type.clone(),
            file_size: attachment.file_size,
            updated_at: attachment.remote_updated_at,
            deleted_at: attachment.deleted_at,
        }
    }
}

/// CRUD contract against the three remote row collections.
///
/// Selects filter on `updated_at > since` when a watermark is supplied and
/// always return rows in ascending `updated_at` order.
pub trait RemoteService: Send + Sync {
    /// Fetch notebook rows newer than the watermark, ascending.
    fn select_notebooks(
        &self,
        owner: &OwnerId,
        since: Option<i64>,
    ) -> impl std::future::Future<Output = Result<Vec<NotebookRow>>> + Send;

    /// Fetch note rows newer than the watermark, ascending.
    fn select_notes(
        &self,
        owner: &OwnerId,
        since: Option<i64>,
    ) -> impl std::future::Future<Output = Result<Vec<NoteRow>>> + Send;

    /// Fetch attachment metadata rows newer than the watermark, ascending.
    fn select_attachments(
        &self,
        owner: &OwnerId,
        since: Option<i64>,
    ) -> impl std::future::Future<Output = Result<Vec<AttachmentRow>>> + Send;

    /// Upsert a notebook by id (last-writer-wins).
    fn upsert_notebook(
        &self,
        row: &NotebookRow,
    ) -> impl std::future::Future<Output = Result<NotebookRow>> + Send;

    /// Conditional update: `id = row.id AND version = expected_version`.
    ///
    /// Returns the server row when exactly one row was affected, `None` when
    /// zero rows matched (the optimistic-concurrency miss signal).
    fn update_note_where_version(
        &self,
        row: &NoteRow,
        expected_version: i64,
    ) -> impl std::future::Future<Output = Result<Option<NoteRow>>> + Send;

    /// Fetch a single note row by id, `None` when absent upstream.
    fn fetch_note(
        &self,
        owner: &OwnerId,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<NoteRow>>> + Send;

    /// Upsert a note by id (create path of the conflict resolver).
    fn upsert_note(
        &self,
        row: &NoteRow,
    ) -> impl std::future::Future<Output = Result<NoteRow>> + Send;

    /// Upsert attachment metadata by id.
    fn upsert_attachment(
        &self,
        row: &AttachmentRow,
    ) -> impl std::future::Future<Output = Result<AttachmentRow>> + Send;
}
