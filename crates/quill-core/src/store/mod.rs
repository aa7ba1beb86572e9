//! Device-local entity store.
//!
//! An explicit store keyed by id with per-owner queries. Relationships are
//! never maintained behind the caller's back; "notes of notebook X" is an
//! explicit query. The sync engine is the single writer; it owns the store
//! for the duration of a run and calls [`LocalStore::commit`] at the end.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{
    Attachment, AttachmentId, EntityKind, Note, NoteId, Notebook, NotebookId, OwnerId,
};

/// Persisted watermark entry: last incorporated remote timestamp for one
/// `(owner, entity kind)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct WatermarkEntry {
    owner_id: OwnerId,
    kind: EntityKind,
    last_pulled_at: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreSnapshot {
    notebooks: Vec<Notebook>,
    notes: Vec<Note>,
    attachments: Vec<Attachment>,
    watermarks: Vec<WatermarkEntry>,
}

/// Typed, predicate-queryable persistence for the replicated entities.
#[derive(Debug, Default)]
pub struct LocalStore {
    path: Option<PathBuf>,
    notebooks: HashMap<NotebookId, Notebook>,
    notes: HashMap<NoteId, Note>,
    attachments: HashMap<AttachmentId, Attachment>,
    watermarks: HashMap<(OwnerId, EntityKind), i64>,
    changed: bool,
}

impl LocalStore {
    /// Open a store backed by a JSON snapshot file, loading it if present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = if path.exists() {
            let bytes = std::fs::read(&path)?;
            let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
            Self::from_snapshot(snapshot)
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Self::default()
        };
        store.path = Some(path);
        Ok(store)
    }

    /// Open a store without backing persistence (primarily for tests).
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            path: None,
            notebooks: snapshot
                .notebooks
                .into_iter()
                .map(|notebook| (notebook.id, notebook))
                .collect(),
            notes: snapshot.notes.into_iter().map(|note| (note.id, note)).collect(),
            attachments: snapshot
                .attachments
                .into_iter()
                .map(|attachment| (attachment.id, attachment))
                .collect(),
            watermarks: snapshot
                .watermarks
                .into_iter()
                .map(|entry| ((entry.owner_id, entry.kind), entry.last_pulled_at))
                .collect(),
            changed: false,
        }
    }

    fn to_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            notebooks: self.notebooks.values().cloned().collect(),
            notes: self.notes.values().cloned().collect(),
            attachments: self.attachments.values().cloned().collect(),
            watermarks: self
                .watermarks
                .iter()
                .map(|((owner_id, kind), last_pulled_at)| WatermarkEntry {
                    owner_id: owner_id.clone(),
                    kind: *kind,
                    last_pulled_at: *last_pulled_at,
                })
                .collect(),
        }
    }

    /// Whether any mutation happened since the last commit.
    #[must_use]
    pub const fn is_changed(&self) -> bool {
        self.changed
    }

    /// Write the snapshot to disk when changed. No-op for in-memory stores.
    ///
    /// The snapshot is written to a sibling temp file and renamed into place
    /// so a crash mid-write cannot corrupt the previous snapshot.
    pub fn commit(&mut self) -> Result<()> {
        if !self.changed {
            return Ok(());
        }
        if let Some(path) = self.path.clone() {
            let bytes = serde_json::to_vec_pretty(&self.to_snapshot())?;
            let tmp_path = tmp_sibling(&path)?;
            std::fs::write(&tmp_path, bytes)?;
            std::fs::rename(&tmp_path, &path)?;
        }
        self.changed = false;
        Ok(())
    }

    // -- notebooks ----------------------------------------------------------

    /// Fetch a notebook by id.
    #[must_use]
    pub fn notebook(&self, id: &NotebookId) -> Option<&Notebook> {
        self.notebooks.get(id)
    }

    /// Fetch a notebook for mutation; marks the store changed.
    pub fn notebook_mut(&mut self, id: &NotebookId) -> Option<&mut Notebook> {
        self.changed = true;
        self.notebooks.get_mut(id)
    }

    /// Insert or replace a notebook.
    pub fn put_notebook(&mut self, notebook: Notebook) {
        self.changed = true;
        self.notebooks.insert(notebook.id, notebook);
    }

    /// Notebooks of one owner matching a predicate.
    pub fn notebooks_where(
        &self,
        owner: &OwnerId,
        predicate: impl Fn(&Notebook) -> bool,
    ) -> Vec<&Notebook> {
        let mut rows: Vec<&Notebook> = self
            .notebooks
            .values()
            .filter(|notebook| &notebook.owner_id == owner && predicate(notebook))
            .collect();
        rows.sort_by_key(|notebook| notebook.id.as_str());
        rows
    }

    /// Ids of dirty notebooks for one owner, stable order.
    #[must_use]
    pub fn dirty_notebook_ids(&self, owner: &OwnerId) -> Vec<NotebookId> {
        self.notebooks_where(owner, |notebook| notebook.is_dirty)
            .into_iter()
            .map(|notebook| notebook.id)
            .collect()
    }

    // -- notes --------------------------------------------------------------

    /// Fetch a note by id.
    #[must_use]
    pub fn note(&self, id: &NoteId) -> Option<&Note> {
        self.notes.get(id)
    }

    /// Fetch a note for mutation; marks the store changed.
    pub fn note_mut(&mut self, id: &NoteId) -> Option<&mut Note> {
        self.changed = true;
        self.notes.get_mut(id)
    }

    /// Insert or replace a note.
    pub fn put_note(&mut self, note: Note) {
        self.changed = true;
        self.notes.insert(note.id, note);
    }

    /// Notes of one owner matching a predicate.
    pub fn notes_where(&self, owner: &OwnerId, predicate: impl Fn(&Note) -> bool) -> Vec<&Note> {
        let mut rows: Vec<&Note> = self
            .notes
            .values()
            .filter(|note| &note.owner_id == owner && predicate(note))
            .collect();
        rows.sort_by_key(|note| note.id.as_str());
        rows
    }

    /// Ids of dirty notes for one owner, stable order.
    #[must_use]
    pub fn dirty_note_ids(&self, owner: &OwnerId) -> Vec<NoteId> {
        self.notes_where(owner, |note| note.is_dirty)
            .into_iter()
            .map(|note| note.id)
            .collect()
    }

    /// Non-tombstoned notes belonging to a notebook, as an explicit query.
    pub fn notes_in_notebook(&self, owner: &OwnerId, notebook_id: &NotebookId) -> Vec<&Note> {
        self.notes_where(owner, |note| {
            &note.notebook_id == notebook_id && !note.is_tombstoned()
        })
    }

    // -- attachments --------------------------------------------------------

    /// Fetch attachment metadata by id.
    #[must_use]
    pub fn attachment(&self, id: &AttachmentId) -> Option<&Attachment> {
        self.attachments.get(id)
    }

    /// Fetch attachment metadata for mutation; marks the store changed.
    pub fn attachment_mut(&mut self, id: &AttachmentId) -> Option<&mut Attachment> {
        self.changed = true;
        self.attachments.get_mut(id)
    }

    /// Insert or replace attachment metadata.
    pub fn put_attachment(&mut self, attachment: Attachment) {
        self.changed = true;
        self.attachments.insert(attachment.id, attachment);
    }

    /// Attachments of one owner matching a predicate.
    pub fn attachments_where(
        &self,
        owner: &OwnerId,
        predicate: impl Fn(&Attachment) -> bool,
    ) -> Vec<&Attachment> {
        let mut rows: Vec<&Attachment> = self
            .attachments
            .values()
            .filter(|attachment| &attachment.owner_id == owner && predicate(attachment))
            .collect();
        rows.sort_by_key(|attachment| attachment.id.as_str());
        rows
    }

    /// Ids of attachments still waiting on the two-phase commit: not yet
    /// uploaded and not tombstoned.
    #[must_use]
    pub fn pending_upload_attachment_ids(&self, owner: &OwnerId) -> Vec<AttachmentId> {
        self.attachments_where(owner, |attachment| {
            !attachment.is_uploaded && !attachment.is_tombstoned()
        })
        .into_iter()
        .map(|attachment| attachment.id)
        .collect()
    }

    /// Ids of dirty attachments that already completed the two-phase commit
    /// (metadata-only pushes, e.g. tombstone propagation).
    #[must_use]
    pub fn dirty_uploaded_attachment_ids(&self, owner: &OwnerId) -> Vec<AttachmentId> {
        self.attachments_where(owner, |attachment| attachment.is_dirty && attachment.is_uploaded)
            .into_iter()
            .map(|attachment| attachment.id)
            .collect()
    }

    // -- watermarks ---------------------------------------------------------

    /// Last incorporated remote timestamp for `(owner, kind)`.
    #[must_use]
    pub fn watermark(&self, owner: &OwnerId, kind: EntityKind) -> Option<i64> {
        self.watermarks.get(&(owner.clone(), kind)).copied()
    }

    /// Overwrite the watermark for `(owner, kind)`.
    ///
    /// The sync engine keeps the stored value monotonic; it never writes a
    /// value below the current one.
    pub fn set_watermark(&mut self, owner: &OwnerId, kind: EntityKind, last_pulled_at: i64) {
        self.changed = true;
        self.watermarks.insert((owner.clone(), kind), last_pulled_at);
    }

    /// Drop all watermarks for one owner (sign-out path).
    pub fn clear_watermarks(&mut self, owner: &OwnerId) {
        self.changed = true;
        self.watermarks.retain(|(entry_owner, _), _| entry_owner != owner);
    }
}

fn tmp_sibling(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::Store(format!("invalid store path: {}", path.display())))?;
    Ok(path.with_file_name(format!("{file_name}.tmp")))
}
