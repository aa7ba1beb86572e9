//! Incremental pull application.
//!
//! Each pulled batch arrives in ascending `updated_at` order. Rows are applied
//! one by one: dirty local records are skipped so unsynced edits survive,
//! rows with a missing or unparseable identity are skipped with a diagnostic,
//! and everything else overwrites local state without marking it dirty.
//! The watermark advances to the highest `updated_at` observed in the batch,
//! including on cancellation, so already processed rows are not re-fetched.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::{
    Attachment, AttachmentId, EntityKind, Note, NoteId, Notebook, NotebookId, OwnerId,
};
use crate::remote::{AttachmentRow, NoteRow, NotebookRow};
use crate::store::LocalStore;

use super::{watermark, CancelFlag};

/// Rows processed between cancellation checks and scheduler yields.
pub(crate) const YIELD_EVERY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowOutcome {
    Applied,
    SkippedDirty,
    SkippedInvalid,
}

/// Per-batch application counters, for diagnostics and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PullSummary {
    pub applied: usize,
    pub skipped_dirty: usize,
    pub skipped_invalid: usize,
}

/// Per-entity application of one pulled row.
pub(crate) trait PullApply {
    type Row;
    const KIND: EntityKind;

    fn row_updated_at(row: &Self::Row) -> i64;
    fn apply(store: &mut LocalStore, owner: &OwnerId, row: &Self::Row) -> RowOutcome;
}

/// Apply one pulled batch and advance the watermark.
pub(crate) async fn apply_batch<P: PullApply>(
    store: &mut LocalStore,
    owner: &OwnerId,
    rows: &[P::Row],
    cancel: &CancelFlag,
) -> Result<PullSummary> {
    let mut summary = PullSummary::default();
    let mut observed_max: Option<i64> = None;

    for (index, row) in rows.iter().enumerate() {
        if index > 0 && index % YIELD_EVERY == 0 {
            if cancel.is_cancelled() {
                watermark::advance_observed(store, owner, P::KIND, observed_max);
                return Err(Error::Cancelled);
            }
            tokio::task::yield_now().await;
        }

        match P::apply(store, owner, row) {
            RowOutcome::Applied => summary.applied += 1,
            RowOutcome::SkippedDirty => summary.skipped_dirty += 1,
            RowOutcome::SkippedInvalid => {
                summary.skipped_invalid += 1;
                let error = Error::Validation(format!(
                    "{} row with missing or invalid identity",
                    P::KIND
                ));
                tracing::warn!(%error, "Skipping remote row");
            }
        }

        let updated_at = P::row_updated_at(row);
        observed_max = Some(observed_max.map_or(updated_at, |max| max.max(updated_at)));
    }

    watermark::advance_observed(store, owner, P::KIND, observed_max);
    tracing::debug!(
        kind = %P::KIND,
        applied = summary.applied,
        skipped_dirty = summary.skipped_dirty,
        skipped_invalid = summary.skipped_invalid,
        "Applied pulled batch"
    );
    Ok(summary)
}

pub(crate) struct NotebookPull;

impl PullApply for NotebookPull {
    type Row = NotebookRow;
    const KIND: EntityKind = EntityKind::Notebook;

    fn row_updated_at(row: &Self::Row) -> i64 {
        row.updated_at
    }

    fn apply(store: &mut LocalStore, owner: &OwnerId, row: &Self::Row) -> RowOutcome {
        let Some(id) = parse_id::<NotebookId>(row.id.as_deref()) else {
            return RowOutcome::SkippedInvalid;
        };
        if store.notebook(&id).is_some_and(|notebook| notebook.is_dirty) {
            return RowOutcome::SkippedDirty;
        }

        let mut notebook = store.notebook(&id).cloned().unwrap_or_else(|| Notebook {
            id,
            owner_id: owner.clone(),
            title: String::new(),
            color: None,
            icon: None,
            remote_updated_at: 0,
            deleted_at: None,
            is_dirty: false,
        });
        notebook.title = row.title.clone();
        notebook.color = row.color.clone();
        notebook.icon = row.icon.clone();
        notebook.remote_updated_at = row.updated_at;
        notebook.deleted_at = row.deleted_at;
        notebook.is_dirty = false;
        store.put_notebook(notebook);
        RowOutcome::Applied
    }
}

pub(crate) struct NotePull;

impl PullApply for NotePull {
    type Row = NoteRow;
    const KIND: EntityKind = EntityKind::Note;

    fn row_updated_at(row: &Self::Row) -> i64 {
        row.updated_at
    }

    fn apply(store: &mut LocalStore, owner: &OwnerId, row: &Self::Row) -> RowOutcome {
        let Some(id) = parse_id::<NoteId>(row.id.as_deref()) else {
            return RowOutcome::SkippedInvalid;
        };
        if store.note(&id).is_some_and(|note| note.is_dirty) {
            return RowOutcome::SkippedDirty;
        }

        let mut note = match store.note(&id) {
            Some(existing) => existing.clone(),
            None => {
                // A note cannot exist without its notebook reference.
                let Some(notebook_id) = parse_id::<NotebookId>(row.notebook_id.as_deref()) else {
                    return RowOutcome::SkippedInvalid;
                };
                Note {
                    id,
                    owner_id: owner.clone(),
                    notebook_id,
                    title: String::new(),
                    summary: String::new(),
                    content: String::new(),
                    word_count: 0,
                    char_count: 0,
                    version: 0,
                    conflict_parent_id: None,
                    remote_updated_at: 0,
                    deleted_at: None,
                    is_dirty: false,
                }
            }
        };
        apply_note_fields(&mut note, row);
        store.put_note(note);
        RowOutcome::Applied
    }
}

pub(crate) struct AttachmentPull;

impl PullApply for AttachmentPull {
    type Row = AttachmentRow;
    const KIND: EntityKind = EntityKind::Attachment;

    fn row_updated_at(row: &Self::Row) -> i64 {
        row.updated_at
    }

    fn apply(store: &mut LocalStore, owner: &OwnerId, row: &Self::Row) -> RowOutcome {
        let Some(id) = parse_id::<AttachmentId>(row.id.as_deref()) else {
            return RowOutcome::SkippedInvalid;
        };
        if store.attachment(&id).is_some_and(|attachment| attachment.is_dirty) {
            return RowOutcome::SkippedDirty;
        }

        let mut attachment = match store.attachment(&id) {
            Some(existing) => existing.clone(),
            None => {
                let Some(note_id) = parse_id::<NoteId>(row.note_id.as_deref()) else {
                    return RowOutcome::SkippedInvalid;
                };
                Attachment {
                    id,
                    owner_id: owner.clone(),
                    note_id,
                    storage_path: String::new(),
                    file_name: String::new(),
                    mime_type: String::new(),
                    file_size: 0,
                    local_cache_path: None,
                    is_uploaded: false,
                    remote_updated_at: 0,
                    deleted_at: None,
                    is_dirty: false,
                }
            }
        };
        attachment.storage_path = row.storage_path.clone();
        attachment.file_name = row.file_name.clone();
        attachment.mime_type = row.mime_type.clone();
        attachment.file_size = row.file_size;
        attachment.remote_updated_at = row.updated_at;
        attachment.deleted_at = row.deleted_at;
        // A metadata row existing remotely means the two-phase commit finished.
        attachment.is_uploaded = true;
        attachment.is_dirty = false;
        store.put_attachment(attachment);
        RowOutcome::Applied
    }
}

/// Overwrite a local note with the remote row's fields, leaving it clean.
///
/// Shared between pull application and the losing side of a conflict fork.
pub(crate) fn apply_note_fields(note: &mut Note, row: &NoteRow) {
    if let Some(notebook_id) = parse_id::<NotebookId>(row.notebook_id.as_deref()) {
        note.notebook_id = notebook_id;
    }
    note.title = row.title.clone();
    note.summary = row.summary.clone();
    note.content = row.content.clone();
    note.word_count = row.word_count;
    note.char_count = row.char_count;
    note.version = row.version;
    note.conflict_parent_id = parse_id::<NoteId>(row.conflict_parent_id.as_deref());
    note.remote_updated_at = row.updated_at;
    note.deleted_at = row.deleted_at;
    note.is_dirty = false;
}

fn parse_id<T: FromStr>(raw: Option<&str>) -> Option<T> {
    raw.and_then(|value| T::from_str(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn owner() -> OwnerId {
        OwnerId::new("user-1")
    }

    fn notebook_row(id: &NotebookId, title: &str, updated_at: i64) -> NotebookRow {
        NotebookRow {
            id: Some(id.as_str()),
            owner_id: "user-1".to_string(),
            title: title.to_string(),
            color: None,
            icon: None,
            updated_at,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn batch_applies_rows_and_advances_watermark() {
        let mut store = LocalStore::in_memory();
        let first = NotebookId::new();
        let second = NotebookId::new();
        let rows = vec![
            notebook_row(&first, "A", 100),
            notebook_row(&second, "B", 200),
        ];

        let summary =
            apply_batch::<NotebookPull>(&mut store, &owner(), &rows, &CancelFlag::new())
                .await
                .unwrap();

        assert_eq!(summary.applied, 2);
        assert_eq!(store.notebook(&first).unwrap().title, "A");
        assert!(!store.notebook(&first).unwrap().is_dirty);
        assert_eq!(
            store.watermark(&owner(), EntityKind::Notebook),
            Some(200)
        );
    }

    #[tokio::test]
    async fn dirty_local_record_is_not_overwritten() {
        let mut store = LocalStore::in_memory();
        let mut local = Notebook::new(owner(), "local edit");
        local.is_dirty = true;
        let id = local.id;
        store.put_notebook(local);

        let rows = vec![notebook_row(&id, "remote", 500)];
        let summary =
            apply_batch::<NotebookPull>(&mut store, &owner(), &rows, &CancelFlag::new())
                .await
                .unwrap();

        assert_eq!(summary.skipped_dirty, 1);
        assert_eq!(store.notebook(&id).unwrap().title, "local edit");
        assert!(store.notebook(&id).unwrap().is_dirty);
    }

    #[tokio::test]
    async fn unsynced_tombstone_survives_a_live_remote_row() {
        let mut store = LocalStore::in_memory();
        let mut local = Notebook::new(owner(), "deleted offline");
        local.tombstone(400);
        let id = local.id;
        store.put_notebook(local);

        // The remote still carries the live row; the pending deletion wins
        // locally and pushes on the next run.
        let rows = vec![notebook_row(&id, "still alive remotely", 500)];
        let summary =
            apply_batch::<NotebookPull>(&mut store, &owner(), &rows, &CancelFlag::new())
                .await
                .unwrap();

        assert_eq!(summary.skipped_dirty, 1);
        let notebook = store.notebook(&id).unwrap();
        assert!(notebook.is_tombstoned());
        assert!(notebook.is_dirty);
        assert_eq!(
            store.watermark(&owner(), EntityKind::Notebook),
            Some(500)
        );
    }

    #[tokio::test]
    async fn invalid_identity_is_skipped_without_failing_the_batch() {
        let mut store = LocalStore::in_memory();
        let good = NotebookId::new();
        let mut bad = notebook_row(&good, "x", 50);
        bad.id = Some("not-a-uuid".to_string());
        let rows = vec![bad, notebook_row(&good, "kept", 60)];

        let summary =
            apply_batch::<NotebookPull>(&mut store, &owner(), &rows, &CancelFlag::new())
                .await
                .unwrap();

        assert_eq!(summary.skipped_invalid, 1);
        assert_eq!(summary.applied, 1);
        assert_eq!(store.notebook(&good).unwrap().title, "kept");
    }

    #[tokio::test]
    async fn pulled_tombstone_lands_on_clean_record() {
        let mut store = LocalStore::in_memory();
        let mut local = Notebook::new(owner(), "doomed");
        local.is_dirty = false;
        let id = local.id;
        store.put_notebook(local);

        let mut row = notebook_row(&id, "doomed", 300);
        row.deleted_at = Some(250);
        apply_batch::<NotebookPull>(&mut store, &owner(), &[row], &CancelFlag::new())
            .await
            .unwrap();

        assert!(store.notebook(&id).unwrap().is_tombstoned());
    }

    #[tokio::test]
    async fn new_note_without_notebook_reference_is_invalid() {
        let mut store = LocalStore::in_memory();
        let row = NoteRow {
            id: Some(NoteId::new().as_str()),
            owner_id: "user-1".to_string(),
            notebook_id: None,
            title: "orphan".to_string(),
            summary: String::new(),
            content: String::new(),
            word_count: 0,
            char_count: 0,
            version: 1,
            conflict_parent_id: None,
            updated_at: 10,
            deleted_at: None,
        };

        let summary = apply_batch::<NotePull>(&mut store, &owner(), &[row], &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(summary.skipped_invalid, 1);
    }

    #[tokio::test]
    async fn pulled_attachment_counts_as_uploaded() {
        let mut store = LocalStore::in_memory();
        let row = AttachmentRow {
            id: Some(AttachmentId::new().as_str()),
            owner_id: "user-1".to_string(),
            note_id: Some(NoteId::new().as_str()),
            storage_path: "attachments/user-1/x.png".to_string(),
            file_name: "x.png".to_string(),
            mime_type: "image/png".to_string(),
            file_size: 5,
            updated_at: 70,
            deleted_at: None,
        };
        let id: AttachmentId = row.id.as_deref().unwrap().parse().unwrap();

        apply_batch::<AttachmentPull>(&mut store, &owner(), &[row], &CancelFlag::new())
            .await
            .unwrap();

        let attachment = store.attachment(&id).unwrap();
        assert!(attachment.is_uploaded);
        assert!(!attachment.is_dirty);
        assert_eq!(attachment.storage_path, "attachments/user-1/x.png");
    }

    #[tokio::test]
    async fn cancellation_mid_batch_keeps_processed_watermark() {
        let mut store = LocalStore::in_memory();
        let rows: Vec<NotebookRow> = (0..25)
            .map(|offset| notebook_row(&NotebookId::new(), "n", 1000 + offset))
            .collect();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let error = apply_batch::<NotebookPull>(&mut store, &owner(), &rows, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Cancelled));

        // The first block of rows was processed before the checkpoint fired.
        assert_eq!(
            store.watermark(&owner(), EntityKind::Notebook),
            Some(1000 + YIELD_EVERY as i64 - 1)
        );
    }
}
