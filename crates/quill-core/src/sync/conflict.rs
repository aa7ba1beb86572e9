//! Optimistic-concurrency note push and conflict forking.
//!
//! A note push is a conditional update on `(id, version)`. When zero rows
//! match, the resolver fetches the current remote row to distinguish three
//! cases: the note does not exist upstream yet (create it), the remote holds
//! a newer version (remote wins, the local edit survives as a fork), or the
//! versions still match (a transient miss, retried on the next run).

use crate::error::Result;
use crate::models::{Note, NoteId};
use crate::remote::{NoteRow, RemoteService};
use crate::store::LocalStore;

use super::pull::apply_note_fields;

const CONFLICT_COPY_SUFFIX: &str = " (Conflict Copy)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    /// Conditional update matched; server version adopted.
    Updated,
    /// Note did not exist upstream; created via upsert.
    Created,
    /// Remote version won; the local edit lives on in the fork.
    Forked(NoteId),
    /// Nothing pushed this run; flags stay set for the next one.
    Deferred,
}

pub(crate) async fn push_note<R: RemoteService>(
    remote: &R,
    store: &mut LocalStore,
    id: NoteId,
) -> Result<PushOutcome> {
    let Some(snapshot) = store.note(&id).cloned() else {
        return Ok(PushOutcome::Deferred);
    };
    let row = NoteRow::from_local(&snapshot);

    if let Some(server) = remote.update_note_where_version(&row, snapshot.version).await? {
        adopt_server_note(store, &id, &server);
        return Ok(PushOutcome::Updated);
    }

    match remote.fetch_note(&snapshot.owner_id, &id.as_str()).await? {
        None => {
            let server = remote.upsert_note(&row).await?;
            adopt_server_note(store, &id, &server);
            Ok(PushOutcome::Created)
        }
        Some(server) if server.version != snapshot.version => {
            if let Some(note) = store.note_mut(&id) {
                apply_note_fields(note, &server);
            }
            let fork = fork_losing_edit(&snapshot);
            let fork_id = fork.id;
            store.put_note(fork);
            tracing::info!(
                note = %id,
                fork = %fork_id,
                "Remote version won; local edit preserved as conflict copy"
            );
            Ok(PushOutcome::Forked(fork_id))
        }
        Some(_) => {
            // Zero rows matched yet the remote version still equals ours; a
            // concurrent writer raced between the update and this read.
            tracing::warn!(
                note = %id,
                "Conditional update missed with matching remote version; deferring"
            );
            Ok(PushOutcome::Deferred)
        }
    }
}

fn adopt_server_note(store: &mut LocalStore, id: &NoteId, server: &NoteRow) {
    if let Some(note) = store.note_mut(id) {
        note.version = server.version;
        note.remote_updated_at = server.updated_at;
        note.is_dirty = false;
    }
}

/// Fork preserving the edit that lost the version race.
///
/// The fork is a brand-new note (version 0, dirty) pointing back at the
/// original through `conflict_parent_id`; the next run creates it upstream.
fn fork_losing_edit(snapshot: &Note) -> Note {
    Note {
        id: NoteId::new(),
        owner_id: snapshot.owner_id.clone(),
        notebook_id: snapshot.notebook_id,
        title: format!("{}{CONFLICT_COPY_SUFFIX}", snapshot.title),
        summary: snapshot.summary.clone(),
        content: snapshot.content.clone(),
        word_count: snapshot.word_count,
        char_count: snapshot.char_count,
        version: 0,
        conflict_parent_id: Some(snapshot.id),
        remote_updated_at: 0,
        deleted_at: snapshot.deleted_at,
        is_dirty: true,
    }
}
