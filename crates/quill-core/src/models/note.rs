//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity::OwnerId;
use super::notebook::NotebookId;

const SUMMARY_MAX_CHARS: usize = 120;

/// A unique identifier for a note, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteId(Uuid);

impl NoteId {
    /// Create a new unique note ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A note in the system.
///
/// Notes carry a server-assigned `version` used for optimistic-concurrency
/// pushes; a push only succeeds when the server still holds the version the
/// push believed it was updating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier
    pub id: NoteId,
    /// Owning identity
    pub owner_id: OwnerId,
    /// Owning notebook
    pub notebook_id: NotebookId,
    /// Display title
    pub title: String,
    /// Derived preview line
    pub summary: String,
    /// Plain text content
    pub content: String,
    /// Derived word count
    pub word_count: i64,
    /// Derived character count
    pub char_count: i64,
    /// Server-assigned monotonic version; 0 until first accepted push
    pub version: i64,
    /// Back-reference set only on forked conflict copies
    pub conflict_parent_id: Option<NoteId>,
    /// Server-assigned timestamp of the last accepted remote write (Unix ms)
    pub remote_updated_at: i64,
    /// Soft-delete tombstone (Unix ms)
    pub deleted_at: Option<i64>,
    /// Local mutations not yet confirmed by the remote service
    pub is_dirty: bool,
}

impl Note {
    /// Create a note from local user action; starts dirty at version 0.
    #[must_use]
    pub fn new(
        owner_id: OwnerId,
        notebook_id: NotebookId,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let mut note = Self {
            id: NoteId::new(),
            owner_id,
            notebook_id,
            title: title.into(),
            summary: String::new(),
            content,
            word_count: 0,
            char_count: 0,
            version: 0,
            conflict_parent_id: None,
            remote_updated_at: 0,
            deleted_at: None,
            is_dirty: true,
        };
        note.recompute_derived();
        note
    }

    /// Replace the content, recompute derived fields, and queue for push.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.recompute_derived();
        self.is_dirty = true;
    }

    /// Whether this note carries a soft-delete tombstone.
    #[must_use]
    pub const fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Soft-delete at the given timestamp and queue for push.
    pub fn tombstone(&mut self, now_ms: i64) {
        self.deleted_at = Some(now_ms);
        self.is_dirty = true;
    }

    /// Recompute summary and counts from the current content.
    pub fn recompute_derived(&mut self) {
        self.summary = self
            .content
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(SUMMARY_MAX_CHARS)
            .collect();
        self.word_count = self.content.split_whitespace().count() as i64;
        self.char_count = self.content.chars().count() as i64;
    }
}
