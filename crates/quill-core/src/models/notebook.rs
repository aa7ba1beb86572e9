//! Notebook model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity::OwnerId;

/// A unique identifier for a notebook, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotebookId(Uuid);

impl NotebookId {
    /// Create a new unique notebook ID using UUID v7
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

impl Default for NotebookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NotebookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NotebookId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A notebook grouping notes for one owner.
///
/// Notebooks carry no version counter; pushes are plain last-writer-wins
/// upserts, unlike notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notebook {
    /// Unique identifier
    pub id: NotebookId,
    /// Owning identity
    pub owner_id: OwnerId,
    /// Display title
    pub title: String,
    /// Optional display color
    pub color: Option<String>,
    /// Optional display icon
    pub icon: Option<String>,
    /// Server-assigned timestamp of the last accepted remote write (Unix ms)
    pub remote_updated_at: i64,
    /// Soft-delete tombstone (Unix ms)
    pub deleted_at: Option<i64>,
    /// Local mutations not yet confirmed by the remote service
    pub is_dirty: bool,
}

impl Notebook {
    /// Create a notebook from local user action; starts dirty.
    #[must_use]
    pub fn new(owner_id: OwnerId, title: impl Into<String>) -> Self {
        Self {
            id: NotebookId::new(),
            owner_id,
            title: title.into(),
            color: None,
            icon: None,
            remote_updated_at: 0,
            deleted_at: None,
            is_dirty: true,
        }
    }

    /// Whether this notebook carries a soft-delete tombstone.
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
