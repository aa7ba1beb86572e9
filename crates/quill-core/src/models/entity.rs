//! Owner identity and replicated entity kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of the signed-in owner, as issued by the auth backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wrap a backend-issued identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The three replicated record types, used to key watermarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Notebook records
    Notebook,
    /// Note records
    Note,
    /// Attachment metadata records
    Attachment,
}

impl EntityKind {
    /// Stable lowercase name, used in watermark keys and diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Notebook => "notebook",
            Self::Note => "note",
            Self::Attachment => "attachment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_names_are_stable() {
        assert_eq!(EntityKind::Notebook.as_str(), "notebook");
        assert_eq!(EntityKind::Note.as_str(), "note");
        assert_eq!(EntityKind::Attachment.as_str(), "attachment");
    }

    #[test]
    fn owner_id_roundtrip() {
        let owner = OwnerId::new("user-1");
        assert_eq!(owner.as_str(), "user-1");
        assert_eq!(owner.to_string(), "user-1");
    }
}
