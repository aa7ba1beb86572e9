//! Local attachment content cache.
//!
//! Filesystem cache keyed by `(attachment id, file name)`. The read-through
//! composition (cache miss, blob fetch, populate) lives in the attachment
//! sync coordinator; this module only stores and serves bytes.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::AttachmentId;
use crate::util::sanitize_token;

/// Filesystem-backed attachment content cache.
#[derive(Debug, Clone)]
pub struct AttachmentCache {
    root: PathBuf,
}

impl AttachmentCache {
    /// Open a cache rooted at the given directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a cache entry; deterministic per `(attachment id, file name)`.
    #[must_use]
    pub fn entry_path(&self, id: &AttachmentId, file_name: &str) -> PathBuf {
        self.root.join(format!("{id}-{}", sanitize_file_name(file_name)))
    }

    /// Fetch cached bytes, `None` on a miss.
    pub fn get(&self, id: &AttachmentId, file_name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(id, file_name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    /// Store bytes and return the entry path.
    pub fn put(&self, id: &AttachmentId, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.entry_path(id, file_name);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Remove one cached entry; missing entries are not an error.
    pub fn remove(&self, id: &AttachmentId, file_name: &str) -> Result<()> {
        let path = self.entry_path(id, file_name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Drop every cached entry (sign-out path).
    pub fn clear(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

fn sanitize_file_name(file_name: &str) -> String {
    let trimmed = file_name.trim().trim_matches('/');
    let (stem, ext) = trimmed.rsplit_once('.').map_or((trimmed, ""), |parts| parts);
    let stem = sanitize_token(stem);
    let stem = if stem.is_empty() { "file".to_string() } else { stem };
    let ext = sanitize_token(ext);

    if ext.is_empty() {
        stem
    } else {
        format!("{stem}.{ext}")
    }
}
