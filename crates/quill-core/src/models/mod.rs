//! Data models for Quill

mod attachment;
mod entity;
mod note;
mod notebook;

pub use attachment::{Attachment, AttachmentId};
pub use entity::{EntityKind, OwnerId};
pub use note::{Note, NoteId};
pub use notebook::{Notebook, NotebookId};
