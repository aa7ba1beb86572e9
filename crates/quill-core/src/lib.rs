//! quill-core - Core library for Quill
//!
//! This crate contains the shared models, the device-local entity store,
//! the remote/blob/credential clients, and the offline-first sync engine
//! used by all Quill interfaces.

pub mod auth;
pub mod blob;
pub mod cache;
pub mod error;
pub mod models;
pub mod remote;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Attachment, AttachmentId, EntityKind, Note, NoteId, Notebook, NotebookId, OwnerId};
pub use store::LocalStore;
pub use sync::{CancelFlag, SyncEngine};
