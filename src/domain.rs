//! Notes as values: identity, header metadata and the on-disk text format.
//!
//! Nothing in here touches the filesystem; persistence lives in
//! [`crate::shelf`] and [`crate::atomic`].

pub mod metadata;
pub mod note;
pub mod note_id;

pub use metadata::Metadata;
pub use note::Note;
pub use note_id::NoteId;
