#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use nx_core::config::Config;
use nx_core::domain::{Metadata, Note, NoteId};
use nx_core::shelf::FilesystemStore;

/// Routes library logs to the test output; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config_in(root: &Path) -> Config {
    Config::with_root(root)
}

pub fn store_in(root: &Path) -> FilesystemStore {
    init_tracing();
    FilesystemStore::open(&config_in(root)).expect("store should open")
}

pub fn store_with_ttl(root: &Path, ttl: Duration) -> FilesystemStore {
    init_tracing();
    let mut config = config_in(root);
    config.cache_ttl = ttl;
    FilesystemStore::open(&config).expect("store should open")
}

pub fn note_with_id(id: &str, title: &str, content: &str) -> Note {
    let id = NoteId::parse(id).expect("valid id");
    Note::with_metadata(Metadata::new(id, title), content)
}

pub fn tagged(title: &str, content: &str, tags: &[&str]) -> Note {
    let mut note = Note::new(title, content);
    note.metadata_mut().set_tags(tags.iter().copied());
    note
}

/// Tests that shell out to ripgrep skip themselves when it is not installed.
pub fn has_rg() -> bool {
    which::which("rg").is_ok()
}
