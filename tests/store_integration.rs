mod common;

use std::fs;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use nx_core::domain::{Metadata, Note, NoteId};
use nx_core::error::NxError;
use nx_core::shelf::{
    ChangeOp, FilesystemStore, NotebookManager, NoteQuery, NoteStore, SortBy, SortOrder,
};
use parking_lot::Mutex;
use tempfile::TempDir;

use common::{note_with_id, store_in, store_with_ttl, tagged};

#[test]
fn store_then_load_round_trips() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let mut note = tagged("Groceries", "- milk\n- eggs\n", &["home", "list"]);
    note.metadata_mut().set_notebook(Some("personal".into()));
    store.store(&note)?;

    assert!(store.exists(&note.id())?);
    assert!(store.note_path(&note.id()).is_file());

    let loaded = store.load(&note.id())?;
    assert_eq!(loaded.title(), "Groceries");
    assert_eq!(loaded.content(), note.content());
    assert_eq!(loaded.metadata().tags(), note.metadata().tags());
    assert_eq!(loaded.notebook(), Some("personal"));

    Ok(())
}

#[test]
fn storing_again_overwrites() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let note = Note::new("Draft", "v1");
    store.store(&note)?;
    store.store(&note.with_content("v2"))?;

    assert_eq!(store.load(&note.id())?.content(), "v2");
    assert_eq!(store.total_notes()?, 1);
    Ok(())
}

#[test]
fn invalid_note_is_rejected_before_writing() {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let note = tagged("Bad", "body", &["has space"]);
    let err = store.store(&note).unwrap_err();
    assert!(matches!(err, NxError::Validation(_)));
    assert!(!store.note_path(&note.id()).exists());
}

#[test]
fn loading_a_missing_note_is_not_found() {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let err = store.load(&NoteId::generate()).unwrap_err();
    assert!(matches!(err, NxError::FileNotFound(_)));
}

#[test]
fn fuzzy_resolution_scores_by_match_kind() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let note = note_with_id("01ARZ3NDEKTSV4RRFFQ69G5FAV", "Project Plan", "goals");
    store.store(&note)?;

    let by_prefix = store.fuzzy_resolve("01ARZ3ND", 5)?;
    assert_eq!(by_prefix.len(), 1);
    assert_eq!(by_prefix[0].id, note.id());
    assert_eq!(by_prefix[0].score, 1.0);
    assert_eq!(by_prefix[0].display_text, "Project Plan");

    assert_eq!(store.fuzzy_resolve("project", 5)?[0].score, 0.8);
    assert_eq!(store.fuzzy_resolve("NDEKT", 5)?[0].score, 0.5);
    assert!(store.fuzzy_resolve("zzz", 5)?.is_empty());

    assert_eq!(store.resolve_single("project")?, note.id());
    assert!(matches!(store.resolve_single("zzz"), Err(NxError::NoteNotFound(_))));

    Ok(())
}

#[test]
fn fuzzy_resolution_ranks_and_truncates() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let exact = note_with_id("01ARZ3NDEKTSV4RRFFQ69G5FAV", "Other", "");
    let titled = note_with_id("01BX5ZZKBKACTAV9WEVGEMMVRZ", "About 01ARZ", "");
    store.store(&exact)?;
    store.store(&titled)?;

    let matches = store.fuzzy_resolve("01ARZ", 5)?;
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].id, exact.id());
    assert_eq!(matches[1].id, titled.id());
    assert_eq!(matches[1].score, 0.8);

    assert_eq!(store.fuzzy_resolve("01ARZ", 1)?.len(), 1);
    Ok(())
}

#[test]
fn trash_lifecycle() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let note = Note::new("Old idea", "meh");
    let id = note.id();
    store.store(&note)?;

    store.remove(&id, true)?;
    assert!(store.list_trashed()?.contains(&id));
    assert!(!store.exists(&id)?);
    assert!(store.trash_path(&id).is_file());
    assert!(matches!(store.load(&id), Err(NxError::FileNotFound(_))));

    store.restore(&id)?;
    assert!(store.exists(&id)?);
    assert!(!store.list_trashed()?.contains(&id));
    assert_eq!(store.load(&id)?.content(), "meh");

    store.remove(&id, true)?;
    store.empty_trash()?;
    assert!(store.list_trashed()?.is_empty());
    assert!(!store.trash_path(&id).exists());

    Ok(())
}

#[test]
fn trashing_or_restoring_unknown_ids_fails() {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());
    let id = NoteId::generate();

    assert!(matches!(store.remove(&id, true), Err(NxError::NoteNotFound(_))));
    assert!(matches!(store.remove(&id, false), Err(NxError::NoteNotFound(_))));
    assert!(matches!(store.restore(&id), Err(NxError::NoteNotFound(_))));
}

#[test]
fn restore_never_overwrites_an_active_note() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let note = Note::new("Twice", "trashed copy");
    store.store(&note)?;
    store.remove(&note.id(), true)?;

    // Put a live file back under the same id behind the store's back.
    fs::copy(store.trash_path(&note.id()), store.note_path(&note.id())).unwrap();

    let err = store.restore(&note.id()).unwrap_err();
    assert!(matches!(err, NxError::Validation(_)));
    assert!(store.trash_path(&note.id()).exists());
    Ok(())
}

#[test]
fn permanent_delete_removes_from_trash_too() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let note = Note::new("Gone", "");
    store.store(&note)?;
    store.remove(&note.id(), true)?;
    store.permanently_delete(&note.id())?;

    assert!(!store.trash_path(&note.id()).exists());
    assert!(!store.exists(&note.id())?);
    Ok(())
}

#[test]
fn tag_filters_require_every_tag() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    store.store(&tagged("A", "", &["a"]))?;
    store.store(&tagged("B", "", &["b"]))?;
    store.store(&tagged("AB", "", &["a", "b"]))?;

    assert_eq!(store.get_all_tags()?, vec!["a", "b"]);
    assert_eq!(store.count(&NoteQuery::new().with_tag("a"))?, 2);
    assert_eq!(store.count(&NoteQuery::new().with_tag("a").with_tag("b"))?, 1);

    let both = store.search(&NoteQuery::new().with_tag("a").with_tag("b"))?;
    assert_eq!(both.len(), 1);
    assert_eq!(both[0].title(), "AB");
    Ok(())
}

#[test]
fn cache_refreshes_once_per_ttl() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    store.store(&tagged("One", "", &["x"]))?;
    store.store(&tagged("Two", "", &["y"]))?;

    assert_eq!(store.scan_count(), 0);
    store.get_all_tags()?;
    store.get_all_tags()?;
    assert_eq!(store.scan_count(), 1);

    store.rebuild()?;
    assert_eq!(store.scan_count(), 2);
    Ok(())
}

#[test]
fn expired_cache_rescans() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_with_ttl(tmpdir.path(), Duration::ZERO);

    store.store(&tagged("One", "", &["x"]))?;
    store.get_all_tags()?;
    store.get_all_notebooks()?;
    assert_eq!(store.scan_count(), 2);
    Ok(())
}

#[test]
fn listing_is_newest_first_and_paginated() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let ids: Vec<NoteId> = (1..=4)
        .map(|day| {
            let at = Utc.with_ymd_and_hms(2024, 1, day, 9, 0, 0).unwrap();
            let mut meta = Metadata::new(NoteId::generate_at(at), format!("Day {day}"));
            meta.set_created(at);
            let note = Note::with_metadata(meta, "");
            store.store(&note).map(|_| note.id())
        })
        .collect::<Result<_, _>>()?;

    let listed = store.list(&NoteQuery::default())?;
    assert_eq!(listed, vec![ids[3], ids[2], ids[1], ids[0]]);

    let page = store.list(&NoteQuery::default().page(1, 2))?;
    assert_eq!(page, vec![ids[2], ids[1]]);

    let oldest_first = store.list(&NoteQuery::default().sorted(SortBy::Created, SortOrder::Ascending))?;
    assert_eq!(oldest_first[0], ids[0]);

    let since = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
    assert_eq!(store.count(&NoteQuery::default().since(since))?, 2);
    Ok(())
}

#[test]
fn title_and_content_filters() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    store.store(&Note::new("banana bread", "flour, bananas"))?;
    store.store(&Note::new("Apple pie", "apples, butter"))?;
    store.store(&Note::new("cherry tart", "cherries, butter"))?;

    let titles: Vec<String> = store
        .search(&NoteQuery::new().sorted(SortBy::Title, SortOrder::Ascending))?
        .iter()
        .map(Note::title)
        .collect();
    assert_eq!(titles, ["Apple pie", "banana bread", "cherry tart"]);

    assert_eq!(store.count(&NoteQuery::new().content_contains("butter"))?, 2);
    assert_eq!(store.count(&NoteQuery::new().title_contains("pie"))?, 1);
    assert_eq!(store.count(&NoteQuery::new().title_contains("Pie"))?, 0);
    Ok(())
}

#[test]
fn notebooks_and_backlinks_come_from_metadata() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let target = Note::new("Target", "");
    let mut linking = Note::new("Linker", &format!("see [target]({})", target.id()));
    linking.refresh_links();
    linking.metadata_mut().set_notebook(Some("work".into()));

    store.store(&target)?;
    store.store(&linking)?;

    assert_eq!(store.get_backlinks(&target.id())?, vec![linking.id()]);
    assert!(store.get_backlinks(&linking.id())?.is_empty());
    assert_eq!(store.get_all_notebooks()?, vec!["work"]);
    Ok(())
}

#[test]
fn batches_skip_failures_on_load() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let notes = vec![Note::new("one", ""), Note::new("two", "")];
    store.store_batch(&notes)?;

    let ids = vec![notes[0].id(), NoteId::generate(), notes[1].id()];
    let loaded = store.load_batch(&ids)?;
    assert_eq!(loaded.len(), 2);
    Ok(())
}

#[test]
fn validate_is_strict_but_listing_is_lenient() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let good = Note::new("Fine", "");
    store.store(&good)?;
    store.validate()?;

    let broken = NoteId::generate();
    fs::write(store.note_path(&broken), "no header here").unwrap();

    assert!(matches!(store.validate(), Err(NxError::Parse(_))));
    assert_eq!(store.list(&NoteQuery::new().with_tag("x"))?.len(), 0);
    assert_eq!(store.count(&NoteQuery::new().title_contains("Fine"))?, 1);
    store.rebuild()?;
    Ok(())
}

#[test]
fn aggregates_cover_active_notes() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    assert_eq!(store.total_notes()?, 0);
    assert_eq!(store.total_size()?, 0);
    assert_eq!(store.last_modified()?, None);

    let note = Note::new("Sized", "some bytes");
    store.store(&note)?;

    let on_disk = fs::metadata(store.note_path(&note.id())).unwrap().len();
    assert_eq!(store.total_notes()?, 1);
    assert_eq!(store.total_size()?, on_disk);
    assert!(store.last_modified()?.is_some());

    fs::remove_dir_all(&store.shelf().trash_dir).unwrap();
    store.vacuum()?;
    assert!(store.shelf().trash_dir.is_dir());
    Ok(())
}

#[test]
fn change_callback_sees_every_mutation() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let seen: Arc<Mutex<Vec<(NoteId, ChangeOp)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    store.set_change_callback(Box::new(move |id: &NoteId, op: ChangeOp| {
        sink.lock().push((*id, op))
    }));

    let note = Note::new("Watched", "");
    let id = note.id();
    store.store(&note)?;
    store.remove(&id, true)?;
    store.restore(&id)?;
    store.remove(&id, false)?;

    let ops: Vec<ChangeOp> = seen.lock().iter().map(|(_, op)| *op).collect();
    assert_eq!(
        ops,
        [ChangeOp::Store, ChangeOp::Trash, ChangeOp::Restore, ChangeOp::Delete]
    );
    assert!(seen.lock().iter().all(|(seen_id, _)| *seen_id == id));
    Ok(())
}

#[test]
fn writes_during_a_rebuild_are_not_lost() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());
    for n in 0..50 {
        store.store(&Note::new(format!("Filler {n}"), "padding"))?;
    }

    for round in 0..20 {
        let tag = format!("fresh{round}");
        thread::scope(|scope| -> Result<(), NxError> {
            let rebuilding = scope.spawn(|| store.rebuild());
            store.store(&tagged("Concurrent", "", &[tag.as_str()]))?;
            rebuilding.join().unwrap()
        })?;
        assert!(store.get_all_tags()?.contains(&tag), "round {round} lost {tag}");
    }
    Ok(())
}

#[test]
fn change_callback_may_reenter_the_store() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = Arc::new(store_in(tmpdir.path()));

    let titles: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&titles);
    let weak: Weak<FilesystemStore> = Arc::downgrade(&store);
    store.set_change_callback(Box::new(move |id: &NoteId, op: ChangeOp| {
        let Some(store) = weak.upgrade() else { return };
        if op == ChangeOp::Store {
            if let Ok(note) = store.load(id) {
                sink.lock().push(note.title());
            }
            store.set_change_callback(Box::new(|_: &NoteId, _: ChangeOp| {}));
        }
    }));

    store.store(&Note::new("First", ""))?;
    store.store(&Note::new("Second", ""))?;

    assert_eq!(*titles.lock(), ["First"]);
    Ok(())
}

#[test]
fn header_id_must_match_the_file_name() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    let original = tagged("Impostor", "", &["ghost"]);
    store.store(&original)?;
    let renamed = NoteId::generate();
    fs::copy(store.note_path(&original.id()), store.note_path(&renamed)).unwrap();
    store.permanently_delete(&original.id())?;

    assert!(matches!(store.load(&renamed), Err(NxError::Parse(_))));
    assert!(store.get_all_tags()?.is_empty());
    assert!(store.list(&NoteQuery::new().with_tag("ghost"))?.is_empty());
    assert!(matches!(store.validate(), Err(NxError::Parse(_))));

    fs::rename(store.note_path(&renamed), store.trash_path(&renamed)).unwrap();
    store.restore(&renamed)?;
    assert!(store.get_all_tags()?.is_empty());
    Ok(())
}

#[test]
fn notebooks_are_managed_through_their_notes() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());
    let notebooks = NotebookManager::new(&store);

    notebooks.create("work")?;
    assert!(notebooks.exists("work")?);
    assert!(matches!(notebooks.create("work"), Err(NxError::Validation(_))));
    assert!(matches!(notebooks.create("a/b"), Err(NxError::Validation(_))));
    assert_eq!(notebooks.info("work", true)?.note_count, 0);

    for (title, tags) in [("Standup", &["meeting", "daily"][..]), ("Retro", &["meeting"][..])] {
        let mut note = tagged(title, "agenda", tags);
        note.metadata_mut().set_notebook(Some("work".into()));
        store.store(&note)?;
    }

    let info = notebooks.info("work", true)?;
    assert_eq!(info.note_count, 2);
    assert_eq!(info.tag_counts.get("meeting"), Some(&2));
    assert_eq!(info.top_tags, ["meeting", "daily"]);
    assert_eq!(info.total_size, 12);
    assert_eq!(info.recent_notes, 2);
    assert_eq!(notebooks.info("work", false)?.note_count, 2);
    assert_eq!(notebooks.notes_in("work")?.len(), 2);

    notebooks.rename("work", "office")?;
    assert!(!notebooks.exists("work")?);
    assert_eq!(notebooks.notes_in("office")?.len(), 2);
    assert!(matches!(
        notebooks.rename("work", "elsewhere"),
        Err(NxError::NotebookNotFound(_))
    ));

    assert!(matches!(notebooks.delete("office", false), Err(NxError::Validation(_))));
    assert_eq!(notebooks.move_all_notes("office", "archive")?, 2);
    assert_eq!(store.get_all_notebooks()?, ["archive"]);
    assert_eq!(
        store.count(&NoteQuery::new().with_notebook("archive").with_tag("meeting"))?,
        2
    );

    notebooks.create("scratch")?;
    let listed: Vec<String> = notebooks.list(false)?.into_iter().map(|i| i.name).collect();
    assert_eq!(listed, ["archive", "scratch"]);
    assert_eq!(notebooks.validate()?, ["empty notebook 'scratch'"]);

    let stats = notebooks.overall_stats()?;
    assert_eq!(stats.total_notebooks, 2);
    assert_eq!(stats.total_notes, 2);
    assert_eq!(stats.largest_notebook.as_deref(), Some("archive"));

    assert_eq!(notebooks.cleanup_empty()?, 1);
    assert!(!notebooks.exists("scratch")?);

    assert_eq!(notebooks.delete("archive", true)?, 3);
    assert!(store.get_all_notebooks()?.is_empty());
    assert_eq!(store.total_notes()?, 0);
    Ok(())
}
