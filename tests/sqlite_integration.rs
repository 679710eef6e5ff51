//! The SQLite backend drives its own runtime, so these tests are plain
//! `#[test]` functions rather than `#[tokio::test]`.

mod common;

use chrono::{Duration, Utc};
use nx_core::domain::Note;
use nx_core::error::NxError;
use nx_core::search::{Index, IndexKind, SearchQuery, SqliteIndex, open_index};
use nx_core::shelf::{FilesystemStore, NoteStore};
use tempfile::TempDir;

use common::{config_in, store_in, tagged};

fn open(store: &FilesystemStore, root: &std::path::Path) -> Result<SqliteIndex, NxError> {
    SqliteIndex::open(&root.join("index.db"), &store.shelf().notes_dir)
}

#[test]
fn text_search_ranks_and_highlights() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());
    let index = open(&store, tmpdir.path())?;

    let plan = tagged("Project Plan", "Ship the beta release in May.", &["work"]);
    let recipe = tagged("Pancakes", "Flour, eggs, milk.", &["food"]);
    index.add_note(&plan)?;
    index.add_note(&recipe)?;

    let hits = index.search(&SearchQuery::new("beta"))?;
    assert_eq!(hits.len(), 1);
    let hit = &hits[0];
    assert_eq!(hit.id, plan.id());
    assert_eq!(hit.title, "Project Plan");
    assert_eq!(hit.tags, vec!["work"]);
    assert!(hit.snippet.contains("<mark>beta</mark>"));
    assert!(hit.score > 0.0 && hit.score < 1.0);

    let plain = index.search(&SearchQuery::new("beta").highlight(false))?;
    assert!(plain[0].snippet.is_empty());

    // Titles are searchable too.
    assert_eq!(index.search(&SearchQuery::new("pancakes"))?[0].id, recipe.id());
    assert!(index.search(&SearchQuery::new("unicorn"))?.is_empty());
    Ok(())
}

#[test]
fn quotes_and_operators_are_not_syntax() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());
    let index = open(&store, tmpdir.path())?;

    index.add_note(&Note::new("Quoted", r#"she said "hello" OR goodbye"#))?;

    assert_eq!(index.search_count(&SearchQuery::new(r#""hello" OR"#))?, 1);
    assert_eq!(index.search_count(&SearchQuery::new("NEAR(hello"))?, 0);
    Ok(())
}

#[test]
fn filters_narrow_results() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());
    let index = open(&store, tmpdir.path())?;

    let mut standup = tagged("Standup", "daily sync notes", &["work", "daily"]);
    standup.metadata_mut().set_notebook(Some("office".into()));
    let journal = tagged("Journal", "daily thoughts", &["daily"]);
    index.add_note(&standup)?;
    index.add_note(&journal)?;

    assert_eq!(index.search_count(&SearchQuery::new("daily"))?, 2);
    assert_eq!(index.search_count(&SearchQuery::new("daily").with_tag("work"))?, 1);
    assert_eq!(
        index.search_count(&SearchQuery::new("daily").with_tag("work").with_tag("daily"))?,
        1
    );
    assert_eq!(index.search_count(&SearchQuery::new("daily").with_notebook("office"))?, 1);

    let future = Utc::now() + Duration::days(1);
    assert_eq!(index.search_count(&SearchQuery::new("daily").since(future))?, 0);
    assert_eq!(index.search_count(&SearchQuery::new("daily").until(future))?, 2);

    let by_tag = index.search(&SearchQuery::default().with_tag("daily"))?;
    assert_eq!(by_tag.len(), 2);
    assert!(by_tag.iter().all(|hit| hit.score == 1.0 && hit.snippet.is_empty()));
    Ok(())
}

#[test]
fn pagination_and_counts() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());
    let index = open(&store, tmpdir.path())?;

    for n in 0..5 {
        index.add_note(&Note::new(format!("Entry {n}"), "recurring word"))?;
    }

    let query = SearchQuery::new("recurring").page(2, 2);
    assert_eq!(index.search(&query)?.len(), 2);
    assert_eq!(index.search_count(&query)?, 5);
    assert_eq!(index.search(&SearchQuery::new("recurring").page(4, 2))?.len(), 1);
    Ok(())
}

#[test]
fn updates_replace_and_removal_is_idempotent() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());
    let index = open(&store, tmpdir.path())?;

    let note = tagged("Versioned", "first draft", &["draft"]);
    index.add_note(&note)?;
    let mut revised = note.with_content("final copy");
    revised.metadata_mut().set_tags(["done"]);
    index.update_note(&revised)?;

    assert_eq!(index.search_count(&SearchQuery::new("draft"))?, 0);
    assert_eq!(index.search_count(&SearchQuery::new("final"))?, 1);
    assert_eq!(index.suggest_tags("d", 10)?, vec!["done"]);
    assert_eq!(index.get_stats()?.total_notes, 1);

    index.remove_note(&note.id())?;
    index.remove_note(&note.id())?;
    assert_eq!(index.search_count(&SearchQuery::new("final"))?, 0);
    assert_eq!(index.get_stats()?.total_notes, 0);
    Ok(())
}

#[test]
fn rebuild_reads_the_notes_directory() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());
    let index = open(&store, tmpdir.path())?;

    // Indexed but never stored: a rebuild must forget it.
    index.add_note(&Note::new("Ghost", "phantom"))?;
    store.store(&Note::new("Real", "on disk"))?;
    store.store(&Note::new("Also real", "on disk too"))?;

    index.rebuild()?;
    let stats = index.get_stats()?;
    assert_eq!(stats.total_notes, 2);
    assert_eq!(stats.total_words, 5);
    assert!(stats.last_updated.is_some());
    assert_eq!(index.search_count(&SearchQuery::new("phantom"))?, 0);
    assert_eq!(index.search_count(&SearchQuery::new("disk"))?, 2);

    index.rebuild()?;
    assert_eq!(index.get_stats()?.total_notes, 2);
    Ok(())
}

#[test]
fn transactions_roll_back_and_guard_misuse() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());
    let index = open(&store, tmpdir.path())?;

    assert!(matches!(index.commit_transaction(), Err(NxError::Validation(_))));
    assert!(matches!(index.rollback_transaction(), Err(NxError::Validation(_))));

    index.begin_transaction()?;
    assert!(matches!(index.begin_transaction(), Err(NxError::Validation(_))));
    assert!(matches!(index.vacuum(), Err(NxError::Validation(_))));
    index.add_note(&Note::new("Temporary", "rolled back"))?;
    index.rollback_transaction()?;
    assert_eq!(index.search_count(&SearchQuery::new("rolled"))?, 0);

    index.begin_transaction()?;
    index.add_note(&Note::new("Kept", "committed"))?;
    index.commit_transaction()?;
    assert_eq!(index.search_count(&SearchQuery::new("committed"))?, 1);

    index.vacuum()?;
    Ok(())
}

#[test]
fn open_transaction_is_rolled_back_on_drop() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());

    {
        let index = open(&store, tmpdir.path())?;
        index.begin_transaction()?;
        index.add_note(&Note::new("Lost", "never committed"))?;
    }

    let index = open(&store, tmpdir.path())?;
    assert_eq!(index.get_stats()?.total_notes, 0);
    Ok(())
}

#[test]
fn suggestions_are_prefix_matched_and_sorted() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());
    let index = open(&store, tmpdir.path())?;

    let mut a = tagged("A", "", &["rust", "rustdoc", "python"]);
    a.metadata_mut().set_notebook(Some("projects".into()));
    let mut b = tagged("B", "", &["rust"]);
    b.metadata_mut().set_notebook(Some("personal".into()));
    index.add_note(&a)?;
    index.add_note(&b)?;

    assert_eq!(index.suggest_tags("ru", 10)?, vec!["rust", "rustdoc"]);
    assert_eq!(index.suggest_tags("ru", 1)?, vec!["rust"]);
    assert!(index.suggest_tags("Ru", 10)?.is_empty());
    assert_eq!(index.suggest_notebooks("p", 10)?, vec!["personal", "projects"]);
    assert_eq!(index.suggest_notebooks("pro", 10)?, vec!["projects"]);
    Ok(())
}

#[test]
fn health_stats_and_maintenance() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let store = store_in(tmpdir.path());
    let index = open(&store, tmpdir.path())?;

    assert_eq!(index.kind(), IndexKind::Sqlite);
    assert!(index.is_healthy()?);
    index.validate_index()?;

    let empty = index.get_stats()?;
    assert_eq!(empty.total_notes, 0);
    assert!(empty.last_updated.is_none());

    index.add_note(&Note::new("Counted", "three words here"))?;
    assert_eq!(index.get_stats()?.total_words, 3);

    index.optimize()?;
    assert!(index.get_stats()?.last_optimized.is_some());
    index.vacuum()?;
    Ok(())
}

#[test]
fn open_index_prefers_sqlite() -> Result<(), NxError> {
    let tmpdir = TempDir::new().unwrap();
    let _store = store_in(tmpdir.path());

    let index = open_index(&config_in(tmpdir.path()))?;
    assert_eq!(index.kind(), IndexKind::Sqlite);
    assert!(tmpdir.path().join("index.db").exists());
    Ok(())
}
