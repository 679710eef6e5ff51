//! Keeping the store and the index in step.
//!
//! The store is the source of truth and the index is derived from it. There
//! is no shared transaction: each helper here performs the store operation
//! first and then the matching index update. A store failure aborts and is
//! returned. An index failure is logged, reported in [`SyncOutcome`] and
//! otherwise ignored; the index stays stale until the next [`reindex`].

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::domain::{Note, NoteId};
use crate::error::{NxError, NxResult};
use crate::search::{Index, IndexStats};
use crate::shelf::NoteStore;

/// Result of a mutation that succeeded on the store.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use]
pub struct SyncOutcome {
    /// Set when the index could not be updated.
    pub index_warning: Option<String>,
}

impl SyncOutcome {
    pub fn is_clean(&self) -> bool {
        self.index_warning.is_none()
    }

    fn from_index(id: &NoteId, step: &str, result: NxResult<()>) -> Self {
        match result {
            Ok(()) => Self::default(),
            Err(e) => {
                warn!(note_id = %id, step, error = %e, "index update failed, index is stale");
                Self {
                    index_warning: Some(format!("index {step} failed for {id}: {e}")),
                }
            }
        }
    }
}

/// Stores `note`, then updates it in the index.
pub fn save_note(store: &dyn NoteStore, index: &dyn Index, note: &Note) -> NxResult<SyncOutcome> {
    store.store(note)?;
    Ok(SyncOutcome::from_index(&note.id(), "update", index.update_note(note)))
}

/// Moves a note to the trash and drops it from the index.
pub fn trash_note(store: &dyn NoteStore, index: &dyn Index, id: &NoteId) -> NxResult<SyncOutcome> {
    store.remove(id, true)?;
    Ok(SyncOutcome::from_index(id, "remove", index.remove_note(id)))
}

/// Deletes a note for good and drops it from the index.
pub fn delete_note(store: &dyn NoteStore, index: &dyn Index, id: &NoteId) -> NxResult<SyncOutcome> {
    store.remove(id, false)?;
    Ok(SyncOutcome::from_index(id, "remove", index.remove_note(id)))
}

/// Brings a note back from the trash and re-indexes it.
pub fn restore_note(
    store: &dyn NoteStore,
    index: &dyn Index,
    id: &NoteId,
) -> NxResult<SyncOutcome> {
    store.restore(id)?;
    let indexed = store.load(id).and_then(|note| index.update_note(&note));
    Ok(SyncOutcome::from_index(id, "update", indexed))
}

/// What a [`reindex`] run did.
#[derive(Debug, Clone, Default)]
pub struct ReindexReport {
    /// The index was healthy and nothing was rebuilt.
    pub skipped: bool,
    pub before: Option<IndexStats>,
    pub after: Option<IndexStats>,
    pub duration: Duration,
    /// Optimization failed after a successful rebuild.
    pub optimize_warning: Option<String>,
}

/// Rebuilds the index from the notes directory.
///
/// Without `force` a healthy, valid index is left alone. The rebuild runs
/// inside a transaction: a failed rebuild is rolled back, a failed optimize
/// is only reported.
pub fn reindex(index: &dyn Index, force: bool) -> NxResult<ReindexReport> {
    if !force && index.is_healthy().unwrap_or(false) && index.validate_index().is_ok() {
        info!(kind = %index.kind(), "index healthy, skipping rebuild");
        return Ok(ReindexReport {
            skipped: true,
            ..ReindexReport::default()
        });
    }

    index.begin_transaction()?;
    let before = index.get_stats().ok();
    let started = Instant::now();

    if let Err(e) = index.rebuild() {
        if let Err(rollback) = index.rollback_transaction() {
            warn!(error = %rollback, "rollback after failed rebuild also failed");
        }
        return Err(e);
    }

    let optimize_warning = index.optimize().err().map(|e: NxError| {
        warn!(error = %e, "index optimization failed");
        e.to_string()
    });

    index.commit_transaction()?;
    let duration = started.elapsed();
    let after = index.get_stats().ok();

    info!(
        kind = %index.kind(),
        notes = after.as_ref().map_or(0, |s| s.total_notes),
        elapsed_ms = duration.as_millis() as u64,
        "reindex finished"
    );

    Ok(ReindexReport {
        skipped: false,
        before,
        after,
        duration,
        optimize_warning,
    })
}
