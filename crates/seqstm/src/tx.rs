//! Per-attempt transaction context: read cache, write buffer, and the
//! three-phase commit (reserve, revalidate, publish).
//!
//! A [`Tx`] lives for exactly one commit attempt. Cells are tracked in a
//! `BTreeMap` keyed by [`CellId`], so iterating the map *is* the
//! deterministic ascending-id acquisition order that makes overlapping
//! committers collide on their first contested cell instead of
//! circular-waiting. Each tracked cell carries the version frozen at its
//! first observation; that version is never refreshed within the attempt,
//! which is what makes a successful commit an optimistic serializable
//! schedule against the attempt's original view.
//!
//! Conflicts are an outcome, not an error: [`Tx::commit`] returns
//! [`CommitOutcome`] and the engine decides whether to back off and retry.

use std::collections::BTreeMap;
use std::sync::Arc;

use seqstm_error::{Result, StmError};
use seqstm_types::{CellId, TxMode};

use crate::cell::TCell;
use crate::stats;

// ---------------------------------------------------------------------------
// CommitOutcome
// ---------------------------------------------------------------------------

/// Result of one commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitOutcome {
    /// The write set was published atomically.
    Committed,
    /// Reservation or revalidation failed against a concurrent commit; all
    /// reservations were released and no buffered write was applied.
    Conflict,
}

// ---------------------------------------------------------------------------
// Tx
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TxEntry<T> {
    cell: TCell<T>,
    /// Version frozen at the first observation of this cell (read or
    /// write), never refreshed within the attempt.
    snapshot_version: u64,
    /// Value returned by subsequent reads; a buffered write replaces it so
    /// the transaction reads its own writes.
    read: Arc<T>,
    /// Buffered pending write, applied only at publish time.
    pending: Option<Arc<T>>,
}

/// Transaction context for a single commit attempt.
///
/// Obtained by the engine and handed to the transaction body; thread-local
/// to the running attempt and never shared. Every buffered write lives in
/// the context until [`commit`](Tx::commit) publishes it, so an aborted or
/// conflicted attempt leaves all cells untouched.
#[derive(Debug)]
pub struct Tx<T> {
    entries: BTreeMap<CellId, TxEntry<T>>,
    mode: TxMode,
}

impl<T: 'static> Tx<T> {
    /// Create an empty context for one attempt.
    #[must_use]
    pub fn new(mode: TxMode) -> Self {
        Self {
            entries: BTreeMap::new(),
            mode,
        }
    }

    /// This attempt's access mode.
    #[must_use]
    pub fn mode(&self) -> TxMode {
        self.mode
    }

    /// Number of distinct cells observed so far.
    #[must_use]
    pub fn tracked_cells(&self) -> usize {
        self.entries.len()
    }

    /// Number of cells with a buffered pending write.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.entries.values().filter(|e| e.pending.is_some()).count()
    }

    fn entry_for(&mut self, cell: &TCell<T>) -> &mut TxEntry<T> {
        self.entries.entry(cell.id()).or_insert_with(|| {
            let (value, version) = cell.snapshot();
            TxEntry {
                cell: cell.clone(),
                snapshot_version: version,
                read: value,
                pending: None,
            }
        })
    }

    /// Read a cell through this transaction.
    ///
    /// A buffered write wins over the cached read, which wins over a fresh
    /// snapshot. The first observation of a cell freezes its snapshot
    /// version for the rest of the attempt.
    pub fn read(&mut self, cell: &TCell<T>) -> T
    where
        T: Clone,
    {
        let entry = self.entry_for(cell);
        entry.read.as_ref().clone()
    }

    /// Buffer a write to a cell.
    ///
    /// Subsequent reads of the cell in this attempt observe `value`. If the
    /// cell has not been seen before, its current version is snapshotted
    /// (the concurrently committed value itself is irrelevant: the buffered
    /// write shadows it).
    ///
    /// # Errors
    ///
    /// Returns [`StmError::ReadOnlyViolation`] in a read-only transaction.
    pub fn write(&mut self, cell: &TCell<T>, value: T) -> Result<()> {
        if self.mode.is_read_only() {
            return Err(StmError::ReadOnlyViolation { cell: cell.id() });
        }
        let entry = self.entry_for(cell);
        let value = Arc::new(value);
        entry.read = Arc::clone(&value);
        entry.pending = Some(value);
        Ok(())
    }

    /// Attempt to commit this transaction.
    ///
    /// Read-only attempts (and attempts with an empty write set) take a
    /// validation-only fast path. Otherwise the write set is reserved in
    /// ascending cell-id order, the read set is revalidated against the
    /// frozen snapshot versions, and the buffered writes are published in
    /// acquisition order. Any failure releases every reservation in reverse
    /// order and reports [`CommitOutcome::Conflict`] with no cell modified.
    #[must_use = "a Conflict outcome must be handled (the engine retries it)"]
    pub fn commit(self) -> CommitOutcome {
        let pending = self.pending_writes();
        if self.mode.is_read_only() || pending == 0 {
            return self.validate_snapshots();
        }

        // Phase 1: reserve the write set in ascending cell-id order. The
        // BTreeMap iterates sorted, so overlapping committers attempt their
        // common cells in the same order and at most one wins the first
        // contested reservation.
        let mut reserved: Vec<&TxEntry<T>> = Vec::with_capacity(pending);
        for entry in self.entries.values() {
            if entry.pending.is_none() {
                continue;
            }
            if entry.cell.try_reserve(entry.snapshot_version) {
                reserved.push(entry);
            } else {
                tracing::debug!(
                    target: "seqstm.tx",
                    cell = %entry.cell.id(),
                    snapshot_version = entry.snapshot_version,
                    "reservation lost, aborting commit"
                );
                release_reverse(&reserved);
                stats::note_conflict::<T>();
                return CommitOutcome::Conflict;
            }
        }

        // Phase 2: revalidate cells that were only read. Frozen snapshot
        // versions are even, so a cell mid-publication (odd version)
        // compares unequal here as required.
        for entry in self.entries.values() {
            if entry.pending.is_some() {
                continue;
            }
            let current = entry.cell.version();
            if current != entry.snapshot_version {
                tracing::debug!(
                    target: "seqstm.tx",
                    cell = %entry.cell.id(),
                    snapshot_version = entry.snapshot_version,
                    current_version = current,
                    "read set invalidated, aborting commit"
                );
                release_reverse(&reserved);
                stats::note_conflict::<T>();
                return CommitOutcome::Conflict;
            }
        }

        // Phase 3: publish in acquisition order. No conformant reader can
        // observe the window between publications of distinct cells, since
        // each reserved cell stays odd until its own publish.
        for entry in &reserved {
            if let Some(value) = &entry.pending {
                entry.cell.publish(Arc::clone(value));
            }
        }

        tracing::trace!(
            target: "seqstm.tx",
            cells = self.entries.len(),
            published = reserved.len(),
            "commit published"
        );
        CommitOutcome::Committed
    }

    /// Fast path: no writes to publish, so committing only means checking
    /// that every frozen snapshot still matches the live version.
    fn validate_snapshots(self) -> CommitOutcome {
        for entry in self.entries.values() {
            let current = entry.cell.version();
            if current != entry.snapshot_version {
                tracing::debug!(
                    target: "seqstm.tx",
                    cell = %entry.cell.id(),
                    snapshot_version = entry.snapshot_version,
                    current_version = current,
                    "read-only validation failed"
                );
                stats::note_conflict::<T>();
                return CommitOutcome::Conflict;
            }
        }
        CommitOutcome::Committed
    }
}

/// Release reservations in reverse acquisition order.
fn release_reverse<T>(reserved: &[&TxEntry<T>]) {
    for entry in reserved.iter().rev() {
        entry.cell.abort_release();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
