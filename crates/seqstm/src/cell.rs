//! Versioned cell: a single-value seqlock whose writer phase is gated by CAS.
//!
//! ## Protocol
//!
//! The version counter is even when the cell is free and odd while exactly
//! one committer holds a reservation. Readers sample the version before and
//! after loading the value; if either sample is odd or the two differ, the
//! reader retries. Writers never take a mutex: a reservation is a CAS from
//! an even version to the next odd one, and publishing (or aborting) the
//! reservation increments the version back to even. A complete write cycle
//! therefore advances the version by exactly 2.
//!
//! The value itself lives in an [`ArcSwap`] slot, so a reader's load is a
//! single atomic pointer fetch and can never observe a torn value; the
//! version validation only decides whether the `(value, version)` pair is a
//! consistent snapshot.
//!
//! ## Memory ordering
//!
//! Readers acquire-load the version on both sides of the value load.
//! Reservation is an acquire-release CAS. Publication stores the value and
//! then release-increments the version, so any thread that observes the new
//! even version also observes the new value.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use serde::Serialize;
use seqstm_types::CellId;

// ---------------------------------------------------------------------------
// Global metrics (lock-free, Relaxed ordering)
// ---------------------------------------------------------------------------

static SEQSTM_CELL_SNAPSHOTS_TOTAL: AtomicU64 = AtomicU64::new(0);
static SEQSTM_CELL_SNAPSHOT_RETRIES_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Snapshot of cell read metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CellMetrics {
    pub seqstm_cell_snapshots_total: u64,
    pub seqstm_cell_snapshot_retries_total: u64,
}

/// Read current cell metrics.
#[must_use]
pub fn cell_metrics() -> CellMetrics {
    CellMetrics {
        seqstm_cell_snapshots_total: SEQSTM_CELL_SNAPSHOTS_TOTAL.load(Ordering::Relaxed),
        seqstm_cell_snapshot_retries_total: SEQSTM_CELL_SNAPSHOT_RETRIES_TOTAL
            .load(Ordering::Relaxed),
    }
}

/// Reset cell metrics (for tests).
pub fn reset_cell_metrics() {
    SEQSTM_CELL_SNAPSHOTS_TOTAL.store(0, Ordering::Relaxed);
    SEQSTM_CELL_SNAPSHOT_RETRIES_TOTAL.store(0, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Id allocation
// ---------------------------------------------------------------------------

/// Shared monotonic sequence for cell ids. Ids start at 1 and are never
/// reused within a process.
static CELL_ID_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_cell_id() -> CellId {
    let raw = CELL_ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    // The sequence starts at 1 and a u64 does not wrap in practice.
    CellId::new(raw).unwrap_or(CellId::ONE)
}

// ---------------------------------------------------------------------------
// TCell
// ---------------------------------------------------------------------------

/// Spins before a waiting reader escalates from `spin_loop` to `yield_now`.
const SPIN_YIELD_THRESHOLD: u32 = 64;

#[inline]
fn polite_spin(spins: &mut u32) {
    if *spins < SPIN_YIELD_THRESHOLD {
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
    *spins = spins.saturating_add(1);
}

struct CellCore<T> {
    id: CellId,
    version: AtomicU64,
    slot: ArcSwap<T>,
}

/// A shared transactional memory cell holding one value of type `T`.
///
/// Cells are freely shared among threads: the handle is cheap to clone and
/// all clones refer to the same versioned slot. Outside a transaction the
/// cell is read with [`snapshot`](TCell::snapshot) (or the
/// [`load`](TCell::load) shorthand) and written with
/// [`store`](TCell::store); inside a transaction, all access goes through
/// the transaction context, which drives the reserve/publish primitives
/// during commit.
pub struct TCell<T> {
    core: Arc<CellCore<T>>,
}

impl<T> Clone for TCell<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> TCell<T> {
    /// Create a cell with the given initial value, version 0, and a fresh
    /// process-unique id.
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            core: Arc::new(CellCore {
                id: next_cell_id(),
                version: AtomicU64::new(0),
                slot: ArcSwap::from_pointee(initial),
            }),
        }
    }

    /// This cell's process-unique id.
    #[must_use]
    pub fn id(&self) -> CellId {
        self.core.id
    }

    /// Current version (acquire load). Even means free, odd means reserved.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.core.version.load(Ordering::Acquire)
    }

    /// Optimistic consistent read of the `(value, version)` pair.
    ///
    /// Spins politely while a committer holds a reservation or publishes
    /// between the two version samples. Never blocks on a mutex; the loop
    /// is bounded by the number of concurrent commits that touch this cell.
    /// The returned version is always even.
    #[must_use]
    pub fn snapshot(&self) -> (Arc<T>, u64) {
        let mut spins = 0u32;
        let mut retries = 0u64;

        let result = loop {
            let v1 = self.core.version.load(Ordering::Acquire);
            if v1 & 1 == 1 {
                retries += 1;
                polite_spin(&mut spins);
                continue;
            }

            let value = self.core.slot.load_full();

            let v2 = self.core.version.load(Ordering::Acquire);
            if v1 == v2 {
                break (value, v1);
            }

            retries += 1;
            polite_spin(&mut spins);
        };

        SEQSTM_CELL_SNAPSHOTS_TOTAL.fetch_add(1, Ordering::Relaxed);
        if retries > 0 {
            SEQSTM_CELL_SNAPSHOT_RETRIES_TOTAL.fetch_add(retries, Ordering::Relaxed);
            tracing::debug!(
                target: "seqstm.cell",
                cell = %self.core.id,
                retries,
                "snapshot contended"
            );
        }

        result
    }

    /// Shorthand for the value half of [`snapshot`](TCell::snapshot).
    #[must_use]
    pub fn load(&self) -> Arc<T> {
        self.snapshot().0
    }

    /// Attempt to reserve this cell for publication.
    ///
    /// Succeeds iff `expected` is even and the version still equals
    /// `expected`; on success the version becomes `expected + 1` (odd) and
    /// the caller is the sole reserver until it calls
    /// [`publish`](TCell::publish) or [`abort_release`](TCell::abort_release).
    ///
    /// A `false` return is a conflict signal, not an error.
    pub fn try_reserve(&self, expected: u64) -> bool {
        if expected & 1 == 1 {
            return false;
        }
        self.core
            .version
            .compare_exchange(expected, expected + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Install a new value and release the caller's reservation (odd to
    /// even).
    ///
    /// Must only be called while holding the reservation from a successful
    /// [`try_reserve`](TCell::try_reserve).
    pub fn publish(&self, value: Arc<T>) {
        debug_assert_eq!(
            self.core.version.load(Ordering::Relaxed) & 1,
            1,
            "publish without reservation"
        );
        self.core.slot.store(value);
        self.core.version.fetch_add(1, Ordering::Release);
    }

    /// Release the caller's reservation without changing the value (odd to
    /// even).
    pub fn abort_release(&self) {
        debug_assert_eq!(
            self.core.version.load(Ordering::Relaxed) & 1,
            1,
            "abort_release without reservation"
        );
        self.core.version.fetch_add(1, Ordering::Release);
    }

    /// Non-transactional direct write.
    ///
    /// Follows the same reserve/publish protocol as a commit, so every cell
    /// invariant is preserved and the version never stays odd. It bypasses
    /// transactional serializability, however: a direct store interleaved
    /// with an in-flight transaction on the same cell forces that
    /// transaction to abort and retry.
    pub fn store(&self, value: T) {
        let value = Arc::new(value);
        let mut spins = 0u32;
        loop {
            let current = self.core.version.load(Ordering::Acquire);
            if current & 1 == 0 && self.try_reserve(current) {
                self.core.slot.store(value);
                self.core.version.fetch_add(1, Ordering::Release);
                return;
            }
            polite_spin(&mut spins);
        }
    }
}

impl<T> fmt::Debug for TCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = self.core.version.load(Ordering::Relaxed);
        f.debug_struct("TCell")
            .field("id", &self.core.id)
            .field("version", &version)
            .field("reserved", &(version & 1 == 1))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
