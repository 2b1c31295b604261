//! Software transactional memory over seqlock-versioned cells.
//!
//! seqstm groups reads and writes of shared [`TCell`]s into atomic
//! transactions committed with serializable isolation and without runtime
//! mutexes. A transaction is a closure over a [`Tx`] context: the engine
//! runs it optimistically, detects conflicts against concurrent commits at
//! commit time, and retries under a configurable backoff policy until
//! success, cancellation, or attempt exhaustion.
//!
//! ```
//! use seqstm::{atomic, AtomicOptions, Cx, TCell};
//!
//! let account = TCell::new(100u64);
//! let options = AtomicOptions::new().with_max_attempts(16);
//!
//! atomic(&options, &Cx::new(), |tx| {
//!     let balance = tx.read(&account);
//!     tx.write(&account, balance + 25)?;
//!     Ok(())
//! })
//! .unwrap();
//!
//! assert_eq!(*account.load(), 125);
//! ```
//!
//! ## How commits work
//!
//! Each cell pairs its value with a monotonic version whose parity encodes
//! reservation state (even = free, odd = reserved by one committer). A
//! transaction snapshots the version of every cell it touches on first
//! contact and never refreshes it. Commit reserves the write set via CAS in
//! ascending cell-id order (the total order is the entire deadlock
//! defence), revalidates the read set against the frozen versions, then
//! publishes. Any failure releases the reservations and the engine backs
//! off and re-runs the body.
//!
//! ## Rules for transaction bodies
//!
//! * Bodies are re-run on conflict, so they must be idempotent with
//!   respect to external side effects. Cell writes are buffered and need no
//!   such care.
//! * Keep bodies small: every tracked cell widens the conflict window.
//! * Do not perform blocking I/O inside a body.
//! * Cells are compared by identity. Two cells holding equal values are
//!   still distinct cells.

pub mod backoff;
pub mod cell;
pub mod engine;
pub mod stats;
pub mod tx;

pub use backoff::delay;
pub use cell::{CellMetrics, TCell, cell_metrics, reset_cell_metrics};
pub use engine::{Sleep, ThreadSleep, atomic, atomic_with_sleep};
pub use stats::StatsSnapshot;
pub use tx::{CommitOutcome, Tx};

pub use seqstm_error::{Result, StmError};
pub use seqstm_types::{
    AtomicOptions, BackoffStrategy, CancelReason, Cancelled, CellId, Cx, TxMode,
};
