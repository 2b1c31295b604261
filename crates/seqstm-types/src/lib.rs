//! Shared types for the seqstm transactional memory engine.
//!
//! This crate is intentionally small: it defines the identifiers and
//! configuration values that every other seqstm crate agrees on, plus the
//! cancellation context threaded through the retry loop.

pub mod cx;

pub use cx::{Cancelled, CancelReason, Cx};

use std::fmt;
use std::num::NonZeroU64;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CellId
// ---------------------------------------------------------------------------

/// Process-unique identifier of a transactional cell.
///
/// Ids are 1-based and allocated from a shared monotonic sequence at cell
/// construction. Their only semantic role is to impose a total order on
/// reservation acquisition during commit; they are never reused and never
/// compared structurally against cell contents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct CellId(NonZeroU64);

impl CellId {
    /// The first id handed out by the allocation sequence.
    pub const ONE: Self = Self(NonZeroU64::MIN);

    /// Create a cell id from a raw u64.
    ///
    /// Returns `None` if `n` is 0 (id 0 does not exist).
    #[inline]
    #[must_use]
    pub const fn new(n: u64) -> Option<Self> {
        match NonZeroU64::new(n) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Get the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TxMode
// ---------------------------------------------------------------------------

/// Access mode of a transaction attempt.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum TxMode {
    /// Reads and buffered writes, committed via reserve/revalidate/publish.
    #[default]
    ReadWrite,
    /// Reads only; any write is a programmer error surfaced immediately.
    ReadOnly,
}

impl TxMode {
    /// Whether writes are rejected in this mode.
    #[inline]
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnly)
    }
}

// ---------------------------------------------------------------------------
// BackoffStrategy
// ---------------------------------------------------------------------------

/// Curve used to compute the inter-attempt delay after a commit conflict.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum BackoffStrategy {
    /// Always the base delay.
    Constant,
    /// `base * (attempt + 1)`, capped at the max delay.
    Linear,
    /// `base << attempt`, capped at the max delay.
    Exponential,
    /// Uniform random delay in `[0, exponential]`.
    #[default]
    ExponentialWithJitter,
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Constant => "constant",
            Self::Linear => "linear",
            Self::Exponential => "exponential",
            Self::ExponentialWithJitter => "exponential-with-jitter",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// AtomicOptions
// ---------------------------------------------------------------------------

/// Configuration for one `atomic` invocation.
///
/// The builder methods clamp their inputs to sane lower bounds
/// (`max_attempts >= 1`, delays `>= 1ms`); the engine and the backoff
/// function apply the same clamps defensively, so a hand-constructed or
/// deserialized value with out-of-range fields degrades to the nearest
/// legal configuration instead of misbehaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicOptions {
    /// Upper bound on commit attempts before the engine reports a timeout.
    pub max_attempts: u32,
    /// Base of the backoff computation.
    pub base_delay: Duration,
    /// Cap on any single backoff interval.
    pub max_delay: Duration,
    /// Backoff curve.
    pub strategy: BackoffStrategy,
    /// Access mode handed to every transaction attempt.
    pub mode: TxMode,
}

impl Default for AtomicOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
            strategy: BackoffStrategy::default(),
            mode: TxMode::default(),
        }
    }
}

impl AtomicOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attempt budget, clamped to at least 1.
    #[must_use]
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self
        }
    }

    /// Set the base delay, clamped to at least 1ms.
    #[must_use]
    pub fn with_base_delay(self, base_delay: Duration) -> Self {
        Self {
            base_delay: base_delay.max(Duration::from_millis(1)),
            ..self
        }
    }

    /// Set the per-retry delay cap, clamped to at least 1ms.
    #[must_use]
    pub fn with_max_delay(self, max_delay: Duration) -> Self {
        Self {
            max_delay: max_delay.max(Duration::from_millis(1)),
            ..self
        }
    }

    /// Set the backoff curve.
    #[must_use]
    pub fn with_strategy(self, strategy: BackoffStrategy) -> Self {
        Self { strategy, ..self }
    }

    /// Set the transaction mode.
    #[must_use]
    pub fn with_mode(self, mode: TxMode) -> Self {
        Self { mode, ..self }
    }

    /// Convenience: read-only options with defaults otherwise.
    #[must_use]
    pub fn read_only() -> Self {
        Self::default().with_mode(TxMode::ReadOnly)
    }
}
