//! Atomic runner: construct a context, run the body, attempt the commit,
//! back off, honor cancellation, enforce the attempt budget.
//!
//! The body is re-run from scratch on every retry, so user code must be
//! idempotent with respect to its own external side effects; the engine
//! cannot roll those back. Writes to cells *are* rolled back for free,
//! because they only exist in the context's buffer until commit.
//!
//! The inter-attempt wait is the loop's only suspension point. It is
//! injectable through the [`Sleep`] trait so a cooperative scheduler can
//! substitute a yielding sleep; the default [`ThreadSleep`] blocks the
//! thread in short slices and re-checks cancellation between them.

use std::thread;
use std::time::Duration;

use seqstm_error::{Result, StmError};
use seqstm_types::{AtomicOptions, Cancelled, Cx};

use crate::backoff;
use crate::stats;
use crate::tx::{CommitOutcome, Tx};

// ---------------------------------------------------------------------------
// Sleep capability
// ---------------------------------------------------------------------------

/// Cancellation-aware inter-attempt wait.
pub trait Sleep: Send + Sync {
    /// Wait for `duration`, returning early with [`Cancelled`] if the
    /// context is cancelled before or during the wait.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when cancellation short-circuits the wait.
    fn sleep(&self, duration: Duration, cx: &Cx) -> std::result::Result<(), Cancelled>;
}

/// Default sleeper for preemptive threads.
///
/// Sleeps in short slices and checkpoints the cancellation context between
/// slices, so a cancel request arriving mid-wait surfaces within one slice.
#[derive(Debug, Clone)]
pub struct ThreadSleep {
    slice: Duration,
}

impl Default for ThreadSleep {
    fn default() -> Self {
        Self {
            slice: Duration::from_millis(5),
        }
    }
}

impl ThreadSleep {
    /// Sleeper with a custom slice width, clamped to at least 1ms.
    #[must_use]
    pub fn with_slice(slice: Duration) -> Self {
        Self {
            slice: slice.max(Duration::from_millis(1)),
        }
    }
}

impl Sleep for ThreadSleep {
    fn sleep(&self, duration: Duration, cx: &Cx) -> std::result::Result<(), Cancelled> {
        let mut remaining = duration;
        while !remaining.is_zero() {
            cx.checkpoint()?;
            let slice = remaining.min(self.slice);
            thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
        cx.checkpoint()
    }
}

// ---------------------------------------------------------------------------
// atomic
// ---------------------------------------------------------------------------

/// Run `body` as an atomic transaction with the default thread sleeper.
///
/// See [`atomic_with_sleep`] for the full contract.
///
/// # Errors
///
/// [`StmError::Timeout`] when the attempt budget is exhausted,
/// [`StmError::Cancelled`] when `cx` is cancelled between attempts or
/// mid-backoff, and any error returned by `body` unchanged.
pub fn atomic<T, R, F>(options: &AtomicOptions, cx: &Cx, body: F) -> Result<R>
where
    T: 'static,
    F: FnMut(&mut Tx<T>) -> Result<R>,
{
    atomic_with_sleep(options, cx, &ThreadSleep::default(), body)
}

/// Run `body` as an atomic transaction with an injected sleeper.
///
/// Each attempt gets a fresh [`Tx`] in the options' mode. A commit conflict
/// bumps the retry counter, waits out the configured backoff, and re-runs
/// the body; a body error propagates immediately with the attempt's
/// buffered writes discarded. Conflicts themselves never surface.
///
/// # Errors
///
/// As [`atomic`].
pub fn atomic_with_sleep<T, R, F>(
    options: &AtomicOptions,
    cx: &Cx,
    sleeper: &dyn Sleep,
    mut body: F,
) -> Result<R>
where
    T: 'static,
    F: FnMut(&mut Tx<T>) -> Result<R>,
{
    let max_attempts = options.max_attempts.max(1);

    for attempt in 0..max_attempts {
        cx.checkpoint()?;

        let mut tx = Tx::new(options.mode);
        let value = body(&mut tx)?;

        match tx.commit() {
            CommitOutcome::Committed => {
                tracing::trace!(
                    target: "seqstm.engine",
                    attempt,
                    "transaction committed"
                );
                return Ok(value);
            }
            CommitOutcome::Conflict => {
                if attempt + 1 == max_attempts {
                    break;
                }
                stats::note_retry::<T>();
                let wait = backoff::delay(
                    options.strategy,
                    attempt + 1,
                    options.base_delay,
                    options.max_delay,
                );
                tracing::debug!(
                    target: "seqstm.engine",
                    attempt,
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    strategy = %options.strategy,
                    "commit conflict, backing off"
                );
                sleeper.sleep(wait, cx)?;
            }
        }
    }

    Err(StmError::Timeout {
        attempts: max_attempts,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use seqstm_types::{BackoffStrategy, TxMode};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use crate::cell::TCell;

    fn quick_options() -> AtomicOptions {
        AtomicOptions::new()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
            .with_strategy(BackoffStrategy::Constant)
    }

    #[test]
    fn commits_on_first_attempt() {
        let cell = TCell::new(0u64);
        let cx = Cx::new();

        let result = atomic(&quick_options(), &cx, |tx| {
            let v = tx.read(&cell);
            tx.write(&cell, v + 1)?;
            Ok(v)
        });

        assert_eq!(result.unwrap(), 0);
        assert_eq!(*cell.load(), 1);
    }

    #[derive(Debug, Clone, PartialEq)]
    struct RetryMarker(u64);

    #[test]
    fn retries_after_conflict_then_succeeds() {
        let cell = TCell::new(RetryMarker(0));
        let cx = Cx::new();
        let bodies = AtomicU32::new(0);

        let retries_before = stats::retries::<RetryMarker>();
        let result = atomic(
            &quick_options().with_max_attempts(5),
            &cx,
            |tx| {
                let run = bodies.fetch_add(1, Ordering::Relaxed);
                let v = tx.read(&cell);
                if run == 0 {
                    // Competitor sneaks in between snapshot and commit.
                    cell.store(RetryMarker(v.0 + 100));
                }
                tx.write(&cell, RetryMarker(v.0 + 1))?;
                Ok(())
            },
        );

        assert!(result.is_ok());
        assert_eq!(bodies.load(Ordering::Relaxed), 2);
        assert_eq!(*cell.load(), RetryMarker(101));
        assert_eq!(stats::retries::<RetryMarker>(), retries_before + 1);
    }

    #[test]
    fn exhausted_budget_times_out() {
        let cell = TCell::new(0u64);
        let cx = Cx::new();

        let result: Result<()> = atomic(
            &quick_options().with_max_attempts(3),
            &cx,
            |tx| {
                let v = tx.read(&cell);
                // Every attempt is invalidated before it can commit.
                cell.store(v + 10);
                tx.write(&cell, v + 1)?;
                Ok(())
            },
        );

        assert!(
            matches!(result, Err(StmError::Timeout { attempts: 3 })),
            "expected timeout, got {result:?}"
        );
    }

    #[test]
    fn body_error_propagates_without_retry() {
        #[derive(Debug)]
        struct Boom;
        impl std::fmt::Display for Boom {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("boom")
            }
        }
        impl std::error::Error for Boom {}

        let cell = TCell::new(0u64);
        let cx = Cx::new();
        let bodies = AtomicU32::new(0);

        let result: Result<()> = atomic::<u64, _, _>(
            &quick_options().with_max_attempts(10),
            &cx,
            |tx| {
                bodies.fetch_add(1, Ordering::Relaxed);
                tx.write(&cell, 99)?;
                Err(StmError::user(Boom))
            },
        );

        let err = result.unwrap_err();
        assert!(err.is_user_error());
        assert_eq!(err.to_string(), "boom");
        assert_eq!(bodies.load(Ordering::Relaxed), 1);
        // The buffered write was discarded with the attempt.
        assert_eq!(*cell.load(), 0);
    }

    #[test]
    fn read_only_violation_fails_fast() {
        let cell = TCell::new(7u64);
        let cx = Cx::new();
        let bodies = AtomicU32::new(0);

        let result: Result<()> = atomic(
            &quick_options().with_max_attempts(10).with_mode(TxMode::ReadOnly),
            &cx,
            |tx| {
                bodies.fetch_add(1, Ordering::Relaxed);
                tx.write(&cell, 1)?;
                Ok(())
            },
        );

        assert!(matches!(
            result,
            Err(StmError::ReadOnlyViolation { cell: id }) if id == cell.id()
        ));
        assert_eq!(bodies.load(Ordering::Relaxed), 1);
        assert_eq!(*cell.load(), 7);
        assert_eq!(cell.version(), 0);
    }

    #[test]
    fn cancellation_before_first_attempt() {
        let cell = TCell::new(0u64);
        let cx = Cx::new();
        cx.cancel();
        let bodies = AtomicU32::new(0);

        let result: Result<()> = atomic(&quick_options(), &cx, |tx| {
            bodies.fetch_add(1, Ordering::Relaxed);
            let _ = tx.read(&cell);
            Ok(())
        });

        assert!(matches!(result, Err(StmError::Cancelled)));
        assert_eq!(bodies.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn cancellation_short_circuits_backoff_sleep() {
        let cell = Arc::new(TCell::new(0u64));
        let cx = Cx::new();

        // A generous budget and a long constant delay: without
        // cancellation this loop would run for minutes.
        let options = AtomicOptions::new()
            .with_max_attempts(1_000)
            .with_base_delay(Duration::from_millis(250))
            .with_max_delay(Duration::from_millis(250))
            .with_strategy(BackoffStrategy::Constant);

        let canceller = {
            let cx = cx.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                cx.cancel();
            })
        };

        let started = Instant::now();
        let body_cell = Arc::clone(&cell);
        let result: Result<()> = atomic(&options, &cx, move |tx| {
            let v = tx.read(&body_cell);
            body_cell.store(v + 10);
            tx.write(&body_cell, v + 1)?;
            Ok(())
        });
        canceller.join().unwrap();

        assert!(matches!(result, Err(StmError::Cancelled)));
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "cancellation did not short-circuit the sleep"
        );
    }

    #[derive(Debug, Default)]
    struct RecordingSleep {
        slept: Mutex<Vec<Duration>>,
    }

    impl Sleep for RecordingSleep {
        fn sleep(
            &self,
            duration: Duration,
            cx: &Cx,
        ) -> std::result::Result<(), Cancelled> {
            cx.checkpoint()?;
            self.slept.lock().push(duration);
            Ok(())
        }
    }

    #[test]
    fn injected_sleeper_receives_backoff_delays() {
        let cell = TCell::new(0u64);
        let cx = Cx::new();
        let sleeper = RecordingSleep::default();

        let options = AtomicOptions::new()
            .with_max_attempts(4)
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
            .with_strategy(BackoffStrategy::Linear);

        let result: Result<()> = atomic_with_sleep(&options, &cx, &sleeper, |tx| {
            let v = tx.read(&cell);
            cell.store(v + 10);
            tx.write(&cell, v + 1)?;
            Ok(())
        });

        assert!(matches!(result, Err(StmError::Timeout { attempts: 4 })));
        // Three conflicts back off before the final attempt; the linear
        // curve is evaluated at attempts 1, 2, 3.
        let slept = sleeper.slept.lock();
        assert_eq!(
            *slept,
            vec![
                Duration::from_millis(20),
                Duration::from_millis(30),
                Duration::from_millis(40),
            ]
        );
    }

    #[test]
    fn thread_sleep_returns_cancelled_mid_wait() {
        let cx = Cx::new();
        let sleeper = ThreadSleep::with_slice(Duration::from_millis(1));

        let canceller = {
            let cx = cx.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                cx.cancel();
            })
        };

        let started = Instant::now();
        let result = sleeper.sleep(Duration::from_secs(60), &cx);
        canceller.join().unwrap();

        assert_eq!(result, Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn zero_duration_sleep_still_checkpoints() {
        let cx = Cx::new();
        cx.cancel();
        let sleeper = ThreadSleep::default();
        assert_eq!(sleeper.sleep(Duration::ZERO, &cx), Err(Cancelled));
    }
}
