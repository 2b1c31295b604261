//! Type-scoped diagnostics counters.
//!
//! Two monotonic counters per element type: `conflicts` (commit attempts
//! that lost a reservation or failed revalidation) and `retries` (conflicts
//! that led to another attempt). Counters live in a registry keyed by
//! `TypeId`; entries are leaked to `&'static` on first use, so the
//! increment itself is a single relaxed `fetch_add`. The registry mutex is
//! only touched off the happy path; a conflict-free commit never comes
//! near this module.
//!
//! Counters are a debugging aid, never a correctness input.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug)]
struct TypeCounters {
    conflicts: AtomicU64,
    retries: AtomicU64,
}

impl TypeCounters {
    const fn new() -> Self {
        Self {
            conflicts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }
}

static REGISTRY: LazyLock<Mutex<HashMap<TypeId, &'static TypeCounters>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn counters_for<T: 'static>() -> &'static TypeCounters {
    let mut registry = REGISTRY.lock();
    registry
        .entry(TypeId::of::<T>())
        .or_insert_with(|| Box::leak(Box::new(TypeCounters::new())))
}

/// Point-in-time view of one element type's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub conflicts: u64,
    pub retries: u64,
}

/// Commit conflicts recorded for element type `T`.
#[must_use]
pub fn conflicts<T: 'static>() -> u64 {
    counters_for::<T>().conflicts.load(Ordering::Relaxed)
}

/// Retries recorded for element type `T`.
#[must_use]
pub fn retries<T: 'static>() -> u64 {
    counters_for::<T>().retries.load(Ordering::Relaxed)
}

/// Read both counters for element type `T`.
#[must_use]
pub fn snapshot<T: 'static>() -> StatsSnapshot {
    let counters = counters_for::<T>();
    StatsSnapshot {
        conflicts: counters.conflicts.load(Ordering::Relaxed),
        retries: counters.retries.load(Ordering::Relaxed),
    }
}

/// Reset both counters for element type `T` to zero.
pub fn reset<T: 'static>() {
    let counters = counters_for::<T>();
    counters.conflicts.store(0, Ordering::SeqCst);
    counters.retries.store(0, Ordering::SeqCst);
}

pub(crate) fn note_conflict<T: 'static>() {
    counters_for::<T>().conflicts.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn note_retry<T: 'static>() {
    counters_for::<T>().retries.fetch_add(1, Ordering::Relaxed);
}
