//! Cancellation context (`Cx`) for the retry loop.
//!
//! A `Cx` threads an external cancellation signal through long-running
//! operations. The engine calls [`Cx::checkpoint`] before every attempt and
//! between slices of the inter-attempt sleep, so a cancel request observed
//! at any of those points aborts the loop promptly.
//!
//! Clones share cancellation state. Child contexts created with
//! [`Cx::create_child`] have independent state but receive their parent's
//! cancel requests; a child cancelling itself never affects the parent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// CancelReason
// ---------------------------------------------------------------------------

/// Reason for cancellation, ordered from weakest to strongest.
///
/// Multiple cancel requests are monotone: the strongest reason wins and the
/// recorded reason can never get weaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CancelReason {
    /// A deadline elapsed somewhere above the engine.
    Deadline = 0,
    /// The user asked for the operation to stop.
    UserInterrupt = 1,
    /// The owning scope is shutting down.
    Shutdown = 2,
    /// Hard abort.
    Abort = 3,
}

// ---------------------------------------------------------------------------
// Cancelled
// ---------------------------------------------------------------------------

/// Error returned by [`Cx::checkpoint`] once cancellation has been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

// ---------------------------------------------------------------------------
// Cx
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CxInner {
    cancel_requested: AtomicBool,
    cancel_reason: Mutex<Option<CancelReason>>,
    children: Mutex<Vec<Arc<CxInner>>>,
}

impl CxInner {
    fn new() -> Self {
        Self {
            cancel_requested: AtomicBool::new(false),
            cancel_reason: Mutex::new(None),
            children: Mutex::new(Vec::new()),
        }
    }
}

/// Propagate cancellation to a node and all its descendants.
///
/// Each node's lock is released before recursing into children to avoid
/// lock-ordering issues.
fn propagate_cancel(inner: &CxInner, reason: CancelReason) {
    // Fast-path flag for checkpoint.
    inner.cancel_requested.store(true, Ordering::Release);

    // Monotone reason update.
    {
        let mut r = inner
            .cancel_reason
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match *r {
            Some(existing) if existing >= reason => {}
            _ => *r = Some(reason),
        }
    }

    let children: Vec<Arc<CxInner>> = {
        let guard = inner
            .children
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.clone()
    };
    for child in &children {
        propagate_cancel(child, reason);
    }
}

/// Cancellation context passed to the engine.
///
/// Cheap to clone; all clones observe the same cancel flag.
#[derive(Debug, Clone)]
pub struct Cx {
    inner: Arc<CxInner>,
}

impl Default for Cx {
    fn default() -> Self {
        Self::new()
    }
}

impl Cx {
    /// Create a fresh, uncancelled context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CxInner::new()),
        }
    }

    /// Whether cancellation has been requested on this context.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::Acquire)
    }

    /// Request cancellation with the default reason (`UserInterrupt`).
    pub fn cancel(&self) {
        self.cancel_with_reason(CancelReason::UserInterrupt);
    }

    /// Request cancellation with an explicit reason.
    ///
    /// The strongest reason wins; the request propagates to all children.
    pub fn cancel_with_reason(&self, reason: CancelReason) {
        propagate_cancel(&self.inner, reason);
    }

    /// The strongest cancellation reason recorded so far, if any.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        *self
            .inner
            .cancel_reason
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Check for cancellation at a yield point.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] once a cancel request is visible.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.inner.cancel_requested.load(Ordering::Acquire) {
            return Err(Cancelled);
        }
        Ok(())
    }

    /// Create a child context that receives this context's cancel requests
    /// but can also be cancelled on its own without affecting the parent.
    #[must_use]
    pub fn create_child(&self) -> Self {
        let child = Self::new();
        {
            let mut children = self
                .inner
                .children
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            children.push(Arc::clone(&child.inner));
        }
        // A parent cancelled before the child was registered must still win.
        if self.is_cancel_requested() {
            if let Some(reason) = self.cancel_reason() {
                propagate_cancel(&child.inner, reason);
            }
        }
        child
    }
}
