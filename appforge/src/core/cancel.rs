//! Cancel handle slot for the in-flight agent call.
//!
//! The pipeline runs on a single thread, but an interrupt path (a signal
//! handler in the host application) may need to abort an in-flight agent
//! call. That one piece of shared mutable state is modeled here as a single
//! mutex-guarded slot with a narrow contract:
//!
//! - the call issuer installs the cancel function before the call,
//! - the interrupt path may take-and-invoke it at most once,
//! - the issuer clears the slot after the call completes normally.

use std::fmt;
use std::sync::Mutex;

/// Function that aborts the in-flight agent call when invoked.
pub type CancelFn = Box<dyn FnOnce() + Send>;

/// Mutex-guarded slot holding at most one [`CancelFn`].
#[derive(Default)]
pub struct CancelSlot {
    inner: Mutex<Option<CancelFn>>,
}

impl CancelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the cancel function for the call about to be issued,
    /// replacing any stale handle.
    pub fn install(&self, cancel: CancelFn) {
        *self.lock() = Some(cancel);
    }

    /// Atomically take the handle, leaving the slot empty.
    ///
    /// From the issuer side a `Some` return means the interrupt path never
    /// fired; from the interrupt side the returned handle must be invoked
    /// exactly once. A take on an empty slot yields `None`.
    pub fn take(&self) -> Option<CancelFn> {
        self.lock().take()
    }

    /// Take and invoke the handle. Returns whether a handle was invoked.
    pub fn cancel(&self) -> bool {
        match self.take() {
            Some(cancel) => {
                cancel();
                true
            }
            None => false,
        }
    }

    /// Drop any installed handle without invoking it.
    pub fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CancelFn>> {
        // A poisoned lock only means a panic elsewhere; the slot content is
        // still a valid Option, so recover rather than propagate.
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl fmt::Debug for CancelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSlot")
            .field("armed", &self.lock().is_some())
            .finish()
    }
}

/// Error carried out of an agent call that was aborted via the slot.
///
/// Always fatal: the build loop propagates it immediately instead of
/// counting it against the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl fmt::Display for CancelledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("agent call cancelled")
    }
}

impl std::error::Error for CancelledError {}
