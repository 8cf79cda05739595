//! Cancellable deadlines for blocking operations
//!
//! Every call that shells out or touches the backing volume takes a `Deadline`.
//! A deadline combines an optional time limit with a cancel flag that can be
//! tripped from another thread through a [`CancelHandle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time limit plus cancellation flag for one logical operation
#[derive(Debug, Clone)]
pub struct Deadline {
    expires_at: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

/// Cancels every [`Deadline`] it was created from
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl Deadline {
    /// A deadline that never expires (but can still be cancelled)
    pub fn none() -> Self {
        Deadline {
            expires_at: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Deadline {
            expires_at: Some(Instant::now() + timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for cancelling this deadline from elsewhere
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }

    /// Time left before expiry; `None` if unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::none()
    }
}
