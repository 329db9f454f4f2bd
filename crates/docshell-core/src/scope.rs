//! Cancellation scope shared by the concurrent units of one ingestion.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Why a scope was cancelled. Only the first cause is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CancelCause {
    /// The caller's deadline elapsed.
    DeadlineExceeded,
    /// A sibling unit of work failed.
    SiblingFailed { unit: String, reason: String },
    /// The owner cancelled explicitly.
    Requested(String),
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::DeadlineExceeded => write!(f, "deadline exceeded"),
            CancelCause::SiblingFailed { unit, reason } => {
                write!(f, "{} failed: {}", unit, reason)
            }
            CancelCause::Requested(reason) => write!(f, "cancelled: {}", reason),
        }
    }
}

#[derive(Debug)]
struct ScopeState {
    cancelled: AtomicBool,
    cause: Mutex<Option<CancelCause>>,
    deadline: Option<Instant>,
}

/// A cloneable cancellation signal with an optional deadline.
///
/// Every clone observes the same state. Units of work call [`CancelScope::check`]
/// at each suspension point and abort when it fails.
#[derive(Debug, Clone)]
pub struct CancelScope {
    state: Arc<ScopeState>,
}

impl CancelScope {
    /// A scope that is only cancelled explicitly.
    pub fn new() -> Self {
        Self::with_deadline(None)
    }

    pub fn with_deadline(deadline: Option<Instant>) -> Self {
        Self {
            state: Arc::new(ScopeState {
                cancelled: AtomicBool::new(false),
                cause: Mutex::new(None),
                deadline,
            }),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.state.deadline
    }

    /// Time left before the deadline; `None` when the scope has no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.state
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancel the scope. Returns true if this call set the cause.
    pub fn cancel(&self, cause: CancelCause) -> bool {
        let mut slot = match self.state.cause.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(cause);
        self.state.cancelled.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        if self.state.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        if let Some(deadline) = self.state.deadline {
            if Instant::now() >= deadline {
                self.cancel(CancelCause::DeadlineExceeded);
                return true;
            }
        }
        false
    }

    /// The first cancellation cause, if any.
    pub fn cause(&self) -> Option<CancelCause> {
        if !self.is_cancelled() {
            return None;
        }
        match self.state.cause.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// `Err` with the first cause once the scope is cancelled.
    pub fn check(&self) -> Result<(), CancelCause> {
        match self.cause() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}
