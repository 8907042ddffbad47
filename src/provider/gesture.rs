//! User-gesture admission tracking.
//!
//! `eth_requestAccounts` is only admitted when a deliberate input event was
//! observed inside a trailing window. The embedder reports raw page input
//! through [`GestureMonitor::record`]; the client consults
//! [`GestureMonitor::has_recent`] at admission time.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Input kinds the embedding layer can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Click,
    KeyDown,
    TouchStart,
    MouseMove,
    Scroll,
}

impl InputKind {
    /// Deliberate gestures qualify; ambient movement does not.
    pub fn qualifies(self) -> bool {
        matches!(self, Self::Click | Self::KeyDown | Self::TouchStart)
    }
}

/// Trailing window over the most recent qualifying gesture.
#[derive(Debug)]
pub struct GestureMonitor {
    window: Duration,
    last_qualifying: Mutex<Option<Instant>>,
}

impl GestureMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_qualifying: Mutex::new(None),
        }
    }

    /// Record an input event. Non-qualifying kinds leave the window alone.
    pub fn record(&self, kind: InputKind) {
        if kind.qualifies() {
            *self.lock() = Some(Instant::now());
        }
    }

    pub fn has_recent(&self) -> bool {
        self.lock().is_some_and(|at| at.elapsed() < self.window)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.last_qualifying
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
