//! Graceful shutdown flag.
//!
//! The pool has no terminal state of its own; shutdown arrives from outside.
//! The flag is raised by Ctrl-C (or by the embedding application) and the
//! orchestrator checks it at the round barrier, after reconciliation, so a
//! stop request never loses cache entries discovered in the final interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable shutdown flag shared between the signal handler and the pool.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Install a Ctrl-C handler that raises this flag.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            tracing::info!("interrupt received, stopping after the current round");
            flag.request();
        })
    }
}
