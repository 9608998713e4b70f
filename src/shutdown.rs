//! Cooperative shutdown signalling.
//!
//! A [`ShutdownToken`] is created once at startup and cloned into every task that
//! must stop on request. Cancellation is cooperative: loops poll
//! [`ShutdownToken::is_triggered`] at well-defined points and never get interrupted
//! inside an instrument exchange.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to a process-wide stop request.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    triggered: Arc<AtomicBool>,
}

impl ShutdownToken {
    /// Create a token in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            tracing::info!("Shutdown requested");
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}
