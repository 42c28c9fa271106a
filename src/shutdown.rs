/// shutdown.rs – Idempotent, step-isolated teardown.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

/// Set once the first shutdown begins. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownLatch {
    started: Arc<AtomicBool>,
}

impl ShutdownLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for the first caller only.
    pub fn begin(&self) -> bool {
        !self.started.swap(true, Ordering::AcqRel)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

/// Run one cleanup step. A failure is logged and swallowed so the next step
/// still runs. Returns whether the step succeeded.
pub fn step<F>(name: &str, f: F) -> bool
where
    F: FnOnce() -> Result<()>,
{
    match f() {
        Ok(()) => {
            info!("shutdown: {name}");
            true
        }
        Err(e) => {
            warn!("shutdown: {name} failed: {e:#}");
            false
        }
    }
}
