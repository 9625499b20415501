use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::SolverError;

/// Cooperative cancellation flag shared between a run and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownNotifier {
    requested: Arc<AtomicBool>,
}

impl ShutdownNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn should_shutdown(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), SolverError> {
        if self.should_shutdown() {
            Err(SolverError::Interrupted)
        } else {
            Ok(())
        }
    }
}
