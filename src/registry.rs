//! ==============================================================================
//! registry.rs - live session counter
//! ==============================================================================
//!
//! owned by the listener and shared with every session through an Arc.
//! the count only changes while the mutex is held, so concurrent
//! connects/disconnects cannot lose an update.
//!
//! ==============================================================================

use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    active: Mutex<usize>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// returns the count after the increment
    pub fn increment(&self) -> usize {
        let mut active = self.lock();
        *active += 1;
        *active
    }

    /// returns the count after the decrement, never going below zero
    pub fn decrement(&self) -> usize {
        let mut active = self.lock();
        *active = active.saturating_sub(1);
        *active
    }

    pub fn current(&self) -> usize {
        *self.lock()
    }

    // the counter stays valid even if a holder panicked
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
