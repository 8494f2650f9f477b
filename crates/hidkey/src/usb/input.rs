//! Input state cache
//!
//! Single byte written by the interrupt completion on the poll thread and
//! read by cached `get_pin` calls on the control thread.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct InputState {
    modifiers: AtomicU8,
    updates: AtomicU64,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the modifier byte of a completed report
    pub fn store(&self, modifiers: u8) {
        self.modifiers.store(modifiers, Ordering::Release);
        self.updates.fetch_add(1, Ordering::Release);
    }

    /// Modifier byte of the most recently completed report
    pub fn load(&self) -> u8 {
        self.modifiers.load(Ordering::Acquire)
    }

    /// Number of reports stored so far
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Acquire)
    }
}
