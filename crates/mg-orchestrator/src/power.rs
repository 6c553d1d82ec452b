//! Power-management hold
//!
//! The daemon asks the host to stay awake while any session is transferring.
//! Presenting that request to the operating system happens outside the
//! daemon; this type tracks the hold and reports transitions.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct PowerHold {
    held: AtomicBool,
}

impl PowerHold {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold if `wanted`, release otherwise
    pub fn set(&self, wanted: bool) {
        if wanted {
            self.acquire();
        } else {
            self.release();
        }
    }

    pub fn acquire(&self) {
        if !self.held.swap(true, Ordering::SeqCst) {
            tracing::info!("Holding sleep prevention while transfers are active");
        }
    }

    pub fn release(&self) {
        if self.held.swap(false, Ordering::SeqCst) {
            tracing::info!("Released sleep prevention");
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}
