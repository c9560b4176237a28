//! Cooperative shutdown flag
//!
//! Set once by the signal thread (or a test), polled at the top of every
//! core loop and inside every busy-retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide stop flag; clones share the same flag
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    stop: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// True until shutdown has been requested
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Relaxed)
    }

    /// Request shutdown
    pub fn trigger(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            tracing::info!("shutdown requested");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let a = Shutdown::new();
        let b = a.clone();
        assert!(b.is_running());
        a.trigger();
        assert!(!b.is_running());
        a.trigger();
        assert!(!a.is_running());
    }

    #[test]
    fn test_visible_across_threads() {
        let s = Shutdown::new();
        let seen = s.clone();
        let h = std::thread::spawn(move || {
            while seen.is_running() {
                std::hint::spin_loop();
            }
        });
        s.trigger();
        h.join().unwrap();
    }
}
