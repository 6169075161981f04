//! Ctrl-C handling.
//!
//! The first interrupt asks the running build to stop: the runner kills make
//! and the pipeline returns a cancelled outcome. Staged trees are left as they
//! are; the next invocation restages them anyway. A second interrupt exits
//! immediately.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code for interrupted runs (128 + SIGINT).
pub const EXIT_CODE_CANCELLED: i32 = 130;

/// Shared cancellation state.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    signal_count: AtomicU8,
}

/// Action to take after an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First interrupt: stop the build.
    Cancel,
    /// Second interrupt: exit now.
    ImmediateExit,
    /// Anything after that.
    Ignore,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Record an interrupt and decide what to do about it.
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.inner.signal_count.fetch_add(1, Ordering::SeqCst);
        match count {
            0 => {
                self.cancel();
                SignalAction::Cancel
            }
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }
}

/// Install a process-wide Ctrl-C handler driving `flag`.
pub fn install_handler(flag: CancelFlag) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || match flag.handle_signal() {
        SignalAction::Cancel => {
            tracing::warn!("interrupted, stopping build (press Ctrl-C again to exit now)");
        }
        SignalAction::ImmediateExit => std::process::exit(EXIT_CODE_CANCELLED),
        SignalAction::Ignore => {}
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_sequence() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());

        assert_eq!(flag.handle_signal(), SignalAction::Cancel);
        assert!(flag.is_cancelled());
        assert_eq!(flag.handle_signal(), SignalAction::ImmediateExit);
        assert_eq!(flag.handle_signal(), SignalAction::Ignore);
    }

    #[test]
    fn test_clones_share_state() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        other.cancel();
        assert!(flag.is_cancelled());
    }
}
