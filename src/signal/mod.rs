//! Signal handling for SIGINT/SIGTERM
//!
//! The first signal requests cancellation: the packager stops at the next
//! state or layer boundary, removes its scratch directory and reports the
//! run as interrupted. Temp files in the cache store are removed as their
//! guards drop, so an interrupted run never leaves a partial entry behind.
//!
//! A second signal exits immediately with [`EXIT_CODE_INTERRUPTED`].

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code for interrupted runs
pub const EXIT_CODE_INTERRUPTED: i32 = 80;

/// Signal handler state
#[derive(Debug, Default)]
pub struct SignalState {
    /// First signal received (cancellation initiated)
    cancel_requested: AtomicBool,
    /// Signal count (for tracking double-SIGINT)
    signal_count: AtomicU8,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Request cancellation without a signal (embedding callers, tests)
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Get the number of signals received
    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Handle a signal (SIGINT/SIGTERM)
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        match count {
            0 => {
                self.cancel_requested.store(true, Ordering::SeqCst);
                SignalAction::InitiateCancellation
            }
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: stop at the next boundary and clean up
    InitiateCancellation,
    /// Second signal: exit now
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Installs the process signal handler around a shared [`SignalState`]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    /// Get a reference to the signal state
    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install handlers for SIGINT and SIGTERM.
    ///
    /// Must be called at most once per process.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::InitiateCancellation => {
                tracing::warn!("Received interrupt, cleaning up temporary files...");
            }
            SignalAction::ImmediateExit => {
                tracing::warn!("Received second interrupt, exiting immediately");
                std::process::exit(EXIT_CODE_INTERRUPTED);
            }
            SignalAction::Ignore => {}
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_state_initial() {
        let state = SignalState::new();
        assert!(!state.is_cancel_requested());
        assert_eq!(state.signal_count(), 0);
    }

    #[test]
    fn test_first_signal_initiates_cancellation() {
        let state = SignalState::new();
        assert_eq!(state.handle_signal(), SignalAction::InitiateCancellation);
        assert!(state.is_cancel_requested());
        assert_eq!(state.signal_count(), 1);
    }

    #[test]
    fn test_second_signal_requests_immediate_exit() {
        let state = SignalState::new();
        state.handle_signal();
        assert_eq!(state.handle_signal(), SignalAction::ImmediateExit);
        assert_eq!(state.handle_signal(), SignalAction::Ignore);
        assert_eq!(state.signal_count(), 3);
    }

    #[test]
    fn test_request_cancel_without_signal() {
        let state = SignalState::new();
        state.request_cancel();
        assert!(state.is_cancel_requested());
        assert_eq!(state.signal_count(), 0);
    }

    #[test]
    fn test_handler_shares_state() {
        let handler = SignalHandler::new();
        let state = handler.state();
        state.request_cancel();
        assert!(handler.state().is_cancel_requested());
    }
}
