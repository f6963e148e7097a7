//! Signal handling for graceful shutdown (SIGINT/SIGTERM)
//!
//! On the first signal the job executor is asked to stop: workers finish the
//! job in hand and exit. A second signal exits the process immediately with
//! code 130. Further signals are ignored.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

/// Exit code after a forced shutdown
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Signal handler state
#[derive(Debug, Default)]
pub struct ShutdownState {
    /// First signal received (graceful stop requested)
    stop_requested: AtomicBool,
    /// Second signal received (immediate exit requested)
    immediate_exit: AtomicBool,
    signal_count: AtomicU8,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn is_immediate_exit(&self) -> bool {
        self.immediate_exit.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Record a signal and return the action to take
    pub fn handle_signal(&self) -> ShutdownAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        match count {
            0 => {
                self.stop_requested.store(true, Ordering::SeqCst);
                ShutdownAction::GracefulStop
            }
            1 => {
                self.immediate_exit.store(true, Ordering::SeqCst);
                ShutdownAction::ImmediateExit
            }
            _ => {
                // Keep the counter from wrapping back to 0
                self.signal_count.store(2, Ordering::SeqCst);
                ShutdownAction::Ignore
            }
        }
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownAction {
    /// Stop claiming new jobs, let in-flight jobs finish
    GracefulStop,
    /// Exit now
    ImmediateExit,
    Ignore,
}

/// Install the process-wide SIGINT/SIGTERM handler. `on_stop` runs on the
/// first signal.
pub fn install<F>(state: Arc<ShutdownState>, on_stop: F) -> Result<(), ctrlc::Error>
where
    F: Fn() + Send + 'static,
{
    ctrlc::set_handler(move || match state.handle_signal() {
        ShutdownAction::GracefulStop => {
            info!("received shutdown signal, draining workers (repeat to exit immediately)");
            on_stop();
        }
        ShutdownAction::ImmediateExit => {
            warn!("received second shutdown signal, exiting immediately");
            std::process::exit(EXIT_CODE_INTERRUPTED);
        }
        ShutdownAction::Ignore => {}
    })
}
