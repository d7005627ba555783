use crate::core::error::AutomationError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PAUSE_POLL: Duration = Duration::from_millis(250);

/// Cooperative pause/stop flags shared between the engine and its caller.
///
/// The engine polls [`RunControl::checkpoint`] at its suspension points
/// (start of each item, selection retries, download retries). Pausing keeps
/// the browser session; stopping ends the run at the next suspension point.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Suspension point: `Err(Stopped)` once stopped, otherwise blocks while
    /// paused and returns when resumed.
    pub async fn checkpoint(&self) -> Result<(), AutomationError> {
        loop {
            if self.is_stopped() {
                return Err(AutomationError::Stopped);
            }
            if !self.is_paused() {
                return Ok(());
            }
            tokio::time::sleep(PAUSE_POLL).await;
        }
    }
}
