//! Statement timeouts and cooperative cancellation
//!
//! A `TimeoutTimer` runs a countdown on its own thread. On expiry it only
//! flips the shared `CancellationToken`; the executing statement notices
//! the flag at its next check point and unwinds.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Shared cancellation flag. A flag raised by a timer remembers the
/// timeout so the interrupted operation can report it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    timeout_ms: Arc<AtomicU32>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Raise the flag on behalf of an expired timeout
    pub fn expire(&self, timeout_ms: u32) {
        self.timeout_ms.store(timeout_ms, Ordering::SeqCst);
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.timeout_ms.store(0, Ordering::SeqCst);
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Check point for long-running operations
    pub fn check(&self) -> Result<()> {
        if !self.is_cancelled() {
            return Ok(());
        }
        match self.timeout_ms.load(Ordering::SeqCst) {
            0 => Err(Error::Cancelled),
            timeout_ms => Err(Error::Timeout { timeout_ms }),
        }
    }
}

#[derive(Debug, Default)]
struct TimerState {
    stopped: bool,
    fired: bool,
}

#[derive(Debug, Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

/// Cancellable countdown bound to a statement execution
#[derive(Debug)]
pub struct TimeoutTimer {
    timeout_ms: u32,
    shared: Arc<TimerShared>,
    handle: Option<JoinHandle<()>>,
}

impl TimeoutTimer {
    /// Arm a countdown that cancels `token` after `timeout_ms`
    pub fn start(timeout_ms: u32, token: CancellationToken) -> Result<Self> {
        let shared = Arc::new(TimerShared::default());
        let thread_shared = Arc::clone(&shared);
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);

        let handle = std::thread::Builder::new()
            .name("keel-timeout".to_string())
            .spawn(move || {
                let mut state = thread_shared.state.lock();
                while !state.stopped {
                    if thread_shared.cond.wait_until(&mut state, deadline).timed_out() {
                        if !state.stopped {
                            state.fired = true;
                            token.expire(timeout_ms);
                            tracing::info!("Statement timeout of {} ms expired", timeout_ms);
                        }
                        break;
                    }
                }
            })
            .map_err(|e| Error::Internal(format!("cannot start timeout timer: {}", e)))?;

        Ok(Self {
            timeout_ms,
            shared,
            handle: Some(handle),
        })
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    pub fn expired(&self) -> bool {
        self.shared.state.lock().fired
    }

    /// Disarm the countdown and wait for the timer thread
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimeoutTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
