use crate::config::EngineConfig;
use crate::error::{OlapError, OlapResult};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// The clock is only consulted every this many checks.
const DEADLINE_CHECK_INTERVAL: u32 = 256;

/// Cancellation and timeout state for one query execution.
///
/// `cancel` may be called from any thread; evaluation loops call [`Execution::check`] once per
/// tuple.
#[derive(Debug)]
pub struct Execution {
    cancelled: AtomicBool,
    started: Instant,
    timeout: Option<Duration>,
    ticks: AtomicU32,
}

impl Default for Execution {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Execution {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            started: Instant::now(),
            timeout,
            ticks: AtomicU32::new(0),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.query_timeout())
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fails with [`OlapError::Cancelled`] or [`OlapError::Timeout`] once either is triggered.
    #[inline]
    pub fn check(&self) -> OlapResult<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(OlapError::Cancelled);
        }
        if let Some(timeout) = self.timeout {
            let tick = self.ticks.fetch_add(1, Ordering::Relaxed);
            if tick % DEADLINE_CHECK_INTERVAL == 0 && self.started.elapsed() >= timeout {
                return Err(OlapError::Timeout(timeout));
            }
        }
        Ok(())
    }
}
