//! Spacing between device starts
//!
//! Devices are rate-limited so a fleet run doesn't hammer the management
//! plane. The default leaves a fixed gap between consecutive devices.

use crate::context::CancelFlag;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Gap used when no pacing is configured
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Longest uninterrupted sleep while waiting
const SLICE: Duration = Duration::from_millis(100);

/// Decides how long to wait before starting the next device
pub trait PacingPolicy: Send + Sync {
    /// Block until the next device may start
    ///
    /// `started` is the number of devices already started in this run.
    /// Returns early when `cancel` is raised.
    fn pace(&self, started: usize, cancel: &CancelFlag);
}

/// Fixed delay between devices; never before the first
#[derive(Debug)]
pub struct Interval {
    delay: Duration,
    gate: Mutex<()>,
}

impl Interval {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            gate: Mutex::new(()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl PacingPolicy for Interval {
    fn pace(&self, started: usize, cancel: &CancelFlag) {
        if started == 0 || self.delay.is_zero() {
            return;
        }
        // Concurrent workers queue on the gate, so starts stay spaced.
        let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        sleep_unless_cancelled(self.delay, cancel);
    }
}

/// Allows bursts of `capacity` starts, refilling one slot per `refill`
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    updated: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            refill,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                updated: Instant::now(),
            }),
        }
    }

    /// Take a token, or report how long until one is available
    fn try_take(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if !self.refill.is_zero() {
            let earned =
                now.duration_since(state.updated).as_secs_f64() / self.refill.as_secs_f64();
            state.tokens = (state.tokens + earned).min(f64::from(self.capacity));
        } else {
            state.tokens = f64::from(self.capacity);
        }
        state.updated = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            Err(self.refill.mul_f64(1.0 - state.tokens))
        }
    }
}

impl PacingPolicy for TokenBucket {
    fn pace(&self, _started: usize, cancel: &CancelFlag) {
        loop {
            match self.try_take() {
                Ok(()) => return,
                Err(wait) => {
                    if !sleep_unless_cancelled(wait, cancel) {
                        return;
                    }
                }
            }
        }
    }
}

/// No delay at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacing;

impl PacingPolicy for NoPacing {
    fn pace(&self, _started: usize, _cancel: &CancelFlag) {}
}

/// Sleep in short slices; false when interrupted by `cancel`
fn sleep_unless_cancelled(duration: Duration, cancel: &CancelFlag) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(SLICE.min(deadline - now));
    }
}
