//! Deterministic time for tests.
//!
//! [`ManualClock`] only moves when told to, and [`ManualSleeper`] records each
//! requested sleep and advances the clock instead of waiting. Together they let
//! retry and rate-limit behavior run instantly with exact timings.
//!
//! ```
//! use ai_analysis_cache::testing::{ManualClock, ManualSleeper};
//! use ai_analysis_cache::utils::Clock;
//! use std::sync::Arc;
//!
//! let clock = Arc::new(ManualClock::new(1_000));
//! let sleeper = ManualSleeper::new(clock.clone());
//! clock.advance_ms(500);
//! assert_eq!(clock.now_ms(), 1_500);
//! assert!(sleeper.sleeps().is_empty());
//! ```

use crate::resilience::retry::Sleeper;
use crate::utils::clock::Clock;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set_ms(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Records requested sleeps and advances a [`ManualClock`] instead of waiting.
pub struct ManualSleeper {
    clock: Arc<ManualClock>,
    slept: Mutex<Vec<Duration>>,
}

impl ManualSleeper {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            slept: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for ManualSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
        self.clock.advance_ms(duration.as_millis() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_moves_only_on_demand() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_ms(250);
        assert_eq!(clock.now_ms(), 1_250);
        clock.set_ms(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[tokio::test]
    async fn test_manual_sleeper_advances_clock() {
        let clock = Arc::new(ManualClock::new(0));
        let sleeper = ManualSleeper::new(clock.clone());
        sleeper.sleep(Duration::from_millis(1_500)).await;
        assert_eq!(clock.now_ms(), 1_500);
        assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(1_500)]);
    }
}
