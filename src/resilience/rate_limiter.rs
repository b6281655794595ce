use crate::error_code::ErrorKind;
use crate::utils::clock::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Read-only snapshot of the shared rate-limit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub is_limited: bool,
    /// Remaining wait in ms; decreases as time passes. Zero when not limited.
    pub wait_time_ms: u64,
    pub consecutive_hits: u32,
}

impl RateLimitStatus {
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Wait applied on the first rate-limit signal that carries no retry-after.
    pub default_wait_ms: u64,
    /// Upper bound for any single wait, including provider-supplied retry-after values.
    pub max_wait_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_wait_ms: 60_000,
            max_wait_ms: 300_000,
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_wait(mut self, wait: Duration) -> Self {
        self.default_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait_ms = wait.as_millis() as u64;
        self
    }
}

#[derive(Debug, Default)]
struct State {
    consecutive_hits: u32,
    /// Epoch ms before which calls should not be attempted
    limited_until: Option<u64>,
}

/// Process-wide record of provider rate-limit signals.
///
/// - Shared by every in-flight request (wrap in `Arc`)
/// - Each signal extends the block window and counts a consecutive hit
/// - The block clears once its window elapses; hits reset only on success
pub struct RateLimitTracker {
    cfg: RateLimitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl RateLimitTracker {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(cfg: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg,
            clock,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // State stays consistent across a panic in another holder; keep serving it.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn default_wait_ms(&self, hits: u32) -> u64 {
        let factor = 1u64
            .checked_shl(hits.saturating_sub(1))
            .unwrap_or(u64::MAX);
        self.cfg.default_wait_ms.saturating_mul(factor)
    }

    /// Records a classified failure. Only `RateLimited` changes state.
    pub fn record(&self, kind: ErrorKind, retry_after: Option<Duration>) -> RateLimitStatus {
        if kind != ErrorKind::RateLimited {
            return self.status();
        }
        let now = self.clock.now_ms();
        let status = {
            let mut st = self.lock();
            st.consecutive_hits = st.consecutive_hits.saturating_add(1);
            let wait_ms = retry_after
                .map(|d| d.as_millis() as u64)
                .unwrap_or_else(|| self.default_wait_ms(st.consecutive_hits))
                .min(self.cfg.max_wait_ms);
            let until = now.saturating_add(wait_ms);
            st.limited_until = Some(st.limited_until.map_or(until, |prev| prev.max(until)));
            Self::snapshot_locked(&mut st, now)
        };
        warn!(
            consecutive_hits = status.consecutive_hits,
            wait_ms = status.wait_time_ms,
            "rate limit signal recorded"
        );
        status
    }

    /// Clears all rate-limit state after a successful call.
    pub fn record_success(&self) {
        let mut st = self.lock();
        if st.consecutive_hits > 0 || st.limited_until.is_some() {
            debug!(consecutive_hits = st.consecutive_hits, "rate limit state reset");
        }
        *st = State::default();
    }

    pub fn status(&self) -> RateLimitStatus {
        let now = self.clock.now_ms();
        let mut st = self.lock();
        Self::snapshot_locked(&mut st, now)
    }

    fn snapshot_locked(st: &mut State, now: u64) -> RateLimitStatus {
        match st.limited_until {
            Some(until) if until > now => RateLimitStatus {
                is_limited: true,
                wait_time_ms: until - now,
                consecutive_hits: st.consecutive_hits,
            },
            _ => {
                st.limited_until = None;
                RateLimitStatus {
                    is_limited: false,
                    wait_time_ms: 0,
                    consecutive_hits: st.consecutive_hits,
                }
            }
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;

    fn tracker() -> (RateLimitTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cfg = RateLimitConfig::new()
            .with_default_wait(Duration::from_secs(2))
            .with_max_wait(Duration::from_secs(10));
        (RateLimitTracker::with_clock(cfg, clock.clone()), clock)
    }

    #[test]
    fn test_initially_not_limited() {
        let (t, _) = tracker();
        assert_eq!(
            t.status(),
            RateLimitStatus {
                is_limited: false,
                wait_time_ms: 0,
                consecutive_hits: 0
            }
        );
    }

    #[test]
    fn test_retry_after_sets_wait_and_decays() {
        let (t, clock) = tracker();
        let st = t.record(ErrorKind::RateLimited, Some(Duration::from_millis(5_000)));
        assert!(st.is_limited);
        assert_eq!(st.wait_time_ms, 5_000);
        assert_eq!(st.consecutive_hits, 1);

        clock.advance_ms(1_500);
        assert_eq!(t.status().wait_time_ms, 3_500);

        clock.advance_ms(3_500);
        let st = t.status();
        assert!(!st.is_limited);
        assert_eq!(st.wait_time_ms, 0);
        assert_eq!(st.consecutive_hits, 1);
    }

    #[test]
    fn test_default_wait_escalates_and_caps() {
        let (t, clock) = tracker();
        assert_eq!(t.record(ErrorKind::RateLimited, None).wait_time_ms, 2_000);
        clock.advance_ms(2_000);
        assert_eq!(t.record(ErrorKind::RateLimited, None).wait_time_ms, 4_000);
        clock.advance_ms(4_000);
        assert_eq!(t.record(ErrorKind::RateLimited, None).wait_time_ms, 8_000);
        clock.advance_ms(8_000);
        assert_eq!(t.record(ErrorKind::RateLimited, None).wait_time_ms, 10_000);
        assert_eq!(
            t.record(ErrorKind::RateLimited, Some(Duration::from_secs(3_600)))
                .wait_time_ms,
            10_000
        );
    }

    #[test]
    fn test_shorter_signal_does_not_shrink_window() {
        let (t, _) = tracker();
        t.record(ErrorKind::RateLimited, Some(Duration::from_millis(8_000)));
        let st = t.record(ErrorKind::RateLimited, Some(Duration::from_millis(1_000)));
        assert_eq!(st.wait_time_ms, 8_000);
        assert_eq!(st.consecutive_hits, 2);
    }

    #[test]
    fn test_other_kinds_and_success() {
        let (t, _) = tracker();
        assert!(!t.record(ErrorKind::UpstreamUnavailable, None).is_limited);
        t.record(ErrorKind::RateLimited, None);
        t.record_success();
        assert_eq!(t.status().consecutive_hits, 0);
        assert!(!t.status().is_limited);
    }

    #[test]
    fn test_concurrent_signals_are_not_lost() {
        let (t, _) = tracker();
        let t = Arc::new(t);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = t.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        t.record(ErrorKind::RateLimited, Some(Duration::from_millis(10)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(t.status().consecutive_hits, 800);
    }
}
