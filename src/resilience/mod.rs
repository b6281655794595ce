//! 弹性模块：重试编排、共享限流状态与单次调用超时。
//!
//! # Resilience Primitives
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`retry`] | [`RetryOrchestrator`]: bounded, jittered exponential backoff driven by error classification |
//! | [`rate_limiter`] | [`RateLimitTracker`]: process-wide record of provider rate-limit signals |
//! | [`timeout`] | [`TimeoutRace`]: per-attempt deadline |
//!
//! The tracker is shared by every orchestrator in the process so that one caller's
//! rate-limit signal makes the others wait instead of spending attempts on a limit
//! that is already known.
//!
//! ```rust
//! use ai_analysis_cache::error_code::ErrorKind;
//! use ai_analysis_cache::resilience::RateLimitTracker;
//! use std::time::Duration;
//!
//! let tracker = RateLimitTracker::default();
//! tracker.record(ErrorKind::RateLimited, Some(Duration::from_secs(5)));
//! assert!(tracker.status().is_limited);
//! ```

pub mod rate_limiter;
pub mod retry;
pub mod timeout;

pub use rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimitTracker};
pub use retry::{
    ProgressFn, RetryConfig, RetryOrchestrator, RetryProgress, RetryState,
    Sleeper, TokioSleeper, WaitReason,
};
pub use timeout::{Elapsed, TimeoutRace};
