//! Deadline race for a single in-flight call.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// The deadline fired before the operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    pub deadline: Duration,
}

impl std::fmt::Display for Elapsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation timed out after {} ms", self.deadline.as_millis())
    }
}

impl std::error::Error for Elapsed {}

/// Races an operation against a timer.
///
/// The returned future resolves exactly once, with either the operation's output or
/// [`Elapsed`]. On timeout the operation future is dropped; work already handed to a
/// remote service may still finish there, but its result is discarded.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutRace {
    deadline: Duration,
}

impl TimeoutRace {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn run<F, T>(&self, operation: F) -> std::result::Result<T, Elapsed>
    where
        F: Future<Output = T>,
    {
        match tokio::time::timeout(self.deadline, operation).await {
            Ok(out) => Ok(out),
            Err(_) => {
                debug!(deadline_ms = self.deadline.as_millis() as u64, "operation abandoned at deadline");
                Err(Elapsed {
                    deadline: self.deadline,
                })
            }
        }
    }
}
